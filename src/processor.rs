//! Run processing: height resolution, baseline counting, retried keyset
//! paging, and the orchestrating state machine.

pub mod backoff;
pub mod baseline;
pub mod fetcher;
pub mod height;
pub mod ingestor;
