//! Failure taxonomy shared by every stage of an ingestion run.
//!
//! Errors travel through the pipeline as `anyhow::Error`; callers recover the
//! typed variant with `downcast_ref::<IngestError>()` when they need to decide
//! between retrying and aborting.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The chain RPC or the query API could not answer.
    UpstreamUnavailable {
        service: &'static str,
        reason: String,
    },
    /// The chain tip is lower than the configured safety lag.
    TipBelowLag { tip: u64, lag: u64 },
    /// The page fetch retry budget was consumed.
    FetchExhausted {
        attempts: usize,
        after_id: String,
        last_error: String,
    },
    /// A page did not move the cursor strictly forward.
    NonProgressingCursor { after_id: String, offending_id: String },
    /// The destination table exists with an incompatible layout.
    SchemaError { table: &'static str, detail: String },
    /// An insert collided with an existing primary key.
    DuplicateKey { id: String },
    /// An upstream record failed strict parsing.
    InvalidRecord {
        id: String,
        field: &'static str,
        value: String,
    },
    /// The query API answered with a body that does not have the expected
    /// shape. Asking again returns the same bytes.
    MalformedResponse {
        service: &'static str,
        detail: String,
    },
    /// The run was cancelled while waiting on a blocking call.
    Cancelled,
}

impl IngestError {
    /// Returns `true` when retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::UpstreamUnavailable { .. })
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::UpstreamUnavailable { service, reason } => {
                write!(f, "{service} unavailable: {reason}")
            }
            IngestError::TipBelowLag { tip, lag } => {
                write!(f, "chain tip {tip} is below the safety lag of {lag} blocks")
            }
            IngestError::FetchExhausted {
                attempts,
                after_id,
                last_error,
            } => write!(
                f,
                "page fetch after id {after_id:?} failed {attempts} times; last error: {last_error}"
            ),
            IngestError::NonProgressingCursor {
                after_id,
                offending_id,
            } => write!(
                f,
                "cursor did not advance: key {offending_id:?} is not greater than {after_id:?}"
            ),
            IngestError::SchemaError { table, detail } => {
                write!(f, "table {table} has a conflicting schema: {detail}")
            }
            IngestError::DuplicateKey { id } => write!(f, "duplicate primary key {id}"),
            IngestError::InvalidRecord { id, field, value } => {
                write!(f, "record {id} has invalid {field}: {value:?}")
            }
            IngestError::MalformedResponse { service, detail } => {
                write!(f, "{service} returned a malformed response: {detail}")
            }
            IngestError::Cancelled => write!(f, "ingestion cancelled"),
        }
    }
}

impl std::error::Error for IngestError {}
