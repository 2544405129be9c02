//! SQLite persistence for pair snapshots.

pub mod schema;
pub mod store;

pub use schema::PAIRS_TABLE;
pub use store::{snapshot_path, PairStore};
