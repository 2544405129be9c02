//! Runtime glue that wires configuration, run stages, progress reporting,
//! telemetry, and runner orchestration.

pub mod config;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod telemetry;
