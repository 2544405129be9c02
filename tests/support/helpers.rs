use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use pairsnap::{IngestConfig, IngestConfigBuilder, ProgressObservation, ProgressSink};
use tracing_subscriber::EnvFilter;

use super::mock_upstream::MockUpstreamServer;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Config pointed at `server`, writing into `output_dir`, with retry delays
/// short enough for tests.
pub fn config_builder(server: &MockUpstreamServer, output_dir: &Path) -> IngestConfigBuilder {
    IngestConfig::builder()
        .rpc_url(server.rpc_url())
        .subgraph_url(server.subgraph_url())
        .output_dir(output_dir)
        .max_attempts(4)
        .retry_delay(Duration::from_millis(5))
        .max_retry_delay(Duration::from_millis(20))
        .request_timeout(Duration::from_secs(5))
        .metrics_interval(Duration::from_millis(50))
}

#[derive(Default)]
pub struct RecordingProgress {
    observations: Mutex<Vec<ProgressObservation>>,
}

impl RecordingProgress {
    pub fn rendered(&self) -> Vec<String> {
        self.observations
            .lock()
            .expect("progress mutex poisoned")
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn observe(&self, observation: &ProgressObservation) {
        self.observations
            .lock()
            .expect("progress mutex poisoned")
            .push(*observation);
    }
}

pub fn assert_strictly_ascending(ids: &[String]) {
    for window in ids.windows(2) {
        if let [lhs, rhs] = window {
            assert!(lhs < rhs, "ids must increase strictly: {lhs} !< {rhs}");
        }
    }
}
