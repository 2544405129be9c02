use crate::processor::ingestor::{Ingestor, RunSummary};
use crate::rpc::{ChainRpcClient, RpcClientOptions};
use crate::runtime::config::IngestConfig;
use crate::runtime::progress::{LogProgress, ProgressSink};
use crate::runtime::stage::{RunAborted, RunStage};
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::subgraph::SubgraphClient;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Wires the HTTP clients, the metrics reporter and OS signal handling
/// around a single [`Ingestor`] run.
pub struct Runner {
    config: IngestConfig,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
    progress: Arc<dyn ProgressSink>,
}

impl Runner {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            telemetry: Arc::new(Telemetry::default()),
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Runs one snapshot to completion or abort.
    pub async fn run(&self) -> Result<RunSummary, RunAborted> {
        let options = RpcClientOptions::with_timeout(self.config.request_timeout());
        let tip = ChainRpcClient::with_options(self.config.rpc_url(), options.clone())
            .map_err(|err| RunAborted::new(RunStage::Resolving, err))?;
        let source = SubgraphClient::with_options(self.config.subgraph_url(), options)
            .map_err(|err| RunAborted::new(RunStage::Resolving, err))?;
        let tip = Arc::new(tip);
        let source = Arc::new(source);

        let reporter_token = self.shutdown.child_token();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            reporter_token.clone(),
            self.config.metrics_interval(),
        );

        let mut ingestor = Ingestor::new(self.config.clone(), tip.clone(), source.clone())
            .with_telemetry(self.telemetry.clone())
            .with_cancellation(self.shutdown.clone())
            .with_progress(self.progress.clone());
        let outcome = ingestor.run().await;

        reporter_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        let rpc = tip.metrics();
        let subgraph = source.metrics();
        tracing::info!(
            target: "pairsnap::metrics",
            rpc_requests = rpc.total_requests,
            rpc_errors = rpc.total_errors,
            subgraph_requests = subgraph.total_requests,
            subgraph_errors = subgraph.total_errors,
            subgraph_timeouts = subgraph.total_timeouts,
            subgraph_avg_latency_ms = format!("{:.2}", subgraph.average_latency_ms),
            "upstream request totals"
        );

        outcome
    }

    /// Runs until the snapshot finishes or a Ctrl-C (SIGINT) is received, in
    /// which case the run is cancelled and reported as aborted.
    pub async fn run_until_ctrl_c(&self) -> Result<RunSummary, RunAborted> {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            outcome = &mut run => outcome,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; cancelling run");
                self.shutdown.cancel();
                run.await
            }
        }
    }
}
