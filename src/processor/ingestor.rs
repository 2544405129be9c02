//! Run orchestration for a single snapshot.
//!
//! An [`Ingestor`] walks `Resolving -> Preparing -> Counting -> Paging -> Done`.
//! Any failure moves it to `Aborted` and surfaces as a [`RunAborted`] that
//! names the stage and how many records were committed before it.

use super::baseline::BaselineCounter;
use super::fetcher::{PairSource, RetryingFetcher};
use super::height::{HeightResolver, TipSource};
use crate::error::IngestError;
use crate::runtime::config::IngestConfig;
use crate::runtime::progress::{IngestionRun, LogProgress, ProgressSink};
use crate::runtime::stage::{RunAborted, RunStage};
use crate::runtime::telemetry::Telemetry;
use crate::storage::PairStore;
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub height: u64,
    pub records: u64,
    pub pages: u64,
    pub baseline: Option<u64>,
    pub destination: PathBuf,
    pub elapsed: Duration,
}

/// What is known about a run at the moment it fails.
#[derive(Default)]
struct Checkpoint {
    height: Option<u64>,
    destination: Option<PathBuf>,
    persisted: u64,
}

pub struct Ingestor<T, S> {
    config: IngestConfig,
    resolver: HeightResolver<T>,
    baseline: BaselineCounter<S>,
    fetcher: RetryingFetcher<S>,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
    progress: Arc<dyn ProgressSink>,
    stage: RunStage,
}

impl<T: TipSource, S: PairSource> Ingestor<T, S> {
    pub fn new(config: IngestConfig, tip: Arc<T>, source: Arc<S>) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let cancellation = CancellationToken::new();
        let resolver = HeightResolver::new(tip, config.height_lag());
        let baseline = BaselineCounter::new(source.clone(), config.baseline_policy());
        let fetcher = RetryingFetcher::new(source, config.retry_policy())
            .with_telemetry(telemetry.clone())
            .with_cancellation(cancellation.clone());

        Self {
            config,
            resolver,
            baseline,
            fetcher,
            telemetry,
            cancellation,
            progress: Arc::new(LogProgress),
            stage: RunStage::Resolving,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.fetcher = self.fetcher.with_telemetry(telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    /// Shares `token` with the retry loop so a cancelled run stops sleeping.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.fetcher = self.fetcher.with_cancellation(token.clone());
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Current stage; `Done` or `Aborted` once [`Ingestor::run`] returns.
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Executes one full run. The destination connection is released on
    /// every exit path.
    pub async fn run(&mut self) -> Result<RunSummary, RunAborted> {
        let mut checkpoint = Checkpoint::default();
        match self.drive(&mut checkpoint).await {
            Ok(summary) => {
                self.stage = RunStage::Done;
                tracing::info!(
                    height = summary.height,
                    records = summary.records,
                    pages = summary.pages,
                    destination = %summary.destination.display(),
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "snapshot complete"
                );
                Ok(summary)
            }
            Err(err) => {
                let failed_at = self.stage;
                self.stage = RunStage::Aborted;
                tracing::error!(
                    stage = %failed_at,
                    height = ?checkpoint.height,
                    persisted = checkpoint.persisted,
                    error = %format!("{err:#}"),
                    "snapshot aborted"
                );

                let mut aborted =
                    RunAborted::new(failed_at, err).with_persisted(checkpoint.persisted);
                if let Some(height) = checkpoint.height {
                    aborted = aborted.with_height(height);
                }
                if let Some(destination) = checkpoint.destination {
                    aborted = aborted.with_destination(destination);
                }
                Err(aborted)
            }
        }
    }

    async fn drive(&mut self, checkpoint: &mut Checkpoint) -> Result<RunSummary> {
        let started = Instant::now();

        self.enter(RunStage::Resolving)?;
        let height = self.guard(self.resolver.resolve()).await?;
        checkpoint.height = Some(height);
        let mut run = IngestionRun::new(height);

        self.enter(RunStage::Preparing)?;
        let destination = self.config.destination(height);
        checkpoint.destination = Some(destination.clone());
        let mut store = PairStore::create_fresh(&destination)?;
        store.initialize()?;

        self.enter(RunStage::Counting)?;
        let baseline = self.guard(self.baseline.count(height)).await?;
        run.set_baseline(baseline);

        self.enter(RunStage::Paging)?;
        let page_size = self.config.page_size();
        loop {
            if self.cancellation.is_cancelled() {
                return Err(IngestError::Cancelled.into());
            }

            let page = self.fetcher.fetch(height, page_size, run.cursor()).await?;
            let Some(last) = page.last() else {
                tracing::debug!(height, cursor = run.cursor(), "empty page; key space exhausted");
                break;
            };

            let written = store
                .append(&page)
                .with_context(|| format!("failed to persist page after {:?}", run.cursor()))?;
            run.advance(&last.id, written);
            checkpoint.persisted = run.records();
            self.telemetry.record_page(written);

            tracing::debug!(
                height,
                cursor = run.cursor(),
                records = run.records(),
                pages = run.pages(),
                "page persisted"
            );
            self.progress.observe(&run.observation());
        }

        store.close()?;

        Ok(RunSummary {
            height,
            records: run.records(),
            pages: run.pages(),
            baseline: run.baseline(),
            destination,
            elapsed: started.elapsed(),
        })
    }

    fn enter(&mut self, stage: RunStage) -> Result<()> {
        self.stage = stage;
        if self.cancellation.is_cancelled() {
            return Err(IngestError::Cancelled.into());
        }
        tracing::debug!(stage = %stage, "entering stage");
        Ok(())
    }

    /// Races `future` against run cancellation.
    async fn guard<R>(&self, future: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(IngestError::Cancelled.into()),
            result = future => result,
        }
    }
}
