use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{config_builder, init_tracing, RecordingProgress},
    mock_upstream::{MockDex, MockUpstreamServer},
};
use anyhow::{Context, Result};
use pairsnap::{IngestError, PairStore, RunStage, Runner};
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_completes_snapshot() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(2_005, 120);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path())
        .page_size(50)
        .file_prefix("pairs")
        .build()?;
    let progress = Arc::new(RecordingProgress::default());
    let runner = Runner::new(config).with_progress(progress.clone());

    let summary = timeout(Duration::from_secs(10), runner.run())
        .await
        .context("runner should finish")??;
    assert_eq!(summary.height, 2_000);
    assert_eq!(summary.records, 120);
    assert_eq!(summary.destination, dir.path().join("pairs.2000"));
    assert_eq!(progress.rendered().last().map(String::as_str), Some("120/120"));
    assert_eq!(runner.telemetry().records(), 120);

    let store = PairStore::open(&summary.destination)?;
    assert_eq!(store.row_count()?, 120);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rpc_outage_aborts_while_resolving() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(2_005, 10);
    dex.take_rpc_down();
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).build()?;
    let runner = Runner::new(config);

    let aborted = timeout(Duration::from_secs(10), runner.run())
        .await
        .context("runner should stop")?
        .expect_err("rpc outage should abort");
    assert_eq!(aborted.stage(), RunStage::Resolving);
    assert_eq!(aborted.height(), None);
    assert_eq!(aborted.persisted(), 0);
    assert!(matches!(
        aborted.cause().downcast_ref::<IngestError>(),
        Some(IngestError::UpstreamUnavailable { service: "chain rpc", .. })
    ));
    assert!(dex.queried_heights().is_empty());
    assert!(
        std::fs::read_dir(dir.path())?.next().is_none(),
        "no destination file should be created"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_interrupts_retry_sleep() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(2_005, 10);
    dex.outage_after_pages(0);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path())
        .retry_delay(Duration::from_secs(30))
        .max_retry_delay(Duration::from_secs(30))
        .build()?;
    let runner = Runner::new(config);
    let token = runner.cancellation_token();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let aborted = timeout(Duration::from_secs(5), runner.run())
        .await
        .context("cancellation should cut the 30s backoff short")?
        .expect_err("cancelled run reports abort");
    canceller.await?;

    assert_eq!(aborted.stage(), RunStage::Paging);
    assert_eq!(
        aborted.cause().downcast_ref::<IngestError>(),
        Some(&IngestError::Cancelled)
    );

    server.shutdown().await;
    Ok(())
}
