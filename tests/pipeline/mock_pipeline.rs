use std::sync::Arc;

use crate::support::{
    helpers::{assert_strictly_ascending, config_builder, init_tracing, RecordingProgress},
    mock_upstream::{MockDex, MockUpstreamServer},
};
use anyhow::Result;
use pairsnap::{
    ChainRpcClient, IngestError, Ingestor, PairStore, RunStage, SubgraphClient, Telemetry,
};
use tempfile::TempDir;

const TIP: u64 = 18_000_005;
const TARGET: u64 = 18_000_000;

fn clients(server: &MockUpstreamServer) -> Result<(Arc<ChainRpcClient>, Arc<SubgraphClient>)> {
    Ok((
        Arc::new(ChainRpcClient::new(server.rpc_url())?),
        Arc::new(SubgraphClient::new(server.subgraph_url())?),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_pages_through_every_pair() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(TIP, 2_500);
    dex.set_pair_count(350_000);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).build()?;
    let (tip, source) = clients(&server)?;
    let progress = Arc::new(RecordingProgress::default());
    let mut ingestor = Ingestor::new(config, tip, source).with_progress(progress.clone());

    let summary = ingestor.run().await?;
    assert_eq!(ingestor.stage(), RunStage::Done);
    assert_eq!(summary.height, TARGET);
    assert_eq!(summary.records, 2_500);
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.destination, dir.path().join(format!("db.{TARGET}")));
    assert_eq!(
        progress.rendered(),
        ["1000/350000", "2000/350000", "2500/350000"]
    );

    assert!(dex.queried_heights().iter().all(|height| *height == TARGET));
    assert_eq!(dex.page_requests(), 4, "three data pages and one empty page");

    let store = PairStore::open(&summary.destination)?;
    let ids = store.ids()?;
    assert_eq!(ids, dex.pair_ids());
    assert_strictly_ascending(&ids);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_subgraph_failures_are_absorbed() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(1_005, 250);
    dex.fail_next_pages(3);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).page_size(100).build()?;
    let (tip, source) = clients(&server)?;
    let telemetry = Arc::new(Telemetry::default());
    let mut ingestor = Ingestor::new(config, tip, source.clone()).with_telemetry(telemetry.clone());

    let summary = ingestor.run().await?;
    assert_eq!(summary.records, 250);
    assert_eq!(telemetry.retries(), 3);
    assert_eq!(telemetry.pages(), 3);
    assert!(source.metrics().total_errors >= 3);

    let store = PairStore::open(&summary.destination)?;
    assert_eq!(store.row_count()?, 250);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persistent_outage_aborts_while_paging() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(1_005, 500);
    dex.outage_after_pages(2);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).page_size(100).build()?;
    let (tip, source) = clients(&server)?;
    let mut ingestor = Ingestor::new(config, tip, source);

    let aborted = ingestor
        .run()
        .await
        .expect_err("outage should exhaust the retry budget");
    assert_eq!(aborted.stage(), RunStage::Paging);
    assert_eq!(aborted.height(), Some(1_000));
    assert_eq!(aborted.persisted(), 200);
    assert!(matches!(
        aborted.cause().downcast_ref::<IngestError>(),
        Some(IngestError::FetchExhausted { attempts: 4, .. })
    ));
    // two good pages, then the full budget on the third
    assert_eq!(dex.page_requests(), 2 + 4);

    let destination = aborted
        .destination()
        .expect("destination is known once preparing ran")
        .to_path_buf();
    let store = PairStore::open(destination)?;
    assert_eq!(store.row_count()?, 200);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_record_aborts_without_retrying() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(1_005, 250);
    dex.null_symbol_at(150);
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).page_size(100).build()?;
    let (tip, source) = clients(&server)?;
    let telemetry = Arc::new(Telemetry::default());
    let mut ingestor = Ingestor::new(config, tip, source).with_telemetry(telemetry.clone());

    let aborted = ingestor
        .run()
        .await
        .expect_err("a null symbol cannot be stored");
    assert_eq!(aborted.stage(), RunStage::Paging);
    assert_eq!(aborted.persisted(), 100);
    let expected_id = format!("0x{:040x}", 150);
    assert!(matches!(
        aborted.cause().downcast_ref::<IngestError>(),
        Some(IngestError::InvalidRecord { id, .. }) if *id == expected_id
    ));
    assert_eq!(dex.page_requests(), 2, "the bad page is requested once");
    assert_eq!(telemetry.retries(), 0);
    assert_eq!(telemetry.upstream_errors(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degraded_baseline_keeps_ingesting() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(505, 30);
    dex.fail_pair_count();
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path())
        .page_size(20)
        .baseline_policy(pairsnap::BaselinePolicy::Degrade)
        .build()?;
    let (tip, source) = clients(&server)?;
    let progress = Arc::new(RecordingProgress::default());
    let mut ingestor = Ingestor::new(config, tip, source).with_progress(progress.clone());

    let summary = ingestor.run().await?;
    assert_eq!(summary.baseline, None);
    assert_eq!(summary.records, 30);
    assert_eq!(progress.rendered(), ["20/?", "30/?"]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn baseline_failure_aborts_by_default() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(505, 30);
    dex.fail_pair_count();
    let server = MockUpstreamServer::start(dex.clone()).await?;
    let dir = TempDir::new()?;

    let config = config_builder(&server, dir.path()).build()?;
    let (tip, source) = clients(&server)?;
    let mut ingestor = Ingestor::new(config, tip, source);

    let aborted = ingestor.run().await.expect_err("baseline failure is fatal");
    assert_eq!(aborted.stage(), RunStage::Counting);
    assert_eq!(dex.page_requests(), 0);
    let message = format!("{aborted}");
    assert!(
        message.contains("indexer has not reached"),
        "graphql error should surface, got {message}"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_page_is_refused() -> Result<()> {
    init_tracing();
    let dex = MockDex::new(1_005, 50);
    let server = MockUpstreamServer::start(dex.clone()).await?;

    let options = pairsnap::RpcClientOptions {
        max_response_body_bytes: 4_096,
        ..pairsnap::RpcClientOptions::default()
    };
    let client = SubgraphClient::with_options(server.subgraph_url(), options)?;

    let err = client
        .pairs_page(1_000, 50, "")
        .await
        .expect_err("fifty pairs do not fit in 4 KiB");
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::UpstreamUnavailable { reason, .. }) if reason.contains("4096 byte limit")
    ));

    let page = client.pairs_page(1_000, 2, "").await?;
    assert_eq!(page.len(), 2);

    server.shutdown().await;
    Ok(())
}
