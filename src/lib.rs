pub mod error;
pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod storage;
pub mod subgraph;
pub mod types;

pub use error::IngestError;
pub use processor::baseline::{BaselineCounter, BaselinePolicy};
pub use processor::fetcher::{PairSource, RetryPolicy, RetryingFetcher};
pub use processor::height::{HeightResolver, TipSource};
pub use processor::ingestor::{Ingestor, RunSummary};
pub use rpc::{ChainRpcClient, RpcClientOptions, RpcError};
pub use runtime::config::{IngestConfig, IngestConfigBuilder, IngestConfigParams};
pub use runtime::progress::{IngestionRun, LogProgress, ProgressObservation, ProgressSink};
pub use runtime::runner::Runner;
pub use runtime::stage::{RunAborted, RunStage};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use storage::{snapshot_path, PairStore};
pub use subgraph::SubgraphClient;
pub use types::TradingPairSnapshot;
