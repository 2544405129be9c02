//! Chain node JSON-RPC plumbing: the client, its transport options, and
//! request metrics shared with the subgraph client.

pub mod client;
pub mod metrics;
pub mod options;

pub use client::{parse_hex_quantity, ChainRpcClient, RpcError};
pub use metrics::RequestMetricsSnapshot;
pub use options::RpcClientOptions;
