//! JSON-RPC client for the live chain node. The ingestion run only ever asks
//! it one question: the current block height.

use crate::processor::height::TipSource;
use crate::rpc::metrics::{RequestMetrics, RequestMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const BLOCK_NUMBER_METHOD: &str = "eth_blockNumber";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    Call { method: &'static str, reason: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Call { method, reason } => write!(f, "rpc {method} call failed: {reason}"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct ChainRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RequestMetrics>,
}

impl TipSource for ChainRpcClient {
    fn current_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.block_number())
    }
}

impl ChainRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RequestMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RequestMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Queries the node for its current tip. Performs exactly one request;
    /// callers decide whether a failure is worth retrying.
    pub async fn block_number(&self) -> Result<u64> {
        let start = Instant::now();
        let response: Result<String> = match timeout(
            self.options.request_timeout,
            self.client.request(BLOCK_NUMBER_METHOD, rpc_params![]),
        )
        .await
        {
            Ok(result) => result.map_err(|err| map_rpc_error(BLOCK_NUMBER_METHOD, err)),
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                return Err(RpcError::Timeout {
                    method: BLOCK_NUMBER_METHOD,
                }
                .into());
            }
        };

        let raw = match response {
            Ok(raw) => raw,
            Err(err) => {
                self.metrics.record_failure(start.elapsed());
                return Err(err);
            }
        };
        self.metrics.record_success(start.elapsed());

        let height = parse_hex_quantity(&raw)
            .with_context(|| format!("invalid {BLOCK_NUMBER_METHOD} result {raw:?}"))?;
        tracing::debug!(endpoint = %self.rpc_url, tip = height, "fetched chain tip");
        Ok(height)
    }
}

/// Decodes an Ethereum JSON-RPC quantity (`0x`-prefixed hex, no leading zeros
/// required) into a `u64`.
pub fn parse_hex_quantity(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("quantity must start with 0x"))?;
    if digits.is_empty() {
        bail!("quantity has no digits");
    }
    u64::from_str_radix(digits, 16).context("quantity is not valid hex")
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if matches!(err, JsonRpcError::RequestTimeout) {
        return RpcError::Timeout { method }.into();
    }
    RpcError::Call {
        method,
        reason: err.to_string(),
    }
    .into()
}
