//! HTTP client for the pair subgraph. Implements both query shapes the
//! ingestion run needs: the pair count at a height and one keyset page.

use crate::error::IngestError;
use crate::processor::fetcher::PairSource;
use crate::rpc::metrics::{RequestMetrics, RequestMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::subgraph::payload::{
    GraphQlRequest, GraphQlResponse, PairCountData, PairsData, RawPair, PAIRS_PAGE_QUERY,
    PAIR_COUNT_QUERY,
};
use crate::types::TradingPairSnapshot;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

const SERVICE: &str = "subgraph";

#[derive(Debug, Clone)]
pub struct SubgraphClient {
    url: Arc<String>,
    http: reqwest::Client,
    options: RpcClientOptions,
    metrics: Arc<RequestMetrics>,
}

impl PairSource for SubgraphClient {
    fn pair_count(&self, height: u64) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.pair_count(height))
    }

    fn fetch_page<'a>(
        &'a self,
        height: u64,
        page_size: usize,
        after_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TradingPairSnapshot>>> {
        Box::pin(self.pairs_page(height, page_size, after_id))
    }
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build subgraph HTTP client: {err}"))?;

        Ok(Self {
            url: Arc::new(url.into()),
            http,
            options,
            metrics: Arc::new(RequestMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub fn metrics(&self) -> RequestMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn pair_count(&self, height: u64) -> Result<u64> {
        let request = GraphQlRequest {
            query: PAIR_COUNT_QUERY,
            variables: json!({ "blockNumber": height }),
        };
        let data: PairCountData = self.execute("pairCount", request).await?;

        let factory = data
            .uniswap_factories
            .first()
            .ok_or_else(|| unavailable(format!("no factory entity at height {height}")))?;
        factory
            .pair_count
            .to_u64()
            .ok_or_else(|| unavailable(format!("pairCount {:?} is not an integer", factory.pair_count)))
    }

    pub async fn pairs_page(
        &self,
        height: u64,
        page_size: usize,
        after_id: &str,
    ) -> Result<Vec<TradingPairSnapshot>> {
        let request = GraphQlRequest {
            query: PAIRS_PAGE_QUERY,
            variables: json!({
                "block": height,
                "first": page_size,
                "lastId": after_id,
            }),
        };
        let data: PairsData = self.execute("pairs", request).await?;

        let mut page = Vec::with_capacity(data.pairs.len());
        for raw in data.pairs {
            page.push(RawPair::decode(raw)?);
        }

        tracing::debug!(
            height,
            after_id,
            records = page.len(),
            "subgraph page fetched"
        );
        Ok(page)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        label: &'static str,
        request: GraphQlRequest,
    ) -> Result<T> {
        let start = Instant::now();
        match self.execute_once(label, request).await {
            Ok(value) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
            Err(err) => {
                let timed_out = err
                    .downcast_ref::<reqwest::Error>()
                    .map(reqwest::Error::is_timeout)
                    .unwrap_or(false);
                if timed_out {
                    self.metrics.record_timeout(start.elapsed());
                } else {
                    self.metrics.record_failure(start.elapsed());
                }
                if err.downcast_ref::<IngestError>().is_some() {
                    return Err(err);
                }
                Err(unavailable(format!("{label} query failed: {err:#}")))
            }
        }
    }

    async fn execute_once<T: DeserializeOwned>(
        &self,
        label: &'static str,
        request: GraphQlRequest,
    ) -> Result<T> {
        let mut response = self
            .http
            .post(self.url.as_str())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let limit = self.options.max_response_body_bytes;
        if let Some(declared) = response.content_length() {
            if declared > limit as u64 {
                return Err(anyhow!(
                    "{label} response of {declared} bytes exceeds the {limit} byte limit"
                ));
            }
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(anyhow!("{label} response exceeds the {limit} byte limit"));
            }
            body.extend_from_slice(&chunk);
        }

        let envelope: GraphQlResponse<Value> = serde_json::from_slice(&body)
            .map_err(|err| malformed(format!("{label} envelope: {err}")))?;
        if !envelope.errors.is_empty() {
            let messages: Vec<&str> = envelope
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect();
            return Err(anyhow!("graphql errors: {}", messages.join("; ")));
        }

        let data = envelope
            .data
            .filter(|data| !data.is_null())
            .ok_or_else(|| anyhow!("{label} response carried no data"))?;
        serde_json::from_value(data).map_err(|err| malformed(format!("{label} data: {err}")))
    }
}

fn malformed(detail: String) -> anyhow::Error {
    IngestError::MalformedResponse {
        service: SERVICE,
        detail,
    }
    .into()
}

fn unavailable(reason: String) -> anyhow::Error {
    IngestError::UpstreamUnavailable {
        service: SERVICE,
        reason,
    }
    .into()
}
