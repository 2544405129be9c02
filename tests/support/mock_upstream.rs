use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const GRAPHQL_PATH: &str = "/subgraphs/name/uniswap-v2";
const NO_LIMIT: usize = usize::MAX;

/// In-memory DEX state served by [`MockUpstreamServer`]: a chain tip for the
/// JSON-RPC side and a sorted pair key space for the GraphQL side.
#[derive(Clone)]
pub struct MockDex {
    inner: Arc<MockDexInner>,
}

struct MockDexInner {
    tip: AtomicU64,
    pairs: Vec<Value>,
    pair_count: AtomicU64,
    count_fails: AtomicBool,
    rpc_down: AtomicBool,
    transient_page_failures: AtomicUsize,
    pages_before_outage: AtomicUsize,
    null_symbol_at: AtomicUsize,
    pages_served: AtomicUsize,
    page_requests: AtomicUsize,
    heights: Mutex<Vec<u64>>,
}

impl MockDex {
    /// `count` pairs with ascending ids and a matching pair count.
    pub fn new(tip: u64, count: usize) -> Self {
        let pairs = (0..count).map(pair_fixture).collect();
        Self {
            inner: Arc::new(MockDexInner {
                tip: AtomicU64::new(tip),
                pairs,
                pair_count: AtomicU64::new(count as u64),
                count_fails: AtomicBool::new(false),
                rpc_down: AtomicBool::new(false),
                transient_page_failures: AtomicUsize::new(0),
                pages_before_outage: AtomicUsize::new(NO_LIMIT),
                null_symbol_at: AtomicUsize::new(NO_LIMIT),
                pages_served: AtomicUsize::new(0),
                page_requests: AtomicUsize::new(0),
                heights: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_pair_count(&self, count: u64) {
        self.inner.pair_count.store(count, Ordering::SeqCst);
    }

    /// Makes the pair count query answer with a GraphQL error.
    pub fn fail_pair_count(&self) {
        self.inner.count_fails.store(true, Ordering::SeqCst);
    }

    /// Makes `eth_blockNumber` answer with HTTP 503.
    pub fn take_rpc_down(&self) {
        self.inner.rpc_down.store(true, Ordering::SeqCst);
    }

    /// The next `count` page requests answer with HTTP 503.
    pub fn fail_next_pages(&self, count: usize) {
        self.inner
            .transient_page_failures
            .store(count, Ordering::SeqCst);
    }

    /// After `pages` successful pages, every page request answers with HTTP 503.
    pub fn outage_after_pages(&self, pages: usize) {
        self.inner.pages_before_outage.store(pages, Ordering::SeqCst);
    }

    /// Serves the pair at `index` with a null `token0.symbol`.
    pub fn null_symbol_at(&self, index: usize) {
        self.inner.null_symbol_at.store(index, Ordering::SeqCst);
    }

    pub fn page_requests(&self) -> usize {
        self.inner.page_requests.load(Ordering::SeqCst)
    }

    /// Heights named by every GraphQL request so far.
    pub fn queried_heights(&self) -> Vec<u64> {
        self.inner
            .heights
            .lock()
            .expect("mock dex poisoned")
            .clone()
    }

    pub fn pair_ids(&self) -> Vec<String> {
        self.inner
            .pairs
            .iter()
            .filter_map(|pair| pair.get("id").and_then(Value::as_str).map(str::to_owned))
            .collect()
    }

    fn tip(&self) -> Option<u64> {
        if self.inner.rpc_down.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.inner.tip.load(Ordering::SeqCst))
    }

    fn record_height(&self, height: Option<u64>) {
        if let Some(height) = height {
            self.inner
                .heights
                .lock()
                .expect("mock dex poisoned")
                .push(height);
        }
    }

    fn take_transient_failure(&self) -> bool {
        self.inner
            .transient_page_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    fn page(&self, first: usize, last_id: &str) -> Option<Vec<Value>> {
        self.inner.page_requests.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return None;
        }
        let limit = self.inner.pages_before_outage.load(Ordering::SeqCst);
        if self.inner.pages_served.load(Ordering::SeqCst) >= limit {
            return None;
        }
        self.inner.pages_served.fetch_add(1, Ordering::SeqCst);

        let corrupt = self.inner.null_symbol_at.load(Ordering::SeqCst);
        Some(
            self.inner
                .pairs
                .iter()
                .enumerate()
                .filter(|(_, pair)| {
                    pair.get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| id > last_id)
                })
                .take(first)
                .map(|(index, pair)| {
                    let mut pair = pair.clone();
                    if index == corrupt {
                        pair["token0"]["symbol"] = Value::Null;
                    }
                    pair
                })
                .collect(),
        )
    }
}

fn pair_fixture(index: usize) -> Value {
    json!({
        "id": format!("0x{index:040x}"),
        "token0": { "symbol": format!("TK{index}") },
        "token1": { "symbol": "WETH" },
        "reserve0": format!("{}.5", index + 1),
        "reserve1": "42.000000000000000001",
        "reserveUSD": "1234.5678",
        "volumeToken0": "10",
        "volumeToken1": "0.25",
        "volumeUSD": "99.9",
        "txCount": (index as u64) * 3,
        "createdAtTimestamp": format!("{}", 1_600_000_000 + index as u64),
    })
}

/// Hyper server answering JSON-RPC on `/` and GraphQL on a subgraph path.
pub struct MockUpstreamServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockUpstreamServer {
    pub async fn start(dex: MockDex) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock upstream listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let dex = dex.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(dex.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock upstream server stopped: {err}");
            }
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn rpc_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn subgraph_url(&self) -> String {
        format!("{}{GRAPHQL_PATH}", self.base_url)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(dex: MockDex, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }
    let is_graphql = req.uri().path() == GRAPHQL_PATH;

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(status(
                StatusCode::BAD_REQUEST,
                format!("failed to read body: {err}"),
            ))
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return Ok(status(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON payload: {err}"),
            ))
        }
    };

    let reply = if is_graphql {
        handle_graphql(&dex, &payload)
    } else {
        handle_rpc(&dex, &payload)
    };

    Ok(match reply {
        Some(value) => json_response(value),
        None => status(StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable"),
    })
}

fn handle_rpc(dex: &MockDex, call: &Value) -> Option<Value> {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match method {
        "eth_blockNumber" => {
            let tip = dex.tip()?;
            Some(json!({ "jsonrpc": "2.0", "result": format!("0x{tip:x}"), "id": id }))
        }
        _ => Some(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32601, "message": format!("unknown method {method}") },
            "id": id,
        })),
    }
}

fn handle_graphql(dex: &MockDex, payload: &Value) -> Option<Value> {
    let query = payload
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let variables = payload.get("variables").cloned().unwrap_or(Value::Null);

    if query.contains("uniswapFactories") {
        dex.record_height(variables.get("blockNumber").and_then(Value::as_u64));
        if dex.inner.count_fails.load(Ordering::SeqCst) {
            return Some(json!({
                "data": null,
                "errors": [{ "message": "indexer has not reached the requested block" }],
            }));
        }
        let count = dex.inner.pair_count.load(Ordering::SeqCst);
        return Some(json!({
            "data": { "uniswapFactories": [{ "pairCount": count }] }
        }));
    }

    if query.contains("pairs(") {
        dex.record_height(variables.get("block").and_then(Value::as_u64));
        let first = variables
            .get("first")
            .and_then(Value::as_u64)
            .unwrap_or(100) as usize;
        let last_id = variables
            .get("lastId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let page = dex.page(first, last_id)?;
        return Some(json!({ "data": { "pairs": page } }));
    }

    Some(json!({ "errors": [{ "message": "unsupported query" }] }))
}

fn json_response(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status(code: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = code;
    response
}
