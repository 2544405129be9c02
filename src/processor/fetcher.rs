//! Keyset page fetching with a bounded retry budget and cursor-progress
//! enforcement.
//!
//! [`PairSource`] is the raw upstream seam: one request per call, no retries.
//! [`RetryingFetcher`] wraps it, absorbing transient failures and refusing
//! any page that would not move the cursor strictly forward, which is what
//! guarantees the paging loop terminates.

use super::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition, RetryFailure};
use crate::error::IngestError;
use crate::runtime::telemetry::Telemetry;
use crate::types::TradingPairSnapshot;
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Upstream able to answer both query shapes of an ingestion run.
pub trait PairSource: Send + Sync {
    /// Authoritative number of pairs at `height`.
    fn pair_count(&self, height: u64) -> BoxFuture<'_, Result<u64>>;

    /// Up to `page_size` pairs at `height` with id strictly greater than
    /// `after_id` (no lower bound when empty), ascending by id. An empty page
    /// means the key space is exhausted.
    fn fetch_page<'a>(
        &'a self,
        height: u64,
        page_size: usize,
        after_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TradingPairSnapshot>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct RetryingFetcher<S> {
    source: Arc<S>,
    policy: RetryPolicy,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
}

impl<S: PairSource> RetryingFetcher<S> {
    pub fn new(source: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            telemetry: Arc::new(Telemetry::default()),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetches one page, retrying transient failures. Fails with
    /// [`IngestError::FetchExhausted`] once the attempt budget is spent and
    /// with [`IngestError::NonProgressingCursor`] when the returned page does
    /// not advance past `after_id`.
    pub async fn fetch(
        &self,
        height: u64,
        page_size: usize,
        after_id: &str,
    ) -> Result<Vec<TradingPairSnapshot>> {
        let config = RetryBackoff::new(
            self.policy.initial_delay,
            self.policy.max_delay,
            self.policy.max_attempts,
        )
        .with_cancellation(&self.cancellation);
        let source = &self.source;
        let telemetry = &self.telemetry;

        let outcome = retry_with_backoff(
            config,
            |_attempt| source.fetch_page(height, page_size, after_id),
            |attempt, backoff, err| {
                telemetry.record_retry();
                tracing::warn!(
                    height,
                    after_id,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    backoff_ms = duration_to_millis(backoff),
                    error = %err,
                    "page fetch failed; retrying"
                );
            },
            |_attempt, err| {
                let disposition = classify(err);
                if disposition == RetryDisposition::Retry {
                    telemetry.record_upstream_error();
                }
                disposition
            },
        )
        .await;

        let page = match outcome {
            Ok(page) => page,
            Err(RetryFailure::Exhausted {
                attempts,
                last_error,
            }) => {
                tracing::error!(
                    height,
                    after_id,
                    attempts,
                    error = %last_error,
                    "page fetch exhausted retries"
                );
                return Err(IngestError::FetchExhausted {
                    attempts,
                    after_id: after_id.to_owned(),
                    last_error: format!("{last_error:#}"),
                }
                .into());
            }
            Err(RetryFailure::Aborted(err)) => return Err(err),
            Err(RetryFailure::Cancelled) => return Err(IngestError::Cancelled.into()),
        };

        ensure_cursor_progress(after_id, &page)?;
        Ok(page)
    }
}

/// Only upstream unavailability is retried. Anything else, untyped errors
/// included, would fail the same way on the next attempt.
fn classify(err: &anyhow::Error) -> RetryDisposition {
    match err.downcast_ref::<IngestError>() {
        Some(error) if error.is_transient() => RetryDisposition::Retry,
        _ => RetryDisposition::Abort,
    }
}

/// Every key must be strictly greater than its predecessor, starting from
/// `after_id`. An empty `after_id` places no bound on the first key.
pub fn ensure_cursor_progress(after_id: &str, page: &[TradingPairSnapshot]) -> Result<()> {
    let mut previous = after_id;
    for (index, record) in page.iter().enumerate() {
        let bounded = index > 0 || !after_id.is_empty();
        if bounded && record.id.as_str() <= previous {
            return Err(IngestError::NonProgressingCursor {
                after_id: previous.to_owned(),
                offending_id: record.id.clone(),
            }
            .into());
        }
        previous = record.id.as_str();
    }
    Ok(())
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
