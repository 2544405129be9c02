//! Bounded retry loop with a capped, doubling delay and cancellation-aware
//! sleeps. With `initial_delay == max_delay` the delay is fixed.

use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub(crate) enum RetryFailure {
    /// Every attempt failed; carries the last error.
    Exhausted {
        attempts: usize,
        last_error: anyhow::Error,
    },
    /// The classifier refused to retry this error.
    Aborted(anyhow::Error),
    Cancelled,
}

pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryFailure>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(RetryFailure::Cancelled);
            }
        }

        let outcome = match config.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(RetryFailure::Cancelled),
                outcome = operation(attempt) => outcome,
            },
            None => operation(attempt).await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(RetryFailure::Aborted(err)),
                RetryDisposition::Retry => {
                    if attempt >= max_attempts {
                        return Err(RetryFailure::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    on_retry(attempt, backoff, &err);

                    if !sleep_with_cancellation(backoff, config.cancellation).await {
                        return Err(RetryFailure::Cancelled);
                    }
                    backoff = next_backoff(backoff, config.max_delay);
                }
            },
        }
    }
}

/// Returns `false` when the sleep was interrupted by cancellation.
async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return true;
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
