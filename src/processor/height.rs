//! Target height resolution.

use crate::error::IngestError;
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Default number of blocks kept between the live tip and the target height
/// so the indexer has caught up with every block the run queries.
pub const DEFAULT_HEIGHT_LAG: u64 = 5;

/// Anything able to report the chain's current tip height.
pub trait TipSource: Send + Sync {
    fn current_height(&self) -> BoxFuture<'_, Result<u64>>;
}

pub struct HeightResolver<T> {
    source: Arc<T>,
    lag: u64,
}

impl<T: TipSource> HeightResolver<T> {
    pub fn new(source: Arc<T>, lag: u64) -> Self {
        Self { source, lag }
    }

    pub fn lag(&self) -> u64 {
        self.lag
    }

    /// Returns `tip - lag`. A single attempt: failures are not retried, since
    /// every later query depends on this value.
    pub async fn resolve(&self) -> Result<u64> {
        let tip = self.source.current_height().await.map_err(|err| {
            anyhow::Error::from(IngestError::UpstreamUnavailable {
                service: "chain rpc",
                reason: format!("{err:#}"),
            })
        })?;

        let height = tip.checked_sub(self.lag).ok_or(IngestError::TipBelowLag {
            tip,
            lag: self.lag,
        })?;

        tracing::info!(tip, lag = self.lag, height, "resolved target height");
        Ok(height)
    }
}
