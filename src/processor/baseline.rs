//! Expected-total lookup used as the progress denominator.

use super::fetcher::PairSource;
use crate::error::IngestError;
use anyhow::Result;
use std::str::FromStr;
use std::sync::Arc;

/// What to do when the baseline query fails. The baseline never affects
/// which records are ingested, only how progress is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaselinePolicy {
    /// Abort the run, so an operator never reads progress against a bogus
    /// total.
    #[default]
    Abort,
    /// Log the failure and continue with an unknown total.
    Degrade,
}

impl FromStr for BaselinePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(BaselinePolicy::Abort),
            "degrade" => Ok(BaselinePolicy::Degrade),
            other => anyhow::bail!("unknown baseline policy {other:?} (expected abort or degrade)"),
        }
    }
}

pub struct BaselineCounter<S> {
    source: Arc<S>,
    policy: BaselinePolicy,
}

impl<S: PairSource> BaselineCounter<S> {
    pub fn new(source: Arc<S>, policy: BaselinePolicy) -> Self {
        Self { source, policy }
    }

    /// Total pair count at `height`, or `None` when the query failed under
    /// [`BaselinePolicy::Degrade`].
    pub async fn count(&self, height: u64) -> Result<Option<u64>> {
        match self.source.pair_count(height).await {
            Ok(total) => {
                tracing::info!(height, total, "baseline pair count");
                Ok(Some(total))
            }
            Err(err) => match self.policy {
                BaselinePolicy::Abort => Err(IngestError::UpstreamUnavailable {
                    service: "baseline count",
                    reason: format!("{err:#}"),
                }
                .into()),
                BaselinePolicy::Degrade => {
                    tracing::warn!(
                        height,
                        error = %err,
                        "baseline count unavailable; progress total unknown"
                    );
                    Ok(None)
                }
            },
        }
    }
}
