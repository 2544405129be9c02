use crate::processor::baseline::BaselinePolicy;
use crate::processor::fetcher::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::processor::height::DEFAULT_HEIGHT_LAG;
use crate::rpc::options::DEFAULT_RPC_TIMEOUT;
use crate::runtime::telemetry;
use crate::storage::snapshot_path;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_FILE_PREFIX: &str = "db";
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Runtime configuration for one ingestion run.
///
/// All instances must be constructed via [`IngestConfig::builder`] or [`IngestConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    rpc_url: String,
    subgraph_url: String,
    output_dir: PathBuf,
    file_prefix: String,
    height_lag: u64,
    page_size: usize,
    max_attempts: usize,
    retry_delay: Duration,
    max_retry_delay: Duration,
    request_timeout: Duration,
    metrics_interval: Duration,
    baseline_policy: BaselinePolicy,
}

pub struct IngestConfigParams {
    pub rpc_url: String,
    pub subgraph_url: String,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub height_lag: u64,
    pub page_size: usize,
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub request_timeout: Duration,
    pub metrics_interval: Duration,
    pub baseline_policy: BaselinePolicy,
}

impl IngestConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`IngestConfig::builder`] when most values use defaults.
    pub fn new(params: IngestConfigParams) -> Result<Self> {
        let IngestConfigParams {
            rpc_url,
            subgraph_url,
            output_dir,
            file_prefix,
            height_lag,
            page_size,
            max_attempts,
            retry_delay,
            max_retry_delay,
            request_timeout,
            metrics_interval,
            baseline_policy,
        } = params;

        let config = Self {
            rpc_url: trimmed_string(rpc_url),
            subgraph_url: trimmed_string(subgraph_url),
            output_dir,
            file_prefix: trimmed_string(file_prefix),
            height_lag,
            page_size,
            max_attempts,
            retry_delay,
            max_retry_delay,
            request_timeout,
            metrics_interval,
            baseline_policy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chain JSON-RPC endpoint used to read the tip height.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// GraphQL endpoint serving historical pair state.
    pub fn subgraph_url(&self) -> &str {
        &self.subgraph_url
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Blocks subtracted from the live tip.
    pub fn height_lag(&self) -> u64 {
        self.height_lag
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Per-request timeout applied to both upstream clients.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn baseline_policy(&self) -> BaselinePolicy {
        self.baseline_policy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
        }
    }

    /// Snapshot file written for `height`.
    pub fn destination(&self, height: u64) -> PathBuf {
        snapshot_path(&self.output_dir, &self.file_prefix, height)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url, "rpc_url")?;
        validate_url(&self.subgraph_url, "subgraph_url")?;
        ensure_not_empty(&self.file_prefix, "file_prefix")?;

        if self.file_prefix.contains(['/', '\\']) {
            bail!("file_prefix cannot contain path separators");
        }

        if self.output_dir.as_os_str().is_empty() {
            bail!("output_dir cannot be empty");
        }

        if self.page_size == 0 {
            bail!("page_size must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.retry_delay.is_zero() {
            bail!("retry_delay must be greater than 0");
        }

        if self.max_retry_delay < self.retry_delay {
            bail!(
                "max_retry_delay ({:?}) must be at least retry_delay ({:?})",
                self.max_retry_delay,
                self.retry_delay
            );
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IngestConfigBuilder {
    rpc_url: Option<String>,
    subgraph_url: Option<String>,
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    height_lag: Option<u64>,
    page_size: Option<usize>,
    max_attempts: Option<usize>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    request_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    baseline_policy: Option<BaselinePolicy>,
}

impl IngestConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn subgraph_url(mut self, url: impl Into<String>) -> Self {
        self.subgraph_url = Some(url.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    pub fn height_lag(mut self, lag: u64) -> Self {
        self.height_lag = Some(lag);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn baseline_policy(mut self, policy: BaselinePolicy) -> Self {
        self.baseline_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<IngestConfig> {
        let retry_delay = self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY);
        let params = IngestConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            subgraph_url: self.subgraph_url.context("subgraph_url is required")?,
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            file_prefix: self
                .file_prefix
                .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_owned()),
            height_lag: self.height_lag.unwrap_or(DEFAULT_HEIGHT_LAG),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            retry_delay,
            // The ceiling follows the initial delay unless set, which keeps
            // the default schedule a fixed pause between attempts.
            max_retry_delay: self.max_retry_delay.unwrap_or(retry_delay),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_RPC_TIMEOUT),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            baseline_policy: self.baseline_policy.unwrap_or_default(),
        };

        IngestConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
