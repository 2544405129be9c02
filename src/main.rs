use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use pairsnap::{
    BaselinePolicy, IngestConfig, ProgressObservation, ProgressSink, RunAborted, RunSummary,
    Runner,
};

const DEFAULT_RPC_URL: &str = "http://localhost:8545";
const DEFAULT_LOG_DIRECTIVE: &str = "info";
const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_cli_tracing();

    let config = config_from_env()?;
    let bar = Arc::new(BarProgress::new()?);
    bar.println(format!(
        "Snapshotting pairs from {} into {}",
        config.subgraph_url(),
        config.output_dir().display()
    ));

    let runner = Runner::new(config).with_progress(bar.clone());
    match runner.run_until_ctrl_c().await {
        Ok(summary) => {
            bar.finish("done");
            print_summary(&bar, &summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(aborted) => {
            bar.finish("aborted");
            print_abort(&bar, &aborted);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_cli_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    pairsnap::init_tracing();
}

fn config_from_env() -> Result<IngestConfig> {
    let rpc_url = read_env_or_default("PAIRSNAP_RPC_URL", DEFAULT_RPC_URL);
    let subgraph_url = env::var("PAIRSNAP_SUBGRAPH_URL")
        .context("PAIRSNAP_SUBGRAPH_URL must point at the pairs GraphQL endpoint")?;
    let retry_delay_secs =
        parse_env_with_default::<u64>("PAIRSNAP_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?;
    let max_retry_delay_secs =
        parse_env_with_default::<u64>("PAIRSNAP_MAX_RETRY_DELAY_SECS", retry_delay_secs)?;
    let request_timeout_secs = parse_env_with_default::<u64>(
        "PAIRSNAP_REQUEST_TIMEOUT_SECS",
        DEFAULT_REQUEST_TIMEOUT_SECS,
    )?;
    let baseline_policy = read_env_or_default("PAIRSNAP_BASELINE_POLICY", "abort")
        .parse::<BaselinePolicy>()
        .context("failed to parse PAIRSNAP_BASELINE_POLICY")?;

    let mut builder = IngestConfig::builder()
        .rpc_url(rpc_url)
        .subgraph_url(subgraph_url)
        .retry_delay(Duration::from_secs(retry_delay_secs))
        .max_retry_delay(Duration::from_secs(max_retry_delay_secs))
        .request_timeout(Duration::from_secs(request_timeout_secs))
        .baseline_policy(baseline_policy);

    if let Some(dir) = env::var_os("PAIRSNAP_OUTPUT_DIR") {
        builder = builder.output_dir(dir);
    }
    if let Ok(prefix) = env::var("PAIRSNAP_FILE_PREFIX") {
        builder = builder.file_prefix(prefix);
    }
    if let Some(lag) = parse_env::<u64>("PAIRSNAP_HEIGHT_LAG")? {
        builder = builder.height_lag(lag);
    }
    if let Some(size) = parse_env::<usize>("PAIRSNAP_PAGE_SIZE")? {
        builder = builder.page_size(size);
    }
    if let Some(attempts) = parse_env::<usize>("PAIRSNAP_MAX_ATTEMPTS")? {
        builder = builder.max_attempts(attempts);
    }

    builder.build()
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_env(key)?.unwrap_or(default))
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

fn print_summary(bar: &BarProgress, summary: &RunSummary) {
    let seconds = summary.elapsed.as_secs_f64();
    let rate = if seconds > 0.0 {
        summary.records as f64 / seconds
    } else {
        0.0
    };
    let baseline = summary
        .baseline
        .map_or_else(|| "unknown".to_string(), |total| total.to_string());

    bar.println(format!(
        "Wrote {} pairs in {} pages at height {} to {} in {:.2}s [{:.2} pairs/s, baseline {}]",
        summary.records,
        summary.pages,
        summary.height,
        summary.destination.display(),
        seconds,
        rate,
        baseline
    ));
}

fn print_abort(bar: &BarProgress, aborted: &RunAborted) {
    let height = aborted
        .height()
        .map_or_else(|| "unresolved".to_string(), |height| height.to_string());
    bar.println(format!(
        "Snapshot aborted while {} (height {}, {} records persisted)",
        aborted.stage(),
        height,
        aborted.persisted()
    ));
    if let Some(destination) = aborted.destination() {
        bar.println(format!("Partial output left at {}", destination.display()));
    }
    bar.println(format!("Cause: {:#}", aborted.cause()));
}

/// Renders progress observations on a terminal bar. The bar length follows
/// the baseline when one is known and grows with the record count otherwise.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout_with_hz(12));
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pairs ({per_sec}) {msg}",
        )
        .context("invalid progress bar template")?
        .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }

    fn println(&self, message: impl AsRef<str>) {
        self.bar.println(message.as_ref());
    }

    fn finish(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }
}

impl ProgressSink for BarProgress {
    fn observe(&self, observation: &ProgressObservation) {
        let length = observation
            .baseline
            .unwrap_or(observation.records)
            .max(observation.records);
        self.bar.set_length(length);
        self.bar.set_position(observation.records);
        self.bar.set_message(format!("height {}", observation.height));
    }
}
