//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for the filter:
//! 1. `--verbose` (debug)
//! 2. `TASKDAG_LOG`
//! 3. `RUST_LOG`
//! 4. `warn`
//!
//! Logs go to stderr so stdout stays clean for command output.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "TASKDAG_LOG";

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "debug";

pub fn init_logging(verbose: bool) -> Result<()> {
    let directive = filter_directive(verbose, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| anyhow!("invalid log filter {directive:?}: {e}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {e}"))
}

fn filter_directive<F>(verbose: bool, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if verbose {
        return VERBOSE_FILTER.to_string();
    }
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|key| env(key))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}
