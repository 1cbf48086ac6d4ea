//! Sends `log` records through a `tracing_subscriber` formatter on stderr.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Shows this crate's messages at info, or debug when verbose.
pub fn directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("{}={level}", env!("CARGO_CRATE_NAME"))
}

/// Installs the subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive(verbose)))
        .map_err(|e| anyhow!("Invalid log filter: {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {e}"))
}
