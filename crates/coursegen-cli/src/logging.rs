use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Log to stderr so stdout carries only the answer. `RUST_LOG` overrides the
/// default `info` level.
pub fn setup_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to set up logging: {}", e))
}
