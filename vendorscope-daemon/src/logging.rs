//! Logging initialization for vendorscope-daemon.
//!
//! Logs always go to stderr: stdout carries the host messaging protocol,
//! so a stray log line there would corrupt the NDJSON stream.

use anyhow::{Result, bail};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use vendorscope_core::config::GeneralConfig;

/// Initialize the global tracing subscriber from the `[general]` section.
///
/// `RUST_LOG` takes precedence over `log_level` when set. Must be called
/// once, before any tracing macros are used.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let base = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let format = match config.log_format.as_str() {
        "json" => base.json().boxed(),
        "pretty" => base.pretty().boxed(),
        other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
