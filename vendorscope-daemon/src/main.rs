//! vendorscope-daemon entry point.

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::error::{ConfigError, VendorscopeError};
use vendorscope_daemon::Orchestrator;

use crate::cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = load_config(&cli).await?;
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.general.data_dir = dir.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    vendorscope_core::metrics::describe_all();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vendorscope-daemon starting"
    );

    let orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}

/// Load the config file, falling back to defaults plus environment
/// overrides when it does not exist.
async fn load_config(cli: &DaemonCli) -> Result<VendorscopeConfig> {
    match VendorscopeConfig::load(&cli.config).await {
        Ok(config) => Ok(config),
        Err(VendorscopeError::Config(ConfigError::FileNotFound { .. })) => {
            let mut config = VendorscopeConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to load config {}: {}",
            cli.config.display(),
            e
        )),
    }
}
