//! Command handlers -- one module per subcommand

pub mod config;
pub mod rules;
pub mod scan;

use std::path::Path;

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::error::{ConfigError, VendorscopeError};

use crate::error::CliError;

/// Load the effective configuration for commands that can run on defaults.
///
/// A missing file falls back to built-in defaults plus environment
/// overrides. Any other load failure is an error.
pub async fn load_or_default(config_path: &Path) -> Result<VendorscopeConfig, CliError> {
    match VendorscopeConfig::load(config_path).await {
        Ok(config) => Ok(config),
        Err(VendorscopeError::Config(ConfigError::FileNotFound { .. })) => {
            tracing::debug!(path = %config_path.display(), "config file not found, using defaults");
            let mut config = VendorscopeConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(CliError::Config(e.to_string())),
    }
}
