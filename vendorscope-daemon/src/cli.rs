//! CLI argument definitions for vendorscope-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Vendorscope host daemon.
///
/// Speaks newline-delimited JSON on stdin/stdout with the browser host,
/// runs vendor detection and keeps per-tab sessions and capture state.
#[derive(Parser, Debug)]
#[command(name = "vendorscope-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to vendorscope.toml. Built-in defaults are used when the file
    /// does not exist.
    #[arg(short, long, default_value = "/etc/vendorscope/vendorscope.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the state directory.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Validate configuration and exit without serving.
    #[arg(long)]
    pub validate: bool,
}
