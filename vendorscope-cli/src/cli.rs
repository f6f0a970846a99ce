//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Vendorscope -- passive anti-bot, CAPTCHA, WAF and CDN vendor detection.
///
/// Use `vendorscope <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "vendorscope", version, about, long_about = None)]
pub struct Cli {
    /// Path to the vendorscope.toml configuration file.
    #[arg(short, long, default_value = "vendorscope.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run detection once over a signal bundle file.
    Scan(ScanArgs),

    /// Inspect and validate vendor rules.
    Rules(RulesArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- scan ----

/// Run detection over a JSON signal bundle.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Signal bundle file (`{"signals": [...], "unavailable": [...]}`).
    pub bundle: PathBuf,

    /// Use this catalog instead of the configured one.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only report detections at or above this confidence.
    #[arg(long, default_value_t = 0)]
    pub min_confidence: u8,
}

// ---- rules ----

/// Inspect and validate vendor rules.
#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List the resolved rule set (catalog + overrides + custom rules).
    List {
        /// Filter by category (case-insensitive).
        #[arg(long)]
        category: Option<String>,
    },
    /// Validate a rule file without loading it into a store.
    Validate {
        /// YAML or JSON rule file.
        path: PathBuf,
    },
}

// ---- config ----

/// Manage vendorscope configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, rules, session).
        #[arg(long)]
        section: Option<String>,
    },
}
