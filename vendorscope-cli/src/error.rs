//! CLI-specific error types and exit code mapping

use vendorscope_core::error::VendorscopeError;
use vendorscope_detector::DetectorError;

/// CLI-specific error type.
///
/// `exit_code()` maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation or parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from vendorscope-core.
    #[error("{0}")]
    Core(#[from] VendorscopeError),

    /// Rule loading or validation failure.
    #[error("rule error: {0}")]
    Rule(String),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                    |
    /// |------|----------------------------|
    /// | 0    | Success                    |
    /// | 1    | General / command error    |
    /// | 2    | Configuration error        |
    /// | 3    | Invalid rules              |
    /// | 10   | IO error                   |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Core(VendorscopeError::Config(_)) => 2,
            Self::Rule(_) => 3,
            Self::Io(_) => 10,
            Self::Json(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<DetectorError> for CliError {
    fn from(e: DetectorError) -> Self {
        Self::Rule(e.to_string())
    }
}
