//! Error taxonomy for account checking

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the checker library.
///
/// `Io`, `EmptyInput` and `Config` are pre-run failures and abort before any
/// account is checked. `Launch`, `Process` and `Timeout` happen per account
/// and are turned into `Error` outcomes by the run loop.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no accounts found in {}", path.display())]
    EmptyInput { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("launch failed: {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The checker started but collecting its output failed
    #[error("checker process failed: {program}: {source}")]
    Process {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s checking {account}", after.as_secs_f64())]
    Timeout { account: String, after: Duration },
}

impl CheckerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short kind label used in outcome details and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CheckerError::Io { .. } => "io",
            CheckerError::EmptyInput { .. } => "empty input",
            CheckerError::Config(_) => "config",
            CheckerError::Launch { .. } => "launch",
            CheckerError::Process { .. } => "process",
            CheckerError::Timeout { .. } => "timeout",
        }
    }
}
