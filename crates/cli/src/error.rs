//! Error types for CLI operations.

use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or failed validation
    #[error("Invalid rig configuration: {0}")]
    Config(#[source] ContractError),

    /// Devices could not be opened, ordered or started
    #[error("Failed to set up rig: {0}")]
    RigSetup(#[source] ContractError),

    /// A synchronized retrieval failed
    #[error("Synchronized capture {index} failed: {source}")]
    Sync {
        index: u64,
        #[source]
        source: ContractError,
    },

    /// The blocking capture loop panicked or was aborted
    #[error("Capture loop terminated abnormally: {message}")]
    Aborted { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigNotFound { .. } | Self::Config(_) => 2,
            Self::RigSetup(_) => 3,
            Self::Sync { .. } => 4,
            Self::Aborted { .. } => 1,
        }
    }
}
