//! Wolfpack Error Types

use thiserror::Error;

/// Result type alias for wolfpack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wolfpack error types
///
/// Only programming mistakes and collaborator failures surface here.
/// Contention on a lock and an unanswered discovery request are ordinary
/// return values, not errors.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Lifecycle errors
    #[error("{0} has already been started")]
    AlreadyStarted(&'static str),

    #[error("{0} has not been started")]
    NotStarted(&'static str),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error indicates a mistake in the calling code
    /// rather than a runtime failure of a collaborator
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::AlreadyStarted(_)
                | Error::NotStarted(_)
        )
    }
}
