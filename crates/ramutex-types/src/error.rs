//! Shared error types for the ramutex system.

use thiserror::Error;

/// Top-level error type shared by every ramutex crate.
#[derive(Error, Debug)]
pub enum RamutexError {
    /// Missing or invalid peer directory / cluster configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Alias for Result with RamutexError.
pub type RamutexResult<T> = Result<T, RamutexError>;
