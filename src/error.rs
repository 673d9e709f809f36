// src/error.rs

//! Unified error handling for the logger application.

use std::fmt;

use thiserror::Error;

/// Result type alias for logger operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Live feed could not be read or parsed
    #[error("Feed error: {0}")]
    Feed(String),

    /// Registry dataset could not be fetched or parsed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Circuit breaker is open and refused the call
    #[error(
        "Circuit breaker '{name}' is OPEN after {failures} failures; retry in {retry_in_secs}s"
    )]
    CircuitOpen {
        name: String,
        failures: u32,
        retry_in_secs: u64,
    },

    /// Summary upload failed after all attempts
    #[error("Upload failed after {attempts} attempts: {message}")]
    Upload { attempts: u32, message: String },

    /// Failure notification could not be delivered
    #[error("Notification error: {0}")]
    Notify(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a feed error.
    pub fn feed(message: impl fmt::Display) -> Self {
        Self::Feed(message.to_string())
    }

    /// Create a registry error.
    pub fn registry(message: impl fmt::Display) -> Self {
        Self::Registry(message.to_string())
    }

    /// Create a notification error.
    pub fn notify(message: impl fmt::Display) -> Self {
        Self::Notify(message.to_string())
    }

    /// Whether this error came from a breaker refusing the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
