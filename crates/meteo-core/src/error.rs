//! Centralized error types for the Meteo service.
//!
//! Crate-level errors (fetcher, store, relay) convert into [`AppError`] at the
//! edge of the process. The outer request layer uses [`AppError::http_status`]
//! to decide between a client and a server error.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// The caller asked for something that can never succeed (unknown city,
    /// malformed draft). Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The weather API failed or could not be reached.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The operation was cancelled during shutdown.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for API responses.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "The request is invalid. Check the city name and try again.",
            AppError::Upstream(_) => {
                "The weather service is unavailable. Please try again later."
            }
            AppError::Storage(_) => "Failed to save the reading. Please try again.",
            AppError::Config(e) => e.user_message(),
            AppError::Cancelled => "The service is shutting down.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }

    /// Whether the failure is the caller's fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::Validation(_))
    }

    /// Status code the request layer should answer with.
    pub fn http_status(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}
