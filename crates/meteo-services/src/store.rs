//! Reading storage trait and error types.
//!
//! This module defines the `ReadingStore` trait that the scheduler and the
//! relay persist through. `SqliteReadingStore` is the production backend.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Reading, ReadingDraft};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Validation error (e.g., empty or unsupported city).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable record of readings.
///
/// Implementations assign `id` and `created_at` on creation.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a draft.
    ///
    /// # Errors
    /// Returns `StoreError::Validation` if the draft is rejected.
    async fn create(&self, draft: ReadingDraft) -> StoreResult<Reading>;
}
