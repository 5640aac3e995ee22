//! # AppError
//!
//! Centralized error handling for rusty-qsl.
//! Maps catalog and upload failures to actionable error types.

use thiserror::Error;

/// The primary error type for all rq-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., a card public_id unknown to the store)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., missing upload file, empty search query)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Request body over the configured upload limit
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Image decoding, resizing, rendering or encoding failed
    #[error("processing error: {0}")]
    Processing(String),

    /// The card store (remote media API or local mirror) failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything else (e.g., a worker thread panicked)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    /// Flattens an `anyhow` chain into a storage failure.
    pub fn storage(err: anyhow::Error) -> Self {
        AppError::Storage(format!("{err:#}"))
    }

    /// Flattens an `anyhow` chain into a processing failure.
    pub fn processing(err: anyhow::Error) -> Self {
        AppError::Processing(format!("{err:#}"))
    }
}

/// A specialized Result type for rusty-qsl logic.
pub type Result<T> = std::result::Result<T, AppError>;
