//! Error types for the store module.

use arcanum_core::Identifier;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Envelope serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row did not decode to the envelope it was filed under.
    #[error("invalid data for {id}: {reason}")]
    InvalidData { id: Identifier, reason: String },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding the backend was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
