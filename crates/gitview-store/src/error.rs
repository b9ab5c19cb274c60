//! Error types for gitview storage operations.

use thiserror::Error;

/// Errors raised by the durable table store and the persistent cache tier.
///
/// These never escape [`ByteCache`](crate::ByteCache): the cache logs them and
/// degrades to a miss.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Table names are restricted to a filesystem-safe alphabet.
    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
