//! Error types for fetches coordinated by this crate.

use thiserror::Error;

/// Failure reported by a transport or directory-listing collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The request could not be completed.
    #[error("Request failed: {0}")]
    Network(String),

    /// The response could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Outcome of a failed coordinated fetch, shared by every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The collaborator failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The fetch was cancelled before it produced a result.
    #[error("Fetch cancelled")]
    Cancelled,

    /// The fetch task ended without producing a result.
    #[error("Fetch aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Whether the failure is a cancellation rather than a real error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
