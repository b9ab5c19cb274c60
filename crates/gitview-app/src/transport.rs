//! Collaborator interfaces for remote content.

use async_trait::async_trait;
use gitview_core::FileNode;

use crate::error::TransportError;

/// Raw network transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` as text.
    ///
    /// # Errors
    /// Returns a [`TransportError`] when the remote cannot produce the page.
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError>;

    /// Fetch `url` as raw bytes.
    ///
    /// # Errors
    /// Returns a [`TransportError`] when the remote cannot produce the body.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Remote tree-fetch collaborator.
#[async_trait]
pub trait DirectoryFetcher: Send + Sync {
    /// List the entries of `path` (repository-relative, root is `""`) in
    /// `repository`. Order is not significant.
    ///
    /// # Errors
    /// Returns a [`TransportError`] when the listing cannot be fetched.
    async fn fetch_directory_listing(
        &self,
        repository: &str,
        path: &str,
    ) -> Result<Vec<FileNode>, TransportError>;
}
