//! Artifact store abstraction.
//!
//! The pipeline only ever talks to objects through [`ArtifactStore`], so the
//! filesystem store used locally and the in-memory store used by tests are
//! interchangeable.

use async_trait::async_trait;
use lightbox_protocol::{ArtifactSummary, Metadata};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt metadata sidecar for '{path}': {source}")]
    Sidecar {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read/write/list/patch access to binary objects and their metadata.
///
/// Missing objects surface as [`StoreError::NotFound`] from every method that
/// takes a path.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Write an object, replacing any existing bytes and metadata at `path`.
    async fn put(&self, path: &str, bytes: &[u8], content_kind: Option<&str>) -> StoreResult<()>;

    /// All objects whose path starts with `prefix`, ordered by path.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ArtifactSummary>>;

    async fn stat(&self, path: &str) -> StoreResult<ArtifactSummary>;

    async fn get_metadata(&self, path: &str) -> StoreResult<Metadata> {
        Ok(self.stat(path).await?.metadata)
    }

    /// Merge `patch` into the object's metadata and return the merged map.
    async fn patch_metadata(&self, path: &str, patch: &Metadata) -> StoreResult<Metadata>;

    /// Stable URL recorded in analysis records.
    fn public_url(&self, path: &str) -> String;
}

/// Reject paths that could escape the store or collide with its bookkeeping.
pub(crate) fn validate_path(path: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(invalid("must be a relative forward-slash path"));
    }
    if path.ends_with('/') {
        return Err(invalid("names a prefix, not an object"));
    }
    if path
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(invalid("contains an empty, '.' or '..' component"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("inbox/a.jpg").is_ok());
        assert!(validate_path("inbox/2024/06/a.jpg").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("inbox/../secret").is_err());
        assert!(validate_path("inbox//a.jpg").is_err());
        assert!(validate_path("inbox/").is_err());
    }
}
