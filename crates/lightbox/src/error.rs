//! Error types for pipeline invocations.

use crate::results::ResultStoreError;
use crate::services::ServiceError;
use crate::store::StoreError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Annotation or categorization failed; the whole invocation is abandoned.
    #[error("Service call failed: {0}")]
    TransientService(#[from] ServiceError),

    #[error("Cannot decode '{path}' as an image: {reason}")]
    Decode { path: String, reason: String },

    /// The artifact vanished mid-pipeline.
    #[error("Artifact not found: {path}")]
    NotFound { path: String },

    /// Required metadata is missing or invalid. Retrying will not help.
    #[error("Configuration error for '{path}': {reason}")]
    Configuration { path: String, reason: String },

    #[error("Invocation deadline exceeded")]
    DeadlineExceeded,

    #[error("Artifact store error: {0}")]
    Store(StoreError),

    #[error("Result store error: {0}")]
    Results(#[from] ResultStoreError),

    #[error("Working copy error: {0}")]
    Scratch(#[source] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => PipelineError::NotFound { path },
            other => PipelineError::Store(other),
        }
    }
}

impl PipelineError {
    /// Expected outcomes of racing invocations; not worth more than a debug line.
    pub fn is_benign(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }

    /// A later trigger (redelivery or a sweep) may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::NotFound { .. } | PipelineError::Configuration { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;
