//! External enrichment services: label detection and categorization.
//!
//! Both are stateless request/response calls. Credentials are supplied per
//! invocation and never cached by a client.

mod categorizer;
mod offline;
mod vision;

pub use categorizer::LlmCategorizer;
pub use offline::{KeywordCategorizer, StaticAnnotator};
pub use vision::VisionClient;

use async_trait::async_trait;
use lightbox_protocol::Category;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{service} credential not configured")]
    MissingCredential { service: &'static str },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{service} rate limit exceeded")]
    RateLimited { service: &'static str },

    #[error("{service} returned HTTP {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} rejected the request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Opaque per-invocation service credentials.
#[derive(Clone, Default)]
pub struct ServiceCredentials {
    vision_api_key: Option<String>,
    categorizer_api_key: Option<String>,
}

impl ServiceCredentials {
    pub fn new(vision_api_key: Option<String>, categorizer_api_key: Option<String>) -> Self {
        Self {
            vision_api_key: vision_api_key.filter(|k| !k.trim().is_empty()),
            categorizer_api_key: categorizer_api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn vision_api_key(&self) -> Option<&str> {
        self.vision_api_key.as_deref()
    }

    pub fn categorizer_api_key(&self) -> Option<&str> {
        self.categorizer_api_key.as_deref()
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |k: &Option<String>| if k.is_some() { "<redacted>" } else { "<unset>" };
        f.debug_struct("ServiceCredentials")
            .field("vision_api_key", &redact(&self.vision_api_key))
            .field("categorizer_api_key", &redact(&self.categorizer_api_key))
            .finish()
    }
}

/// Produces an ordered list of textual labels for an image.
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    /// An empty list is a valid answer.
    async fn detect_labels(
        &self,
        image: &[u8],
        creds: &ServiceCredentials,
    ) -> Result<Vec<String>, ServiceError>;
}

/// Maps a list of labels onto the closed [`Category`] vocabulary.
#[async_trait]
pub trait CategorizerClient: Send + Sync {
    async fn classify(
        &self,
        labels: &[String],
        creds: &ServiceCredentials,
    ) -> Result<Category, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = ServiceCredentials::new(Some("sk-secret".into()), None);
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("<unset>"));
    }

    #[test]
    fn test_blank_credentials_are_unset() {
        let creds = ServiceCredentials::new(Some("  ".into()), Some("k".into()));
        assert!(creds.vision_api_key().is_none());
        assert_eq!(creds.categorizer_api_key(), Some("k"));
    }
}
