//! Namespace layout and path derivation.

use crate::defaults::{DEFAULT_INBOX_PREFIX, DEFAULT_PROCESSED_PREFIX};
use serde::{Deserialize, Serialize};

/// Result-store namespace holding public cross-references.
pub const PUBLIC_NAMESPACE: &str = "images/public";

/// Result-store namespace for an owner's records: `users/<uid>/images`.
pub fn owner_namespace(owner_id: &str) -> String {
    format!("users/{}/images", owner_id)
}

/// Object-store prefixes for freshly uploaded and sanitized artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespaces {
    pub inbox: String,
    pub processed: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            inbox: DEFAULT_INBOX_PREFIX.to_string(),
            processed: DEFAULT_PROCESSED_PREFIX.to_string(),
        }
    }
}

impl Namespaces {
    pub fn new(inbox: impl Into<String>, processed: impl Into<String>) -> Self {
        Self {
            inbox: with_trailing_slash(inbox.into()),
            processed: with_trailing_slash(processed.into()),
        }
    }

    pub fn is_processed(&self, path: &str) -> bool {
        path.starts_with(&self.processed)
    }

    pub fn is_inbox(&self, path: &str) -> bool {
        path.starts_with(&self.inbox)
    }

    /// Derive the processed location from the base name only.
    ///
    /// `inbox/2024/a.jpg` and `inbox/a.jpg` both map to `processed/a.jpg`.
    pub fn processed_path(&self, path: &str) -> String {
        format!("{}{}", self.processed, base_name(path))
    }
}

pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn with_trailing_slash(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}
