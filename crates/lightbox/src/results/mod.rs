//! Result store: immutable analysis records and public cross-references.

mod memory;
mod sqlite;

pub use memory::MemoryResultStore;
pub use sqlite::SqliteResultStore;

use async_trait::async_trait;
use lightbox_protocol::{
    AnalysisRecord, NewAnalysisRecord, PublicReference, RecordId, StoredPublicReference,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt {field} value in result store: '{value}'")]
    Corrupt { field: &'static str, value: String },
}

pub type ResultStoreResult<T> = std::result::Result<T, ResultStoreError>;

/// Append-only store for analysis output.
///
/// Records are never updated. Duplicate suppression is the caller's job: the
/// store accepts every append.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a record under `namespace`; the store assigns id and timestamp.
    async fn append_record(
        &self,
        namespace: &str,
        record: &NewAnalysisRecord,
    ) -> ResultStoreResult<RecordId>;

    async fn append_public_reference(
        &self,
        record_id: &RecordId,
        reference: &PublicReference,
    ) -> ResultStoreResult<()>;

    /// Records under `namespace`, oldest first.
    async fn list_records(&self, namespace: &str) -> ResultStoreResult<Vec<AnalysisRecord>>;

    async fn list_public_references(&self) -> ResultStoreResult<Vec<StoredPublicReference>>;
}
