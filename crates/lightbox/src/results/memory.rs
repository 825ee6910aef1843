use super::{ResultStore, ResultStoreResult};
use async_trait::async_trait;
use chrono::Utc;
use lightbox_protocol::{
    AnalysisRecord, NewAnalysisRecord, PublicReference, RecordId, StoredPublicReference,
};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    records: Vec<AnalysisRecord>,
    public_refs: Vec<StoredPublicReference>,
}

/// Result store kept in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    tables: Mutex<Tables>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.tables.lock().await.records.len()
    }

    pub async fn all_records(&self) -> Vec<AnalysisRecord> {
        self.tables.lock().await.records.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn append_record(
        &self,
        namespace: &str,
        record: &NewAnalysisRecord,
    ) -> ResultStoreResult<RecordId> {
        let record_id = RecordId::new();
        self.tables.lock().await.records.push(AnalysisRecord {
            record_id: record_id.clone(),
            namespace: namespace.to_string(),
            image_url: record.image_url.clone(),
            file_path: record.file_path.clone(),
            tags: record.tags.clone(),
            category: record.category,
            owner_id: record.owner_id.clone(),
            visibility: record.visibility,
            created_at: Utc::now(),
        });
        Ok(record_id)
    }

    async fn append_public_reference(
        &self,
        record_id: &RecordId,
        reference: &PublicReference,
    ) -> ResultStoreResult<()> {
        self.tables
            .lock()
            .await
            .public_refs
            .push(StoredPublicReference {
                record_id: record_id.clone(),
                owner_id: reference.owner_id.clone(),
                namespace: reference.namespace.clone(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_records(&self, namespace: &str) -> ResultStoreResult<Vec<AnalysisRecord>> {
        Ok(self
            .tables
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_public_references(&self) -> ResultStoreResult<Vec<StoredPublicReference>> {
        Ok(self.tables.lock().await.public_refs.clone())
    }
}
