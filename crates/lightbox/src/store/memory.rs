use super::traits::{validate_path, ArtifactStore, StoreError, StoreResult};
use async_trait::async_trait;
use lightbox_protocol::{ArtifactSummary, Metadata};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_kind: Option<String>,
    metadata: Metadata,
    /// Incremented on every `put`.
    generation: u64,
}

impl StoredObject {
    fn summary(&self, path: &str) -> ArtifactSummary {
        ArtifactSummary {
            path: path.to_string(),
            content_kind: self.content_kind.clone(),
            byte_size: self.bytes.len() as u64,
            metadata: self.metadata.clone(),
        }
    }
}

/// In-process artifact store. Used by tests and by `process` dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object together with its metadata, as an external producer would.
    pub async fn insert(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_kind: Option<&str>,
        metadata: Metadata,
    ) -> StoreResult<()> {
        validate_path(path)?;
        let mut objects = self.objects.write().await;
        let generation = objects.get(path).map(|o| o.generation + 1).unwrap_or(1);
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_kind: content_kind.map(str::to_string),
                metadata,
                generation,
            },
        );
        Ok(())
    }

    /// Number of writes to `path`, or `None` if it does not exist.
    pub async fn generation(&self, path: &str) -> Option<u64> {
        self.objects.read().await.get(path).map(|o| o.generation)
    }

    pub async fn remove(&self, path: &str) -> bool {
        self.objects.write().await.remove(path).is_some()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, bytes: &[u8], content_kind: Option<&str>) -> StoreResult<()> {
        self.insert(path, bytes.to_vec(), content_kind, Metadata::new())
            .await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ArtifactSummary>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, o)| o.summary(path))
            .collect())
    }

    async fn stat(&self, path: &str) -> StoreResult<ArtifactSummary> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|o| o.summary(path))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn patch_metadata(&self, path: &str, patch: &Metadata) -> StoreResult<Metadata> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        object
            .metadata
            .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(object.metadata.clone())
    }

    fn public_url(&self, path: &str) -> String {
        format!("mem://{}", path)
    }
}
