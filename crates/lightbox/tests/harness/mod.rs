//! Test harness for pipeline integration tests.
//!
//! Wraps the in-memory stores with the failure modes the pipeline must
//! survive: artifacts that disappear between listing and reading, invocations
//! overtaken by a concurrent one, and enrichment services that stall or fail.
//!
//! ```ignore
//! let h = TestHarness::new();
//! h.upload("inbox/a.jpg", jpeg_with_exif(64, 64), &[("uid", "u1")]).await;
//! h.pipeline.process("inbox/a.jpg").await?;
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use lightbox::store::StoreResult;
use lightbox::{
    AnnotationClient, ArtifactStore, CategorizerClient, KeywordCategorizer, MemoryArtifactStore,
    MemoryResultStore, Pipeline, PipelineSettings, ServiceCredentials, ServiceError,
    StaticAnnotator,
};
use lightbox_protocol::metadata::from_pairs;
use lightbox_protocol::{ArtifactSummary, Category, Metadata};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

pub struct TestHarness {
    pub store: Arc<MemoryArtifactStore>,
    pub results: Arc<MemoryResultStore>,
    pub pipeline: Arc<Pipeline>,
}

impl TestHarness {
    /// Offline clients labelling every image "Dog".
    pub fn new() -> Self {
        Self::with_clients(
            Arc::new(StaticAnnotator::new(vec!["Dog".into(), "Grass".into()])),
            Arc::new(KeywordCategorizer),
            PipelineSettings::default(),
        )
    }

    pub fn with_clients(
        annotator: Arc<dyn AnnotationClient>,
        categorizer: Arc<dyn CategorizerClient>,
        settings: PipelineSettings,
    ) -> Self {
        let store = Arc::new(MemoryArtifactStore::new());
        let results = Arc::new(MemoryResultStore::new());
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            results.clone(),
            annotator,
            categorizer,
            settings,
        ));
        Self {
            store,
            results,
            pipeline,
        }
    }

    /// The pipeline is overtaken on `path`: the first fetch of its bytes runs
    /// a second pipeline over the same stores to completion.
    pub fn overtaken_on(path: &str) -> Self {
        let store = Arc::new(MemoryArtifactStore::new());
        let results = Arc::new(MemoryResultStore::new());
        let pipeline_over = |artifacts: Arc<dyn ArtifactStore>| {
            Arc::new(Pipeline::new(
                artifacts,
                results.clone(),
                Arc::new(StaticAnnotator::new(vec!["Dog".into(), "Grass".into()])),
                Arc::new(KeywordCategorizer),
                PipelineSettings::default(),
            ))
        };
        let racer = pipeline_over(store.clone());
        let pipeline = pipeline_over(Arc::new(RacingStore::new(store.clone(), racer, path)));
        Self {
            store,
            results,
            pipeline,
        }
    }

    pub async fn upload(&self, path: &str, bytes: Vec<u8>, meta: &[(&str, &str)]) {
        self.upload_as(path, bytes, "image/jpeg", meta).await;
    }

    pub async fn upload_as(&self, path: &str, bytes: Vec<u8>, kind: &str, meta: &[(&str, &str)]) {
        self.store
            .insert(path, bytes, Some(kind), from_pairs(meta.iter().copied()))
            .await
            .expect("insert fixture");
    }

    pub async fn metadata(&self, path: &str) -> Metadata {
        self.store.get_metadata(path).await.expect("artifact exists")
    }
}

/// Lists paths that were never stored, as if they were deleted right after
/// the listing was taken. Everything else delegates to the inner store.
pub struct VanishingStore {
    pub inner: Arc<MemoryArtifactStore>,
    ghosts: BTreeSet<String>,
}

impl VanishingStore {
    pub fn new(inner: Arc<MemoryArtifactStore>, ghosts: &[&str]) -> Self {
        Self {
            inner,
            ghosts: ghosts.iter().map(|g| g.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArtifactStore for VanishingStore {
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, bytes: &[u8], content_kind: Option<&str>) -> StoreResult<()> {
        self.inner.put(path, bytes, content_kind).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ArtifactSummary>> {
        let mut listed = self.inner.list(prefix).await?;
        for ghost in self.ghosts.iter().filter(|g| g.starts_with(prefix)) {
            let mut summary = ArtifactSummary::new(ghost.clone(), Some("image/jpeg"), 2048);
            summary
                .metadata
                .insert("uid".to_string(), "ghost".to_string());
            listed.push(summary);
        }
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }

    async fn stat(&self, path: &str) -> StoreResult<ArtifactSummary> {
        self.inner.stat(path).await
    }

    async fn patch_metadata(&self, path: &str, patch: &Metadata) -> StoreResult<Metadata> {
        self.inner.patch_metadata(path, patch).await
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }
}

/// Lets `racer` finish `path` completely the first time its bytes are
/// fetched, then serves the fetch from the inner store.
pub struct RacingStore {
    pub inner: Arc<MemoryArtifactStore>,
    racer: Arc<Pipeline>,
    path: String,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<MemoryArtifactStore>, racer: Arc<Pipeline>, path: &str) -> Self {
        Self {
            inner,
            racer,
            path: path.to_string(),
            raced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ArtifactStore for RacingStore {
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        if path == self.path && !self.raced.swap(true, Ordering::SeqCst) {
            self.racer
                .process(path)
                .await
                .expect("racing invocation completes");
        }
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, bytes: &[u8], content_kind: Option<&str>) -> StoreResult<()> {
        self.inner.put(path, bytes, content_kind).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ArtifactSummary>> {
        self.inner.list(prefix).await
    }

    async fn stat(&self, path: &str) -> StoreResult<ArtifactSummary> {
        self.inner.stat(path).await
    }

    async fn patch_metadata(&self, path: &str, patch: &Metadata) -> StoreResult<Metadata> {
        self.inner.patch_metadata(path, patch).await
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }
}

/// Counts calls; optionally waits on a barrier so concurrent invocations
/// are all inside the service call at the same time.
pub struct CountingAnnotator {
    labels: Vec<String>,
    calls: AtomicUsize,
    barrier: Option<Arc<Barrier>>,
}

impl CountingAnnotator {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            calls: AtomicUsize::new(0),
            barrier: None,
        }
    }

    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnnotationClient for CountingAnnotator {
    async fn detect_labels(
        &self,
        _image: &[u8],
        _creds: &ServiceCredentials,
    ) -> Result<Vec<String>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        Ok(self.labels.clone())
    }
}

/// Always rate limited.
pub struct ThrottledCategorizer;

#[async_trait]
impl CategorizerClient for ThrottledCategorizer {
    async fn classify(
        &self,
        _labels: &[String],
        _creds: &ServiceCredentials,
    ) -> Result<Category, ServiceError> {
        Err(ServiceError::RateLimited {
            service: "categorizer",
        })
    }
}

/// Never answers; only a deadline gets an invocation past it.
pub struct StalledAnnotator;

#[async_trait]
impl AnnotationClient for StalledAnnotator {
    async fn detect_labels(
        &self,
        _image: &[u8],
        _creds: &ServiceCredentials,
    ) -> Result<Vec<String>, ServiceError> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}
