//! Relocation stage: inbox artifact -> sanitized copy in the processed namespace.

use crate::error::{PipelineError, Result};
use crate::guard::{CommitOutcome, Decision, IdempotencyGuard};
use crate::pipeline::{Invocation, StageOutcome};
use crate::sanitize::{sanitize, Sanitized};
use crate::store::{ArtifactStore, StoreError};
use lightbox_protocol::metadata::{self, Metadata};
use lightbox_protocol::{ArtifactSummary, ProcessingState};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// On-disk copy of the artifact being sanitized. Deleted when dropped.
struct WorkingCopy {
    file: NamedTempFile,
}

impl WorkingCopy {
    /// Takes ownership of the fetched bytes so they are released once written.
    fn create(bytes: Vec<u8>, scratch_dir: Option<&PathBuf>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lightbox-");
        let mut file = match scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    fn load(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.file.reopen()?;
        let len = reader.metadata()?.len() as usize;
        let mut buf = Vec::with_capacity(len);
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// What the processed path currently holds.
enum Destination {
    Free,
    /// Written by an earlier invocation for this same source.
    Ours,
    Foreign { previous_source: Option<String> },
}

pub struct RelocationStage {
    store: Arc<dyn ArtifactStore>,
    guard: Arc<IdempotencyGuard>,
    scratch_dir: Option<PathBuf>,
}

impl RelocationStage {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        guard: Arc<IdempotencyGuard>,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            guard,
            scratch_dir,
        }
    }

    /// Relocate one inbox artifact described by `declared` (the notification
    /// snapshot or listing entry).
    pub async fn run(&self, declared: &ArtifactSummary, inv: &Invocation) -> Result<StageOutcome> {
        if let Decision::Skip(reason) = self.guard.should_relocate(declared) {
            return Ok(StageOutcome::Skipped(reason));
        }

        let path = declared.path.as_str();
        let fresh = inv.bounded(self.guard.refresh(path)).await?;
        if let Decision::Skip(reason) = self.guard.should_relocate(&fresh) {
            return Ok(StageOutcome::Skipped(reason));
        }

        let destination = self.guard.namespaces().processed_path(path);
        match self.inspect_destination(path, &destination, inv).await? {
            Destination::Ours => return self.resume(path, destination, inv).await,
            Destination::Foreign { previous_source } => tracing::warn!(
                destination = %destination,
                previous_source = previous_source.as_deref().unwrap_or("<unknown>"),
                "Processed path already holds a different artifact; it will be overwritten"
            ),
            Destination::Free => {}
        }

        let bytes = inv.bounded(self.store.get(path)).await?;
        let sanitized = match self.sanitize_working_copy(bytes).await? {
            Ok(sanitized) => sanitized,
            Err(reason) => {
                match self.guard.record_decode_failure(path).await {
                    Ok(Some(attempts)) => {
                        tracing::debug!(path = %path, attempts, "Recorded decode failure")
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Failed to record decode attempt")
                    }
                }
                return Err(PipelineError::Decode {
                    path: path.to_string(),
                    reason,
                });
            }
        };

        tracing::debug!(
            path = %path,
            format = ?sanitized.format,
            removed = sanitized.removed,
            "Sanitized artifact"
        );

        // Another invocation may have finished while this one was sanitizing.
        let latest = inv.bounded(self.guard.refresh(path)).await?;
        if let Decision::Skip(reason) = self.guard.should_relocate(&latest) {
            tracing::debug!(path = %path, reason = %reason, "Relocated concurrently");
            return Ok(StageOutcome::Skipped(reason));
        }
        if let Destination::Ours = self.inspect_destination(path, &destination, inv).await? {
            return self.resume(path, destination, inv).await;
        }

        // Nothing has been written yet; past this point the sequence completes.
        inv.ensure_time_left()?;

        let content_kind = latest
            .content_kind
            .as_deref()
            .unwrap_or(sanitized.content_kind());
        self.store
            .put(&destination, &sanitized.bytes, Some(content_kind))
            .await?;

        let mut carried: Metadata = metadata::CARRIED_KEYS
            .iter()
            .filter_map(|k| latest.metadata.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        carried.insert(metadata::RELOCATED.to_string(), "true".to_string());
        carried.insert(metadata::SOURCE_PATH.to_string(), path.to_string());
        if self.guard.commit_relocated(&destination, &carried).await? == CommitOutcome::Vanished {
            tracing::warn!(destination = %destination, "Destination vanished right after write");
        }

        self.mark_source(path, &destination).await?;
        Ok(StageOutcome::Relocated { destination })
    }

    async fn inspect_destination(
        &self,
        path: &str,
        destination: &str,
        inv: &Invocation,
    ) -> Result<Destination> {
        match inv.bounded(self.store.stat(destination)).await {
            Ok(existing) => {
                let source = existing.metadata.get(metadata::SOURCE_PATH);
                if source.map(String::as_str) == Some(path)
                    && existing.state() >= ProcessingState::Relocated
                {
                    Ok(Destination::Ours)
                } else {
                    Ok(Destination::Foreign {
                        previous_source: source.cloned(),
                    })
                }
            }
            Err(PipelineError::NotFound { .. }) => Ok(Destination::Free),
            Err(e) => Err(e),
        }
    }

    /// The destination was written but the source never marked.
    async fn resume(&self, path: &str, destination: String, inv: &Invocation) -> Result<StageOutcome> {
        tracing::info!(destination = %destination, "Resuming interrupted relocation");
        inv.ensure_time_left()?;
        self.mark_source(path, &destination).await?;
        Ok(StageOutcome::Relocated { destination })
    }

    async fn mark_source(&self, path: &str, destination: &str) -> std::result::Result<(), StoreError> {
        let mut patch = Metadata::new();
        patch.insert(metadata::PROCESSED.to_string(), "true".to_string());
        patch.insert(metadata::RELOCATED_TO.to_string(), destination.to_string());
        if self.guard.commit_relocated(path, &patch).await? == CommitOutcome::Vanished {
            tracing::debug!(path = %path, "Source vanished before it could be marked processed");
        }
        Ok(())
    }

    /// Outer error: working-copy or task failure. Inner error: undecodable bytes.
    async fn sanitize_working_copy(
        &self,
        bytes: Vec<u8>,
    ) -> Result<std::result::Result<Sanitized, String>> {
        let scratch_dir = self.scratch_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<std::result::Result<Sanitized, String>> {
            let copy =
                WorkingCopy::create(bytes, scratch_dir.as_ref()).map_err(PipelineError::Scratch)?;
            let data = copy.load().map_err(PipelineError::Scratch)?;
            Ok(sanitize(&data).map_err(|e| e.to_string()))
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("sanitize task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceCredentials;
    use crate::store::{MemoryArtifactStore, StoreResult};
    use async_trait::async_trait;
    use lightbox_protocol::metadata::from_pairs;
    use lightbox_protocol::Namespaces;
    use lightbox_test_utils::{decode_pixels, jpeg_with_exif, plain_jpeg};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Finishes another invocation's relocation and analysis of `inbox/a.jpg`
    /// the first time its bytes are fetched.
    struct RacingStore {
        inner: Arc<MemoryArtifactStore>,
        raced: AtomicBool,
    }

    impl RacingStore {
        async fn finish_other_invocation(&self) -> StoreResult<()> {
            self.inner
                .insert(
                    "processed/a.jpg",
                    plain_jpeg(8, 8),
                    Some("image/jpeg"),
                    from_pairs([
                        ("uid", "u1"),
                        ("relocated", "true"),
                        ("source_path", "inbox/a.jpg"),
                        ("tagged", "true"),
                        ("processed", "true"),
                    ]),
                )
                .await?;
            self.inner
                .patch_metadata(
                    "inbox/a.jpg",
                    &from_pairs([("processed", "true"), ("relocated_to", "processed/a.jpg")]),
                )
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ArtifactStore for RacingStore {
        async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
            if path == "inbox/a.jpg" && !self.raced.swap(true, Ordering::SeqCst) {
                self.finish_other_invocation().await?;
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

    struct Fixture {
        store: Arc<MemoryArtifactStore>,
        stage: RelocationStage,
        scratch: TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryArtifactStore::new());
        let guard = Arc::new(IdempotencyGuard::new(
            store.clone(),
            Namespaces::default(),
            None,
        ));
        let scratch = TempDir::new().unwrap();
        let stage = RelocationStage::new(store.clone(), guard, Some(scratch.path().to_path_buf()));
        Fixture {
            store,
            stage,
            scratch,
        }
    }

    fn invocation() -> Invocation {
        Invocation::new(Duration::from_secs(30), ServiceCredentials::default())
    }

    #[tokio::test]
    async fn test_relocates_and_releases_working_copy() {
        let f = fixture();
        let original = jpeg_with_exif(16, 16);
        f.store
            .insert(
                "inbox/a.jpg",
                original.clone(),
                Some("image/jpeg"),
                from_pairs([("uid", "u1"), ("public", "true")]),
            )
            .await
            .unwrap();
        let declared = f.store.stat("inbox/a.jpg").await.unwrap();

        let outcome = f.stage.run(&declared, &invocation()).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Relocated {
                destination: "processed/a.jpg".into()
            }
        );

        let dest = f.store.stat("processed/a.jpg").await.unwrap();
        assert_eq!(dest.content_kind.as_deref(), Some("image/jpeg"));
        assert_eq!(dest.state(), ProcessingState::Relocated);
        assert_eq!(dest.metadata.get("source_path").unwrap(), "inbox/a.jpg");
        let bytes = f.store.get("processed/a.jpg").await.unwrap();
        assert_eq!(decode_pixels(&bytes), decode_pixels(&original));

        let source = f.store.get_metadata("inbox/a.jpg").await.unwrap();
        assert_eq!(source.get("relocated_to").unwrap(), "processed/a.jpg");
        assert_eq!(f.store.get("inbox/a.jpg").await.unwrap(), original);

        assert_eq!(std::fs::read_dir(f.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stale_notification_is_skipped_after_refresh() {
        let f = fixture();
        f.store
            .insert(
                "inbox/a.jpg",
                jpeg_with_exif(8, 8),
                Some("image/jpeg"),
                from_pairs([("processed", "true")]),
            )
            .await
            .unwrap();
        // Snapshot taken before the artifact was marked processed
        let stale = ArtifactSummary::new("inbox/a.jpg", Some("image/jpeg"), 100);

        let outcome = f.stage.run(&stale, &invocation()).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped(_)));
        assert!(f.store.generation("processed/a.jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_bytes_leave_no_trace() {
        let f = fixture();
        f.store
            .insert("inbox/bad.jpg", b"not a jpeg".to_vec(), Some("image/jpeg"), Metadata::new())
            .await
            .unwrap();
        let declared = f.store.stat("inbox/bad.jpg").await.unwrap();

        let err = f.stage.run(&declared, &invocation()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(f.store.generation("processed/bad.jpg").await.is_none());
        assert!(f.store.get_metadata("inbox/bad.jpg").await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(f.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_resumes_when_destination_already_written() {
        let f = fixture();
        f.store
            .insert(
                "inbox/a.jpg",
                jpeg_with_exif(8, 8),
                Some("image/jpeg"),
                from_pairs([("uid", "u1")]),
            )
            .await
            .unwrap();
        f.store
            .insert(
                "processed/a.jpg",
                vec![1, 2, 3],
                Some("image/jpeg"),
                from_pairs([
                    ("uid", "u1"),
                    ("relocated", "true"),
                    ("source_path", "inbox/a.jpg"),
                    ("tagged", "true"),
                    ("processed", "true"),
                ]),
            )
            .await
            .unwrap();
        let declared = f.store.stat("inbox/a.jpg").await.unwrap();

        let outcome = f.stage.run(&declared, &invocation()).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Relocated { .. }));
        // Destination untouched, analysis state preserved
        assert_eq!(f.store.generation("processed/a.jpg").await, Some(1));
        assert_eq!(
            f.store.stat("processed/a.jpg").await.unwrap().state(),
            ProcessingState::Analyzed
        );
        let source = f.store.stat("inbox/a.jpg").await.unwrap();
        assert_eq!(source.state(), ProcessingState::Relocated);
    }

    #[tokio::test]
    async fn test_relocation_finished_elsewhere_during_sanitize_is_not_overwritten() {
        let inner = Arc::new(MemoryArtifactStore::new());
        inner
            .insert(
                "inbox/a.jpg",
                jpeg_with_exif(8, 8),
                Some("image/jpeg"),
                from_pairs([("uid", "u1")]),
            )
            .await
            .unwrap();
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            raced: AtomicBool::new(false),
        });
        let guard = Arc::new(IdempotencyGuard::new(store.clone(), Namespaces::default(), None));
        let stage = RelocationStage::new(store, guard, None);
        let declared = inner.stat("inbox/a.jpg").await.unwrap();

        let outcome = stage.run(&declared, &invocation()).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped(_)));

        // The other invocation's write and analysis state survive
        assert_eq!(inner.generation("processed/a.jpg").await, Some(1));
        let dest = inner.stat("processed/a.jpg").await.unwrap();
        assert_eq!(dest.state(), ProcessingState::Analyzed);
        assert_eq!(dest.metadata.get("tagged").unwrap(), "true");
    }
}
