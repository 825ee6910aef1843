//! Filesystem-backed artifact store.
//!
//! Objects live as plain files under the store root. Metadata and the declared
//! content kind live in a JSON sidecar per object under `.lightbox-meta/`, so
//! the object files themselves are exactly the bytes that were written.

use super::traits::{validate_path, ArtifactStore, StoreError, StoreResult};
use async_trait::async_trait;
use lightbox_protocol::{ArtifactSummary, Metadata};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use walkdir::WalkDir;

const META_DIR: &str = ".lightbox-meta";
const TMP_SUFFIX: &str = ".lightbox-tmp";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    content_kind: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

pub struct LocalArtifactStore {
    root: PathBuf,
    /// Serializes sidecar read-modify-write within this process.
    sidecar_lock: Mutex<()>,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(META_DIR))?;
        Ok(Self {
            root,
            sidecar_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn sidecar_path(&self, path: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", path))
    }

    async fn read_sidecar(&self, path: &str) -> StoreResult<Sidecar> {
        match tokio::fs::read(self.sidecar_path(path)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Sidecar {
                path: path.to_string(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_sidecar(&self, path: &str, sidecar: &Sidecar) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(sidecar).map_err(|source| StoreError::Sidecar {
            path: path.to_string(),
            source,
        })?;
        write_atomic(&self.sidecar_path(path), &raw).await
    }

    async fn ensure_exists(&self, path: &str) -> StoreResult<u64> {
        let meta = tokio::fs::metadata(self.object_path(path))
            .await
            .map_err(|e| not_found_or_io(path, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(meta.len())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        validate_path(path)?;
        tokio::fs::read(self.object_path(path))
            .await
            .map_err(|e| not_found_or_io(path, e))
    }

    async fn put(&self, path: &str, bytes: &[u8], content_kind: Option<&str>) -> StoreResult<()> {
        validate_path(path)?;
        if path.starts_with(META_DIR) {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "reserved prefix".to_string(),
            });
        }

        let _guard = self.sidecar_lock.lock().await;
        write_atomic(&self.object_path(path), bytes).await?;
        self.write_sidecar(
            path,
            &Sidecar {
                content_kind: content_kind.map(str::to_string),
                metadata: Metadata::new(),
            },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ArtifactSummary>> {
        let root = self.root.clone();
        let prefix_owned = prefix.to_string();
        let paths = tokio::task::spawn_blocking(move || walk_objects(&root, &prefix_owned))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.stat(&path).await {
                Ok(summary) => summaries.push(summary),
                // Removed between the walk and the stat.
                Err(StoreError::NotFound(_)) => continue,
                Err(StoreError::InvalidPath { path, reason }) => {
                    tracing::warn!(path = %path, reason = %reason, "Skipping unaddressable file");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    async fn stat(&self, path: &str) -> StoreResult<ArtifactSummary> {
        validate_path(path)?;
        let byte_size = self.ensure_exists(path).await?;
        let sidecar = self.read_sidecar(path).await?;
        let content_kind = sidecar
            .content_kind
            .or_else(|| guess_content_kind(path).map(str::to_string));
        Ok(ArtifactSummary {
            path: path.to_string(),
            content_kind,
            byte_size,
            metadata: sidecar.metadata,
        })
    }

    async fn patch_metadata(&self, path: &str, patch: &Metadata) -> StoreResult<Metadata> {
        validate_path(path)?;
        let _guard = self.sidecar_lock.lock().await;
        self.ensure_exists(path).await?;

        let mut sidecar = self.read_sidecar(path).await?;
        sidecar
            .metadata
            .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.write_sidecar(path, &sidecar).await?;
        Ok(sidecar.metadata)
    }

    fn public_url(&self, path: &str) -> String {
        format!("file://{}", self.object_path(path).display())
    }
}

fn not_found_or_io(path: &str, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(path.to_string())
    } else {
        StoreError::Io(e)
    }
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

/// Relative forward-slash paths of every object under `root` matching `prefix`.
fn walk_objects(root: &Path, prefix: &str) -> StoreResult<Vec<String>> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || e.file_name() != META_DIR);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable store entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel.ends_with(TMP_SUFFIX) || !rel.starts_with(prefix) {
            continue;
        }
        paths.push(rel);
    }
    paths.sort();
    Ok(paths)
}

fn guess_content_kind(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let kind = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbox_protocol::metadata::from_pairs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_and_stat() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();

        store
            .put("inbox/2024/a.jpg", b"bytes", Some("image/jpeg"))
            .await
            .unwrap();

        assert_eq!(store.get("inbox/2024/a.jpg").await.unwrap(), b"bytes");
        let summary = store.stat("inbox/2024/a.jpg").await.unwrap();
        assert_eq!(summary.byte_size, 5);
        assert_eq!(summary.content_kind.as_deref(), Some("image/jpeg"));
        assert!(summary.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_externally_dropped_file_gets_guessed_kind() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();
        std::fs::create_dir_all(tmp.path().join("inbox")).unwrap();
        std::fs::write(tmp.path().join("inbox/photo.PNG"), b"x").unwrap();
        std::fs::write(tmp.path().join("inbox/notes.md"), b"x").unwrap();

        let listed = store.list("inbox/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, "inbox/notes.md");
        assert_eq!(listed[0].content_kind, None);
        assert_eq!(listed[1].content_kind.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_patch_metadata_persists_in_sidecar() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();
        store.put("inbox/a.jpg", b"x", None).await.unwrap();

        store
            .patch_metadata("inbox/a.jpg", &from_pairs([("uid", "u1")]))
            .await
            .unwrap();
        store
            .patch_metadata("inbox/a.jpg", &from_pairs([("public", "true")]))
            .await
            .unwrap();

        let reopened = LocalArtifactStore::new(tmp.path()).unwrap();
        let meta = reopened.get_metadata("inbox/a.jpg").await.unwrap();
        assert_eq!(meta, from_pairs([("uid", "u1"), ("public", "true")]));
    }

    #[tokio::test]
    async fn test_list_excludes_sidecars_and_other_prefixes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();
        store.put("inbox/a.jpg", b"x", None).await.unwrap();
        store.put("processed/a.jpg", b"x", None).await.unwrap();

        let all: Vec<_> = store
            .list("")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(all, vec!["inbox/a.jpg", "processed/a.jpg"]);
        assert_eq!(store.list("processed/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_paths() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();
        assert!(store.stat("inbox/missing.jpg").await.unwrap_err().is_not_found());
        assert!(matches!(
            store.get("../outside").await,
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(store.put(".lightbox-meta/x", b"x", None).await.is_err());
    }

    #[test]
    fn test_public_url_is_file_url() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path()).unwrap();
        assert!(store.public_url("processed/a.jpg").starts_with("file://"));
        assert!(store.public_url("processed/a.jpg").ends_with("processed/a.jpg"));
    }
}
