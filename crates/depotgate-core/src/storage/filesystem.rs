//! Filesystem-backed artifact storage.
//!
//! Payloads land at `<base>/<sanitized-tenant>/<sanitized-task>/<artifact_id>`
//! and are addressed as `fs://<path-relative-to-base>`. Read-side operations
//! re-derive the absolute path from the location and verify it stays a
//! descendant of the base before touching the filesystem.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ArtifactContent, BoxFuture, CHUNK_SIZE, StorageBackend, StoredArtifact};
use crate::error::{DepotError, DepotResult};
use crate::sanitize::{parse_location, resolve_under_base, sanitize_component};

const SCHEME: &str = "fs";

/// Artifact storage rooted at a single base directory.
#[derive(Debug)]
pub struct FilesystemStorage {
    base: PathBuf,
    max_artifact_bytes: u64,
}

impl FilesystemStorage {
    /// Creates a store rooted at `base`. `max_artifact_bytes` of 0 means
    /// unlimited.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>, max_artifact_bytes: u64) -> Self {
        Self {
            base: base.into(),
            max_artifact_bytes,
        }
    }

    /// Path of an artifact relative to the base, with both namespace
    /// components sanitized.
    fn relative_path(tenant_id: &str, root_task_id: &str, artifact_id: Uuid) -> PathBuf {
        PathBuf::from(sanitize_component(tenant_id))
            .join(sanitize_component(root_task_id))
            .join(artifact_id.to_string())
    }

    /// Parses a location, requires this backend's scheme, and resolves the
    /// absolute path with the descendant-of-base check.
    fn location_to_path(&self, location: &str) -> DepotResult<PathBuf> {
        let (scheme, rel) = parse_location(location)?;
        if scheme != SCHEME {
            return Err(DepotError::InvalidLocation {
                detail: format!("expected fs:// location, got {location:?}"),
            });
        }
        if rel.is_empty() {
            return Err(DepotError::InvalidLocation {
                detail: "empty fs:// location".into(),
            });
        }
        resolve_under_base(&self.base, rel)
    }

    async fn store_inner(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        artifact_id: Uuid,
        content: ArtifactContent,
    ) -> DepotResult<StoredArtifact> {
        let rel = Self::relative_path(tenant_id, root_task_id, artifact_id);
        let path = self.base.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut reader = content.into_reader();
        let mut file = fs::File::create(&path).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    remove_partial(&path).await;
                    return Err(err.into());
                }
            };
            size += n as u64;
            if self.max_artifact_bytes > 0 && size > self.max_artifact_bytes {
                drop(file);
                remove_partial(&path).await;
                return Err(DepotError::ArtifactTooLarge {
                    size,
                    max: self.max_artifact_bytes,
                });
            }
            hasher.update(&buf[..n]);
            if let Err(err) = file.write_all(&buf[..n]).await {
                remove_partial(&path).await;
                return Err(err.into());
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        let location = format!("{SCHEME}://{}", rel.display());
        let content_hash = format!("{:x}", hasher.finalize());
        debug!(%location, size_bytes = size, "stored artifact bytes");

        Ok(StoredArtifact {
            location,
            size_bytes: size,
            content_hash,
        })
    }

    /// Removes now-empty parent directories up to the base, best-effort.
    fn prune_empty_parents(&self, path: &Path) {
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == self.base || std::fs::remove_dir(dir).is_err() {
                break;
            }
            parent = dir.parent();
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!(path = %path.display(), %err, "failed to remove partial artifact");
    }
}

impl StorageBackend for FilesystemStorage {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn store<'a>(
        &'a self,
        tenant_id: &'a str,
        root_task_id: &'a str,
        artifact_id: Uuid,
        content: ArtifactContent,
        _mime_type: &'a str,
    ) -> BoxFuture<'a, DepotResult<StoredArtifact>> {
        Box::pin(self.store_inner(tenant_id, root_task_id, artifact_id, content))
    }

    fn retrieve<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<Vec<u8>>> {
        Box::pin(async move {
            let path = self.location_to_path(location)?;
            match fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(DepotError::ArtifactMissing {
                        location: location.to_string(),
                    })
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    fn delete<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<()>> {
        Box::pin(async move {
            let path = self.location_to_path(location)?;
            match fs::remove_file(&path).await {
                Ok(()) => {
                    self.prune_empty_parents(&path);
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn exists<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<bool>> {
        Box::pin(async move {
            let path = self.location_to_path(location)?;
            Ok(fs::try_exists(&path).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn store_in(dir: &Path, max: u64) -> FilesystemStorage {
        FilesystemStorage::new(dir, max)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);
        let id = Uuid::new_v4();

        let stored = storage
            .store("tenant-a", "task-1", id, ArtifactContent::bytes(b"hello".to_vec()), "text/plain")
            .await
            .unwrap();

        assert_eq!(stored.size_bytes, 5);
        assert!(stored.location.starts_with("fs://tenant-a/task-1/"));
        assert_eq!(
            stored.content_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let bytes = storage.retrieve(&stored.location).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn empty_artifact_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);

        let stored = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(Vec::new()), "text/plain")
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 0);
        assert_eq!(stored.content_hash, EMPTY_SHA256);
        assert!(storage.retrieve(&stored.location).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn size_limit_is_exclusive_of_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 8);

        let at_limit = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(vec![0u8; 8]), "x")
            .await;
        assert!(at_limit.is_ok(), "exactly at the limit must be accepted");

        let over = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(vec![0u8; 9]), "x")
            .await
            .unwrap_err();
        match over {
            DepotError::ArtifactTooLarge { size, max } => {
                assert_eq!(size, 9);
                assert_eq!(max, 8);
            }
            other => panic!("expected ArtifactTooLarge, got {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_stream_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), CHUNK_SIZE as u64);
        let id = Uuid::new_v4();

        // Two chunks; the limit trips mid-stream on the second.
        let payload = vec![7u8; CHUNK_SIZE * 2];
        let err = storage
            .store(
                "t",
                "task",
                id,
                ArtifactContent::stream(std::io::Cursor::new(payload)),
                "x",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "artifact_too_large");

        let path = dir.path().join("t").join("task").join(id.to_string());
        assert!(!path.exists(), "partial file must be removed");
    }

    #[tokio::test]
    async fn hostile_namespace_components_stay_inside_the_base() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);

        let stored = storage
            .store("../../etc", "task", Uuid::new_v4(), ArtifactContent::bytes(b"x".to_vec()), "x")
            .await
            .unwrap();

        let path = storage.location_to_path(&stored.location).unwrap();
        let canon_base = dir.path().canonicalize().unwrap();
        assert!(path.starts_with(&canon_base), "{path:?} escaped {canon_base:?}");
    }

    #[tokio::test]
    async fn escaping_locations_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);

        for (location, kind) in [
            ("fs://../../etc/passwd", "path_violation"),
            ("fs:///etc/passwd", "path_violation"),
            ("/etc/passwd", "invalid_location"),
            ("mem://x", "invalid_location"),
        ] {
            let err = storage.retrieve(location).await.unwrap_err();
            assert_eq!(err.kind(), kind, "location {location:?}");
        }
    }

    #[tokio::test]
    async fn missing_payload_reports_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);

        let err = storage.retrieve("fs://t/task/nothing").await.unwrap_err();
        assert_eq!(err.kind(), "artifact_missing");
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = store_in(dir.path(), 0);

        let stored = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(b"x".to_vec()), "x")
            .await
            .unwrap();

        assert!(storage.exists(&stored.location).await.unwrap());
        storage.delete(&stored.location).await.unwrap();
        assert!(!storage.exists(&stored.location).await.unwrap());
        assert!(!dir.path().join("t").exists(), "empty namespace dirs pruned");

        storage.delete(&stored.location).await.unwrap();
    }
}
