//! In-memory artifact storage for tests and ephemeral deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use super::{ArtifactContent, BoxFuture, CHUNK_SIZE, StorageBackend, StoredArtifact};
use crate::error::{DepotError, DepotResult};
use crate::sanitize::{parse_location, sanitize_component};

const SCHEME: &str = "mem";

/// Artifact storage held entirely in process memory.
#[derive(Debug)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    max_artifact_bytes: u64,
}

impl MemoryStorage {
    /// Creates an empty store. `max_artifact_bytes` of 0 means unlimited.
    #[must_use]
    pub fn new(max_artifact_bytes: u64) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_artifact_bytes,
        }
    }

    fn key_for(&self, location: &str) -> DepotResult<String> {
        let (scheme, body) = parse_location(location)?;
        if scheme != SCHEME {
            return Err(DepotError::InvalidLocation {
                detail: format!("expected mem:// location, got {location:?}"),
            });
        }
        Ok(body.to_string())
    }
}

impl StorageBackend for MemoryStorage {
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
        Box::pin(async move {
            let mut reader = content.into_reader();
            let mut bytes = Vec::new();
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                bytes.extend_from_slice(&buf[..n]);
                if self.max_artifact_bytes > 0 && bytes.len() as u64 > self.max_artifact_bytes {
                    return Err(DepotError::ArtifactTooLarge {
                        size: bytes.len() as u64,
                        max: self.max_artifact_bytes,
                    });
                }
            }

            let content_hash = format!("{:x}", Sha256::digest(&bytes));
            let size_bytes = bytes.len() as u64;
            let key = format!(
                "{}/{}/{artifact_id}",
                sanitize_component(tenant_id),
                sanitize_component(root_task_id)
            );
            let location = format!("{SCHEME}://{key}");

            let mut objects = self.objects.write().expect("storage lock poisoned");
            objects.insert(key, bytes);

            Ok(StoredArtifact {
                location,
                size_bytes,
                content_hash,
            })
        })
    }

    fn retrieve<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<Vec<u8>>> {
        Box::pin(async move {
            let key = self.key_for(location)?;
            let objects = self.objects.read().expect("storage lock poisoned");
            objects
                .get(&key)
                .cloned()
                .ok_or_else(|| DepotError::ArtifactMissing {
                    location: location.to_string(),
                })
        })
    }

    fn delete<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<()>> {
        Box::pin(async move {
            let key = self.key_for(location)?;
            self.objects
                .write()
                .expect("storage lock poisoned")
                .remove(&key);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<bool>> {
        Box::pin(async move {
            let key = self.key_for(location)?;
            Ok(self
                .objects
                .read()
                .expect("storage lock poisoned")
                .contains_key(&key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_delete() {
        let storage = MemoryStorage::new(0);
        let stored = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(b"abc".to_vec()), "x")
            .await
            .unwrap();

        assert_eq!(storage.retrieve(&stored.location).await.unwrap(), b"abc");
        assert!(storage.exists(&stored.location).await.unwrap());

        storage.delete(&stored.location).await.unwrap();
        let err = storage.retrieve(&stored.location).await.unwrap_err();
        assert_eq!(err.kind(), "artifact_missing");
    }

    #[tokio::test]
    async fn size_limit_applies() {
        let storage = MemoryStorage::new(2);
        let err = storage
            .store("t", "task", Uuid::new_v4(), ArtifactContent::bytes(b"abc".to_vec()), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "artifact_too_large");
    }

    #[tokio::test]
    async fn foreign_scheme_is_refused() {
        let storage = MemoryStorage::new(0);
        let err = storage.retrieve("fs://t/task/x").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_location");
    }
}
