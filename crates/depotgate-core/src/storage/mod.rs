//! Storage backends for opaque artifact payloads.
//!
//! A backend stores, retrieves, and deletes byte payloads addressed by a
//! storage-agnostic location URI whose scheme selects the backend. Exactly
//! one backend is active per process; the closed set of implementations is
//! selected by [`backend_for_scheme`] at startup rather than through a
//! runtime registry.
//!
//! Ingest is streaming: size and SHA-256 are tracked incrementally in the
//! same pass, and exceeding the configured maximum mid-stream removes the
//! partial payload and fails with `ArtifactTooLarge`.

mod filesystem;
mod memory;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::config::DepotConfig;
use crate::error::{DepotError, DepotResult};

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Chunk size for streaming ingest and retrieval.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Artifact content handed to [`StorageBackend::store`]: either a complete
/// byte buffer or an async byte stream consumed incrementally.
pub enum ArtifactContent {
    /// A complete in-memory payload.
    Bytes(Vec<u8>),
    /// A streaming payload read to exhaustion during ingest.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl ArtifactContent {
    /// Wraps a byte buffer.
    #[must_use]
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Wraps an async reader.
    #[must_use]
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Converts either form into a reader for a single streaming ingest
    /// path.
    pub(crate) fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        match self {
            Self::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
            Self::Stream(reader) => reader,
        }
    }
}

impl std::fmt::Debug for ArtifactContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Result of a successful store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Location URI under the backend's scheme.
    pub location: String,
    /// Exact number of bytes stored.
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored bytes.
    pub content_hash: String,
}

/// Object-safe async interface to a payload store.
///
/// Implementations must guarantee that a location they returned from
/// `store` stays retrievable until `delete`, and that `retrieve`/`delete`
/// refuse any location that escapes the backend's namespace.
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// The location scheme this backend owns.
    fn scheme(&self) -> &'static str;

    /// Stores a payload for `(tenant_id, root_task_id, artifact_id)` and
    /// returns its location, size, and content hash.
    ///
    /// # Errors
    ///
    /// - `ArtifactTooLarge` if a configured maximum is exceeded; any
    ///   partial payload has been removed.
    /// - `StorageFailure` on I/O failure.
    fn store<'a>(
        &'a self,
        tenant_id: &'a str,
        root_task_id: &'a str,
        artifact_id: Uuid,
        content: ArtifactContent,
        mime_type: &'a str,
    ) -> BoxFuture<'a, DepotResult<StoredArtifact>>;

    /// Retrieves the payload at `location`.
    ///
    /// # Errors
    ///
    /// - `InvalidLocation` if the URI is malformed or carries a foreign
    ///   scheme.
    /// - `PathViolation` if the location escapes the backend's base.
    /// - `ArtifactMissing` if no payload exists at the location.
    fn retrieve<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<Vec<u8>>>;

    /// Deletes the payload at `location`. Deleting an absent payload is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Same location errors as [`StorageBackend::retrieve`], plus
    /// `StorageFailure` on I/O failure.
    fn delete<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<()>>;

    /// Reports whether a payload exists at `location`.
    ///
    /// # Errors
    ///
    /// Same location errors as [`StorageBackend::retrieve`].
    fn exists<'a>(&'a self, location: &'a str) -> BoxFuture<'a, DepotResult<bool>>;
}

/// Constructs the backend selected by `scheme`. The closed set of
/// implementations lives here; no runtime registration exists.
pub fn backend_for_scheme(
    scheme: &str,
    config: &DepotConfig,
) -> DepotResult<Arc<dyn StorageBackend>> {
    match scheme {
        "fs" => Ok(Arc::new(FilesystemStorage::new(
            config.storage_base_path.clone(),
            config.max_artifact_bytes,
        ))),
        "mem" => Ok(Arc::new(MemoryStorage::new(config.max_artifact_bytes))),
        other => Err(DepotError::InvalidConfig {
            detail: format!("no storage backend for scheme {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safety(_: &dyn StorageBackend) {}

    #[test]
    fn backend_selection_is_a_closed_table() {
        let config = DepotConfig::default();
        assert_eq!(backend_for_scheme("fs", &config).unwrap().scheme(), "fs");
        assert_eq!(backend_for_scheme("mem", &config).unwrap().scheme(), "mem");
        assert!(backend_for_scheme("s3", &config).is_err());
    }
}
