//! Staging area: accepts artifact uploads and binds pointer metadata to
//! stored bytes.
//!
//! Ordering within a single `stage` call: bytes land in storage, the
//! pointer row lands in metadata, and only then is the `artifact_staged`
//! receipt emitted. A pointer insert failure triggers best-effort deletion
//! of the stored bytes. A receipt failure after the pointer commit leaves
//! the pointer live and the receipt lost; the call reports
//! `ReceiptWriteFailed`. That asymmetry is intentional: pointers are the
//! source of truth for closure, receipts are the audit trail.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DepotError, DepotResult};
use crate::metadata::MetadataStore;
use crate::model::{ArtifactPointer, ArtifactRole, Receipt, ReceiptKind};
use crate::receipt::ReceiptStore;
use crate::sanitize::{validate_identifier, validate_task_id};
use crate::storage::{ArtifactContent, StorageBackend};

/// Manages artifact staging for all tasks of a process.
#[derive(Debug)]
pub struct StagingArea {
    storage: Arc<dyn StorageBackend>,
    metadata: Arc<MetadataStore>,
    receipts: Arc<ReceiptStore>,
}

impl StagingArea {
    /// Creates a staging area over the injected stores.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<MetadataStore>,
        receipts: Arc<ReceiptStore>,
    ) -> Self {
        Self {
            storage,
            metadata,
            receipts,
        }
    }

    /// Stages an artifact and returns its pointer.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` for a malformed tenant or task id.
    /// - `ArtifactTooLarge` if the payload exceeds the configured maximum.
    /// - `StorageFailure` if bytes or the pointer row cannot be persisted.
    /// - `ReceiptWriteFailed` if the pointer committed but the receipt did
    ///   not; the artifact is staged regardless.
    pub async fn stage(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        content: ArtifactContent,
        mime_type: &str,
        artifact_role: ArtifactRole,
        produced_by_receipt_id: Option<String>,
    ) -> DepotResult<ArtifactPointer> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;

        let artifact_id = Uuid::new_v4();
        let stored = self
            .storage
            .store(tenant_id, root_task_id, artifact_id, content, mime_type)
            .await?;

        let pointer = ArtifactPointer {
            artifact_id,
            tenant_id: tenant_id.to_string(),
            root_task_id: root_task_id.to_string(),
            location: stored.location,
            size_bytes: stored.size_bytes,
            mime_type: mime_type.to_string(),
            content_hash: stored.content_hash,
            artifact_role,
            produced_by_receipt_id: produced_by_receipt_id.clone(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.metadata.insert_pointer(&pointer) {
            warn!(%artifact_id, %err, "pointer insert failed, removing stored bytes");
            if let Err(cleanup) = self.storage.delete(&pointer.location).await {
                warn!(%artifact_id, %cleanup, "orphaned bytes left behind");
            }
            return Err(err);
        }

        let receipt = Receipt::new(
            tenant_id,
            root_task_id,
            ReceiptKind::ArtifactStaged,
            json!({ "pointer": pointer }),
            produced_by_receipt_id,
        );
        self.receipts.append(&receipt)?;

        info!(
            %artifact_id,
            root_task_id,
            role = artifact_role.as_str(),
            size_bytes = pointer.size_bytes,
            "artifact staged"
        );
        Ok(pointer)
    }

    /// Lists live pointers for a task, newest first, optionally filtered by
    /// role.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for malformed ids and `StorageFailure`
    /// on query failure.
    pub fn list(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        artifact_role: Option<ArtifactRole>,
    ) -> DepotResult<Vec<ArtifactPointer>> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;
        self.metadata
            .live_pointers(tenant_id, root_task_id, artifact_role)
    }

    /// Loads a live pointer by artifact id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the artifact does not exist or is purged.
    pub fn get_artifact(&self, tenant_id: &str, artifact_id: Uuid) -> DepotResult<ArtifactPointer> {
        self.metadata
            .get_live_pointer(tenant_id, artifact_id)?
            .ok_or_else(|| DepotError::NotFound {
                entity: "artifact",
                id: artifact_id.to_string(),
            })
    }

    /// Retrieves the bytes of a live artifact.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no live pointer exists.
    /// - `ArtifactMissing` if the pointer exists but the bytes are gone.
    /// - `PathViolation` if the stored location escapes the storage base.
    pub async fn get_content(&self, tenant_id: &str, artifact_id: Uuid) -> DepotResult<Vec<u8>> {
        let pointer = self.get_artifact(tenant_id, artifact_id)?;
        self.storage.retrieve(&pointer.location).await
    }
}
