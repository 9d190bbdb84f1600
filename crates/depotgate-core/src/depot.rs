//! Composition root: constructs the storage backend, sink registry, stores,
//! and services once, and exposes the single-tenant operation surface.
//!
//! There is no global mutable state and no runtime registry; everything is
//! built here from a validated [`DepotConfig`] and injected downward.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::DepotConfig;
use crate::deliverable::DeliverableManager;
use crate::error::DepotResult;
use crate::metadata::MetadataStore;
use crate::model::{
    ArtifactPointer, ArtifactRole, ClosureReport, Deliverable, DeliverableSpec, PurgePolicy,
    Receipt, ShipmentManifest,
};
use crate::receipt::ReceiptStore;
use crate::shipping::ShippingService;
use crate::sink::SinkRegistry;
use crate::staging::StagingArea;
use crate::storage::{self, ArtifactContent};

/// A fully wired DepotGate instance operating under one tenant.
#[derive(Debug)]
pub struct Depot {
    tenant_id: String,
    staging: StagingArea,
    deliverables: Arc<DeliverableManager>,
    shipping: ShippingService,
    receipts: Arc<ReceiptStore>,
}

impl Depot {
    /// Validates `config` and constructs every component.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` / `InvalidConfig` for a bad configuration.
    /// - `StorageFailure` if a database cannot be opened.
    pub fn new(config: &DepotConfig) -> DepotResult<Self> {
        config.validate()?;

        let backend = storage::backend_for_scheme(&config.storage_scheme, config)?;
        let sinks = Arc::new(SinkRegistry::from_config(config)?);
        let metadata = Arc::new(MetadataStore::open(&config.metadata_db_path)?);
        let receipts = Arc::new(ReceiptStore::open(&config.receipts_db_path)?);
        let deliverables = Arc::new(DeliverableManager::new(Arc::clone(&metadata)));

        let staging = StagingArea::new(
            Arc::clone(&backend),
            Arc::clone(&metadata),
            Arc::clone(&receipts),
        );
        let shipping = ShippingService::new(
            backend,
            metadata,
            Arc::clone(&receipts),
            sinks,
            Arc::clone(&deliverables),
        );

        Ok(Self {
            tenant_id: config.tenant_id.clone(),
            staging,
            deliverables,
            shipping,
            receipts,
        })
    }

    /// The tenant this instance operates under.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Stages an artifact. See [`StagingArea::stage`].
    pub async fn stage(
        &self,
        root_task_id: &str,
        content: ArtifactContent,
        mime_type: &str,
        artifact_role: ArtifactRole,
        produced_by_receipt_id: Option<String>,
    ) -> DepotResult<ArtifactPointer> {
        self.staging
            .stage(
                &self.tenant_id,
                root_task_id,
                content,
                mime_type,
                artifact_role,
                produced_by_receipt_id,
            )
            .await
    }

    /// Lists live pointers for a task, newest first.
    pub fn stage_list(
        &self,
        root_task_id: &str,
        artifact_role: Option<ArtifactRole>,
    ) -> DepotResult<Vec<ArtifactPointer>> {
        self.staging
            .list(&self.tenant_id, root_task_id, artifact_role)
    }

    /// Loads a live pointer by artifact id.
    pub fn get_artifact(&self, artifact_id: Uuid) -> DepotResult<ArtifactPointer> {
        self.staging.get_artifact(&self.tenant_id, artifact_id)
    }

    /// Retrieves the bytes of a live artifact.
    pub async fn get_content(&self, artifact_id: Uuid) -> DepotResult<Vec<u8>> {
        self.staging.get_content(&self.tenant_id, artifact_id).await
    }

    /// Declares a deliverable contract.
    pub fn declare_deliverable(
        &self,
        root_task_id: &str,
        spec: DeliverableSpec,
    ) -> DepotResult<Deliverable> {
        self.deliverables.declare(&self.tenant_id, root_task_id, spec)
    }

    /// Loads a deliverable by id.
    pub fn get_deliverable(&self, deliverable_id: Uuid) -> DepotResult<Deliverable> {
        self.deliverables.get(&self.tenant_id, deliverable_id)
    }

    /// Lists deliverables for a task.
    pub fn list_deliverables(&self, root_task_id: &str) -> DepotResult<Vec<Deliverable>> {
        self.deliverables.list(&self.tenant_id, root_task_id)
    }

    /// Computes closure for a deliverable.
    pub fn check_closure(&self, deliverable_id: Uuid) -> DepotResult<ClosureReport> {
        self.deliverables.check_closure(&self.tenant_id, deliverable_id)
    }

    /// Marks a named requirement satisfied.
    pub fn mark_requirement(&self, deliverable_id: Uuid, name: &str) -> DepotResult<()> {
        self.deliverables
            .mark_requirement(&self.tenant_id, deliverable_id, name)
    }

    /// Ships a deliverable. See [`ShippingService::ship`].
    pub async fn ship(
        &self,
        root_task_id: &str,
        deliverable_id: Uuid,
    ) -> DepotResult<ShipmentManifest> {
        self.shipping
            .ship(&self.tenant_id, root_task_id, deliverable_id)
            .await
    }

    /// Purges staged artifacts. See [`ShippingService::purge`].
    pub async fn purge(
        &self,
        root_task_id: &str,
        policy: PurgePolicy,
        artifact_ids: Option<&[Uuid]>,
    ) -> DepotResult<Receipt> {
        self.shipping
            .purge(&self.tenant_id, root_task_id, policy, artifact_ids)
            .await
    }

    /// Loads a shipment manifest by id.
    pub fn get_manifest(&self, manifest_id: Uuid) -> DepotResult<ShipmentManifest> {
        self.shipping.get_manifest(&self.tenant_id, manifest_id)
    }

    /// Lists shipment manifests for a task.
    pub fn list_manifests(&self, root_task_id: &str) -> DepotResult<Vec<ShipmentManifest>> {
        self.shipping.list_manifests(&self.tenant_id, root_task_id)
    }

    /// Lists receipts for a task, ascending by emission time.
    pub fn list_receipts(&self, root_task_id: &str) -> DepotResult<Vec<Receipt>> {
        self.receipts.list(&self.tenant_id, root_task_id)
    }
}
