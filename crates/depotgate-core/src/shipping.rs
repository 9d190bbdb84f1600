//! Shipping service: ships deliverables gated by closure, and purges
//! staged artifacts.
//!
//! The deliverable state machine is `declared -> shipped` or
//! `declared -> rejected`, both terminal, transitioned by compare-and-swap.
//! Within one ship call the ordering is: closure check, sink write,
//! deliverable CAS + manifest insert (one transaction), terminal receipt.
//!
//! Failure ordering matters:
//! - a sink failure before the transaction leaves state unchanged and emits
//!   no receipt, so the deliverable stays `declared` and may be retried;
//! - a transaction failure after the sink has externalized bytes surfaces
//!   as `ManifestPersistFailed` and also leaves state unchanged — retrying
//!   may duplicate externalized bytes (at-least-once);
//! - a receipt failure after the transaction surfaces as
//!   `ReceiptWriteFailed`, but the shipment is committed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::deliverable::DeliverableManager;
use crate::error::{DepotError, DepotResult};
use crate::metadata::MetadataStore;
use crate::model::{
    ArtifactPointer, ClosureReport, DeliverableStatus, PurgePolicy, Receipt, ReceiptKind,
    ShipmentManifest,
};
use crate::receipt::ReceiptStore;
use crate::sanitize::{validate_identifier, validate_task_id};
use crate::sink::SinkRegistry;
use crate::storage::{BoxFuture, StorageBackend};

/// Version stamped into `purged` receipt payloads so policy semantics can
/// evolve without ambiguity in the audit trail.
pub const PURGE_POLICY_VERSION: u32 = 1;

/// Orchestrates shipping and purging over the injected components.
#[derive(Debug)]
pub struct ShippingService {
    storage: Arc<dyn StorageBackend>,
    metadata: Arc<MetadataStore>,
    receipts: Arc<ReceiptStore>,
    sinks: Arc<SinkRegistry>,
    deliverables: Arc<DeliverableManager>,
}

impl ShippingService {
    /// Creates a shipping service over the injected components.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<MetadataStore>,
        receipts: Arc<ReceiptStore>,
        sinks: Arc<SinkRegistry>,
        deliverables: Arc<DeliverableManager>,
    ) -> Self {
        Self {
            storage,
            metadata,
            receipts,
            sinks,
            deliverables,
        }
    }

    /// Ships a deliverable if its closure is satisfied.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the deliverable is absent or belongs to another task.
    /// - `AlreadyShipped` / `AlreadyRejected` on terminal-state re-entry.
    /// - `ClosureNotSatisfied` after transitioning the deliverable to
    ///   `rejected` and emitting a `shipment_rejected` receipt.
    /// - `UnknownSink` / `PathViolation` / `SinkTransportFailure` from the
    ///   sink, all without state change.
    /// - `RaceLost` if a concurrent ship won the CAS.
    /// - `ManifestPersistFailed` if the sink succeeded but the transaction
    ///   did not.
    /// - `ReceiptWriteFailed` if the shipment committed but its receipt was
    ///   lost.
    pub async fn ship(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        deliverable_id: Uuid,
    ) -> DepotResult<ShipmentManifest> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;

        let deliverable = self.deliverables.get(tenant_id, deliverable_id)?;
        if deliverable.root_task_id != root_task_id {
            return Err(DepotError::NotFound {
                entity: "deliverable",
                id: deliverable_id.to_string(),
            });
        }
        match deliverable.status {
            DeliverableStatus::Shipped => {
                return Err(DepotError::AlreadyShipped { deliverable_id });
            }
            DeliverableStatus::Rejected => {
                return Err(DepotError::AlreadyRejected { deliverable_id });
            }
            DeliverableStatus::Declared => {}
        }

        let report = self.deliverables.check_closure(tenant_id, deliverable_id)?;
        if !report.satisfied {
            return Err(self.reject(tenant_id, root_task_id, deliverable_id, report)?);
        }

        // Freeze the shipping set; liveness changes after this point only
        // surface as retrieval failures.
        let pointers = report.matched_pointers;
        let (sink, sink_destination) =
            self.sinks.resolve(&deliverable.spec.shipping_destination)?;

        let manifest = ShipmentManifest {
            manifest_id: Uuid::new_v4(),
            deliverable_id,
            tenant_id: tenant_id.to_string(),
            root_task_id: root_task_id.to_string(),
            artifact_pointers: pointers.clone(),
            destination: deliverable.spec.shipping_destination.clone(),
            shipped_at: Utc::now(),
        };

        let locations: HashMap<Uuid, String> = pointers
            .iter()
            .map(|p| (p.artifact_id, p.location.clone()))
            .collect();
        let storage = Arc::clone(&self.storage);
        let fetch = move |artifact_id: Uuid| -> BoxFuture<'static, DepotResult<Vec<u8>>> {
            let storage = Arc::clone(&storage);
            let location = locations.get(&artifact_id).cloned();
            Box::pin(async move {
                match location {
                    Some(location) => storage.retrieve(&location).await,
                    None => Err(DepotError::ArtifactMissing {
                        location: artifact_id.to_string(),
                    }),
                }
            })
        };

        sink.ship(&pointers, &sink_destination, &manifest, &fetch)
            .await?;

        self.metadata.commit_shipment(&manifest)?;

        let receipt = Receipt::new(
            tenant_id,
            root_task_id,
            ReceiptKind::ShipmentComplete,
            json!({
                "manifest_id": manifest.manifest_id,
                "deliverable_id": deliverable_id,
                "destination": manifest.destination,
                "artifact_ids": pointers.iter().map(|p| p.artifact_id).collect::<Vec<_>>(),
            }),
            None,
        );
        self.receipts.append(&receipt)?;

        info!(
            %deliverable_id,
            manifest_id = %manifest.manifest_id,
            destination = %manifest.destination,
            artifacts = pointers.len(),
            "shipment complete"
        );
        Ok(manifest)
    }

    /// Rejection path: CAS to `rejected`, emit the receipt, surface
    /// `ClosureNotSatisfied`. A lost CAS means a concurrent call reached a
    /// terminal state first and is reported as such.
    fn reject(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        deliverable_id: Uuid,
        report: ClosureReport,
    ) -> DepotResult<DepotError> {
        let won = self
            .metadata
            .transition_status(tenant_id, deliverable_id, DeliverableStatus::Rejected)?;
        if !won {
            let current = self.deliverables.get(tenant_id, deliverable_id)?;
            return match current.status {
                DeliverableStatus::Shipped => Ok(DepotError::AlreadyShipped { deliverable_id }),
                _ => Ok(DepotError::AlreadyRejected { deliverable_id }),
            };
        }

        let receipt = Receipt::new(
            tenant_id,
            root_task_id,
            ReceiptKind::ShipmentRejected,
            json!({
                "deliverable_id": deliverable_id,
                "missing_ids": report.missing_ids,
                "missing_roles": report.missing_roles,
                "missing_requirements": report.missing_requirements,
            }),
            None,
        );
        self.receipts.append(&receipt)?;

        info!(%deliverable_id, root_task_id, "shipment rejected at closure gate");
        Ok(DepotError::ClosureNotSatisfied {
            deliverable_id,
            report: Box::new(report),
        })
    }

    /// Purges staged artifacts under a retention policy.
    ///
    /// `immediate` marks pointers purged and deletes bytes now; byte-delete
    /// failures do not block the metadata update and leave orphans for the
    /// out-of-core janitor. `retain_24h` / `retain_7d` mark pointers purged
    /// with a `purge_after` stamp. `manual` records intent only. Every
    /// invocation emits exactly one `purged` receipt, even when nothing
    /// transitioned.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` for malformed ids.
    /// - `StorageFailure` if the metadata update fails.
    /// - `ReceiptWriteFailed` if the receipt cannot be appended.
    pub async fn purge(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        policy: PurgePolicy,
        artifact_ids: Option<&[Uuid]>,
    ) -> DepotResult<Receipt> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;

        let targets: Vec<ArtifactPointer> = match artifact_ids {
            Some(ids) => {
                let mut pointers = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(p) = self.metadata.get_live_pointer(tenant_id, *id)? {
                        if p.root_task_id == root_task_id {
                            pointers.push(p);
                        }
                    }
                }
                pointers
            }
            None => self.metadata.live_pointers(tenant_id, root_task_id, None)?,
        };
        let target_ids: Vec<Uuid> = targets.iter().map(|p| p.artifact_id).collect();

        let purged_ids = match policy {
            PurgePolicy::Immediate => {
                let marked = self.metadata.mark_purged(tenant_id, &target_ids, None)?;
                for pointer in &targets {
                    if let Err(err) = self.storage.delete(&pointer.location).await {
                        warn!(
                            artifact_id = %pointer.artifact_id,
                            %err,
                            "byte delete failed during purge; orphan left for janitor"
                        );
                    }
                }
                marked
            }
            PurgePolicy::Retain24h => {
                let after = Utc::now() + Duration::hours(24);
                self.metadata
                    .mark_purged(tenant_id, &target_ids, Some(after))?
            }
            PurgePolicy::Retain7d => {
                let after = Utc::now() + Duration::days(7);
                self.metadata
                    .mark_purged(tenant_id, &target_ids, Some(after))?
            }
            PurgePolicy::Manual => Vec::new(),
        };

        let receipt = Receipt::new(
            tenant_id,
            root_task_id,
            ReceiptKind::Purged,
            json!({
                "policy": policy.as_str(),
                "policy_version": PURGE_POLICY_VERSION,
                "artifact_ids": purged_ids,
            }),
            None,
        );
        self.receipts.append(&receipt)?;

        info!(
            root_task_id,
            policy = policy.as_str(),
            purged = purged_ids.len(),
            "purge recorded"
        );
        Ok(receipt)
    }

    /// Loads a shipment manifest by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such manifest exists.
    pub fn get_manifest(&self, tenant_id: &str, manifest_id: Uuid) -> DepotResult<ShipmentManifest> {
        self.metadata
            .get_manifest(tenant_id, manifest_id)?
            .ok_or_else(|| DepotError::NotFound {
                entity: "manifest",
                id: manifest_id.to_string(),
            })
    }

    /// Lists shipment manifests for a task, oldest first.
    pub fn list_manifests(
        &self,
        tenant_id: &str,
        root_task_id: &str,
    ) -> DepotResult<Vec<ShipmentManifest>> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;
        self.metadata.list_manifests(tenant_id, root_task_id)
    }
}
