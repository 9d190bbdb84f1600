//! # depotgate-core
//!
//! Artifact staging and outbound logistics for asynchronous multi-agent
//! workflows. Producers deposit opaque byte payloads under a task
//! namespace; a deliverable contract declares what must be present before
//! the bundle may leave; shipping verifies that contract atomically and,
//! if satisfied, transfers the artifacts to an external sink while
//! emitting a durable receipt trail.
//!
//! DepotGate is a gate, not a pipeline: it never inspects, transforms,
//! retries, or schedules artifact content.
//!
//! ## Architecture
//!
//! ```text
//! producer ──> StagingArea ──> StorageBackend (bytes)
//!                  │  └──────> MetadataStore (pointer row)
//!                  └─────────> ReceiptStore (artifact_staged)
//!
//! caller ──> DeliverableManager ──> MetadataStore (contract, marks)
//!
//! caller ──> ShippingService ──> closure check (DeliverableManager)
//!                  ├───────────> OutboundSink (bytes + manifest)
//!                  ├───────────> MetadataStore (CAS + manifest, one tx)
//!                  └───────────> ReceiptStore (terminal receipt)
//! ```
//!
//! Construction happens once, in [`Depot`], from a validated
//! [`DepotConfig`]; there are no process-wide singletons.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod deliverable;
pub mod depot;
pub mod error;
pub mod metadata;
pub mod model;
pub mod receipt;
pub mod sanitize;
pub mod shipping;
pub mod sink;
pub mod staging;
pub mod storage;

pub use config::DepotConfig;
pub use depot::Depot;
pub use error::{DepotError, DepotResult};
pub use model::{
    ArtifactPointer, ArtifactRole, ClosureReport, Deliverable, DeliverableSpec, DeliverableStatus,
    PurgePolicy, Receipt, ReceiptKind, ShipmentManifest,
};
pub use storage::ArtifactContent;
