//! Data model for artifacts, deliverables, shipments, and receipts.
//!
//! These are pure data types with no behavior beyond parsing and
//! serialization. Ownership of the persisted forms is split across the
//! stores: the metadata store owns pointers, deliverables, and manifests;
//! the receipt store owns receipts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role classification for a staged artifact. Closed vocabulary; the core
/// never interprets roles beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// The primary output of the task.
    FinalOutput,
    /// Supporting material.
    Supporting,
    /// A plan or design document.
    Plan,
    /// Log output.
    Log,
    /// Anything else.
    Other,
}

impl ArtifactRole {
    /// The wire/storage string for this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FinalOutput => "final_output",
            Self::Supporting => "supporting",
            Self::Plan => "plan",
            Self::Log => "log",
            Self::Other => "other",
        }
    }

    /// Parses a role from its wire string. Returns `None` for anything
    /// outside the closed vocabulary.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "final_output" => Some(Self::FinalOutput),
            "supporting" => Some(Self::Supporting),
            "plan" => Some(Self::Plan),
            "log" => Some(Self::Log),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Metadata-only handle to a stored artifact; the only public identity of a
/// payload. `(tenant_id, artifact_id)` is unique; `content_hash` and
/// `size_bytes` are immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPointer {
    /// Globally unique artifact id.
    pub artifact_id: Uuid,
    /// Tenant namespace coordinate.
    pub tenant_id: String,
    /// Task namespace coordinate.
    pub root_task_id: String,
    /// Storage-agnostic URI; the scheme selects the backend.
    pub location: String,
    /// Exact stored length in bytes.
    pub size_bytes: u64,
    /// Producer-declared MIME type; opaque to the core.
    pub mime_type: String,
    /// Hex SHA-256 of the stored bytes, computed at ingest.
    pub content_hash: String,
    /// Role tag from the closed vocabulary.
    pub artifact_role: ArtifactRole,
    /// Optional causal back-link to the receipt that produced this artifact,
    /// which may belong to an external system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_by_receipt_id: Option<String>,
    /// Ingest timestamp (UTC).
    pub created_at: DateTime<Utc>,
}

/// Declared contract for a deliverable: what must be present before the
/// bundle may leave, and where it goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableSpec {
    /// Artifact ids that must all be live.
    #[serde(default)]
    pub artifact_ids: BTreeSet<Uuid>,
    /// Roles each satisfied by at least one live artifact in the task.
    #[serde(default)]
    pub artifact_roles: BTreeSet<ArtifactRole>,
    /// Free-form named flags the caller marks satisfied out-of-band.
    #[serde(default)]
    pub requirements: BTreeSet<String>,
    /// Destination URI; the scheme selects the sink.
    pub shipping_destination: String,
}

impl DeliverableSpec {
    /// True when the spec names nothing, making closure trivially satisfied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifact_ids.is_empty()
            && self.artifact_roles.is_empty()
            && self.requirements.is_empty()
    }
}

/// Lifecycle state of a deliverable. Transitions are monotonic:
/// `declared -> shipped` or `declared -> rejected`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    /// Declared and shippable.
    Declared,
    /// Shipped successfully (terminal).
    Shipped,
    /// Rejected at the closure gate (terminal).
    Rejected,
}

impl DeliverableStatus {
    /// The wire/storage string for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Shipped => "shipped",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a status from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "declared" => Some(Self::Declared),
            "shipped" => Some(Self::Shipped),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A declared deliverable with its contract and lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Unique deliverable id.
    pub deliverable_id: Uuid,
    /// Tenant namespace coordinate.
    pub tenant_id: String,
    /// Task namespace coordinate.
    pub root_task_id: String,
    /// The declared contract.
    pub spec: DeliverableSpec,
    /// Current lifecycle state.
    pub status: DeliverableStatus,
    /// Declaration timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Set when the deliverable transitioned to `shipped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
}

/// Frozen record of what was shipped where. Persisted iff its deliverable
/// transitioned to `shipped`; exactly one per successful shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentManifest {
    /// Unique manifest id, generated at ship time.
    pub manifest_id: Uuid,
    /// The deliverable this shipment satisfied.
    pub deliverable_id: Uuid,
    /// Tenant namespace coordinate.
    pub tenant_id: String,
    /// Task namespace coordinate.
    pub root_task_id: String,
    /// Snapshot (by value) of the pointers that were shipped.
    pub artifact_pointers: Vec<ArtifactPointer>,
    /// The resolved sink destination URI.
    pub destination: String,
    /// Ship timestamp (UTC).
    pub shipped_at: DateTime<Utc>,
}

/// Kinds of receipts emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// An artifact was staged.
    ArtifactStaged,
    /// A ship attempt failed its closure gate.
    ShipmentRejected,
    /// A shipment committed.
    ShipmentComplete,
    /// A purge was recorded.
    Purged,
}

impl ReceiptKind {
    /// The wire/storage string for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactStaged => "artifact_staged",
            Self::ShipmentRejected => "shipment_rejected",
            Self::ShipmentComplete => "shipment_complete",
            Self::Purged => "purged",
        }
    }

    /// Parses a kind from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "artifact_staged" => Some(Self::ArtifactStaged),
            "shipment_rejected" => Some(Self::ShipmentRejected),
            "shipment_complete" => Some(Self::ShipmentComplete),
            "purged" => Some(Self::Purged),
            _ => None,
        }
    }
}

/// Immutable causal event record. Receipts are append-only: no update and
/// no delete path exists anywhere in the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique receipt id within the tenant.
    pub receipt_id: Uuid,
    /// Tenant namespace coordinate.
    pub tenant_id: String,
    /// Task namespace coordinate.
    pub root_task_id: String,
    /// What happened.
    pub kind: ReceiptKind,
    /// Structured event payload.
    pub payload: serde_json::Value,
    /// Optional causal link to the receipt that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by_receipt_id: Option<String>,
    /// Emission timestamp (UTC).
    pub emitted_at: DateTime<Utc>,
}

impl Receipt {
    /// Builds a receipt with a fresh id and the current time.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        root_task_id: impl Into<String>,
        kind: ReceiptKind,
        payload: serde_json::Value,
        caused_by_receipt_id: Option<String>,
    ) -> Self {
        Self {
            receipt_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            root_task_id: root_task_id.into(),
            kind,
            payload,
            caused_by_receipt_id,
            emitted_at: Utc::now(),
        }
    }
}

/// Retention policy for a purge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgePolicy {
    /// Mark purged and delete bytes now.
    Immediate,
    /// Mark purged; bytes deleted by an external janitor after 24 hours.
    #[serde(rename = "retain_24h")]
    Retain24h,
    /// Mark purged; bytes deleted by an external janitor after 7 days.
    #[serde(rename = "retain_7d")]
    Retain7d,
    /// Record intent only; no pointer state change.
    Manual,
}

impl PurgePolicy {
    /// The wire/storage string for this policy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Retain24h => "retain_24h",
            Self::Retain7d => "retain_7d",
            Self::Manual => "manual",
        }
    }

    /// Parses a policy from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(Self::Immediate),
            "retain_24h" => Some(Self::Retain24h),
            "retain_7d" => Some(Self::Retain7d),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Result of a closure check: which declared requirements are unmet, and
/// which live pointers matched. Closure is read-only and stable given fixed
/// inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureReport {
    /// True iff all ids, roles, and named requirements are satisfied.
    pub satisfied: bool,
    /// Required ids with no live pointer.
    pub missing_ids: Vec<Uuid>,
    /// Required roles carried by no live pointer.
    pub missing_roles: Vec<ArtifactRole>,
    /// Named requirements not yet explicitly marked.
    pub missing_requirements: Vec<String>,
    /// Live pointers matched by id or role; the whole live set when the
    /// spec names neither ids nor roles.
    pub matched_pointers: Vec<ArtifactPointer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_wire_strings() {
        for role in [
            ArtifactRole::FinalOutput,
            ArtifactRole::Supporting,
            ArtifactRole::Plan,
            ArtifactRole::Log,
            ArtifactRole::Other,
        ] {
            assert_eq!(ArtifactRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(ArtifactRole::parse("intermediate"), None);
    }

    #[test]
    fn status_vocabulary_is_closed() {
        assert_eq!(
            DeliverableStatus::parse("declared"),
            Some(DeliverableStatus::Declared)
        );
        assert_eq!(DeliverableStatus::parse("pending"), None);
    }

    #[test]
    fn spec_emptiness_requires_all_three_sets_empty() {
        let mut spec = DeliverableSpec {
            shipping_destination: "fs://out".into(),
            ..DeliverableSpec::default()
        };
        assert!(spec.is_empty());
        spec.requirements.insert("review".into());
        assert!(!spec.is_empty());
    }

    #[test]
    fn spec_json_round_trip() {
        let mut spec = DeliverableSpec {
            shipping_destination: "fs://out/run-1".into(),
            ..DeliverableSpec::default()
        };
        spec.artifact_roles.insert(ArtifactRole::FinalOutput);
        spec.requirements.insert("sign-off".into());

        let json = serde_json::to_string(&spec).unwrap();
        let back: DeliverableSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(json.contains("final_output"));
    }
}
