//! Error taxonomy for DepotGate operations.
//!
//! Failures are surfaced to callers by *kind*, not by source: every variant
//! maps to a stable [`DepotError::kind`] string and carries a human-readable
//! detail. Internal library errors (rusqlite, I/O) fold into
//! [`DepotError::StorageFailure`] unless a more specific kind applies at the
//! call site.

use uuid::Uuid;

use crate::model::ClosureReport;

/// Result alias used throughout the crate.
pub type DepotResult<T> = Result<T, DepotError>;

/// Errors surfaced by DepotGate core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DepotError {
    /// A tenant or task identifier failed sanitizer validation.
    #[error("invalid identifier: {detail}")]
    InvalidIdentifier {
        /// What was wrong with the identifier.
        detail: String,
    },

    /// A location URI is malformed or carries an unusable scheme.
    #[error("invalid location: {detail}")]
    InvalidLocation {
        /// What was wrong with the location.
        detail: String,
    },

    /// A resolved path escaped its configured base directory.
    #[error("path violation: {detail}")]
    PathViolation {
        /// The offending path or destination.
        detail: String,
    },

    /// A deliverable spec is malformed.
    #[error("invalid deliverable spec: {detail}")]
    InvalidSpec {
        /// What was wrong with the spec.
        detail: String,
    },

    /// The configuration handed to the composition root is unusable.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        detail: String,
    },

    /// No such artifact, deliverable, or manifest.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity class that was looked up.
        entity: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// An artifact exceeded the configured maximum size, possibly mid-stream.
    #[error("artifact too large: {size} bytes exceeds limit of {max} bytes")]
    ArtifactTooLarge {
        /// Bytes seen before the ingest was aborted.
        size: u64,
        /// The configured limit.
        max: u64,
    },

    /// A pointer exists but its bytes cannot be retrieved.
    #[error("artifact bytes missing at {location}")]
    ArtifactMissing {
        /// The storage location that failed to yield bytes.
        location: String,
    },

    /// Ship was attempted with unmet requirements; the deliverable has been
    /// transitioned to `rejected`.
    #[error("closure not satisfied for deliverable {deliverable_id}")]
    ClosureNotSatisfied {
        /// The deliverable that failed its gate.
        deliverable_id: Uuid,
        /// The closure report naming the missing ids/roles/requirements.
        report: Box<ClosureReport>,
    },

    /// The deliverable already reached the `shipped` terminal state.
    #[error("deliverable {deliverable_id} already shipped")]
    AlreadyShipped {
        /// The deliverable in question.
        deliverable_id: Uuid,
    },

    /// The deliverable already reached the `rejected` terminal state.
    #[error("deliverable {deliverable_id} already rejected")]
    AlreadyRejected {
        /// The deliverable in question.
        deliverable_id: Uuid,
    },

    /// A concurrent ship call won the terminal-status CAS.
    #[error("concurrent ship won the race for deliverable {deliverable_id}")]
    RaceLost {
        /// The deliverable in question.
        deliverable_id: Uuid,
    },

    /// The external sink rejected the transfer or timed out; no state change.
    #[error("sink transport failure: {detail}")]
    SinkTransportFailure {
        /// What the transport reported.
        detail: String,
    },

    /// The destination scheme has no registered sink.
    #[error("no sink registered for scheme {scheme:?}")]
    UnknownSink {
        /// The scheme that missed the registry.
        scheme: String,
    },

    /// Byte or row persistence failed.
    #[error("storage failure: {detail}")]
    StorageFailure {
        /// What the persistence layer reported.
        detail: String,
    },

    /// The sink externalized bytes but the shipment transaction did not
    /// commit; an orphan is possible and a retry may duplicate bytes.
    #[error("manifest persist failed: {detail}")]
    ManifestPersistFailed {
        /// What the metadata store reported.
        detail: String,
    },

    /// A receipt could not be appended. For staging and shipping the
    /// preceding state change remains committed.
    #[error("receipt write failed: {detail}")]
    ReceiptWriteFailed {
        /// What the receipt store reported.
        detail: String,
    },

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl DepotError {
    /// Stable machine-readable kind string for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::InvalidLocation { .. } => "invalid_location",
            Self::PathViolation { .. } => "path_violation",
            Self::InvalidSpec { .. } => "invalid_spec",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::NotFound { .. } => "not_found",
            Self::ArtifactTooLarge { .. } => "artifact_too_large",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::ClosureNotSatisfied { .. } => "closure_not_satisfied",
            Self::AlreadyShipped { .. } => "already_shipped",
            Self::AlreadyRejected { .. } => "already_rejected",
            Self::RaceLost { .. } => "race_lost",
            Self::SinkTransportFailure { .. } => "sink_transport_failure",
            Self::UnknownSink { .. } => "unknown_sink",
            Self::StorageFailure { .. } => "storage_failure",
            Self::ManifestPersistFailed { .. } => "manifest_persist_failed",
            Self::ReceiptWriteFailed { .. } => "receipt_write_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// True when a caller may safely retry the failed operation without
    /// risking duplicated external effects.
    #[must_use]
    pub const fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            Self::SinkTransportFailure { .. } | Self::StorageFailure { .. }
        )
    }
}

impl From<rusqlite::Error> for DepotError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageFailure {
            detail: err.to_string(),
        }
    }
}

impl From<std::io::Error> for DepotError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageFailure {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = DepotError::ArtifactTooLarge { size: 11, max: 10 };
        assert_eq!(err.kind(), "artifact_too_large");
        assert_eq!(DepotError::DeadlineExceeded.kind(), "deadline_exceeded");
    }

    #[test]
    fn retry_safety_matches_taxonomy() {
        assert!(DepotError::SinkTransportFailure {
            detail: "connection reset".into()
        }
        .is_retry_safe());
        assert!(DepotError::StorageFailure {
            detail: "disk full".into()
        }
        .is_retry_safe());
        assert!(!DepotError::ManifestPersistFailed {
            detail: "tx aborted".into()
        }
        .is_retry_safe());
    }

    #[test]
    fn sqlite_errors_fold_into_storage_failure() {
        let err: DepotError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "storage_failure");
    }
}
