//! Deliverable manager: declares contracts and computes closure.
//!
//! Closure is evaluated only against live artifacts of the deliverable's
//! own `(tenant_id, root_task_id)` namespace. The computation is read-only
//! and stable given fixed inputs; it never mutates the deliverable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DepotError, DepotResult};
use crate::metadata::MetadataStore;
use crate::model::{ClosureReport, Deliverable, DeliverableSpec, DeliverableStatus};
use crate::sanitize::{parse_location, validate_identifier, validate_task_id};

/// Manages deliverable contracts for all tasks of a process.
#[derive(Debug)]
pub struct DeliverableManager {
    metadata: Arc<MetadataStore>,
}

impl DeliverableManager {
    /// Creates a manager over the injected metadata store.
    #[must_use]
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Declares a deliverable contract in the `declared` state.
    ///
    /// An empty spec (no ids, roles, or requirements) makes closure
    /// trivially satisfied; that is allowed but logged.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` for malformed ids.
    /// - `InvalidSpec` if the shipping destination has no scheme.
    pub fn declare(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        spec: DeliverableSpec,
    ) -> DepotResult<Deliverable> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;
        if let Err(err) = parse_location(&spec.shipping_destination) {
            return Err(DepotError::InvalidSpec {
                detail: format!("shipping destination: {err}"),
            });
        }
        if spec.requirements.iter().any(String::is_empty) {
            return Err(DepotError::InvalidSpec {
                detail: "requirement names must not be empty".into(),
            });
        }
        if spec.is_empty() {
            warn!(
                root_task_id,
                "deliverable declared with empty spec; closure is trivially satisfied"
            );
        }

        let deliverable = Deliverable {
            deliverable_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            root_task_id: root_task_id.to_string(),
            spec,
            status: DeliverableStatus::Declared,
            created_at: Utc::now(),
            shipped_at: None,
        };
        self.metadata.insert_deliverable(&deliverable)?;
        debug!(deliverable_id = %deliverable.deliverable_id, root_task_id, "deliverable declared");
        Ok(deliverable)
    }

    /// Loads a deliverable by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such deliverable exists.
    pub fn get(&self, tenant_id: &str, deliverable_id: Uuid) -> DepotResult<Deliverable> {
        self.metadata
            .get_deliverable(tenant_id, deliverable_id)?
            .ok_or_else(|| DepotError::NotFound {
                entity: "deliverable",
                id: deliverable_id.to_string(),
            })
    }

    /// Lists deliverables for a task.
    pub fn list(&self, tenant_id: &str, root_task_id: &str) -> DepotResult<Vec<Deliverable>> {
        validate_identifier(tenant_id, "tenant id")?;
        validate_task_id(root_task_id)?;
        self.metadata.list_deliverables(tenant_id, root_task_id)
    }

    /// Marks a named requirement of a deliverable satisfied. Unmarked names
    /// never satisfy closure; marking twice is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the deliverable does not exist.
    /// - `InvalidIdentifier` for an empty name.
    pub fn mark_requirement(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
        name: &str,
    ) -> DepotResult<()> {
        if name.is_empty() {
            return Err(DepotError::InvalidIdentifier {
                detail: "requirement name must not be empty".into(),
            });
        }
        let _ = self.get(tenant_id, deliverable_id)?;
        self.metadata
            .mark_requirement(tenant_id, deliverable_id, name)
    }

    /// Computes closure for a deliverable against the current live pointer
    /// set.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the deliverable does not exist.
    pub fn check_closure(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
    ) -> DepotResult<ClosureReport> {
        let deliverable = self.get(tenant_id, deliverable_id)?;
        let live = self
            .metadata
            .live_pointers(tenant_id, &deliverable.root_task_id, None)?;
        let marks = self.metadata.requirement_marks(tenant_id, deliverable_id)?;

        let spec = &deliverable.spec;
        let live_ids: std::collections::BTreeSet<Uuid> =
            live.iter().map(|p| p.artifact_id).collect();
        let live_roles: std::collections::BTreeSet<_> =
            live.iter().map(|p| p.artifact_role).collect();

        let missing_ids: Vec<Uuid> = spec
            .artifact_ids
            .iter()
            .filter(|id| !live_ids.contains(id))
            .copied()
            .collect();
        let missing_roles: Vec<_> = spec
            .artifact_roles
            .iter()
            .filter(|role| !live_roles.contains(role))
            .copied()
            .collect();
        let missing_requirements: Vec<String> = spec
            .requirements
            .iter()
            .filter(|name| !marks.contains(*name))
            .cloned()
            .collect();

        // The shipping set: id-matches plus role-matches. A spec naming
        // neither ids nor roles matches the whole live set.
        let matched_pointers = if spec.artifact_ids.is_empty() && spec.artifact_roles.is_empty() {
            live
        } else {
            live.into_iter()
                .filter(|p| {
                    spec.artifact_ids.contains(&p.artifact_id)
                        || spec.artifact_roles.contains(&p.artifact_role)
                })
                .collect()
        };

        let satisfied =
            missing_ids.is_empty() && missing_roles.is_empty() && missing_requirements.is_empty();
        Ok(ClosureReport {
            satisfied,
            missing_ids,
            missing_roles,
            missing_requirements,
            matched_pointers,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::*;
    use crate::model::{ArtifactPointer, ArtifactRole};

    fn manager() -> DeliverableManager {
        DeliverableManager::new(Arc::new(MetadataStore::in_memory().unwrap()))
    }

    fn pointer(task: &str, role: ArtifactRole) -> ArtifactPointer {
        ArtifactPointer {
            artifact_id: Uuid::new_v4(),
            tenant_id: "default".into(),
            root_task_id: task.into(),
            location: format!("mem://default/{task}/{}", Uuid::new_v4()),
            size_bytes: 1,
            mime_type: "application/octet-stream".into(),
            content_hash: "b".repeat(64),
            artifact_role: role,
            produced_by_receipt_id: None,
            created_at: Utc::now(),
        }
    }

    fn spec(dest: &str) -> DeliverableSpec {
        DeliverableSpec {
            shipping_destination: dest.into(),
            ..DeliverableSpec::default()
        }
    }

    #[test]
    fn declare_rejects_schemeless_destination() {
        let mgr = manager();
        let err = mgr.declare("default", "task-1", spec("out/run-1")).unwrap_err();
        assert_eq!(err.kind(), "invalid_spec");
    }

    #[test]
    fn empty_spec_closure_is_trivially_satisfied() {
        let mgr = manager();
        let d = mgr.declare("default", "task-1", spec("fs://out")).unwrap();
        let report = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert!(report.satisfied);
        assert!(report.matched_pointers.is_empty());
    }

    #[test]
    fn closure_reports_missing_ids_roles_and_requirements() {
        let mgr = manager();
        let staged = pointer("task-1", ArtifactRole::Supporting);
        mgr.metadata.insert_pointer(&staged).unwrap();

        let wanted_id = Uuid::new_v4();
        let mut s = spec("fs://out");
        s.artifact_ids.insert(wanted_id);
        s.artifact_roles.insert(ArtifactRole::FinalOutput);
        s.requirements.insert("review".into());
        let d = mgr.declare("default", "task-1", s).unwrap();

        let report = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert!(!report.satisfied);
        assert_eq!(report.missing_ids, vec![wanted_id]);
        assert_eq!(report.missing_roles, vec![ArtifactRole::FinalOutput]);
        assert_eq!(report.missing_requirements, vec!["review".to_string()]);
    }

    #[test]
    fn closure_satisfied_once_all_three_dimensions_hold() {
        let mgr = manager();
        let final_out = pointer("task-1", ArtifactRole::FinalOutput);
        mgr.metadata.insert_pointer(&final_out).unwrap();

        let mut s = spec("fs://out");
        s.artifact_ids.insert(final_out.artifact_id);
        s.artifact_roles.insert(ArtifactRole::FinalOutput);
        s.requirements.insert("review".into());
        let d = mgr.declare("default", "task-1", s).unwrap();

        let report = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert!(!report.satisfied, "requirement still unmarked");

        mgr.mark_requirement("default", d.deliverable_id, "review")
            .unwrap();
        let report = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert!(report.satisfied);
        assert_eq!(report.matched_pointers.len(), 1);
        assert_eq!(
            report.matched_pointers[0].artifact_id,
            final_out.artifact_id
        );
    }

    #[test]
    fn closure_ignores_other_tasks_and_purged_pointers() {
        let mgr = manager();
        let other_task = pointer("task-2", ArtifactRole::FinalOutput);
        mgr.metadata.insert_pointer(&other_task).unwrap();
        let purged = pointer("task-1", ArtifactRole::FinalOutput);
        mgr.metadata.insert_pointer(&purged).unwrap();
        mgr.metadata
            .mark_purged("default", &[purged.artifact_id], None)
            .unwrap();

        let mut s = spec("fs://out");
        s.artifact_roles.insert(ArtifactRole::FinalOutput);
        let d = mgr.declare("default", "task-1", s).unwrap();

        let report = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert!(!report.satisfied);
        assert_eq!(report.missing_roles, vec![ArtifactRole::FinalOutput]);
    }

    #[test]
    fn closure_is_stable_across_repeated_calls() {
        let mgr = manager();
        let staged = pointer("task-1", ArtifactRole::FinalOutput);
        mgr.metadata.insert_pointer(&staged).unwrap();

        let mut s = spec("fs://out");
        s.artifact_roles.insert(ArtifactRole::FinalOutput);
        let d = mgr.declare("default", "task-1", s).unwrap();

        let first = mgr.check_closure("default", d.deliverable_id).unwrap();
        let second = mgr.check_closure("default", d.deliverable_id).unwrap();
        assert_eq!(first, second);
        assert!(first.satisfied);
    }

    #[test]
    fn requirement_marks_apply_per_deliverable() {
        let mgr = manager();
        let mut s = spec("fs://out");
        s.requirements = BTreeSet::from(["review".to_string()]);
        let d1 = mgr.declare("default", "task-1", s.clone()).unwrap();
        let d2 = mgr.declare("default", "task-1", s).unwrap();

        mgr.mark_requirement("default", d1.deliverable_id, "review")
            .unwrap();

        assert!(mgr.check_closure("default", d1.deliverable_id).unwrap().satisfied);
        assert!(!mgr.check_closure("default", d2.deliverable_id).unwrap().satisfied);
    }

    #[test]
    fn missing_deliverable_is_not_found() {
        let mgr = manager();
        let err = mgr.check_closure("default", Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
