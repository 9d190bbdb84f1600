//! `SQLite`-backed metadata store implementation.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{DepotError, DepotResult};
use crate::model::{
    ArtifactPointer, ArtifactRole, Deliverable, DeliverableSpec, DeliverableStatus,
    ShipmentManifest,
};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Durable store for pointers, deliverables, requirement marks, and
/// manifests. Cheap to clone the inner connection handle via `Arc`.
#[derive(Debug)]
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
}

/// Formats a timestamp so lexical order equals chronological order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> DepotResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| DepotError::StorageFailure {
            detail: format!("corrupt timestamp {raw:?}: {err}"),
        })
}

fn parse_uuid(raw: &str) -> DepotResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| DepotError::StorageFailure {
        detail: format!("corrupt uuid {raw:?}: {err}"),
    })
}

/// Raw artifact row as read from `SQLite`, converted to a pointer outside
/// the query closure so parse failures surface as `DepotError`.
struct PointerRow {
    artifact_id: String,
    tenant_id: String,
    root_task_id: String,
    location: String,
    size_bytes: i64,
    content_hash: String,
    mime_type: String,
    artifact_role: String,
    produced_by_receipt_id: Option<String>,
    created_at: String,
}

impl PointerRow {
    const COLUMNS: &'static str = "artifact_id, tenant_id, root_task_id, location, size_bytes, \
                                   content_hash, mime_type, artifact_role, \
                                   produced_by_receipt_id, created_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            artifact_id: row.get(0)?,
            tenant_id: row.get(1)?,
            root_task_id: row.get(2)?,
            location: row.get(3)?,
            size_bytes: row.get(4)?,
            content_hash: row.get(5)?,
            mime_type: row.get(6)?,
            artifact_role: row.get(7)?,
            produced_by_receipt_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_pointer(self) -> DepotResult<ArtifactPointer> {
        let artifact_role =
            ArtifactRole::parse(&self.artifact_role).ok_or_else(|| DepotError::StorageFailure {
                detail: format!("corrupt artifact role {:?}", self.artifact_role),
            })?;
        Ok(ArtifactPointer {
            artifact_id: parse_uuid(&self.artifact_id)?,
            tenant_id: self.tenant_id,
            root_task_id: self.root_task_id,
            location: self.location,
            size_bytes: self.size_bytes.max(0) as u64,
            mime_type: self.mime_type,
            content_hash: self.content_hash,
            artifact_role,
            produced_by_receipt_id: self.produced_by_receipt_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct DeliverableRow {
    deliverable_id: String,
    tenant_id: String,
    root_task_id: String,
    spec_json: String,
    status: String,
    created_at: String,
    shipped_at: Option<String>,
}

impl DeliverableRow {
    const COLUMNS: &'static str =
        "deliverable_id, tenant_id, root_task_id, spec_json, status, created_at, shipped_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            deliverable_id: row.get(0)?,
            tenant_id: row.get(1)?,
            root_task_id: row.get(2)?,
            spec_json: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            shipped_at: row.get(6)?,
        })
    }

    fn into_deliverable(self) -> DepotResult<Deliverable> {
        let spec: DeliverableSpec =
            serde_json::from_str(&self.spec_json).map_err(|err| DepotError::StorageFailure {
                detail: format!("corrupt deliverable spec: {err}"),
            })?;
        let status =
            DeliverableStatus::parse(&self.status).ok_or_else(|| DepotError::StorageFailure {
                detail: format!("corrupt deliverable status {:?}", self.status),
            })?;
        let shipped_at = match self.shipped_at {
            Some(raw) => Some(parse_ts(&raw)?),
            None => None,
        };
        Ok(Deliverable {
            deliverable_id: parse_uuid(&self.deliverable_id)?,
            tenant_id: self.tenant_id,
            root_task_id: self.root_task_id,
            spec,
            status,
            created_at: parse_ts(&self.created_at)?,
            shipped_at,
        })
    }
}

impl MetadataStore {
    /// Opens or creates the metadata database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageFailure` if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> DepotResult<Self> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::in_memory();
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns `StorageFailure` if the schema cannot be applied.
    pub fn in_memory() -> DepotResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // === Pointers ===

    /// Inserts a pointer row.
    ///
    /// # Errors
    ///
    /// Returns `StorageFailure` on conflict (the pointer already exists) or
    /// any other database failure.
    pub fn insert_pointer(&self, pointer: &ArtifactPointer) -> DepotResult<()> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let result = conn.execute(
            "INSERT INTO artifacts (tenant_id, artifact_id, root_task_id, location, size_bytes, \
             content_hash, mime_type, artifact_role, produced_by_receipt_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                pointer.tenant_id,
                pointer.artifact_id.to_string(),
                pointer.root_task_id,
                pointer.location,
                pointer.size_bytes as i64,
                pointer.content_hash,
                pointer.mime_type,
                pointer.artifact_role.as_str(),
                pointer.produced_by_receipt_id,
                fmt_ts(&pointer.created_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DepotError::StorageFailure {
                    detail: format!("artifact pointer {} already exists", pointer.artifact_id),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the live (non-purged) pointers for a task, newest first,
    /// optionally filtered by role.
    pub fn live_pointers(
        &self,
        tenant_id: &str,
        root_task_id: &str,
        role: Option<ArtifactRole>,
    ) -> DepotResult<Vec<ArtifactPointer>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let sql = format!(
            "SELECT {} FROM artifacts \
             WHERE tenant_id = ?1 AND root_task_id = ?2 AND purged_at IS NULL \
             AND (?3 IS NULL OR artifact_role = ?3) \
             ORDER BY created_at DESC, artifact_id DESC",
            PointerRow::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![tenant_id, root_task_id, role.map(|r| r.as_str())],
            PointerRow::from_row,
        )?;
        let mut pointers = Vec::new();
        for row in rows {
            pointers.push(row?.into_pointer()?);
        }
        Ok(pointers)
    }

    /// Returns a single live pointer by id.
    pub fn get_live_pointer(
        &self,
        tenant_id: &str,
        artifact_id: Uuid,
    ) -> DepotResult<Option<ArtifactPointer>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let sql = format!(
            "SELECT {} FROM artifacts \
             WHERE tenant_id = ?1 AND artifact_id = ?2 AND purged_at IS NULL",
            PointerRow::COLUMNS
        );
        let row = conn
            .query_row(
                &sql,
                params![tenant_id, artifact_id.to_string()],
                PointerRow::from_row,
            )
            .optional()?;

        row.map(PointerRow::into_pointer).transpose()
    }

    /// Marks the given pointers purged (soft delete), returning the ids
    /// that actually transitioned. Already-purged pointers are untouched.
    pub fn mark_purged(
        &self,
        tenant_id: &str,
        artifact_ids: &[Uuid],
        purge_after: Option<DateTime<Utc>>,
    ) -> DepotResult<Vec<Uuid>> {
        let now = fmt_ts(&Utc::now());
        let after = purge_after.as_ref().map(fmt_ts);
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let mut transitioned = Vec::new();
        for id in artifact_ids {
            let changed = conn.execute(
                "UPDATE artifacts SET purged_at = ?1, purge_after = ?2 \
                 WHERE tenant_id = ?3 AND artifact_id = ?4 AND purged_at IS NULL",
                params![now, after, tenant_id, id.to_string()],
            )?;
            if changed > 0 {
                transitioned.push(*id);
            }
        }
        Ok(transitioned)
    }

    // === Deliverables ===

    /// Inserts a deliverable row in the `declared` state.
    pub fn insert_deliverable(&self, deliverable: &Deliverable) -> DepotResult<()> {
        let spec_json =
            serde_json::to_string(&deliverable.spec).map_err(|err| DepotError::StorageFailure {
                detail: format!("serializing deliverable spec: {err}"),
            })?;
        let conn = self.conn.lock().expect("metadata lock poisoned");
        conn.execute(
            "INSERT INTO deliverables (tenant_id, deliverable_id, root_task_id, spec_json, \
             status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                deliverable.tenant_id,
                deliverable.deliverable_id.to_string(),
                deliverable.root_task_id,
                spec_json,
                deliverable.status.as_str(),
                fmt_ts(&deliverable.created_at),
            ],
        )?;
        Ok(())
    }

    /// Loads a deliverable by id.
    pub fn get_deliverable(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
    ) -> DepotResult<Option<Deliverable>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let sql = format!(
            "SELECT {} FROM deliverables WHERE tenant_id = ?1 AND deliverable_id = ?2",
            DeliverableRow::COLUMNS
        );
        let row = conn
            .query_row(
                &sql,
                params![tenant_id, deliverable_id.to_string()],
                DeliverableRow::from_row,
            )
            .optional()?;
        row.map(DeliverableRow::into_deliverable).transpose()
    }

    /// Lists deliverables for a task, oldest first.
    pub fn list_deliverables(
        &self,
        tenant_id: &str,
        root_task_id: &str,
    ) -> DepotResult<Vec<Deliverable>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let sql = format!(
            "SELECT {} FROM deliverables WHERE tenant_id = ?1 AND root_task_id = ?2 \
             ORDER BY created_at ASC, deliverable_id ASC",
            DeliverableRow::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![tenant_id, root_task_id], DeliverableRow::from_row)?;
        let mut deliverables = Vec::new();
        for row in rows {
            deliverables.push(row?.into_deliverable()?);
        }
        Ok(deliverables)
    }

    /// Compare-and-swap transition from `declared` to a terminal status.
    /// Returns whether this call won the transition.
    pub fn transition_status(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
        to: DeliverableStatus,
    ) -> DepotResult<bool> {
        let shipped_at = match to {
            DeliverableStatus::Shipped => Some(fmt_ts(&Utc::now())),
            _ => None,
        };
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let changed = conn.execute(
            "UPDATE deliverables SET status = ?1, shipped_at = COALESCE(?2, shipped_at) \
             WHERE tenant_id = ?3 AND deliverable_id = ?4 AND status = 'declared'",
            params![
                to.as_str(),
                shipped_at,
                tenant_id,
                deliverable_id.to_string()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Commits a shipment: CAS `declared -> shipped` plus the manifest
    /// insert, in one transaction.
    ///
    /// # Errors
    ///
    /// - `RaceLost` if the CAS affected no row (a concurrent ship won).
    /// - `ManifestPersistFailed` for any database failure; in that case the
    ///   sink has already externalized bytes and the deliverable remains
    ///   `declared`.
    pub fn commit_shipment(&self, manifest: &ShipmentManifest) -> DepotResult<()> {
        let pointers_json = serde_json::to_string(&manifest.artifact_pointers).map_err(|err| {
            DepotError::ManifestPersistFailed {
                detail: format!("serializing pointer snapshot: {err}"),
            }
        })?;
        let shipped_at = fmt_ts(&manifest.shipped_at);

        let mut conn = self.conn.lock().expect("metadata lock poisoned");
        let persist = |err: rusqlite::Error| DepotError::ManifestPersistFailed {
            detail: err.to_string(),
        };

        let tx = conn.transaction().map_err(persist)?;
        let changed = tx
            .execute(
                "UPDATE deliverables SET status = 'shipped', shipped_at = ?1 \
                 WHERE tenant_id = ?2 AND deliverable_id = ?3 AND status = 'declared'",
                params![
                    shipped_at,
                    manifest.tenant_id,
                    manifest.deliverable_id.to_string()
                ],
            )
            .map_err(persist)?;
        if changed == 0 {
            return Err(DepotError::RaceLost {
                deliverable_id: manifest.deliverable_id,
            });
        }
        tx.execute(
            "INSERT INTO manifests (tenant_id, manifest_id, deliverable_id, root_task_id, \
             pointers_json, destination, shipped_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                manifest.tenant_id,
                manifest.manifest_id.to_string(),
                manifest.deliverable_id.to_string(),
                manifest.root_task_id,
                pointers_json,
                manifest.destination,
                shipped_at,
            ],
        )
        .map_err(persist)?;
        tx.commit().map_err(persist)?;
        Ok(())
    }

    // === Requirement marks ===

    /// Records that a named requirement has been satisfied out-of-band.
    /// Marking twice is a no-op.
    pub fn mark_requirement(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
        name: &str,
    ) -> DepotResult<()> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO requirement_marks (tenant_id, deliverable_id, name, marked_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                tenant_id,
                deliverable_id.to_string(),
                name,
                fmt_ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    /// Names marked satisfied for a deliverable.
    pub fn requirement_marks(
        &self,
        tenant_id: &str,
        deliverable_id: Uuid,
    ) -> DepotResult<BTreeSet<String>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT name FROM requirement_marks WHERE tenant_id = ?1 AND deliverable_id = ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id, deliverable_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }

    // === Manifests ===

    /// Loads a manifest by id.
    pub fn get_manifest(
        &self,
        tenant_id: &str,
        manifest_id: Uuid,
    ) -> DepotResult<Option<ShipmentManifest>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let row = conn
            .query_row(
                "SELECT manifest_id, deliverable_id, root_task_id, pointers_json, destination, \
                 shipped_at FROM manifests WHERE tenant_id = ?1 AND manifest_id = ?2",
                params![tenant_id, manifest_id.to_string()],
                manifest_row,
            )
            .optional()?;
        row.map(|raw| raw.into_manifest(tenant_id)).transpose()
    }

    /// Lists manifests for a task, oldest first.
    pub fn list_manifests(
        &self,
        tenant_id: &str,
        root_task_id: &str,
    ) -> DepotResult<Vec<ShipmentManifest>> {
        let conn = self.conn.lock().expect("metadata lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT manifest_id, deliverable_id, root_task_id, pointers_json, destination, \
             shipped_at FROM manifests WHERE tenant_id = ?1 AND root_task_id = ?2 \
             ORDER BY shipped_at ASC, manifest_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id, root_task_id], manifest_row)?;
        let mut manifests = Vec::new();
        for row in rows {
            manifests.push(row?.into_manifest(tenant_id)?);
        }
        Ok(manifests)
    }
}

struct ManifestRow {
    manifest_id: String,
    deliverable_id: String,
    root_task_id: String,
    pointers_json: String,
    destination: String,
    shipped_at: String,
}

fn manifest_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ManifestRow> {
    Ok(ManifestRow {
        manifest_id: row.get(0)?,
        deliverable_id: row.get(1)?,
        root_task_id: row.get(2)?,
        pointers_json: row.get(3)?,
        destination: row.get(4)?,
        shipped_at: row.get(5)?,
    })
}

impl ManifestRow {
    fn into_manifest(self, tenant_id: &str) -> DepotResult<ShipmentManifest> {
        let artifact_pointers: Vec<ArtifactPointer> = serde_json::from_str(&self.pointers_json)
            .map_err(|err| DepotError::StorageFailure {
                detail: format!("corrupt manifest pointers: {err}"),
            })?;
        Ok(ShipmentManifest {
            manifest_id: parse_uuid(&self.manifest_id)?,
            deliverable_id: parse_uuid(&self.deliverable_id)?,
            tenant_id: tenant_id.to_string(),
            root_task_id: self.root_task_id,
            artifact_pointers,
            destination: self.destination,
            shipped_at: parse_ts(&self.shipped_at)?,
        })
    }
}
