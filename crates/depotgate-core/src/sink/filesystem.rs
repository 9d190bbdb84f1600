//! Filesystem sink: writes shipped bundles under a base directory.
//!
//! The destination is a relative subpath under the sink base; absolute
//! destinations are rejected and `..` segments are neutralized before
//! resolution. Each shipment gets its own `<destination>/<manifest_id>/`
//! directory holding one file per artifact plus a `manifest.json`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use super::{ContentGetter, OutboundSink};
use crate::error::{DepotError, DepotResult};
use crate::model::{ArtifactPointer, ShipmentManifest};
use crate::sanitize::{neutralize_relative, resolve_under_base};
use crate::storage::BoxFuture;

/// Outbound sink writing to a local directory tree.
#[derive(Debug)]
pub struct FilesystemSink {
    base: PathBuf,
}

impl FilesystemSink {
    /// Creates a sink rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// File extension derived from a MIME type; `None` leaves the artifact
    /// id as the whole filename.
    fn extension_for(mime_type: &str) -> Option<&'static str> {
        match mime_type {
            "application/json" => Some(".json"),
            "application/xml" => Some(".xml"),
            "application/pdf" => Some(".pdf"),
            "text/plain" => Some(".txt"),
            "text/html" => Some(".html"),
            "text/css" => Some(".css"),
            "text/javascript" => Some(".js"),
            "text/markdown" => Some(".md"),
            "image/png" => Some(".png"),
            "image/jpeg" => Some(".jpg"),
            "image/gif" => Some(".gif"),
            "image/svg+xml" => Some(".svg"),
            _ => None,
        }
    }

    fn artifact_filename(pointer: &ArtifactPointer) -> String {
        match Self::extension_for(&pointer.mime_type) {
            Some(ext) => format!("{}{ext}", pointer.artifact_id),
            None => pointer.artifact_id.to_string(),
        }
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> DepotResult<()> {
        fs::write(path, bytes)
            .await
            .map_err(|err| DepotError::SinkTransportFailure {
                detail: format!("writing {}: {err}", path.display()),
            })
    }
}

impl OutboundSink for FilesystemSink {
    fn ship<'a>(
        &'a self,
        pointers: &'a [ArtifactPointer],
        destination: &'a str,
        manifest: &'a ShipmentManifest,
        content: ContentGetter<'a>,
    ) -> BoxFuture<'a, DepotResult<()>> {
        Box::pin(async move {
            if Path::new(destination).is_absolute() {
                return Err(DepotError::PathViolation {
                    detail: format!("absolute sink destination {destination:?}"),
                });
            }

            let neutral = neutralize_relative(destination);
            let dest_dir = resolve_under_base(&self.base, &neutral)?;
            let shipment_dir = dest_dir.join(manifest.manifest_id.to_string());
            fs::create_dir_all(&shipment_dir)
                .await
                .map_err(|err| DepotError::SinkTransportFailure {
                    detail: format!("creating {}: {err}", shipment_dir.display()),
                })?;

            for pointer in pointers {
                let bytes = content(pointer.artifact_id).await?;
                let path = shipment_dir.join(Self::artifact_filename(pointer));
                Self::write_file(&path, &bytes).await?;
            }

            let manifest_json = serde_json::to_vec_pretty(manifest).map_err(|err| {
                DepotError::SinkTransportFailure {
                    detail: format!("serializing manifest: {err}"),
                }
            })?;
            Self::write_file(&shipment_dir.join("manifest.json"), &manifest_json).await?;

            info!(
                manifest_id = %manifest.manifest_id,
                destination,
                artifacts = pointers.len(),
                "shipment written to filesystem sink"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::model::ArtifactRole;

    fn pointer(mime: &str) -> ArtifactPointer {
        ArtifactPointer {
            artifact_id: Uuid::new_v4(),
            tenant_id: "default".into(),
            root_task_id: "task-1".into(),
            location: "mem://default/task-1/x".into(),
            size_bytes: 5,
            mime_type: mime.into(),
            content_hash: "0".repeat(64),
            artifact_role: ArtifactRole::FinalOutput,
            produced_by_receipt_id: None,
            created_at: Utc::now(),
        }
    }

    fn manifest_for(pointers: Vec<ArtifactPointer>, destination: &str) -> ShipmentManifest {
        ShipmentManifest {
            manifest_id: Uuid::new_v4(),
            deliverable_id: Uuid::new_v4(),
            tenant_id: "default".into(),
            root_task_id: "task-1".into(),
            artifact_pointers: pointers,
            destination: destination.into(),
            shipped_at: Utc::now(),
        }
    }

    fn getter(bytes: &'static [u8]) -> impl Fn(Uuid) -> BoxFuture<'static, DepotResult<Vec<u8>>> {
        move |_| Box::pin(async move { Ok(bytes.to_vec()) })
    }

    #[tokio::test]
    async fn ships_artifacts_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let p = pointer("application/octet-stream");
        let manifest = manifest_for(vec![p.clone()], "fs://out/run-1");
        let fetch = getter(b"hello");

        sink.ship(&[p.clone()], "out/run-1", &manifest, &fetch)
            .await
            .unwrap();

        let shipment_dir = dir
            .path()
            .join("out")
            .join("run-1")
            .join(manifest.manifest_id.to_string());
        let artifact = shipment_dir.join(p.artifact_id.to_string());
        assert_eq!(std::fs::read(&artifact).unwrap(), b"hello");

        let manifest_json = std::fs::read_to_string(shipment_dir.join("manifest.json")).unwrap();
        let parsed: ShipmentManifest = serde_json::from_str(&manifest_json).unwrap();
        assert_eq!(parsed.manifest_id, manifest.manifest_id);
    }

    #[tokio::test]
    async fn known_mime_types_get_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let p = pointer("text/plain");
        let manifest = manifest_for(vec![p.clone()], "fs://out");
        let fetch = getter(b"text");

        sink.ship(&[p.clone()], "out", &manifest, &fetch).await.unwrap();

        let path = dir
            .path()
            .join("out")
            .join(manifest.manifest_id.to_string())
            .join(format!("{}.txt", p.artifact_id));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn absolute_destination_is_a_path_violation() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let p = pointer("text/plain");
        let manifest = manifest_for(vec![p.clone()], "fs:///etc/cron.d");
        let fetch = getter(b"x");

        let err = sink
            .ship(&[p], "/etc/cron.d", &manifest, &fetch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "path_violation");
    }

    #[tokio::test]
    async fn traversal_segments_are_neutralized() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let p = pointer("text/plain");
        let manifest = manifest_for(vec![p.clone()], "fs://../../escape");
        let fetch = getter(b"x");

        sink.ship(&[p], "../../escape", &manifest, &fetch)
            .await
            .unwrap();

        // The traversal segments vanish; the bundle lands under the base.
        let landed = dir
            .path()
            .join("escape")
            .join(manifest.manifest_id.to_string());
        assert!(landed.exists());
    }

    #[tokio::test]
    async fn content_getter_errors_propagate_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let p = pointer("text/plain");
        let manifest = manifest_for(vec![p.clone()], "fs://out");
        let fetch = |_: Uuid| -> BoxFuture<'static, DepotResult<Vec<u8>>> {
            Box::pin(async {
                Err(DepotError::ArtifactMissing {
                    location: "mem://gone".into(),
                })
            })
        };

        let err = sink.ship(&[p], "out", &manifest, &fetch).await.unwrap_err();
        assert_eq!(err.kind(), "artifact_missing");
    }
}
