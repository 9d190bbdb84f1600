//! HTTP sink: POSTs a multipart bundle to an `http(s)://` destination.
//!
//! The body carries the manifest document as a JSON part plus one part per
//! artifact, named by artifact id. Transient failures surface as
//! `SinkTransportFailure`; the sink never retries.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::info;

use super::{ContentGetter, OutboundSink};
use crate::error::{DepotError, DepotResult};
use crate::model::{ArtifactPointer, ShipmentManifest};
use crate::storage::BoxFuture;

const MANIFEST_PART: &str = "manifest";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Outbound sink for webhook-style HTTP endpoints.
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    /// Creates a sink whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> DepotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DepotError::InvalidConfig {
                detail: format!("building http sink client: {err}"),
            })?;
        Ok(Self { client })
    }

    fn artifact_part(pointer: &ArtifactPointer, bytes: Vec<u8>) -> DepotResult<Part> {
        // Producer-declared MIME types are opaque and may not parse; fall
        // back rather than failing the shipment.
        let mime = if Part::text("").mime_str(&pointer.mime_type).is_ok() {
            pointer.mime_type.as_str()
        } else {
            FALLBACK_MIME
        };
        Part::bytes(bytes)
            .file_name(pointer.artifact_id.to_string())
            .mime_str(mime)
            .map_err(|err| DepotError::SinkTransportFailure {
                detail: format!("building multipart part: {err}"),
            })
    }
}

impl OutboundSink for HttpSink {
    fn ship<'a>(
        &'a self,
        pointers: &'a [ArtifactPointer],
        destination: &'a str,
        manifest: &'a ShipmentManifest,
        content: ContentGetter<'a>,
    ) -> BoxFuture<'a, DepotResult<()>> {
        Box::pin(async move {
            let manifest_json =
                serde_json::to_string(manifest).map_err(|err| DepotError::SinkTransportFailure {
                    detail: format!("serializing manifest: {err}"),
                })?;
            let manifest_part = Part::text(manifest_json)
                .file_name("manifest.json")
                .mime_str("application/json")
                .map_err(|err| DepotError::SinkTransportFailure {
                    detail: format!("building manifest part: {err}"),
                })?;

            let mut form = Form::new().part(MANIFEST_PART, manifest_part);
            for pointer in pointers {
                let bytes = content(pointer.artifact_id).await?;
                let part = Self::artifact_part(pointer, bytes)?;
                form = form.part(pointer.artifact_id.to_string(), part);
            }

            let response = self
                .client
                .post(destination)
                .multipart(form)
                .send()
                .await
                .map_err(|err| DepotError::SinkTransportFailure {
                    detail: format!("posting to {destination}: {err}"),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(DepotError::SinkTransportFailure {
                    detail: format!("{destination} returned {status}"),
                });
            }

            info!(
                manifest_id = %manifest.manifest_id,
                destination,
                artifacts = pointers.len(),
                "shipment posted to http sink"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::model::ArtifactRole;

    fn pointer() -> ArtifactPointer {
        ArtifactPointer {
            artifact_id: Uuid::new_v4(),
            tenant_id: "default".into(),
            root_task_id: "task-1".into(),
            location: "mem://default/task-1/x".into(),
            size_bytes: 5,
            mime_type: "text/plain".into(),
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

    fn getter() -> impl Fn(Uuid) -> BoxFuture<'static, DepotResult<Vec<u8>>> {
        |_| Box::pin(async { Ok(b"hello".to_vec()) })
    }

    #[tokio::test]
    async fn posts_multipart_bundle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpSink::new(Duration::from_secs(5)).unwrap();
        let p = pointer();
        let destination = format!("{}/hook", server.uri());
        let manifest = manifest_for(vec![p.clone()], &destination);
        let fetch = getter();

        sink.ship(&[p], &destination, &manifest, &fetch)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = HttpSink::new(Duration::from_secs(5)).unwrap();
        let p = pointer();
        let destination = format!("{}/hook", server.uri());
        let manifest = manifest_for(vec![p.clone()], &destination);
        let fetch = getter();

        let err = sink
            .ship(&[p], &destination, &manifest, &fetch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sink_transport_failure");
    }

    #[tokio::test]
    async fn unreachable_destination_is_a_transport_failure() {
        let sink = HttpSink::new(Duration::from_millis(200)).unwrap();
        let p = pointer();
        let destination = "http://127.0.0.1:1/hook";
        let manifest = manifest_for(vec![p.clone()], destination);
        let fetch = getter();

        let err = sink
            .ship(&[p], destination, &manifest, &fetch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sink_transport_failure");
    }
}
