//! HTTP binding for the DepotGate verb set.
//!
//! Handlers are mechanical: extract transport inputs, run the core
//! operation under the per-request deadline, map the error kind to an HTTP
//! status. No domain logic lives here.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use depotgate_core::storage::ArtifactContent;
use depotgate_core::{
    ArtifactPointer, ArtifactRole, ClosureReport, Deliverable, DeliverableSpec, DepotError,
    PurgePolicy, Receipt, ShipmentManifest,
};

use crate::state::AppState;
use crate::{auth, tool};

const DEFAULT_MIME: &str = "application/octet-stream";

/// Builds the full router: open health endpoint plus the authenticated API
/// and tool surfaces.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/stage", post(stage))
        .route("/api/v1/artifacts", get(stage_list))
        .route("/api/v1/artifacts/:artifact_id", get(get_artifact))
        .route("/api/v1/artifacts/:artifact_id/content", get(get_content))
        .route(
            "/api/v1/deliverables",
            post(declare_deliverable).get(list_deliverables),
        )
        .route("/api/v1/deliverables/:deliverable_id", get(get_deliverable))
        .route(
            "/api/v1/deliverables/:deliverable_id/closure",
            get(check_closure),
        )
        .route(
            "/api/v1/deliverables/:deliverable_id/requirements/:name",
            post(mark_requirement),
        )
        .route("/api/v1/ship", post(ship))
        .route("/api/v1/purge", post(purge))
        .route("/api/v1/receipts", get(list_receipts))
        .route("/api/v1/manifests/:manifest_id", get(get_manifest))
        .route("/tools", get(tool::list_tools))
        .route("/tools/call", post(tool::call_tool))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(state)
}

/// Error wrapper translating core kinds into HTTP responses. Details are
/// human-readable messages; stack traces never cross the boundary.
pub struct ApiError(pub DepotError);

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DepotError::InvalidIdentifier { .. }
            | DepotError::InvalidLocation { .. }
            | DepotError::PathViolation { .. }
            | DepotError::InvalidSpec { .. }
            | DepotError::UnknownSink { .. } => StatusCode::BAD_REQUEST,
            DepotError::NotFound { .. } | DepotError::ArtifactMissing { .. } => {
                StatusCode::NOT_FOUND
            }
            DepotError::ArtifactTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DepotError::ClosureNotSatisfied { .. }
            | DepotError::AlreadyShipped { .. }
            | DepotError::AlreadyRejected { .. }
            | DepotError::RaceLost { .. } => StatusCode::CONFLICT,
            DepotError::SinkTransportFailure { .. } => StatusCode::BAD_GATEWAY,
            DepotError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
        });
        if let DepotError::ClosureNotSatisfied { report, .. } = &self.0 {
            body["report"] = json!({
                "missing_ids": report.missing_ids,
                "missing_roles": report.missing_roles,
                "missing_requirements": report.missing_requirements,
            });
        }
        (status, Json(body)).into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct StageParams {
    root_task_id: String,
    artifact_role: Option<ArtifactRole>,
    produced_by_receipt_id: Option<String>,
}

async fn stage(
    State(state): State<AppState>,
    Query(params): Query<StageParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ArtifactPointer>, ApiError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MIME)
        .to_string();
    let role = params.artifact_role.unwrap_or(ArtifactRole::Supporting);

    let pointer = state
        .with_deadline(state.depot.stage(
            &params.root_task_id,
            ArtifactContent::bytes(body.to_vec()),
            &mime_type,
            role,
            params.produced_by_receipt_id,
        ))
        .await?;
    Ok(Json(pointer))
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    root_task_id: String,
    artifact_role: Option<ArtifactRole>,
}

async fn stage_list(
    State(state): State<AppState>,
    Query(params): Query<TaskParams>,
) -> Result<Json<Vec<ArtifactPointer>>, ApiError> {
    let pointers = state
        .depot
        .stage_list(&params.root_task_id, params.artifact_role)?;
    Ok(Json(pointers))
}

async fn get_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
) -> Result<Json<ArtifactPointer>, ApiError> {
    Ok(Json(state.depot.get_artifact(artifact_id)?))
}

async fn get_content(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let pointer = state.depot.get_artifact(artifact_id)?;
    let bytes = state
        .with_deadline(state.depot.get_content(artifact_id))
        .await?;
    let content_type = header::HeaderValue::from_str(&pointer.mime_type)
        .unwrap_or_else(|_| header::HeaderValue::from_static(DEFAULT_MIME));
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct DeclareRequest {
    root_task_id: String,
    spec: DeliverableSpec,
}

async fn declare_deliverable(
    State(state): State<AppState>,
    Json(request): Json<DeclareRequest>,
) -> Result<(StatusCode, Json<Deliverable>), ApiError> {
    let deliverable = state
        .depot
        .declare_deliverable(&request.root_task_id, request.spec)?;
    Ok((StatusCode::CREATED, Json(deliverable)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    root_task_id: String,
}

async fn list_deliverables(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Deliverable>>, ApiError> {
    Ok(Json(state.depot.list_deliverables(&params.root_task_id)?))
}

async fn get_deliverable(
    State(state): State<AppState>,
    Path(deliverable_id): Path<Uuid>,
) -> Result<Json<Deliverable>, ApiError> {
    Ok(Json(state.depot.get_deliverable(deliverable_id)?))
}

async fn check_closure(
    State(state): State<AppState>,
    Path(deliverable_id): Path<Uuid>,
) -> Result<Json<ClosureReport>, ApiError> {
    Ok(Json(state.depot.check_closure(deliverable_id)?))
}

async fn mark_requirement(
    State(state): State<AppState>,
    Path((deliverable_id, name)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    state.depot.mark_requirement(deliverable_id, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ShipRequest {
    root_task_id: String,
    deliverable_id: Uuid,
}

async fn ship(
    State(state): State<AppState>,
    Json(request): Json<ShipRequest>,
) -> Result<Json<ShipmentManifest>, ApiError> {
    let manifest = state
        .with_deadline(
            state
                .depot
                .ship(&request.root_task_id, request.deliverable_id),
        )
        .await?;
    Ok(Json(manifest))
}

const fn default_policy() -> PurgePolicy {
    PurgePolicy::Immediate
}

#[derive(Debug, Deserialize)]
struct PurgeRequest {
    root_task_id: String,
    #[serde(default = "default_policy")]
    policy: PurgePolicy,
    artifact_ids: Option<Vec<Uuid>>,
}

async fn purge(
    State(state): State<AppState>,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<Receipt>, ApiError> {
    let receipt = state
        .with_deadline(state.depot.purge(
            &request.root_task_id,
            request.policy,
            request.artifact_ids.as_deref(),
        ))
        .await?;
    Ok(Json(receipt))
}

async fn list_receipts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Receipt>>, ApiError> {
    Ok(Json(state.depot.list_receipts(&params.root_task_id)?))
}

async fn get_manifest(
    State(state): State<AppState>,
    Path(manifest_id): Path<Uuid>,
) -> Result<Json<ShipmentManifest>, ApiError> {
    Ok(Json(state.depot.get_manifest(manifest_id)?))
}
