//! Agent-tool façade: the same verb set as the HTTP API, shaped as a
//! tool-calling surface for AI agents.
//!
//! `GET /tools` lists tool descriptors with JSON schemas; `POST /tools/call`
//! dispatches `{tool, arguments}` onto the composed [`Depot`]. Content
//! travels base64-encoded in both directions. Tool failures are reported in
//! the result envelope (`success: false`) rather than as HTTP errors, so an
//! agent always gets a parseable reply.

use axum::extract::State;
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use depotgate_core::storage::ArtifactContent;
use depotgate_core::{ArtifactRole, DeliverableSpec, DepotError, DepotResult, PurgePolicy};

use crate::state::AppState;

/// A tool invocation request.
#[derive(Debug, Deserialize)]
pub struct ToolCall {
    /// Tool name from the descriptor list.
    pub tool: String,
    /// Tool-specific arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// A tool invocation result envelope.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Tool-specific result payload.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub result: Value,
    /// Error kind and detail when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    fn err(detail: String) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(detail),
        }
    }
}

const ROLE_VALUES: [&str; 5] = ["final_output", "supporting", "plan", "log", "other"];
const POLICY_VALUES: [&str; 4] = ["immediate", "retain_24h", "retain_7d", "manual"];

/// Lists the available tools with their input schemas.
pub async fn list_tools(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({
        "tools": [
            {
                "name": "stage_artifact",
                "description": "Stage an artifact; returns its pointer.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "root_task_id": { "type": "string" },
                        "content_base64": { "type": "string" },
                        "mime_type": { "type": "string", "default": "application/octet-stream" },
                        "artifact_role": { "type": "string", "enum": ROLE_VALUES, "default": "supporting" },
                        "produced_by_receipt_id": { "type": "string" }
                    },
                    "required": ["root_task_id", "content_base64"]
                }
            },
            {
                "name": "list_staged_artifacts",
                "description": "List live artifact pointers for a task, newest first.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "root_task_id": { "type": "string" },
                        "artifact_role": { "type": "string", "enum": ROLE_VALUES }
                    },
                    "required": ["root_task_id"]
                }
            },
            {
                "name": "get_artifact",
                "description": "Fetch one artifact pointer by id.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "artifact_id": { "type": "string" } },
                    "required": ["artifact_id"]
                }
            },
            {
                "name": "get_artifact_content",
                "description": "Fetch artifact bytes, base64-encoded.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "artifact_id": { "type": "string" } },
                    "required": ["artifact_id"]
                }
            },
            {
                "name": "declare_deliverable",
                "description": "Declare a deliverable contract; returns the deliverable.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "root_task_id": { "type": "string" },
                        "spec": {
                            "type": "object",
                            "properties": {
                                "artifact_ids": { "type": "array", "items": { "type": "string" } },
                                "artifact_roles": { "type": "array", "items": { "type": "string", "enum": ROLE_VALUES } },
                                "requirements": { "type": "array", "items": { "type": "string" } },
                                "shipping_destination": { "type": "string" }
                            },
                            "required": ["shipping_destination"]
                        }
                    },
                    "required": ["root_task_id", "spec"]
                }
            },
            {
                "name": "check_closure",
                "description": "Report whether a deliverable's requirements are satisfied.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "deliverable_id": { "type": "string" } },
                    "required": ["deliverable_id"]
                }
            },
            {
                "name": "mark_requirement",
                "description": "Mark a named requirement of a deliverable satisfied.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "deliverable_id": { "type": "string" },
                        "name": { "type": "string" }
                    },
                    "required": ["deliverable_id", "name"]
                }
            },
            {
                "name": "ship_deliverable",
                "description": "Ship a deliverable if closure is satisfied; returns the manifest.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "root_task_id": { "type": "string" },
                        "deliverable_id": { "type": "string" }
                    },
                    "required": ["root_task_id", "deliverable_id"]
                }
            },
            {
                "name": "purge_artifacts",
                "description": "Purge staged artifacts under a retention policy.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "root_task_id": { "type": "string" },
                        "policy": { "type": "string", "enum": POLICY_VALUES, "default": "immediate" },
                        "artifact_ids": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["root_task_id"]
                }
            },
            {
                "name": "list_receipts",
                "description": "List receipts for a task, ascending by emission time.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "root_task_id": { "type": "string" } },
                    "required": ["root_task_id"]
                }
            }
        ]
    }))
}

/// Dispatches a tool call onto the depot.
pub async fn call_tool(State(state): State<AppState>, Json(call): Json<ToolCall>) -> Json<ToolResult> {
    debug!(tool = %call.tool, "tool call");
    let result = dispatch(&state, &call.tool, &call.arguments).await;
    Json(match result {
        Ok(value) => ToolResult::ok(value),
        Err(err) => ToolResult::err(err),
    })
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument {key:?}"))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn parse_uuid_arg(args: &Value, key: &str) -> Result<Uuid, String> {
    Uuid::parse_str(required_str(args, key)?).map_err(|err| format!("argument {key:?}: {err}"))
}

fn parse_role(raw: Option<&str>) -> Result<ArtifactRole, String> {
    match raw {
        None => Ok(ArtifactRole::Supporting),
        Some(s) => ArtifactRole::parse(s).ok_or_else(|| format!("unknown artifact role {s:?}")),
    }
}

fn depot_err(err: DepotError) -> String {
    format!("{}: {err}", err.kind())
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|err| format!("serializing result: {err}"))
}

async fn dispatch(state: &AppState, tool: &str, args: &Value) -> Result<Value, String> {
    match tool {
        "stage_artifact" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let content = BASE64
                .decode(required_str(args, "content_base64")?)
                .map_err(|err| format!("argument \"content_base64\": {err}"))?;
            let mime_type = optional_str(args, "mime_type").unwrap_or("application/octet-stream");
            let role = parse_role(optional_str(args, "artifact_role"))?;
            let produced_by = optional_str(args, "produced_by_receipt_id").map(ToString::to_string);

            let pointer = with_deadline(
                state,
                state.depot.stage(
                    root_task_id,
                    ArtifactContent::bytes(content),
                    mime_type,
                    role,
                    produced_by,
                ),
            )
            .await?;
            to_value(&pointer)
        }
        "list_staged_artifacts" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let role = match optional_str(args, "artifact_role") {
                None => None,
                Some(s) => Some(
                    ArtifactRole::parse(s).ok_or_else(|| format!("unknown artifact role {s:?}"))?,
                ),
            };
            let pointers = state
                .depot
                .stage_list(root_task_id, role)
                .map_err(depot_err)?;
            to_value(&pointers)
        }
        "get_artifact" => {
            let artifact_id = parse_uuid_arg(args, "artifact_id")?;
            let pointer = state.depot.get_artifact(artifact_id).map_err(depot_err)?;
            to_value(&pointer)
        }
        "get_artifact_content" => {
            let artifact_id = parse_uuid_arg(args, "artifact_id")?;
            let bytes = with_deadline(state, state.depot.get_content(artifact_id)).await?;
            Ok(json!({
                "artifact_id": artifact_id,
                "content_base64": BASE64.encode(bytes),
            }))
        }
        "declare_deliverable" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let spec_value = args
                .get("spec")
                .cloned()
                .ok_or_else(|| "missing required argument \"spec\"".to_string())?;
            let spec: DeliverableSpec =
                serde_json::from_value(spec_value).map_err(|err| format!("argument \"spec\": {err}"))?;
            let deliverable = state
                .depot
                .declare_deliverable(root_task_id, spec)
                .map_err(depot_err)?;
            to_value(&deliverable)
        }
        "check_closure" => {
            let deliverable_id = parse_uuid_arg(args, "deliverable_id")?;
            let report = state.depot.check_closure(deliverable_id).map_err(depot_err)?;
            to_value(&report)
        }
        "mark_requirement" => {
            let deliverable_id = parse_uuid_arg(args, "deliverable_id")?;
            let name = required_str(args, "name")?;
            state
                .depot
                .mark_requirement(deliverable_id, name)
                .map_err(depot_err)?;
            Ok(json!({ "deliverable_id": deliverable_id, "marked": name }))
        }
        "ship_deliverable" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let deliverable_id = parse_uuid_arg(args, "deliverable_id")?;
            let manifest =
                with_deadline(state, state.depot.ship(root_task_id, deliverable_id)).await?;
            to_value(&manifest)
        }
        "purge_artifacts" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let policy = match optional_str(args, "policy") {
                None => PurgePolicy::Immediate,
                Some(s) => {
                    PurgePolicy::parse(s).ok_or_else(|| format!("unknown purge policy {s:?}"))?
                }
            };
            let artifact_ids = match args.get("artifact_ids") {
                None | Some(Value::Null) => None,
                Some(value) => {
                    let ids: Vec<Uuid> = serde_json::from_value(value.clone())
                        .map_err(|err| format!("argument \"artifact_ids\": {err}"))?;
                    Some(ids)
                }
            };
            let receipt = with_deadline(
                state,
                state
                    .depot
                    .purge(root_task_id, policy, artifact_ids.as_deref()),
            )
            .await?;
            to_value(&receipt)
        }
        "list_receipts" => {
            let root_task_id = required_str(args, "root_task_id")?;
            let receipts = state.depot.list_receipts(root_task_id).map_err(depot_err)?;
            to_value(&receipts)
        }
        other => Err(format!("unknown tool {other:?}")),
    }
}

async fn with_deadline<T>(
    state: &AppState,
    op: impl std::future::Future<Output = DepotResult<T>>,
) -> Result<T, String> {
    state.with_deadline(op).await.map_err(depot_err)
}
