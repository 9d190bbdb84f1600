//! Exercises the agent-tool façade end to end: stage, declare, ship, and
//! audit through tool calls alone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tempfile::TempDir;

use depotgate_core::{Depot, DepotConfig};
use depotgate_daemon::state::{AppState, AuthSettings};
use depotgate_daemon::tool::{self, ToolCall, ToolResult};

fn app_state(dir: &TempDir) -> AppState {
    let config = DepotConfig {
        storage_base_path: dir.path().join("staging"),
        sink_bases_by_scheme: BTreeMap::from([("fs".to_string(), dir.path().join("shipped"))]),
        enabled_sinks: vec!["fs".into()],
        metadata_db_path: dir.path().join("metadata.sqlite"),
        receipts_db_path: dir.path().join("receipts.sqlite"),
        ..DepotConfig::default()
    };
    AppState::new(
        Arc::new(Depot::new(&config).unwrap()),
        AuthSettings {
            api_key: None,
            allow_insecure_dev: true,
        },
        Duration::from_secs(5),
    )
}

async fn call(state: &AppState, name: &str, arguments: Value) -> ToolResult {
    let Json(result) = tool::call_tool(
        State(state.clone()),
        Json(ToolCall {
            tool: name.to_string(),
            arguments,
        }),
    )
    .await;
    result
}

#[tokio::test]
async fn full_workflow_through_tool_calls() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(&dir);

    let staged = call(
        &state,
        "stage_artifact",
        json!({
            "root_task_id": "task-1",
            "content_base64": BASE64.encode(b"hello"),
            "mime_type": "text/plain",
            "artifact_role": "final_output",
        }),
    )
    .await;
    assert!(staged.success, "stage failed: {:?}", staged.error);
    let artifact_id = staged.result["artifact_id"].as_str().unwrap().to_string();

    let declared = call(
        &state,
        "declare_deliverable",
        json!({
            "root_task_id": "task-1",
            "spec": {
                "artifact_ids": [artifact_id],
                "shipping_destination": "fs://out/run-1",
            },
        }),
    )
    .await;
    assert!(declared.success, "declare failed: {:?}", declared.error);
    let deliverable_id = declared.result["deliverable_id"].as_str().unwrap().to_string();

    let closure = call(
        &state,
        "check_closure",
        json!({ "deliverable_id": deliverable_id }),
    )
    .await;
    assert!(closure.success);
    assert_eq!(closure.result["satisfied"], json!(true));

    let shipped = call(
        &state,
        "ship_deliverable",
        json!({ "root_task_id": "task-1", "deliverable_id": deliverable_id }),
    )
    .await;
    assert!(shipped.success, "ship failed: {:?}", shipped.error);

    let fetched = call(
        &state,
        "get_artifact_content",
        json!({ "artifact_id": artifact_id }),
    )
    .await;
    assert!(fetched.success);
    let content = BASE64
        .decode(fetched.result["content_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(content, b"hello");

    let receipts = call(&state, "list_receipts", json!({ "root_task_id": "task-1" })).await;
    assert!(receipts.success);
    let kinds: Vec<&str> = receipts
        .result
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["artifact_staged", "shipment_complete"]);
}

#[tokio::test]
async fn tool_failures_come_back_in_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(&dir);

    let unknown = call(&state, "frobnicate", json!({})).await;
    assert!(!unknown.success);
    assert!(unknown.error.unwrap().contains("unknown tool"));

    let missing_arg = call(&state, "stage_artifact", json!({})).await;
    assert!(!missing_arg.success);
    assert!(missing_arg.error.unwrap().contains("root_task_id"));

    let bad_role = call(
        &state,
        "stage_artifact",
        json!({
            "root_task_id": "task-1",
            "content_base64": BASE64.encode(b"x"),
            "artifact_role": "intermediate",
        }),
    )
    .await;
    assert!(!bad_role.success);

    let domain_error = call(
        &state,
        "ship_deliverable",
        json!({
            "root_task_id": "task-1",
            "deliverable_id": uuid::Uuid::new_v4(),
        }),
    )
    .await;
    assert!(!domain_error.success);
    assert!(domain_error.error.unwrap().starts_with("not_found"));
}

#[tokio::test]
async fn tool_listing_names_every_tool() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(&dir);

    let Json(listing) = tool::list_tools(State(state)).await;
    let names: Vec<&str> = listing["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in [
        "stage_artifact",
        "list_staged_artifacts",
        "get_artifact",
        "get_artifact_content",
        "declare_deliverable",
        "check_closure",
        "mark_requirement",
        "ship_deliverable",
        "purge_artifacts",
        "list_receipts",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }
}
