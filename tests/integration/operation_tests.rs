//! Operation integration tests.
//!
//! Tests verify:
//! - Guided scanning registers a model when done
//! - Algorithm batches stop at the first failure
//! - Batch prepare records per-capture failures and keeps going
//! - Abort, closed operations and removal

use axum::http::StatusCode;
use serde_json::{json, Value};

use scan_relay::capture::ArtifactKind;
use scan_relay::model::{Model, Scan};

use super::test_utils::{TestApp, TestScanner};

async fn start(app: &TestApp, uri: &str, body: Value) -> i64 {
    let response = app.post(uri, body).await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    response.json()["operation_id"].as_i64().unwrap()
}

async fn operation_state(app: &TestApp, id: i64) -> Value {
    let response = app.get(&format!("/operations/{}", id)).await;
    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

async fn is_prepared(app: &TestApp, handle: i64, kind: ArtifactKind) -> bool {
    app.session
        .is_deferred_capture_prepared(handle as i32, kind)
        .await
        .unwrap()
}

// =============================================================================
// Scanning Procedure
// =============================================================================

#[tokio::test]
async fn test_scanning_procedure_creates_model() {
    let app = TestApp::new().await;

    let response = app
        .post("/scanning-procedure", json!({ "target_frames": 3 }))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let created = response.json();
    assert_eq!(created["kind"], "scanning_procedure");
    let id = created["operation_id"].as_i64().unwrap();

    // Nothing is captured before the first step
    assert_eq!(app.scanner().frames_captured(), 0);
    assert_eq!(operation_state(&app, id).await["state"], "created");

    let statuses = app.drive(id).await;

    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s["kind"] == "scanning_procedure"));
    assert_eq!(statuses[0]["step"], 0);
    assert_eq!(statuses[2]["frames_accepted"], 3);
    let model_handle = statuses[2]["model_handle"].as_i64().unwrap();

    let model = app.get(&format!("/models/{}", model_handle)).await.json();
    assert_eq!(model["scan_count"], 1);
    let scan = app
        .get(&format!("/models/{}/scans/0", model_handle))
        .await
        .json();
    assert_eq!(scan["frame_count"], 3);

    assert_eq!(operation_state(&app, id).await["state"], "completed");
}

#[tokio::test]
async fn test_scanning_procedure_reconstruction_failure_fails_operation() {
    let app = TestApp::builder()
        .scanner(TestScanner::new().failing(&[1]))
        .build()
        .await;
    let id = start(&app, "/scanning-procedure", json!({ "target_frames": 3 })).await;
    let next = format!("/operations/{}/next", id);

    assert_eq!(app.post_empty(&next).await.status, StatusCode::OK);

    let response = app.post_empty(&next).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "reconstruction_error");

    assert_eq!(operation_state(&app, id).await["state"], "failed");
    assert_eq!(app.post_empty(&next).await.status, StatusCode::GONE);
    assert!(app.get("/models").await.json()["handles"]
        .as_array()
        .unwrap()
        .is_empty());
}

// =============================================================================
// Run Algorithms
// =============================================================================

#[tokio::test]
async fn test_run_algorithms_in_order() {
    let app = TestApp::new().await;
    let handle = app
        .session
        .add_model(Model {
            scans: vec![Scan::default(); 3],
            composite: None,
        })
        .await;

    let id = start(
        &app,
        &format!("/models/{}/algorithms", handle),
        json!({ "algorithms": [
            { "name": "remove_scan", "params": { "index": 0 } },
            { "name": "fuse" }
        ]}),
    )
    .await;
    let statuses = app.drive(id).await;

    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0]["algorithm"], "remove_scan");
    assert_eq!(statuses[1]["algorithm"], "fuse");
    assert!(statuses.iter().all(|s| s["success"] == true));

    let model = app.get(&format!("/models/{}", handle)).await.json();
    assert_eq!(model["scan_count"], 2);
    assert_eq!(model["has_composite_container"], true);
}

#[tokio::test]
async fn test_run_algorithms_stops_at_first_failure() {
    let app = TestApp::new().await;
    let handle = app
        .session
        .add_model(Model {
            scans: vec![Scan::default(); 2],
            composite: None,
        })
        .await;

    let id = start(
        &app,
        &format!("/models/{}/algorithms", handle),
        json!({ "algorithms": [
            { "name": "fuse" },
            { "name": "remove_scan", "params": { "index": 9 } },
            { "name": "clear_composite" }
        ]}),
    )
    .await;
    let statuses = app.drive(id).await;

    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1]["success"], false);
    assert_eq!(statuses[1]["total"], 3);
    assert!(statuses[1]["error"].as_str().unwrap().contains("out of range"));
    assert_eq!(operation_state(&app, id).await["state"], "failed");

    // clear_composite never ran
    let model = app.get(&format!("/models/{}", handle)).await.json();
    assert_eq!(model["has_composite_container"], true);
    assert_eq!(model["scan_count"], 2);

    let response = app.post_empty(&format!("/operations/{}/next", id)).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert_eq!(response.json()["error"], "operation_closed");
}

#[tokio::test]
async fn test_run_algorithms_unknown_model() {
    let app = TestApp::new().await;
    let response = app
        .post("/models/5/algorithms", json!({ "algorithms": [] }))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(app.get("/operations").await.json()["handles"]
        .as_array()
        .unwrap()
        .is_empty());
}

// =============================================================================
// Deferred Capture Prepare
// =============================================================================

#[tokio::test]
async fn test_prepare_is_fail_soft() {
    let app = TestApp::builder()
        .scanner(TestScanner::new().failing(&[1]))
        .build()
        .await;
    let handles = vec![
        app.capture_deferred().await,
        app.capture_deferred().await,
        app.capture_deferred().await,
    ];

    let id = start(
        &app,
        "/deferred-captures/prepare",
        json!({ "handles": handles }),
    )
    .await;
    let statuses = app.drive(id).await;

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0]["success"], true);
    assert_eq!(statuses[1]["success"], false);
    assert_eq!(statuses[1]["handle"], handles[1]);
    assert_eq!(statuses[2]["success"], true);

    let outcomes = statuses[2]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[1]["error"].is_string());
    assert_eq!(operation_state(&app, id).await["state"], "completed");

    assert!(is_prepared(&app, handles[0], ArtifactKind::Mesh).await);
    assert!(!is_prepared(&app, handles[1], ArtifactKind::Mesh).await);
    assert!(is_prepared(&app, handles[2], ArtifactKind::Mesh).await);

    // Prepared meshes are served from the cache
    let before = app.scanner().reconstructions();
    app.get(&format!("/deferred-captures/{}/mesh", handles[2])).await;
    assert_eq!(app.scanner().reconstructions(), before);
}

#[tokio::test]
async fn test_prepare_stl_only_fills_stl() {
    let app = TestApp::new().await;
    let handle = app.capture_deferred().await;

    let id = start(
        &app,
        "/deferred-captures/prepare-stl",
        json!({ "handles": [handle] }),
    )
    .await;
    let statuses = app.drive(id).await;

    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["kind"], "deferred_capture_prepare");
    assert!(is_prepared(&app, handle, ArtifactKind::Stl).await);
    assert!(!is_prepared(&app, handle, ArtifactKind::Mesh).await);
}

#[tokio::test]
async fn test_prepare_rejects_unknown_handles_up_front() {
    let app = TestApp::new().await;
    let handle = app.capture_deferred().await;

    let response = app
        .post(
            "/deferred-captures/prepare",
            json!({ "handles": [handle, 404] }),
        )
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(app.scanner().reconstructions(), 0);
}

#[tokio::test]
async fn test_prepare_capture_freed_mid_batch() {
    let app = TestApp::new().await;
    let a = app.capture_deferred().await;
    let b = app.capture_deferred().await;

    let id = start(
        &app,
        "/deferred-captures/prepare",
        json!({ "handles": [a, b] }),
    )
    .await;
    app.post("/deferred-captures/free", json!({ "handles": [b] }))
        .await;

    let statuses = app.drive(id).await;

    assert_eq!(statuses[0]["success"], true);
    assert_eq!(statuses[1]["success"], false);
    assert!(statuses[1]["error"]
        .as_str()
        .unwrap()
        .contains("handle"));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_abort_then_next_is_gone() {
    let app = TestApp::new().await;
    let id = start(&app, "/scanning-procedure", json!({ "target_frames": 5 })).await;
    let next = format!("/operations/{}/next", id);

    assert_eq!(app.post_empty(&next).await.status, StatusCode::OK);

    let response = app.post_empty(&format!("/operations/{}/abort", id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["state"], "cancelled");

    let response = app.post_empty(&next).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert_eq!(app.scanner().frames_captured(), 1);
    assert!(app.get("/models").await.json()["handles"]
        .as_array()
        .unwrap()
        .is_empty());

    // The closed operation was dropped after reporting 410
    let response = app.post_empty(&format!("/operations/{}/abort", id)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(app.post_empty(&next).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_abort_twice_keeps_cancelled_state() {
    let app = TestApp::new().await;
    let id = start(&app, "/scanning-procedure", json!({})).await;

    app.post_empty(&format!("/operations/{}/abort", id)).await;
    let response = app.post_empty(&format!("/operations/{}/abort", id)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["state"], "cancelled");
}

#[tokio::test]
async fn test_finished_operations_are_evicted() {
    let app = TestApp::new().await;
    let handle = app.session.add_model(Model::default()).await;
    let id = start(
        &app,
        &format!("/models/{}/algorithms", handle),
        json!({ "algorithms": [{ "name": "clear_composite" }] }),
    )
    .await;
    app.drive(id).await;

    // Still listed until a further step is attempted
    assert_eq!(app.get("/operations").await.json()["handles"], json!([id]));

    let response = app.post_empty(&format!("/operations/{}/next", id)).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert!(app.get("/operations").await.json()["handles"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_delete_operation() {
    let app = TestApp::new().await;
    let id = start(&app, "/scanning-procedure", json!({})).await;
    assert_eq!(app.get("/operations").await.json()["handles"], json!([id]));

    let response = app.delete(&format!("/operations/{}", id)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.post_empty(&format!("/operations/{}/next", id)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get(&format!("/operations/{}", id)).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.scanner().frames_captured(), 0);
}

#[tokio::test]
async fn test_free_all_drops_operations() {
    let app = TestApp::new().await;
    start(&app, "/scanning-procedure", json!({})).await;
    start(&app, "/scanning-procedure", json!({})).await;

    let report = app.post_empty("/session/free-all").await.json();

    assert_eq!(report["cancelled_operations"], 2);
    assert!(app.get("/operations").await.json()["handles"]
        .as_array()
        .unwrap()
        .is_empty());
}
