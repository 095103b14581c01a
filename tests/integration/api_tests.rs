//! API integration tests for captures, deferred-capture caching and errors.
//!
//! Tests verify:
//! - Immediate capture as exchange mesh and STL
//! - Deferred capture handles and per-artifact caching
//! - Missing device and unknown handle responses
//! - Session summary, save path and teardown

use axum::http::StatusCode;
use serde_json::json;

use super::test_utils::{stl_triangle_count, FailingReleaseAlgorithms, TestApp};

// =============================================================================
// Health / Session
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["device"], true);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_reports_missing_device() {
    let app = TestApp::builder().without_device().build().await;
    let body = app.get("/health").await.json();
    assert_eq!(body["device"], false);
}

#[tokio::test]
async fn test_session_summary_tracks_handles() {
    let app = TestApp::new().await;
    app.capture_deferred().await;
    app.capture_deferred().await;

    let body = app.get("/session").await.json();

    assert_eq!(body["device"], "test scanner");
    assert_eq!(body["deferred_captures"], json!([1, 2]));
    assert_eq!(body["models"], json!([]));
    assert_eq!(body["last_handle"], 2);
}

#[tokio::test]
async fn test_set_save_path() {
    let app = TestApp::builder().without_save_path().build().await;
    let dir = app.save_dir.path().to_str().unwrap().to_string();

    let response = app
        .send("PUT", "/session/save-path", Some(json!({ "path": dir })))
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(app.get("/session").await.json()["save_path"], dir.as_str());

    let missing = app.save_dir.path().join("missing");
    let response = app
        .send(
            "PUT",
            "/session/save-path",
            Some(json!({ "path": missing.to_str().unwrap() })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_save_path");

    let response = app
        .send("PUT", "/session/save-path", Some(json!({ "path": null })))
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(app.get("/session").await.json()["save_path"].is_null());
}

// =============================================================================
// Immediate Capture
// =============================================================================

#[tokio::test]
async fn test_capture_returns_exchange_mesh() {
    let app = TestApp::new().await;

    let response = app.post_empty("/capture?with_texture=true").await;

    assert_eq!(response.status, StatusCode::OK);
    let mesh = response.json();
    let vertices = mesh["vertices"].as_array().unwrap();
    assert!(!vertices.is_empty());
    assert!(vertices[0]["x"].is_number());
    assert!(!mesh["triangles"].as_array().unwrap().is_empty());
    assert_eq!(
        mesh["texture_coordinates"].as_array().unwrap().len(),
        vertices.len()
    );
    assert_eq!(mesh["textures"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_capture_without_texture() {
    let app = TestApp::new().await;
    let mesh = app.post_empty("/capture").await.json();
    assert!(mesh["texture_coordinates"].as_array().unwrap().is_empty());
    assert!(mesh.get("textures").is_none());
}

#[tokio::test]
async fn test_capture_stl() {
    let app = TestApp::new().await;

    let response = app.post_empty("/capture/stl").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type.as_deref(), Some("model/stl"));
    let triangles = stl_triangle_count(&response.body);
    assert!(triangles > 0);
    assert_eq!(response.body.len(), 84 + 50 * triangles as usize);
}

#[tokio::test]
async fn test_capture_without_device_is_unavailable() {
    let app = TestApp::builder().without_device().build().await;

    for uri in ["/capture", "/capture/stl", "/deferred-captures"] {
        let response = app.post_empty(uri).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        assert_eq!(response.json()["error"], "no_device");
    }

    let response = app.post("/scanning-procedure", json!({})).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Deferred Captures
// =============================================================================

#[tokio::test]
async fn test_deferred_capture_does_not_reconstruct() {
    let app = TestApp::new().await;

    let first = app.capture_deferred().await;
    let second = app.capture_deferred().await;

    assert_eq!((first, second), (1, 2));
    assert_eq!(app.scanner().frames_captured(), 2);
    assert_eq!(app.scanner().reconstructions(), 0);

    let body = app.get("/deferred-captures").await.json();
    assert_eq!(body["handles"], json!([1, 2]));
}

#[tokio::test]
async fn test_deferred_mesh_is_cached() {
    let app = TestApp::new().await;
    let handle = app.capture_deferred().await;
    let uri = format!("/deferred-captures/{}/mesh", handle);

    let first = app.get(&uri).await;
    let second = app.get(&uri).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(app.scanner().reconstructions(), 1);
    // No further device interaction
    assert_eq!(app.scanner().frames_captured(), 1);
}

#[tokio::test]
async fn test_deferred_stl_cached_separately_from_mesh() {
    let app = TestApp::new().await;
    let handle = app.capture_deferred().await;

    let stl = app.get(&format!("/deferred-captures/{}/stl", handle)).await;
    assert_eq!(stl.status, StatusCode::OK);
    assert_eq!(stl.content_type.as_deref(), Some("model/stl"));
    assert_eq!(app.scanner().reconstructions(), 1);

    app.get(&format!("/deferred-captures/{}/mesh", handle)).await;
    assert_eq!(app.scanner().reconstructions(), 2);

    app.get(&format!("/deferred-captures/{}/stl", handle)).await;
    app.get(&format!("/deferred-captures/{}/mesh", handle)).await;
    assert_eq!(app.scanner().reconstructions(), 2);
}

#[tokio::test]
async fn test_deferred_capture_free_ignores_unknown_handles() {
    let app = TestApp::new().await;
    let a = app.capture_deferred().await;
    let b = app.capture_deferred().await;

    let response = app
        .post("/deferred-captures/free", json!({ "handles": [a, 42] }))
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let body = app.get("/deferred-captures").await.json();
    assert_eq!(body["handles"], json!([b]));

    let response = app.get(&format!("/deferred-captures/{}/mesh", a)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "invalid_handle");
}

#[tokio::test]
async fn test_handles_never_reused() {
    let app = TestApp::new().await;
    let a = app.capture_deferred().await;
    app.post("/deferred-captures/free", json!({ "handles": [a] }))
        .await;

    let b = app.capture_deferred().await;
    assert!(b > a);
}

#[tokio::test]
async fn test_deferred_reconstruction_failure() {
    let app = TestApp::builder()
        .scanner(super::test_utils::TestScanner::new().failing(&[0]))
        .build()
        .await;
    let handle = app.capture_deferred().await;

    let response = app.get(&format!("/deferred-captures/{}/mesh", handle)).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "reconstruction_error");
    // Failure is not cached
    app.get(&format!("/deferred-captures/{}/mesh", handle)).await;
    assert_eq!(app.scanner().reconstructions(), 2);
}

#[tokio::test]
async fn test_malformed_path_parameter_rejected() {
    let app = TestApp::new().await;
    let response = app.get("/deferred-captures/abc/mesh").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_free_all_reports_failures_and_continues() {
    let app = TestApp::builder()
        .algorithms(FailingReleaseAlgorithms::new(2))
        .build()
        .await;

    use scan_relay::model::{Model, Scan};
    let m1 = app
        .session
        .add_model(Model {
            scans: vec![Scan::default()],
            composite: None,
        })
        .await;
    let m2 = app
        .session
        .add_model(Model {
            scans: vec![Scan::default(), Scan::default()],
            composite: None,
        })
        .await;
    let m3 = app.session.add_model(Model::default()).await;
    app.capture_deferred().await;
    app.capture_deferred().await;

    let response = app.post_empty("/session/free-all").await;

    assert_eq!(response.status, StatusCode::OK);
    let report = response.json();
    assert_eq!(report["cleared_captures"], 2);
    assert_eq!(report["freed_models"], json!([m1, m3]));
    assert_eq!(report["failures"][0]["handle"], m2);
    assert!(report["failures"][0]["message"]
        .as_str()
        .unwrap()
        .contains("refused"));

    let summary = app.get("/session").await.json();
    assert_eq!(summary["models"], json!([]));
    assert_eq!(summary["deferred_captures"], json!([]));
}

#[tokio::test]
async fn test_model_free_ignores_release_failure() {
    let app = TestApp::builder()
        .algorithms(FailingReleaseAlgorithms::new(0))
        .build()
        .await;
    let handle = app
        .session
        .add_model(scan_relay::model::Model::default())
        .await;

    let response = app.delete(&format!("/models/{}", handle)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.get(&format!("/models/{}", handle)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
