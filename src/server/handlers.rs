//! HTTP request handlers for the scanner session API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `/session`, `/capture`, `/deferred-captures` - Session and capture calls
//! - `/models/...` - Model load/save/free and read accessors
//! - `/operations/...` - Step-driven long-running operations

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::engine::AlgorithmDescriptor;
use crate::error::SessionError;
use crate::model::Transform;
use crate::operation::{Advance, OperationState, OperationStatus, ScanningProcedureSettings};
use crate::registry::Handle;
use crate::session::{ScannerSession, SessionSummary};

use super::operations::OperationTable;

/// Content type of binary STL responses.
pub const STL_CONTENT_TYPE: &str = "model/stl";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The scanner session behind this server
    pub session: Arc<ScannerSession>,

    /// Operations awaiting their next step
    pub operations: Arc<OperationTable>,
}

impl AppState {
    pub fn new(session: Arc<ScannerSession>) -> Self {
        Self {
            session,
            operations: Arc::new(OperationTable::new()),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for capture requests.
#[derive(Debug, Default, Deserialize)]
pub struct CaptureQueryParams {
    #[serde(default)]
    pub with_texture: bool,
}

/// Body listing deferred-capture handles.
#[derive(Debug, Deserialize)]
pub struct HandlesRequest {
    pub handles: Vec<Handle>,
}

/// Body naming a project.
#[derive(Debug, Deserialize)]
pub struct ProjectNameRequest {
    pub name: String,
}

/// Body for `PUT /session/save-path`; `null` clears the path.
#[derive(Debug, Deserialize)]
pub struct SavePathRequest {
    pub path: Option<PathBuf>,
}

/// Body for `POST /models/{handle}/algorithms`.
#[derive(Debug, Deserialize)]
pub struct RunAlgorithmsRequest {
    pub algorithms: Vec<AlgorithmDescriptor>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "invalid_handle", "no_device")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Whether a scanner is bound to the session
    pub device: bool,
}

/// Response carrying a newly created model or capture handle.
#[derive(Debug, Serialize, Deserialize)]
pub struct HandleResponse {
    pub handle: Handle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleListResponse {
    pub handles: Vec<Handle>,
}

/// Response for a newly parked operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationCreatedResponse {
    pub operation_id: Handle,
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct OperationStateResponse {
    pub operation_id: Handle,
    #[serde(flatten)]
    pub state: OperationState,
}

#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub handle: Handle,
    pub scan_count: usize,
    pub has_composite_container: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub index: usize,
    pub frame_count: usize,
    pub transform: Transform,
}

#[derive(Debug, Serialize)]
pub struct CompositeContainerResponse {
    pub mesh_count: usize,
    pub transform: Transform,
}

/// A model free that failed during teardown.
#[derive(Debug, Serialize)]
pub struct TeardownFailureResponse {
    pub handle: Handle,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct FreeAllResponse {
    pub cleared_captures: usize,
    pub freed_models: Vec<Handle>,
    pub cancelled_operations: usize,
    pub failures: Vec<TeardownFailureResponse>,
}

// =============================================================================
// Error Handling
// =============================================================================

impl SessionError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            SessionError::InvalidHandle { .. } => (StatusCode::NOT_FOUND, "invalid_handle"),
            SessionError::InvalidIndex { .. } => (StatusCode::BAD_REQUEST, "invalid_index"),
            SessionError::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
            SessionError::InvalidName(_) => (StatusCode::BAD_REQUEST, "invalid_name"),
            SessionError::InvalidSavePath(_) => (StatusCode::BAD_REQUEST, "invalid_save_path"),
            SessionError::NoDevice => (StatusCode::SERVICE_UNAVAILABLE, "no_device"),
            SessionError::NoSavePath => (StatusCode::CONFLICT, "no_save_path"),
            SessionError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            SessionError::OperationClosed => (StatusCode::GONE, "operation_closed"),
            SessionError::OperationTimedOut { .. } => {
                (StatusCode::REQUEST_TIMEOUT, "operation_timed_out")
            }
            SessionError::Device { .. } => (StatusCode::BAD_GATEWAY, "device_error"),
            SessionError::Reconstruction { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "reconstruction_error")
            }
            SessionError::Persistence { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
            }
            SessionError::Algorithm { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "algorithm_error"),
            SessionError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        }
    }
}

/// Convert SessionError to an HTTP response.
///
/// Maps each error to a status code and a JSON [`ErrorResponse`]:
/// - Unknown handles: 404
/// - Bad indices, names, state: 400
/// - Missing device: 503
/// - Save path missing or project present: 409
/// - Closed operation: 410, timed-out operation: 408
/// - Engine failures: 500/502
impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Handle not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);

        (status, Json(error_response)).into_response()
    }
}

fn stl_response(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, STL_CONTENT_TYPE)], bytes).into_response()
}

// =============================================================================
// Health / Session
// =============================================================================

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "device": true
/// }
/// ```
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        device: state.session.has_device(),
    })
}

/// `GET /session`
pub async fn session_handler(State(state): State<AppState>) -> Json<SessionSummary> {
    Json(state.session.summary().await)
}

/// `PUT /session/save-path`
pub async fn set_save_path_handler(
    State(state): State<AppState>,
    Json(request): Json<SavePathRequest>,
) -> Result<StatusCode, SessionError> {
    state.session.set_save_path(request.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Tear down the session: drop operations, captures and models.
///
/// # Endpoint
///
/// `POST /session/free-all`
///
/// Always `200 OK`; per-model failures are listed in `failures`.
pub async fn free_all_handler(State(state): State<AppState>) -> Json<FreeAllResponse> {
    let cancelled_operations = state.operations.len().await;
    state.operations.clear().await;

    let report = state.session.free_all().await;
    Json(FreeAllResponse {
        cleared_captures: report.cleared_captures,
        freed_models: report.freed_models,
        cancelled_operations,
        failures: report
            .failures
            .into_iter()
            .map(|f| TeardownFailureResponse {
                handle: f.handle,
                message: f.error.to_string(),
            })
            .collect(),
    })
}

// =============================================================================
// Capture
// =============================================================================

/// Capture and reconstruct immediately.
///
/// # Endpoint
///
/// `POST /capture?with_texture=true`
///
/// # Response
///
/// `200 OK` with the exchange mesh as JSON, `503` without a scanner.
pub async fn capture_handler(
    State(state): State<AppState>,
    Query(query): Query<CaptureQueryParams>,
) -> Result<Response, SessionError> {
    let mesh = state.session.capture(query.with_texture).await?;
    Ok(Json(mesh).into_response())
}

/// `POST /capture/stl`
pub async fn capture_stl_handler(State(state): State<AppState>) -> Result<Response, SessionError> {
    let stl = state.session.capture_stl().await?;
    Ok(stl_response(stl))
}

/// `POST /deferred-captures?with_texture=true`
pub async fn capture_deferred_handler(
    State(state): State<AppState>,
    Query(query): Query<CaptureQueryParams>,
) -> Result<(StatusCode, Json<HandleResponse>), SessionError> {
    let handle = state.session.capture_deferred(query.with_texture).await?;
    Ok((StatusCode::CREATED, Json(HandleResponse { handle })))
}

/// `GET /deferred-captures`
pub async fn deferred_captures_handler(State(state): State<AppState>) -> Json<HandleListResponse> {
    Json(HandleListResponse {
        handles: state.session.deferred_capture_handles().await,
    })
}

/// Exchange mesh of a deferred capture, reconstructed on first request.
///
/// # Endpoint
///
/// `GET /deferred-captures/{handle}/mesh`
pub async fn deferred_capture_mesh_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
) -> Result<Response, SessionError> {
    let mesh = state.session.get_deferred_capture_mesh(handle).await?;
    Ok(Json(mesh.as_ref()).into_response())
}

/// `GET /deferred-captures/{handle}/stl`
pub async fn deferred_capture_stl_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
) -> Result<Response, SessionError> {
    let stl = state.session.get_deferred_capture_stl(handle).await?;
    Ok(stl_response(stl))
}

/// `POST /deferred-captures/free`
pub async fn deferred_capture_free_handler(
    State(state): State<AppState>,
    Json(request): Json<HandlesRequest>,
) -> StatusCode {
    state.session.deferred_capture_free(&request.handles).await;
    StatusCode::NO_CONTENT
}

/// Start batch mesh preparation.
///
/// # Endpoint
///
/// `POST /deferred-captures/prepare` with `{"handles": [1, 2, 3]}`
///
/// # Response
///
/// `201 Created` with the operation id; drive it through `/operations/{id}/next`.
pub async fn deferred_capture_prepare_handler(
    State(state): State<AppState>,
    Json(request): Json<HandlesRequest>,
) -> Result<(StatusCode, Json<OperationCreatedResponse>), SessionError> {
    let operation = state.session.deferred_capture_prepare(request.handles).await?;
    Ok(park(&state, operation).await)
}

/// `POST /deferred-captures/prepare-stl`
pub async fn deferred_capture_prepare_stl_handler(
    State(state): State<AppState>,
    Json(request): Json<HandlesRequest>,
) -> Result<(StatusCode, Json<OperationCreatedResponse>), SessionError> {
    let operation = state
        .session
        .deferred_capture_prepare_stl(request.handles)
        .await?;
    Ok(park(&state, operation).await)
}

/// `POST /scanning-procedure`
pub async fn scanning_procedure_handler(
    State(state): State<AppState>,
    Json(settings): Json<ScanningProcedureSettings>,
) -> Result<(StatusCode, Json<OperationCreatedResponse>), SessionError> {
    let operation = state.session.run_scanning_procedure(settings)?;
    Ok(park(&state, operation).await)
}

// =============================================================================
// Models
// =============================================================================

/// `GET /models`
pub async fn models_handler(State(state): State<AppState>) -> Json<HandleListResponse> {
    Json(HandleListResponse {
        handles: state.session.model_handles().await,
    })
}

/// Load every entry of a saved project into a new model.
///
/// # Endpoint
///
/// `POST /models/load` with `{"name": "scan_01"}`
///
/// # Response
///
/// `201 Created` with `{"handle": n}`; `409` if no save path is configured.
pub async fn model_load_handler(
    State(state): State<AppState>,
    Json(request): Json<ProjectNameRequest>,
) -> Result<(StatusCode, Json<HandleResponse>), SessionError> {
    let handle = state.session.model_load(&request.name).await?;
    Ok((StatusCode::CREATED, Json(HandleResponse { handle })))
}

/// `GET /models/{handle}`
pub async fn model_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
) -> Result<Json<ModelResponse>, SessionError> {
    let model = state.session.model(handle).await?;
    Ok(Json(ModelResponse {
        handle,
        scan_count: model.scan_count().await,
        has_composite_container: model.has_composite_container().await,
    }))
}

/// `POST /models/{handle}/save`
pub async fn model_save_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
    Json(request): Json<ProjectNameRequest>,
) -> Result<StatusCode, SessionError> {
    state.session.model_save(handle, &request.name).await?;
    Ok(StatusCode::CREATED)
}

/// `DELETE /models/{handle}`
pub async fn model_free_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
) -> Result<StatusCode, SessionError> {
    state.session.model_free(handle).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /models/{handle}/scans/{index}`
pub async fn scan_handler(
    State(state): State<AppState>,
    Path((handle, index)): Path<(Handle, usize)>,
) -> Result<Json<ScanResponse>, SessionError> {
    let model = state.session.model(handle).await?;
    let scan = model.scan(index).await?;
    Ok(Json(ScanResponse {
        index,
        frame_count: scan.frame_count(),
        transform: scan.scan_transform(),
    }))
}

/// `GET /models/{handle}/scans/{index}/frames/{frame}/mesh`
pub async fn frame_mesh_handler(
    State(state): State<AppState>,
    Path((handle, index, frame)): Path<(Handle, usize, usize)>,
) -> Result<Response, SessionError> {
    let model = state.session.model(handle).await?;
    let scan = model.scan(index).await?;
    let mesh = state.session.codec().to_exchange_format(scan.frame_mesh(frame)?);
    Ok(Json(mesh).into_response())
}

/// `GET /models/{handle}/scans/{index}/frames/{frame}/stl`
pub async fn frame_mesh_stl_handler(
    State(state): State<AppState>,
    Path((handle, index, frame)): Path<(Handle, usize, usize)>,
) -> Result<Response, SessionError> {
    let model = state.session.model(handle).await?;
    let scan = model.scan(index).await?;
    let stl = state.session.codec().to_stl_bytes(scan.frame_mesh(frame)?);
    Ok(stl_response(stl))
}

/// `GET /models/{handle}/scans/{index}/frames/{frame}/transform`
pub async fn frame_transform_handler(
    State(state): State<AppState>,
    Path((handle, index, frame)): Path<(Handle, usize, usize)>,
) -> Result<Json<Transform>, SessionError> {
    let model = state.session.model(handle).await?;
    let scan = model.scan(index).await?;
    Ok(Json(scan.frame_transform(frame)?))
}

/// `GET /models/{handle}/composite`
pub async fn composite_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
) -> Result<Json<CompositeContainerResponse>, SessionError> {
    let model = state.session.model(handle).await?;
    let container = model.composite_container().await?;
    Ok(Json(CompositeContainerResponse {
        mesh_count: container.mesh_count(),
        transform: container.container_transform(),
    }))
}

/// `GET /models/{handle}/composite/meshes/{index}/mesh`
pub async fn composite_mesh_handler(
    State(state): State<AppState>,
    Path((handle, index)): Path<(Handle, usize)>,
) -> Result<Response, SessionError> {
    let model = state.session.model(handle).await?;
    let container = model.composite_container().await?;
    let mesh = state
        .session
        .codec()
        .to_exchange_format(container.composite_mesh(index)?);
    Ok(Json(mesh).into_response())
}

/// `GET /models/{handle}/composite/meshes/{index}/stl`
pub async fn composite_mesh_stl_handler(
    State(state): State<AppState>,
    Path((handle, index)): Path<(Handle, usize)>,
) -> Result<Response, SessionError> {
    let model = state.session.model(handle).await?;
    let container = model.composite_container().await?;
    let stl = state
        .session
        .codec()
        .to_stl_bytes(container.composite_mesh(index)?);
    Ok(stl_response(stl))
}

/// `GET /models/{handle}/composite/meshes/{index}/transform`
pub async fn composite_mesh_transform_handler(
    State(state): State<AppState>,
    Path((handle, index)): Path<(Handle, usize)>,
) -> Result<Json<Transform>, SessionError> {
    let model = state.session.model(handle).await?;
    let container = model.composite_container().await?;
    Ok(Json(container.composite_mesh_transform(index)?))
}

/// `GET /models/{handle}/algorithms/{name}`
pub async fn initialize_algorithm_handler(
    State(state): State<AppState>,
    Path((handle, name)): Path<(Handle, String)>,
) -> Result<Json<serde_json::Value>, SessionError> {
    let params = state.session.initialize_algorithm(handle, &name).await?;
    Ok(Json(params))
}

/// Start a batch algorithm run.
///
/// # Endpoint
///
/// `POST /models/{handle}/algorithms` with
/// `{"algorithms": [{"name": "fuse"}, {"name": "remove_scan", "params": {"index": 0}}]}`
///
/// Algorithms run in order, one per `next` call; the first failure ends the run.
pub async fn run_algorithms_handler(
    State(state): State<AppState>,
    Path(handle): Path<Handle>,
    Json(request): Json<RunAlgorithmsRequest>,
) -> Result<(StatusCode, Json<OperationCreatedResponse>), SessionError> {
    let operation = state
        .session
        .run_algorithms(handle, request.algorithms)
        .await?;
    Ok(park(&state, operation).await)
}

// =============================================================================
// Operations
// =============================================================================

async fn park(
    state: &AppState,
    operation: impl Into<crate::operation::AnyOperation>,
) -> (StatusCode, Json<OperationCreatedResponse>) {
    let operation = operation.into();
    let kind = operation.kind().to_string();
    let operation_id = state.operations.insert(operation).await;
    (
        StatusCode::CREATED,
        Json(OperationCreatedResponse { operation_id, kind }),
    )
}

/// `GET /operations`
pub async fn operations_handler(State(state): State<AppState>) -> Json<HandleListResponse> {
    Json(HandleListResponse {
        handles: state.operations.ids().await,
    })
}

/// Run one step of an operation.
///
/// # Endpoint
///
/// `POST /operations/{id}/next`
///
/// # Response
///
/// `200 OK` with `{"status": {...}, "done": bool}`. Once `done` is true the
/// next call returns `410 Gone` and drops the operation; later calls get `404`.
pub async fn operation_next_handler(
    State(state): State<AppState>,
    Path(id): Path<Handle>,
) -> Result<Json<Advance<OperationStatus>>, SessionError> {
    Ok(Json(state.operations.advance(id).await?))
}

/// `GET /operations/{id}`
pub async fn operation_state_handler(
    State(state): State<AppState>,
    Path(id): Path<Handle>,
) -> Result<Json<OperationStateResponse>, SessionError> {
    let operation_state = state.operations.state(id).await?;
    Ok(Json(OperationStateResponse {
        operation_id: id,
        state: operation_state,
    }))
}

/// `POST /operations/{id}/abort`
pub async fn operation_abort_handler(
    State(state): State<AppState>,
    Path(id): Path<Handle>,
) -> Result<Json<OperationStateResponse>, SessionError> {
    let operation_state = state.operations.cancel(id).await?;
    Ok(Json(OperationStateResponse {
        operation_id: id,
        state: operation_state,
    }))
}

/// `DELETE /operations/{id}`
pub async fn operation_delete_handler(
    State(state): State<AppState>,
    Path(id): Path<Handle>,
) -> Result<StatusCode, SessionError> {
    state.operations.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tests
// =============================================================================
