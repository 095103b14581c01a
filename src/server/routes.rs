//! Router configuration for the scanner session API.
//!
//! # Route Structure
//!
//! ```text
//! /health                                              - Health check
//! /session                                             - Session summary
//! /session/save-path                                   - Set/clear project save path
//! /session/free-all                                    - Best-effort teardown
//! /capture, /capture/stl                               - Immediate capture
//! /deferred-captures[/{handle}/mesh|stl]               - Deferred capture cache
//! /deferred-captures/free|prepare|prepare-stl          - Batch calls
//! /scanning-procedure                                  - Guided scan operation
//! /models[/load|/{handle}[/save]]                      - Model lifecycle
//! /models/{handle}/scans/{i}/frames/{j}/mesh|stl|transform
//! /models/{handle}/composite/meshes/{j}/mesh|stl|transform
//! /models/{handle}/algorithms[/{name}]                 - Algorithms
//! /operations/{id}[/next|/abort]                       - Operation protocol
//! ```
//!
//! # Example
//!
//! ```ignore
//! use scan_relay::server::{create_router, RouterConfig};
//!
//! let router = create_router(session, RouterConfig::new());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3100").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::session::ScannerSession;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// By default CORS allows any origin and tracing is enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around a session.
pub fn create_router(session: Arc<ScannerSession>, config: RouterConfig) -> Router {
    create_router_with_state(AppState::new(session), config)
}

/// Create the router over existing state (shared operation table, tests).
pub fn create_router_with_state(app_state: AppState, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .merge(session_routes())
        .merge(capture_routes())
        .merge(model_routes())
        .merge(operation_routes())
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(session_handler))
        .route("/session/save-path", put(set_save_path_handler))
        .route("/session/free-all", post(free_all_handler))
}

fn capture_routes() -> Router<AppState> {
    Router::new()
        .route("/capture", post(capture_handler))
        .route("/capture/stl", post(capture_stl_handler))
        .route(
            "/deferred-captures",
            get(deferred_captures_handler).post(capture_deferred_handler),
        )
        .route(
            "/deferred-captures/{handle}/mesh",
            get(deferred_capture_mesh_handler),
        )
        .route(
            "/deferred-captures/{handle}/stl",
            get(deferred_capture_stl_handler),
        )
        .route("/deferred-captures/free", post(deferred_capture_free_handler))
        .route(
            "/deferred-captures/prepare",
            post(deferred_capture_prepare_handler),
        )
        .route(
            "/deferred-captures/prepare-stl",
            post(deferred_capture_prepare_stl_handler),
        )
        .route("/scanning-procedure", post(scanning_procedure_handler))
}

fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/models", get(models_handler))
        .route("/models/load", post(model_load_handler))
        .route(
            "/models/{handle}",
            get(model_handler).delete(model_free_handler),
        )
        .route("/models/{handle}/save", post(model_save_handler))
        .route("/models/{handle}/scans/{index}", get(scan_handler))
        .route(
            "/models/{handle}/scans/{index}/frames/{frame}/mesh",
            get(frame_mesh_handler),
        )
        .route(
            "/models/{handle}/scans/{index}/frames/{frame}/stl",
            get(frame_mesh_stl_handler),
        )
        .route(
            "/models/{handle}/scans/{index}/frames/{frame}/transform",
            get(frame_transform_handler),
        )
        .route("/models/{handle}/composite", get(composite_handler))
        .route(
            "/models/{handle}/composite/meshes/{index}/mesh",
            get(composite_mesh_handler),
        )
        .route(
            "/models/{handle}/composite/meshes/{index}/stl",
            get(composite_mesh_stl_handler),
        )
        .route(
            "/models/{handle}/composite/meshes/{index}/transform",
            get(composite_mesh_transform_handler),
        )
        .route("/models/{handle}/algorithms", post(run_algorithms_handler))
        .route(
            "/models/{handle}/algorithms/{name}",
            get(initialize_algorithm_handler),
        )
}

fn operation_routes() -> Router<AppState> {
    Router::new()
        .route("/operations", get(operations_handler))
        .route(
            "/operations/{id}",
            get(operation_state_handler).delete(operation_delete_handler),
        )
        .route("/operations/{id}/next", post(operation_next_handler))
        .route("/operations/{id}/abort", post(operation_abort_handler))
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
