//! # scan-relay
//!
//! Remote session service for 3D scanners.
//!
//! Clients trigger captures, defer and cache mesh reconstruction, load and
//! save scan projects, and drive long-running operations (guided scanning,
//! algorithm batches, batch reconstruction) one step at a time over HTTP.
//!
//! ## Architecture
//!
//! - [`registry`] - Handle allocation and per-kind handle tables
//! - [`capture`] - Deferred captures and their cached artifacts
//! - [`model`] - Models, scans, composite containers and read accessors
//! - [`session`] - The [`ScannerSession`] façade
//! - [`operation`] - Step-driven operation state machines
//! - [`engine`] - Capture device, reconstruction, codec, persistence and
//!   algorithm interfaces, with bundled implementations
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scan_relay::engine::{BuiltinAlgorithms, FileProjectStore, SimulatedScanner, StandardMeshCodec};
//! use scan_relay::{ScannerSession, SessionEngines};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scan_relay::SessionError> {
//!     let engines = SessionEngines {
//!         codec: Arc::new(StandardMeshCodec::new()),
//!         store: Arc::new(FileProjectStore::new()),
//!         algorithms: Arc::new(BuiltinAlgorithms::new()),
//!     };
//!     let session = ScannerSession::new(Some(Arc::new(SimulatedScanner::new())), engines)?;
//!
//!     let handle = session.capture_deferred(false).await?;
//!     let mesh = session.get_deferred_capture_mesh(handle).await?;
//!     println!("{} triangles", mesh.triangles.len());
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod operation;
pub mod registry;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use capture::{ArtifactKind, DeferredCapture};
pub use config::{Config, DeviceKind};
pub use engine::{
    AlgorithmDescriptor, AlgorithmEngine, CaptureDevice, ExchangeMesh, MeshCodec, ProjectStore,
    RawFrame, Reconstructor,
};
pub use error::{EngineError, SessionError};
pub use model::{
    CompositeContainer, CompositeMesh, InterchangeMesh, Model, ModelSession, Scan, ScanFrame,
    Texture, Transform,
};
pub use operation::{
    Advance, AnyOperation, DeferredCapturePrepare, Operation, OperationState, OperationStatus,
    RunAlgorithms, ScanningProcedure, ScanningProcedureSettings,
};
pub use registry::{Handle, HandleAllocator, HandleTable, SessionState};
pub use server::{create_router, AppState, OperationTable, RouterConfig};
pub use session::{
    validate_project_name, ScannerSession, SessionEngines, TeardownFailure, TeardownReport,
};
