//! Interfaces to the external scanning engine.
//!
//! The session core never touches hardware, reconstruction, mesh formats or
//! project files directly. It consumes them through the traits below.
//!
//! ```text
//! ScannerSession
//!   ├── CaptureDevice ── Reconstructor
//!   ├── MeshCodec
//!   ├── ProjectStore
//!   └── AlgorithmEngine
//! ```
//!
//! Bundled implementations:
//! - [`SimulatedScanner`]: synthetic depth frames, for running without hardware
//! - [`StandardMeshCodec`]: exchange mesh projection and binary STL
//! - [`FileProjectStore`]: JSON project files under the save directory
//! - [`BuiltinAlgorithms`]: small algorithm catalogue over [`Model`]

mod algorithms;
mod codec;
mod file_store;
mod simulated;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{InterchangeMesh, Model, Texture, Transform};

pub use algorithms::BuiltinAlgorithms;
pub use codec::{ExchangeMesh, MeshTriangle, Point3, StandardMeshCodec};
pub use file_store::{FileProjectStore, PROJECT_FILE_EXTENSION};
pub use simulated::{SimulatedReconstructor, SimulatedScanner};

// =============================================================================
// Capture
// =============================================================================

/// One raw frame as delivered by the capture device, not yet reconstructed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Device-assigned sequence number
    pub sequence: u64,
    /// Depth grid width in samples
    pub width: u32,
    /// Depth grid height in samples
    pub height: u32,
    /// Row-major depth samples; NaN marks a hole
    pub depth: Vec<f32>,
    /// Colour image when captured with texture
    pub texture: Option<Texture>,
    /// Sensor pose at capture time
    pub pose: Transform,
}

/// The physical scanner.
///
/// At most one capture may be in flight per device; callers serialise.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Grab one frame.
    async fn capture(&self, with_texture: bool) -> Result<RawFrame, EngineError>;

    /// Create an independent reconstruction context.
    fn create_reconstructor(&self) -> Result<Box<dyn Reconstructor>, EngineError>;
}

/// Frame to mesh reconstruction context.
#[async_trait]
pub trait Reconstructor: Send + Sync {
    async fn reconstruct(&self, frame: &RawFrame) -> Result<InterchangeMesh, EngineError>;
}

// =============================================================================
// Mesh Codec
// =============================================================================

/// Converts reconstructed meshes into client-facing formats.
pub trait MeshCodec: Send + Sync {
    fn to_exchange_format(&self, mesh: &InterchangeMesh) -> ExchangeMesh;

    fn to_stl_bytes(&self, mesh: &InterchangeMesh) -> Bytes;
}

// =============================================================================
// Persistence
// =============================================================================

/// Identifier of one stored entry (scan) within a project.
pub type EntryId = Uuid;

/// An opened or newly created project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Project file path
    pub path: PathBuf,
    /// Unique project identity
    pub id: Uuid,
}

/// Project persistence engine.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn open_project(&self, path: &Path) -> Result<Project, EngineError>;

    async fn list_entries(&self, project: &Project) -> Result<Vec<EntryId>, EngineError>;

    /// Load the given entries into a fresh model.
    async fn load(&self, project: &Project, entries: &[EntryId]) -> Result<Model, EngineError>;

    async fn create_project(&self, path: &Path, project_id: Uuid) -> Result<Project, EngineError>;

    async fn save(&self, project: &Project, model: &Model) -> Result<(), EngineError>;
}

// =============================================================================
// Algorithms
// =============================================================================

/// A named algorithm plus its parameter block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl AlgorithmDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Engine that runs processing algorithms against models and owns their
/// native resources.
#[async_trait]
pub trait AlgorithmEngine: Send + Sync {
    /// Default parameter block for `algorithm` applied to `model`.
    fn initialize(&self, algorithm: &str, model: &Model) -> Result<serde_json::Value, EngineError>;

    /// Run one algorithm, mutating the model in place.
    async fn run(&self, model: &mut Model, algorithm: &AlgorithmDescriptor)
        -> Result<(), EngineError>;

    /// Release engine-side resources held for a model being freed.
    async fn release_model(&self, _model: &Model) -> Result<(), EngineError> {
        Ok(())
    }
}
