//! Model data and read accessors.
//!
//! A [`Model`] is the engine-side container produced by a capture procedure or
//! a project load: an ordered list of [`Scan`]s plus an optional
//! [`CompositeContainer`]. [`ModelSession`] wraps one model for the handle
//! registry and exposes index-checked read projections over it.
//!
//! Scans and composite containers have no lifecycle of their own; views are
//! lock guards borrowed from the owning session.

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SessionError;

// =============================================================================
// Geometry
// =============================================================================

/// Rigid pose: unit quaternion `[w, x, y, z]` plus translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0],
            translation: [0.0, 0.0, 0.0],
        }
    }

    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0],
            translation,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Texture image attached to a textured mesh (packed RGB8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Triangle mesh as produced by the reconstruction engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterchangeMesh {
    pub vertices: Vec<[f32; 3]>,
    #[serde(default)]
    pub normals: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    #[serde(default)]
    pub texture_coords: Vec<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<Texture>,
}

impl InterchangeMesh {
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

// =============================================================================
// Scan / CompositeContainer
// =============================================================================

/// One captured frame inside a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFrame {
    pub mesh: InterchangeMesh,
    pub transform: Transform,
}

/// Ordered frame meshes captured under one scan pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub transform: Transform,
    pub frames: Vec<ScanFrame>,
}

impl Scan {
    pub fn scan_transform(&self) -> Transform {
        self.transform
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_mesh(&self, index: usize) -> Result<&InterchangeMesh, SessionError> {
        self.frame(index).map(|f| &f.mesh)
    }

    pub fn frame_transform(&self, index: usize) -> Result<Transform, SessionError> {
        self.frame(index).map(|f| f.transform)
    }

    fn frame(&self, index: usize) -> Result<&ScanFrame, SessionError> {
        self.frames.get(index).ok_or(SessionError::InvalidIndex {
            what: "scan frame",
            index,
            count: self.frames.len(),
        })
    }
}

/// Mesh inside a composite container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMesh {
    pub mesh: InterchangeMesh,
    pub transform: Transform,
}

/// Fused meshes derived from a model's scans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeContainer {
    pub transform: Transform,
    pub meshes: Vec<CompositeMesh>,
}

impl CompositeContainer {
    pub fn container_transform(&self) -> Transform {
        self.transform
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn composite_mesh(&self, index: usize) -> Result<&InterchangeMesh, SessionError> {
        self.entry(index).map(|m| &m.mesh)
    }

    pub fn composite_mesh_transform(&self, index: usize) -> Result<Transform, SessionError> {
        self.entry(index).map(|m| m.transform)
    }

    fn entry(&self, index: usize) -> Result<&CompositeMesh, SessionError> {
        self.meshes.get(index).ok_or(SessionError::InvalidIndex {
            what: "composite mesh",
            index,
            count: self.meshes.len(),
        })
    }
}

/// Engine-side model: scans plus an optional composite container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub scans: Vec<Scan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeContainer>,
}

// =============================================================================
// ModelSession
// =============================================================================

/// A loaded or created model registered in the session.
///
/// Reads go through a shared lock; only the algorithm engine takes the write
/// side (see [`crate::operation::RunAlgorithms`]).
#[derive(Debug)]
pub struct ModelSession {
    model: RwLock<Model>,
}

impl ModelSession {
    pub fn new(model: Model) -> Self {
        Self {
            model: RwLock::new(model),
        }
    }

    pub async fn scan_count(&self) -> usize {
        self.model.read().await.scans.len()
    }

    /// Borrow scan `index`, failing with `InvalidIndex` outside `[0, count)`.
    pub async fn scan(&self, index: usize) -> Result<RwLockReadGuard<'_, Scan>, SessionError> {
        let guard = self.model.read().await;
        let count = guard.scans.len();
        RwLockReadGuard::try_map(guard, |m| m.scans.get(index)).map_err(|_| {
            SessionError::InvalidIndex {
                what: "scan",
                index,
                count,
            }
        })
    }

    pub async fn has_composite_container(&self) -> bool {
        self.model.read().await.composite.is_some()
    }

    /// Borrow the composite container, failing with `InvalidState` if absent.
    pub async fn composite_container(
        &self,
    ) -> Result<RwLockReadGuard<'_, CompositeContainer>, SessionError> {
        let guard = self.model.read().await;
        RwLockReadGuard::try_map(guard, |m| m.composite.as_ref())
            .map_err(|_| SessionError::InvalidState("model has no composite container".into()))
    }

    /// Shared view of the whole model (used by project save).
    pub async fn read(&self) -> RwLockReadGuard<'_, Model> {
        self.model.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Model> {
        self.model.write().await
    }
}

// =============================================================================
// Tests
// =============================================================================
