//! Deferred captures and their artifact cache.
//!
//! Capturing is device-bound and must happen promptly; reconstruction is
//! CPU-bound and can wait. A [`DeferredCapture`] keeps the raw frame and
//! memoises each derived artifact kind independently:
//!
//! - [`ArtifactKind::Mesh`]: exchange mesh
//! - [`ArtifactKind::Stl`]: binary STL bytes
//!
//! A populated slot is never invalidated for the lifetime of the capture, so
//! each artifact kind costs at most one reconstruction in the sequential case.
//! Two concurrent requests for the same uncached artifact can both reconstruct
//! (the session publishes results last-write-wins); the result is deterministic
//! per frame, so only work is wasted.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::engine::{ExchangeMesh, RawFrame};

/// Derived artifact kinds cached per capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Mesh,
    Stl,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Mesh => write!(f, "mesh"),
            ArtifactKind::Stl => write!(f, "stl"),
        }
    }
}

/// A captured frame awaiting reconstruction.
#[derive(Debug)]
pub struct DeferredCapture {
    frame: Arc<RawFrame>,
    mesh: Option<Arc<ExchangeMesh>>,
    stl: Option<Bytes>,
}

impl DeferredCapture {
    pub fn new(frame: RawFrame) -> Self {
        Self {
            frame: Arc::new(frame),
            mesh: None,
            stl: None,
        }
    }

    /// Shared handle to the raw frame, for reconstruction outside the lock.
    pub fn frame(&self) -> Arc<RawFrame> {
        Arc::clone(&self.frame)
    }

    pub fn cached_mesh(&self) -> Option<Arc<ExchangeMesh>> {
        self.mesh.clone()
    }

    pub fn cached_stl(&self) -> Option<Bytes> {
        self.stl.clone()
    }

    pub fn store_mesh(&mut self, mesh: Arc<ExchangeMesh>) {
        self.mesh = Some(mesh);
    }

    pub fn store_stl(&mut self, stl: Bytes) {
        self.stl = Some(stl);
    }

    pub fn is_prepared(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Mesh => self.mesh.is_some(),
            ArtifactKind::Stl => self.stl.is_some(),
        }
    }
}
