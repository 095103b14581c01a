//! Built-in algorithm catalogue.
//!
//! | name                  | params                 | effect                                  |
//! |-----------------------|------------------------|-----------------------------------------|
//! | `remove_empty_frames` | `{"min_triangles": n}` | drop frames with fewer than n triangles |
//! | `remove_scan`         | `{"index": i}`         | drop scan `i`                           |
//! | `fuse`                | `{}`                   | one composite mesh per scan             |
//! | `clear_composite`     | `{}`                   | drop the composite container            |

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::EngineError;
use crate::model::{CompositeContainer, CompositeMesh, InterchangeMesh, Model, Transform};

use super::{AlgorithmDescriptor, AlgorithmEngine};

pub const REMOVE_EMPTY_FRAMES: &str = "remove_empty_frames";
pub const REMOVE_SCAN: &str = "remove_scan";
pub const FUSE: &str = "fuse";
pub const CLEAR_COMPOSITE: &str = "clear_composite";

/// Algorithm engine over the in-memory [`Model`].
#[derive(Debug, Clone, Default)]
pub struct BuiltinAlgorithms;

impl BuiltinAlgorithms {
    pub fn new() -> Self {
        Self
    }

    /// Names of all supported algorithms.
    pub fn names() -> &'static [&'static str] {
        &[REMOVE_EMPTY_FRAMES, REMOVE_SCAN, FUSE, CLEAR_COMPOSITE]
    }
}

#[async_trait]
impl AlgorithmEngine for BuiltinAlgorithms {
    fn initialize(&self, algorithm: &str, _model: &Model) -> Result<serde_json::Value, EngineError> {
        match algorithm {
            REMOVE_EMPTY_FRAMES => Ok(json!({ "min_triangles": 1 })),
            REMOVE_SCAN => Ok(json!({ "index": 0 })),
            FUSE | CLEAR_COMPOSITE => Ok(json!({})),
            other => Err(EngineError::UnknownAlgorithm(other.to_string())),
        }
    }

    async fn run(
        &self,
        model: &mut Model,
        algorithm: &AlgorithmDescriptor,
    ) -> Result<(), EngineError> {
        let failed = |message: String| EngineError::Algorithm {
            name: algorithm.name.clone(),
            message,
        };

        match algorithm.name.as_str() {
            REMOVE_EMPTY_FRAMES => {
                let min = algorithm
                    .params
                    .get("min_triangles")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as usize;
                for scan in &mut model.scans {
                    scan.frames.retain(|f| f.mesh.triangle_count() >= min);
                }
            }
            REMOVE_SCAN => {
                let index = algorithm
                    .params
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| failed("missing parameter 'index'".to_string()))?
                    as usize;
                if index >= model.scans.len() {
                    return Err(failed(format!(
                        "scan index {} out of range (model has {} scans)",
                        index,
                        model.scans.len()
                    )));
                }
                model.scans.remove(index);
            }
            FUSE => {
                if model.scans.is_empty() {
                    return Err(failed("model has no scans to fuse".to_string()));
                }
                let meshes = model
                    .scans
                    .iter()
                    .map(|scan| CompositeMesh {
                        mesh: concatenate(scan.frames.iter().map(|f| &f.mesh)),
                        transform: scan.transform,
                    })
                    .collect();
                model.composite = Some(CompositeContainer {
                    transform: Transform::identity(),
                    meshes,
                });
            }
            CLEAR_COMPOSITE => {
                model.composite = None;
            }
            other => return Err(EngineError::UnknownAlgorithm(other.to_string())),
        }

        debug!("Algorithm {} applied", algorithm.name);
        Ok(())
    }
}

/// Merge meshes into one, re-indexing triangles. Textures are not carried over.
fn concatenate<'a>(meshes: impl Iterator<Item = &'a InterchangeMesh>) -> InterchangeMesh {
    let mut out = InterchangeMesh::default();
    for mesh in meshes {
        let offset = out.vertices.len() as u32;
        out.vertices.extend_from_slice(&mesh.vertices);
        if mesh.normals.len() == mesh.vertices.len() {
            out.normals.extend_from_slice(&mesh.normals);
        } else {
            out.normals
                .extend(std::iter::repeat([0.0, 0.0, 0.0]).take(mesh.vertices.len()));
        }
        out.triangles.extend(
            mesh.triangles
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
    }
    out
}
