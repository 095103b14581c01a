//! Mesh conversion to client-facing formats.
//!
//! - Exchange mesh: the structured JSON mesh returned by capture and model
//!   accessors (points, triangles, normals, texture data).
//! - Binary STL: 80-byte header, triangle count, then 50 bytes per triangle
//!   (facet normal, three vertices, attribute word), all little-endian.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::model::{InterchangeMesh, Texture};

use super::MeshCodec;

/// STL header prefix written into the 80-byte header block.
const STL_HEADER: &[u8] = b"scan-relay binary STL";

/// Size of the fixed STL header.
const STL_HEADER_LEN: usize = 80;

/// Size of one STL facet record.
const STL_FACET_LEN: usize = 50;

// =============================================================================
// Exchange Mesh
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<[f32; 3]> for Point3 {
    fn from(p: [f32; 3]) -> Self {
        Self {
            x: p[0],
            y: p[1],
            z: p[2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub v1: u32,
    pub v2: u32,
    pub v3: u32,
}

/// Mesh in the structured format handed to remote clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeMesh {
    pub vertices: Vec<Point3>,
    pub triangles: Vec<MeshTriangle>,
    pub normals: Vec<Point3>,
    pub texture_coordinates: Vec<[f32; 2]>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub textures: Vec<Texture>,
}

// =============================================================================
// StandardMeshCodec
// =============================================================================

/// Default codec: structured exchange mesh plus binary STL.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMeshCodec;

impl StandardMeshCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MeshCodec for StandardMeshCodec {
    fn to_exchange_format(&self, mesh: &InterchangeMesh) -> ExchangeMesh {
        ExchangeMesh {
            vertices: mesh.vertices.iter().copied().map(Point3::from).collect(),
            triangles: mesh
                .triangles
                .iter()
                .map(|t| MeshTriangle {
                    v1: t[0],
                    v2: t[1],
                    v3: t[2],
                })
                .collect(),
            normals: mesh.normals.iter().copied().map(Point3::from).collect(),
            texture_coordinates: mesh.texture_coords.clone(),
            textures: mesh.texture.iter().cloned().collect(),
        }
    }

    fn to_stl_bytes(&self, mesh: &InterchangeMesh) -> Bytes {
        // Triangles referencing missing vertices are dropped
        let facets: Vec<[[f32; 3]; 3]> = mesh
            .triangles
            .iter()
            .filter_map(|t| {
                Some([
                    *mesh.vertices.get(t[0] as usize)?,
                    *mesh.vertices.get(t[1] as usize)?,
                    *mesh.vertices.get(t[2] as usize)?,
                ])
            })
            .collect();

        let mut buf = BytesMut::with_capacity(STL_HEADER_LEN + 4 + facets.len() * STL_FACET_LEN);

        let mut header = [0u8; STL_HEADER_LEN];
        header[..STL_HEADER.len()].copy_from_slice(STL_HEADER);
        buf.put_slice(&header);
        buf.put_u32_le(facets.len() as u32);

        for [a, b, c] in &facets {
            for component in facet_normal(a, b, c) {
                buf.put_f32_le(component);
            }
            for vertex in [a, b, c] {
                for component in vertex {
                    buf.put_f32_le(*component);
                }
            }
            buf.put_u16_le(0);
        }

        buf.freeze()
    }
}

/// Unit normal of a triangle (zero vector for degenerate triangles).
fn facet_normal(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> [f32; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > f32::EPSILON {
        [n[0] / len, n[1] / len, n[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}

// =============================================================================
// Tests
// =============================================================================
