//! Simulated scanner for running the service without hardware.
//!
//! Each capture produces a depth grid of a smooth surface seen from a pose
//! that orbits the object, with a deterministic pattern of holes. The
//! reconstructor triangulates valid grid cells.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::{InterchangeMesh, Texture, Transform};

use super::{CaptureDevice, RawFrame, Reconstructor};

/// Default depth grid resolution (samples per side).
pub const DEFAULT_GRID_SIZE: u32 = 32;

/// Default sample spacing in millimetres.
const DEFAULT_SPACING: f32 = 1.0;

/// Synthetic capture device.
#[derive(Debug)]
pub struct SimulatedScanner {
    name: String,
    grid_size: u32,
    spacing: f32,
    sequence: AtomicU64,
}

impl SimulatedScanner {
    pub fn new() -> Self {
        Self::with_grid_size(DEFAULT_GRID_SIZE)
    }

    /// Create a scanner producing `grid_size` x `grid_size` depth frames.
    pub fn with_grid_size(grid_size: u32) -> Self {
        Self {
            name: "simulated scanner".to_string(),
            grid_size: grid_size.max(2),
            spacing: DEFAULT_SPACING,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn depth_at(&self, x: u32, y: u32, sequence: u64) -> f32 {
        let n = self.grid_size;
        // Holes along a diagonal band that shifts with every frame
        if (x + y + sequence as u32) % 17 == 0 {
            return f32::NAN;
        }
        let cx = (x as f32 / (n - 1) as f32) - 0.5;
        let cy = (y as f32 / (n - 1) as f32) - 0.5;
        100.0 - 20.0 * (-(cx * cx + cy * cy) * 8.0).exp()
    }

    fn texture(&self, sequence: u64) -> Texture {
        let n = self.grid_size;
        let mut rgb = Vec::with_capacity((n * n * 3) as usize);
        for y in 0..n {
            for x in 0..n {
                rgb.push((x * 255 / (n - 1)) as u8);
                rgb.push((y * 255 / (n - 1)) as u8);
                rgb.push((sequence % 256) as u8);
            }
        }
        Texture {
            width: n,
            height: n,
            rgb,
        }
    }
}

impl Default for SimulatedScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SimulatedScanner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn capture(&self, with_texture: bool) -> Result<RawFrame, EngineError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let n = self.grid_size;

        let depth = (0..n)
            .flat_map(|y| (0..n).map(move |x| (x, y)))
            .map(|(x, y)| self.depth_at(x, y, sequence))
            .collect();

        // Orbit the object in 15 degree steps around the vertical axis
        let angle = (sequence as f64) * 15f64.to_radians();
        let half = angle / 2.0;
        let pose = Transform {
            rotation: [half.cos(), 0.0, half.sin(), 0.0],
            translation: [0.0, 0.0, 0.0],
        };

        Ok(RawFrame {
            sequence,
            width: n,
            height: n,
            depth,
            texture: with_texture.then(|| self.texture(sequence)),
            pose,
        })
    }

    fn create_reconstructor(&self) -> Result<Box<dyn Reconstructor>, EngineError> {
        Ok(Box::new(SimulatedReconstructor::new(self.spacing)))
    }
}

/// Grid triangulation of simulated depth frames.
#[derive(Debug, Clone)]
pub struct SimulatedReconstructor {
    spacing: f32,
}

impl SimulatedReconstructor {
    pub fn new(spacing: f32) -> Self {
        Self { spacing }
    }
}

#[async_trait]
impl Reconstructor for SimulatedReconstructor {
    async fn reconstruct(&self, frame: &RawFrame) -> Result<InterchangeMesh, EngineError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if w < 2 || h < 2 || frame.depth.len() != w * h {
            return Err(EngineError::Reconstruction(format!(
                "frame {} has inconsistent depth grid ({}x{}, {} samples)",
                frame.sequence,
                w,
                h,
                frame.depth.len()
            )));
        }

        // Map grid samples to vertex indices, skipping holes
        let mut index = vec![None; w * h];
        let mut vertices = Vec::new();
        let mut texture_coords = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let z = frame.depth[y * w + x];
                if z.is_nan() {
                    continue;
                }
                index[y * w + x] = Some(vertices.len() as u32);
                vertices.push([x as f32 * self.spacing, y as f32 * self.spacing, z]);
                texture_coords.push([x as f32 / (w - 1) as f32, y as f32 / (h - 1) as f32]);
            }
        }

        let mut triangles = Vec::new();
        for y in 0..h - 1 {
            for x in 0..w - 1 {
                let corners = (
                    index[y * w + x],
                    index[y * w + x + 1],
                    index[(y + 1) * w + x],
                    index[(y + 1) * w + x + 1],
                );
                if let (Some(a), Some(b), Some(c), Some(d)) = corners {
                    triangles.push([a, b, d]);
                    triangles.push([a, d, c]);
                }
            }
        }

        let normals = vertex_normals(&vertices, &triangles);

        let (texture_coords, texture) = match &frame.texture {
            Some(t) => (texture_coords, Some(t.clone())),
            None => (Vec::new(), None),
        };

        Ok(InterchangeMesh {
            vertices,
            normals,
            triangles,
            texture_coords,
            texture,
        })
    }
}

/// Area-weighted vertex normals.
fn vertex_normals(vertices: &[[f32; 3]], triangles: &[[u32; 3]]) -> Vec<[f32; 3]> {
    let mut normals = vec![[0.0f32; 3]; vertices.len()];
    for t in triangles {
        let [a, b, c] = [
            vertices[t[0] as usize],
            vertices[t[1] as usize],
            vertices[t[2] as usize],
        ];
        let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let n = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        for &i in t {
            let acc = &mut normals[i as usize];
            acc[0] += n[0];
            acc[1] += n[1];
            acc[2] += n[2];
        }
    }
    for n in &mut normals {
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if len > f32::EPSILON {
            n.iter_mut().for_each(|c| *c /= len);
        }
    }
    normals
}
