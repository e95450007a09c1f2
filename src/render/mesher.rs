//! Face-culling chunk mesher
//!
//! Every non-air cell is visited in raster order (x fastest, then y, then z).
//! For each of the six axis directions a quad is emitted when the cell on the
//! other side lets the face show: air, a transparent block of another type,
//! outside the world column, or inside a neighbour chunk that is not loaded.
//! All quads of a chunk share one vertex and one index buffer.

use std::sync::Arc;

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use super::mesh::{ChunkMesh, Vertex};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::block::BlockCell;
use crate::voxel::chunk::{Chunk, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH};
use crate::voxel::registry::BlockRegistry;

/// Vertices needed for a completely solid checkerboard chunk
pub const MAX_CHUNK_VERTICES: usize = CHUNK_VOLUME * 6 * 4;

/// Mesher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MesherConfig {
    /// Upper bound on vertices in one chunk mesh
    pub vertex_budget: usize,
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            vertex_budget: MAX_CHUNK_VERTICES,
        }
    }
}

/// What to do when a chunk needs more vertices than the budget allows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeshPolicy {
    /// Fail the build with [`Error::MeshOverflow`]
    #[default]
    Strict,
    /// Keep every whole quad that fits, flag the mesh and warn
    Truncate,
}

/// Axis directions in emission order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::PosX,
        Face::NegX,
        Face::PosY,
        Face::NegY,
        Face::PosZ,
        Face::NegZ,
    ];

    pub fn offset(self) -> IVec3 {
        match self {
            Face::PosX => IVec3::X,
            Face::NegX => IVec3::NEG_X,
            Face::PosY => IVec3::Y,
            Face::NegY => IVec3::NEG_Y,
            Face::PosZ => IVec3::Z,
            Face::NegZ => IVec3::NEG_Z,
        }
    }

    pub fn normal(self) -> Vec3 {
        self.offset().as_vec3()
    }

    /// Unit-cube corners, counter-clockwise seen from outside
    pub fn corners(self) -> [[f32; 3]; 4] {
        match self {
            Face::PosX => [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]],
            Face::NegX => [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
            Face::PosY => [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]],
            Face::NegY => [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
            Face::PosZ => [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
            Face::NegZ => [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// The six axis-adjacent chunks, indexed in [`Face`] order
#[derive(Clone, Copy, Default)]
pub struct ChunkNeighborhood<'a> {
    pub chunks: [Option<&'a Chunk>; 6],
}

impl<'a> ChunkNeighborhood<'a> {
    /// No neighbours loaded
    pub fn empty() -> Self {
        Self { chunks: [None; 6] }
    }

    pub fn get(&self, face: Face) -> Option<&'a Chunk> {
        self.chunks[face.index()]
    }

    pub fn set(&mut self, face: Face, chunk: Option<&'a Chunk>) {
        self.chunks[face.index()] = chunk;
    }
}

/// What lies across a face
enum Across {
    Cell(BlockCell),
    /// Above or below the world column
    OutsideWorld,
    /// Neighbour chunk not loaded
    Unloaded,
}

/// Builds [`ChunkMesh`]es from block data
pub struct Mesher {
    registry: Arc<BlockRegistry>,
    vertex_budget: usize,
}

impl Mesher {
    pub fn new(registry: Arc<BlockRegistry>, vertex_budget: usize) -> Self {
        // Indices are u32
        let vertex_budget = vertex_budget.min(u32::MAX as usize);
        Self {
            registry,
            vertex_budget,
        }
    }

    pub fn from_config(registry: Arc<BlockRegistry>, config: &MesherConfig) -> Self {
        Self::new(registry, config.vertex_budget)
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn vertex_budget(&self) -> usize {
        self.vertex_budget
    }

    fn across(chunk: &Chunk, neighbors: &ChunkNeighborhood<'_>, x: i32, y: i32, z: i32, face: Face) -> Across {
        let d = face.offset();
        let (nx, ny, nz) = (x + d.x, y + d.y, z + d.z);
        if let Some(cell) = chunk.get_checked(nx, ny, nz) {
            return Across::Cell(cell);
        }
        if !(0..CHUNK_HEIGHT as i32).contains(&ny) {
            return Across::OutsideWorld;
        }
        match neighbors.get(face) {
            Some(other) => {
                let lx = nx.rem_euclid(CHUNK_WIDTH as i32) as usize;
                let lz = nz.rem_euclid(CHUNK_DEPTH as i32) as usize;
                Across::Cell(other.get(lx, ny as usize, lz))
            }
            None => Across::Unloaded,
        }
    }

    fn is_face_visible(&self, chunk: &Chunk, neighbors: &ChunkNeighborhood<'_>, x: i32, y: i32, z: i32, face: Face) -> bool {
        let block = self.registry.resolve_type(chunk.get(x as usize, y as usize, z as usize));
        match Self::across(chunk, neighbors, x, y, z, face) {
            Across::Cell(cell) => self.registry.face_visible(block, cell),
            Across::OutsideWorld | Across::Unloaded => true,
        }
    }

    /// Visit every visible face in emission order
    fn for_each_face(
        &self,
        chunk: &Chunk,
        neighbors: &ChunkNeighborhood<'_>,
        mut f: impl FnMut(usize, usize, usize, Face, BlockCell) -> bool,
    ) {
        if chunk.is_empty() {
            return;
        }
        for z in 0..CHUNK_DEPTH {
            for y in 0..CHUNK_HEIGHT {
                for x in 0..CHUNK_WIDTH {
                    let cell = chunk.get(x, y, z);
                    if self.registry.resolve_type(cell).is_air() {
                        continue;
                    }
                    for face in Face::ALL {
                        if self.is_face_visible(chunk, neighbors, x as i32, y as i32, z as i32, face)
                            && !f(x, y, z, face, cell)
                        {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Number of faces a full build would emit
    pub fn count_visible_faces(&self, chunk: &Chunk, neighbors: &ChunkNeighborhood<'_>) -> usize {
        let mut count = 0;
        self.for_each_face(chunk, neighbors, |_, _, _, _, _| {
            count += 1;
            true
        });
        count
    }

    /// Build a fresh mesh
    pub fn build(&self, chunk: &Chunk, neighbors: &ChunkNeighborhood<'_>, policy: MeshPolicy) -> Result<ChunkMesh> {
        let mut mesh = ChunkMesh::new();
        self.build_into(chunk, neighbors, policy, &mut mesh)?;
        Ok(mesh)
    }

    /// Build into `mesh`, reusing its allocations.
    ///
    /// On error `mesh` is left cleared.
    pub fn build_into(
        &self,
        chunk: &Chunk,
        neighbors: &ChunkNeighborhood<'_>,
        policy: MeshPolicy,
        mesh: &mut ChunkMesh,
    ) -> Result<()> {
        mesh.clear();
        let origin = chunk.coord.world_origin();
        let budget = self.vertex_budget;
        let mut overflow = false;

        self.for_each_face(chunk, neighbors, |x, y, z, face, cell| {
            if mesh.vertices.len() + 4 > budget {
                overflow = true;
                return false;
            }
            let base = mesh.vertices.len() as u32;
            let block_pos = origin + Vec3::new(x as f32, y as f32, z as f32);
            let normal = face.normal().to_array();
            let color = self.registry.resolve(cell).color;
            for (corner, uv) in face.corners().iter().zip(QUAD_UVS) {
                mesh.vertices.push(Vertex {
                    position: (block_pos + Vec3::from_array(*corner)).to_array(),
                    normal,
                    uv,
                    color,
                });
            }
            mesh.indices.extend(QUAD_INDICES.iter().map(|i| base + i));
            true
        });

        if overflow {
            match policy {
                MeshPolicy::Strict => {
                    mesh.clear();
                    let vertices = self.count_visible_faces(chunk, neighbors) * 4;
                    return Err(Error::MeshOverflow {
                        coord: chunk.coord,
                        vertices,
                        budget,
                    });
                }
                MeshPolicy::Truncate => {
                    mesh.truncated = true;
                    log::warn!(
                        "Chunk {:?} mesh truncated at {} vertices (budget {})",
                        chunk.coord,
                        mesh.vertices.len(),
                        budget
                    );
                }
            }
        }

        log::trace!(
            "Meshed chunk {:?}: {} faces, {} vertices",
            chunk.coord,
            mesh.face_count(),
            mesh.vertex_count()
        );
        Ok(())
    }
}
