//! Chunk system: fixed-size block columns and their lifecycle

use std::sync::Arc;

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::render::mesh::ChunkMesh;
use super::block::BlockCell;

/// Chunk extent along X in blocks
pub const CHUNK_WIDTH: usize = 16;
/// Chunk extent along Y in blocks (the whole world column)
pub const CHUNK_HEIGHT: usize = 256;
/// Chunk extent along Z in blocks
pub const CHUNK_DEPTH: usize = 16;
/// Cells in one chunk
pub const CHUNK_VOLUME: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_DEPTH;

/// Horizontal edge length used for world <-> chunk conversion
pub const CHUNK_EDGE: i32 = CHUNK_WIDTH as i32;

/// Largest horizontal chunk coordinate magnitude; block origins stay within
/// half the i32 range
pub const MAX_CHUNK_XZ: i32 = i32::MAX / CHUNK_EDGE / 2;
/// Largest vertical chunk coordinate magnitude
pub const MAX_CHUNK_Y: i32 = i32::MAX / CHUNK_HEIGHT as i32 / 2;

/// Integer coordinate identifying a chunk in the world grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Convert world position to chunk coordinate
    ///
    /// Positions past the addressable world are pinned to its edge chunk.
    pub fn from_world_pos(pos: Vec3) -> Self {
        let axis = |v: f32, edge: usize, limit: i32| ((v / edge as f32).floor() as i32).clamp(-limit, limit);
        Self {
            x: axis(pos.x, CHUNK_WIDTH, MAX_CHUNK_XZ),
            y: axis(pos.y, CHUNK_HEIGHT, MAX_CHUNK_Y),
            z: axis(pos.z, CHUNK_DEPTH, MAX_CHUNK_XZ),
        }
    }

    /// Chunk containing an integer block position
    pub fn from_block_pos(pos: IVec3) -> Self {
        Self {
            x: pos.x.div_euclid(CHUNK_WIDTH as i32),
            y: pos.y.div_euclid(CHUNK_HEIGHT as i32),
            z: pos.z.div_euclid(CHUNK_DEPTH as i32),
        }
    }

    /// Position of a block inside its chunk
    pub fn local_pos(pos: IVec3) -> (usize, usize, usize) {
        (
            pos.x.rem_euclid(CHUNK_WIDTH as i32) as usize,
            pos.y.rem_euclid(CHUNK_HEIGHT as i32) as usize,
            pos.z.rem_euclid(CHUNK_DEPTH as i32) as usize,
        )
    }

    /// Integer block position of the chunk's minimum corner
    pub fn block_origin(&self) -> IVec3 {
        IVec3::new(
            self.x * CHUNK_WIDTH as i32,
            self.y * CHUNK_HEIGHT as i32,
            self.z * CHUNK_DEPTH as i32,
        )
    }

    /// Get the world-space origin (minimum corner) of this chunk
    pub fn world_origin(&self) -> Vec3 {
        self.block_origin().as_vec3()
    }

    /// World-space bounds of the chunk volume
    pub fn world_bounds(&self) -> Aabb {
        let origin = self.world_origin();
        Aabb::new(
            origin,
            origin + Vec3::new(CHUNK_WIDTH as f32, CHUNK_HEIGHT as f32, CHUNK_DEPTH as f32),
        )
    }

    pub fn offset(&self, d: IVec3) -> Self {
        Self::new(
            self.x.saturating_add(d.x),
            self.y.saturating_add(d.y),
            self.z.saturating_add(d.z),
        )
    }

    /// Euclidean distance on the XZ grid, in chunks
    pub fn planar_distance(&self, other: &ChunkCoord) -> f32 {
        let dx = (i64::from(self.x) - i64::from(other.x)) as f64;
        let dz = (i64::from(self.z) - i64::from(other.z)) as f64;
        (dx * dx + dz * dz).sqrt() as f32
    }
}

/// Offsets of the 26 surrounding chunks, x fastest
pub const NEIGHBOR_OFFSETS: [IVec3; 26] = {
    let mut out = [IVec3::ZERO; 26];
    let mut i = 0;
    let mut dz = -1;
    while dz <= 1 {
        let mut dy = -1;
        while dy <= 1 {
            let mut dx = -1;
            while dx <= 1 {
                if !(dx == 0 && dy == 0 && dz == 0) {
                    out[i] = IVec3::new(dx, dy, dz);
                    i += 1;
                }
                dx += 1;
            }
            dy += 1;
        }
        dz += 1;
    }
    out
};

/// Index into [`NEIGHBOR_OFFSETS`] for an offset in {-1, 0, 1}³ other than zero
pub fn neighbor_index(d: IVec3) -> usize {
    let linear = ((d.z + 1) * 9 + (d.y + 1) * 3 + (d.x + 1)) as usize;
    // The centre (linear 13) is skipped in the table
    if linear > 13 { linear - 1 } else { linear }
}

/// Lifecycle of a chunk instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ChunkState {
    /// Pooled or never used
    #[default]
    Unloaded,
    /// Assigned a coordinate, waiting for terrain generation
    Loading,
    /// Terrain generation in flight
    Generating,
    /// Mesh build in flight
    Meshing,
    /// Blocks available; mesh may be stale when `dirty`
    Ready,
    /// Leaving the world, resources being reset
    Unloading,
}

impl ChunkState {
    /// Whether the lifecycle allows moving from `self` to `to`
    pub fn can_transition(self, to: ChunkState) -> bool {
        use ChunkState::*;
        matches!(
            (self, to),
            (Unloaded, Loading)
                | (Loading, Generating)
                | (Generating, Ready)
                | (Generating, Unloaded)
                | (Ready, Meshing)
                | (Meshing, Ready)
                | (Loading, Unloading)
                | (Ready, Unloading)
                | (Unloading, Unloaded)
        )
    }
}

/// A 16x256x16 column of blocks
pub struct Chunk {
    /// Coordinate of this chunk in the world grid
    pub coord: ChunkCoord,
    blocks: Box<[BlockCell]>,
    state: ChunkState,
    /// Terrain has been generated into `blocks`
    pub loaded: bool,
    /// Blocks changed since the last mesh build
    pub dirty: bool,
    /// A mesh has been built at least once since load
    pub mesh_generated: bool,
    mesh: Option<Arc<ChunkMesh>>,
    /// Cleared buffers kept for the next build
    spare_mesh: Option<ChunkMesh>,
    /// Bumped on every committed mesh
    mesh_revision: u64,
    /// Consecutive failed mesh builds
    pub mesh_failures: u32,
    /// Loaded neighbours by [`NEIGHBOR_OFFSETS`] index; keys into the manager's map
    pub neighbors: [Option<ChunkCoord>; 26],
    solid_count: usize,
}

impl Chunk {
    /// Create a new empty chunk at the given coordinate
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            blocks: vec![BlockCell::AIR; CHUNK_VOLUME].into_boxed_slice(),
            state: ChunkState::Unloaded,
            loaded: false,
            dirty: false,
            mesh_generated: false,
            mesh: None,
            spare_mesh: None,
            mesh_revision: 0,
            mesh_failures: 0,
            neighbors: [None; 26],
            solid_count: 0,
        }
    }

    /// Linear index of a local position, x fastest then y then z
    #[inline]
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        x + CHUNK_WIDTH * (y + CHUNK_HEIGHT * z)
    }

    #[inline]
    pub fn in_bounds(x: i32, y: i32, z: i32) -> bool {
        (0..CHUNK_WIDTH as i32).contains(&x)
            && (0..CHUNK_HEIGHT as i32).contains(&y)
            && (0..CHUNK_DEPTH as i32).contains(&z)
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Move to a new lifecycle state, rejecting illegal transitions
    pub fn transition(&mut self, to: ChunkState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::InvalidTransition {
                coord: self.coord,
                from: self.state,
                to,
            });
        }
        log::trace!("Chunk {:?}: {:?} -> {:?}", self.coord, self.state, to);
        self.state = to;
        Ok(())
    }

    pub fn is_meshing(&self) -> bool {
        self.state == ChunkState::Meshing
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockCell {
        self.blocks[Self::index(x, y, z)]
    }

    /// Block at a signed local position, `None` outside the chunk
    #[inline]
    pub fn get_checked(&self, x: i32, y: i32, z: i32) -> Option<BlockCell> {
        Self::in_bounds(x, y, z).then(|| self.get(x as usize, y as usize, z as usize))
    }

    /// Write a block and mark the chunk dirty
    pub fn set(&mut self, x: usize, y: usize, z: usize, cell: BlockCell) {
        self.write(x, y, z, cell);
        self.dirty = true;
    }

    /// Write a block without touching the dirty flag (terrain fill)
    #[inline]
    pub fn write(&mut self, x: usize, y: usize, z: usize, cell: BlockCell) {
        let slot = &mut self.blocks[Self::index(x, y, z)];
        match (slot.is_air(), cell.is_air()) {
            (true, false) => self.solid_count += 1,
            (false, true) => self.solid_count -= 1,
            _ => {}
        }
        *slot = cell;
    }

    pub fn blocks(&self) -> &[BlockCell] {
        &self.blocks
    }

    /// Number of cells that are not air
    pub fn solid_count(&self) -> usize {
        self.solid_count
    }

    pub fn is_empty(&self) -> bool {
        self.solid_count == 0
    }

    pub fn mesh(&self) -> Option<&Arc<ChunkMesh>> {
        self.mesh.as_ref()
    }

    pub fn mesh_revision(&self) -> u64 {
        self.mesh_revision
    }

    /// Buffers to build the next mesh into (capacity from earlier builds)
    pub fn take_mesh_buffers(&mut self) -> ChunkMesh {
        let mut mesh = self.spare_mesh.take().unwrap_or_default();
        mesh.clear();
        mesh
    }

    /// Install a freshly built mesh
    pub fn commit_mesh(&mut self, mesh: ChunkMesh) {
        self.recycle_mesh();
        self.mesh = Some(Arc::new(mesh));
        self.mesh_revision += 1;
        self.mesh_generated = true;
        self.mesh_failures = 0;
        self.dirty = false;
    }

    /// Hand unused buffers back after a failed build
    pub fn return_mesh_buffers(&mut self, mut mesh: ChunkMesh) {
        mesh.clear();
        self.spare_mesh = Some(mesh);
    }

    /// Drop the current mesh, keeping its buffers if nobody else holds them
    fn recycle_mesh(&mut self) {
        if let Some(old) = self.mesh.take() {
            if let Ok(mut old) = Arc::try_unwrap(old) {
                old.clear();
                self.spare_mesh = Some(old);
            }
        }
    }

    /// Clear all content so the instance can be pooled
    pub fn reset(&mut self) {
        if self.solid_count > 0 {
            self.blocks.fill(BlockCell::AIR);
        }
        self.solid_count = 0;
        self.recycle_mesh();
        self.state = ChunkState::Unloaded;
        self.loaded = false;
        self.dirty = false;
        self.mesh_generated = false;
        self.mesh_failures = 0;
        self.neighbors = [None; 26];
    }

    /// Reassign this instance to a new coordinate
    pub fn assign(&mut self, coord: ChunkCoord) {
        self.coord = coord;
    }
}
