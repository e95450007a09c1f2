//! Per-chunk mesh buffers handed to the external renderer

use bytemuck::{Pod, Zeroable};

/// One mesh vertex, laid out for direct upload
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// World-space position
    pub position: [f32; 3],
    /// Outward unit normal of the face
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// Linear RGB from the block registry
    pub color: [f32; 3],
}

impl Vertex {
    pub const SIZE: usize = std::mem::size_of::<Vertex>();
}

/// Merged vertex/index data for every visible face of one chunk
#[derive(Clone, Debug, Default)]
pub struct ChunkMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// The build hit the vertex budget and dropped faces
    pub truncated: bool,
}

impl ChunkMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Number of quads (block faces) in the mesh
    pub fn face_count(&self) -> usize {
        self.vertices.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Empty the buffers, keeping their capacity
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.truncated = false;
    }

    /// Index count is a multiple of 3 and every index addresses a vertex
    pub fn validate(&self) -> bool {
        let n = self.vertices.len() as u64;
        self.indices.len() % 3 == 0 && self.indices.iter().all(|&i| (i as u64) < n)
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Approximate heap footprint in bytes
    pub fn memory_usage(&self) -> usize {
        self.vertices.capacity() * Vertex::SIZE + self.indices.capacity() * 4
    }
}
