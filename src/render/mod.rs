//! Renderer-facing side of the engine: chunk meshes and visibility

pub mod mesh;
pub mod mesher;
pub mod culling;

pub use mesh::{ChunkMesh, Vertex};
pub use mesher::{ChunkNeighborhood, Face, MeshPolicy, Mesher, MesherConfig};
pub use culling::{CullStats, CullingConfig, CullingContext, FrustumCuller};
