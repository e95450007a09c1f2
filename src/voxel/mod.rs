//! Voxel data structures: block cells, the block registry and chunks

pub mod block;
pub mod registry;
pub mod chunk;

pub use block::{BlockCell, BlockType};
pub use registry::{BlockDefinition, BlockDefinitionOverride, BlockRegistry};
pub use chunk::{Chunk, ChunkCoord, ChunkState, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH};
