//! voxstream - streaming voxel terrain around a moving observer
//!
//! Chunks are generated from seeded noise, meshed into vertex/index buffers
//! and culled against the camera frustum. The [`streaming::ChunkManager`]
//! ties the stages together and keeps a bounded amount of work per frame.

pub mod core;
pub mod math;
pub mod voxel;
pub mod terrain;
pub mod render;
pub mod streaming;
