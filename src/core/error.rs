//! Error types for the streaming engine

use thiserror::Error;

use crate::voxel::chunk::{ChunkCoord, ChunkState};

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Generation failed for chunk {coord:?}: {reason}")]
    Generation { coord: ChunkCoord, reason: String },

    #[error("Meshing failed for chunk {coord:?}: {reason}")]
    Meshing { coord: ChunkCoord, reason: String },

    #[error("Mesh for chunk {coord:?} needs {vertices} vertices, budget is {budget}")]
    MeshOverflow {
        coord: ChunkCoord,
        vertices: usize,
        budget: usize,
    },

    #[error("Chunk {coord:?} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        coord: ChunkCoord,
        from: ChunkState,
        to: ChunkState,
    },
}

impl Error {
    /// Turn a caught panic payload into a readable reason string.
    pub fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    }
}
