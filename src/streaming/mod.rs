//! Chunk streaming around the observer

pub mod budget;
pub mod pool;
pub mod manager;

pub use budget::FrameBudget;
pub use pool::ChunkPool;
pub use manager::{ChunkManager, ManagerStats, StreamingConfig, VisibleChunk};
