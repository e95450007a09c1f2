//! Recycled chunk instances
//!
//! Block arrays and mesh buffers are large; the pool hands back reset
//! instances instead of allocating a fresh 128 KiB array per streamed chunk.

use crate::voxel::chunk::{Chunk, ChunkCoord, ChunkState};

/// Free list of reset chunks
pub struct ChunkPool {
    free: Vec<Chunk>,
    max_pooled: usize,
    /// Instances created and not yet dropped
    allocated: usize,
}

impl ChunkPool {
    /// Create an empty pool keeping at most `max_pooled` idle instances
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Vec::new(),
            max_pooled,
            allocated: 0,
        }
    }

    /// Pool pre-filled with `count` idle instances
    pub fn with_preallocated(max_pooled: usize, count: usize) -> Self {
        let mut pool = Self::new(max_pooled);
        let count = count.min(max_pooled);
        pool.free.reserve(count);
        for _ in 0..count {
            pool.free.push(Chunk::new(ChunkCoord::default()));
        }
        pool.allocated = count;
        pool
    }

    /// Take an instance for `coord`, in the `Unloaded` state
    pub fn acquire(&mut self, coord: ChunkCoord) -> Chunk {
        match self.free.pop() {
            Some(mut chunk) => {
                chunk.assign(coord);
                chunk
            }
            None => {
                self.allocated += 1;
                Chunk::new(coord)
            }
        }
    }

    /// Reset an instance and keep it for reuse, or drop it when the pool is full
    pub fn release(&mut self, mut chunk: Chunk) {
        chunk.reset();
        debug_assert_eq!(chunk.state(), ChunkState::Unloaded);
        if self.free.len() < self.max_pooled {
            self.free.push(chunk);
        } else {
            self.allocated -= 1;
        }
    }

    /// Idle instances ready for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Instances alive anywhere (idle or in use)
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    pub fn max_pooled(&self) -> usize {
        self.max_pooled
    }
}
