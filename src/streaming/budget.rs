//! Per-frame work budget for streaming
//!
//! Caps how much streaming work one `update` may do: new coordinates
//! enqueued, generation jobs run and meshing jobs run. An optional time slice
//! additionally cuts the meshing phase once the frame has used its share.

use std::time::{Duration, Instant};

/// Per-frame work counters and limits
#[derive(Clone, Debug)]
pub struct FrameBudget {
    max_enqueue: usize,
    max_generations: usize,
    max_meshes: usize,
    time_slice: Option<Duration>,
    started: Instant,
    enqueued: usize,
    generated: usize,
    meshed: usize,
}

impl FrameBudget {
    /// Create a new frame budget
    ///
    /// # Arguments
    /// * `max_enqueue` - New coordinates accepted per frame
    /// * `max_generations` - Terrain generation jobs per frame
    /// * `max_meshes` - Mesh builds per frame
    /// * `time_slice` - Optional wall-clock allowance for the frame
    pub fn new(max_enqueue: usize, max_generations: usize, max_meshes: usize, time_slice: Option<Duration>) -> Self {
        Self {
            max_enqueue,
            max_generations,
            max_meshes,
            time_slice,
            started: Instant::now(),
            enqueued: 0,
            generated: 0,
            meshed: 0,
        }
    }

    /// Reset counters and restart the clock
    pub fn begin_frame(&mut self) {
        self.started = Instant::now();
        self.enqueued = 0;
        self.generated = 0;
        self.meshed = 0;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the optional time slice is used up
    pub fn time_exhausted(&self) -> bool {
        self.time_slice.is_some_and(|slice| self.elapsed() >= slice)
    }

    // --- Enqueue ---

    pub fn enqueue_slots(&self) -> usize {
        self.max_enqueue.saturating_sub(self.enqueued)
    }

    pub fn record_enqueued(&mut self, count: usize) {
        self.enqueued += count;
    }

    // --- Generation ---

    pub fn generation_slots(&self) -> usize {
        self.max_generations.saturating_sub(self.generated)
    }

    pub fn record_generated(&mut self, count: usize) {
        self.generated += count;
    }

    // --- Meshing ---

    /// Mesh builds still allowed; zero once the time slice is spent
    pub fn mesh_slots(&self) -> usize {
        if self.time_exhausted() {
            return 0;
        }
        self.max_meshes.saturating_sub(self.meshed)
    }

    pub fn record_meshed(&mut self, count: usize) {
        self.meshed += count;
    }

    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    pub fn generated(&self) -> usize {
        self.generated
    }

    pub fn meshed(&self) -> usize {
        self.meshed
    }
}
