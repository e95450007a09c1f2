//! Chunk manager: streams chunks in and out around a moving observer
//!
//! Each `update` runs, in order:
//! 1. unload chunks (and abandon queued coordinates) past the unload radius
//! 2. enqueue missing coordinates inside the load radius, nearest first
//! 3. generate a bounded batch of queued chunks
//! 4. refresh neighbour links of chunks around anything loaded or unloaded
//! 5. mesh a bounded batch of dirty chunks
//!
//! Generation and meshing batches may run on the rayon pool. Every job is
//! isolated per chunk: errors and panics turn into a retry on a later frame.

use std::collections::{HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use glam::{IVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::budget::FrameBudget;
use super::pool::ChunkPool;
use crate::core::config::EngineConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::culling::{CullingContext, FrustumCuller};
use crate::render::mesh::ChunkMesh;
use crate::render::mesher::{ChunkNeighborhood, Face, MeshPolicy, Mesher};
use crate::terrain::generator::{ChunkGenerator, TerrainGenerator};
use crate::voxel::block::BlockCell;
use crate::voxel::chunk::{
    Chunk, ChunkCoord, ChunkState, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, NEIGHBOR_OFFSETS,
};

/// Upper bound on streaming radii, in chunks
pub const MAX_STREAMING_RADIUS: u32 = 1024;

/// Streaming configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks within this many chunk widths of the observer are loaded
    pub load_radius: u32,
    /// Chunks beyond this distance are unloaded; must exceed `load_radius`
    pub unload_radius: u32,
    pub max_enqueue_per_frame: usize,
    pub max_generations_per_frame: usize,
    pub max_meshes_per_frame: usize,
    /// Optional wall-clock slice per update; meshing stops once it is spent
    pub frame_time_budget_ms: Option<f32>,
    /// Idle chunk instances kept for reuse
    pub max_pooled: usize,
    /// Run generation and meshing batches on the rayon pool
    pub parallel: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: 6,
            unload_radius: 8,
            max_enqueue_per_frame: 32,
            max_generations_per_frame: 8,
            max_meshes_per_frame: 8,
            frame_time_budget_ms: None,
            max_pooled: 256,
            parallel: true,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.unload_radius > MAX_STREAMING_RADIUS {
            return Err(Error::InvalidConfig(format!(
                "unload_radius ({}) exceeds the maximum of {}",
                self.unload_radius, MAX_STREAMING_RADIUS
            )));
        }
        if self.unload_radius <= self.load_radius {
            return Err(Error::InvalidConfig(format!(
                "unload_radius ({}) must be greater than load_radius ({})",
                self.unload_radius, self.load_radius
            )));
        }
        if self.max_enqueue_per_frame == 0
            || self.max_generations_per_frame == 0
            || self.max_meshes_per_frame == 0
        {
            return Err(Error::InvalidConfig("per-frame budgets must be non-zero".into()));
        }
        if let Some(ms) = self.frame_time_budget_ms {
            if !(ms >= 0.0) {
                return Err(Error::InvalidConfig(format!("frame_time_budget_ms must be >= 0, got {ms}")));
            }
        }
        Ok(())
    }

    fn time_slice(&self) -> Option<Duration> {
        self.frame_time_budget_ms
            .map(|ms| Duration::from_secs_f64(f64::from(ms) / 1000.0))
    }
}

/// A chunk ready to draw this frame
#[derive(Clone, Debug)]
pub struct VisibleChunk {
    pub coord: ChunkCoord,
    pub mesh: Arc<ChunkMesh>,
    /// Changes whenever a new mesh is committed; lets the renderer skip re-uploads
    pub mesh_revision: u64,
}

/// Snapshot for debug overlays
#[derive(Clone, Debug, Default, Serialize)]
pub struct ManagerStats {
    /// Chunks with generated terrain
    pub loaded: usize,
    /// Live instances in the map, including ones still queued
    pub resident: usize,
    pub generation_queue: usize,
    pub meshing_queue: usize,
    pub generated_this_frame: usize,
    pub meshed_this_frame: usize,
    pub unloaded_this_frame: usize,
    pub generation_failures: usize,
    pub meshing_failures: usize,
    pub pool_free: usize,
    pub pool_allocated: usize,
    pub observer_chunk: Option<ChunkCoord>,
}

#[derive(Clone, Debug, Default)]
struct FrameCounters {
    unloaded: usize,
    generation_failures: usize,
    meshing_failures: usize,
}

/// A mesh build taken out of the queue for this frame
struct MeshJob {
    coord: ChunkCoord,
    policy: MeshPolicy,
    buffers: ChunkMesh,
    result: Result<()>,
}

/// Owns every live chunk and drives the load/generate/mesh pipeline
pub struct ChunkManager {
    config: StreamingConfig,
    generator: Arc<dyn ChunkGenerator>,
    mesher: Mesher,
    culler: FrustumCuller,
    chunks: DashMap<ChunkCoord, Chunk>,
    pool: ChunkPool,
    budget: FrameBudget,
    generation_queue: VecDeque<ChunkCoord>,
    meshing_queue: VecDeque<ChunkCoord>,
    mesh_pending: HashSet<ChunkCoord>,
    /// Chunks whose last strict build overflowed the vertex budget
    truncate_next: HashSet<ChunkCoord>,
    observer: Option<ChunkCoord>,
    /// Enqueue was cut short or a job failed; rescan even without movement
    rescan: bool,
    frame: FrameCounters,
}

impl ChunkManager {
    /// Create a manager from its collaborators
    ///
    /// # Arguments
    /// * `config` - Radii and per-frame budgets (validated here)
    /// * `generator` - Fills chunk block data
    /// * `mesher` - Builds chunk meshes
    /// * `culler` - Visibility tests for `visible_chunks`
    /// * `pool` - Source of recycled chunk instances
    pub fn new(
        config: StreamingConfig,
        generator: Arc<dyn ChunkGenerator>,
        mesher: Mesher,
        culler: FrustumCuller,
        pool: ChunkPool,
    ) -> Result<Self> {
        config.validate()?;
        let budget = FrameBudget::new(
            config.max_enqueue_per_frame,
            config.max_generations_per_frame,
            config.max_meshes_per_frame,
            config.time_slice(),
        );
        log::info!(
            "Chunk manager: load radius {}, unload radius {}, parallel {}",
            config.load_radius,
            config.unload_radius,
            config.parallel
        );

        Ok(Self {
            config,
            generator,
            mesher,
            culler,
            chunks: DashMap::new(),
            pool,
            budget,
            generation_queue: VecDeque::new(),
            meshing_queue: VecDeque::new(),
            mesh_pending: HashSet::new(),
            truncate_next: HashSet::new(),
            observer: None,
            rescan: true,
            frame: FrameCounters::default(),
        })
    }

    /// Build the full pipeline from an engine config
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(config.block_registry());
        let generator = Arc::new(TerrainGenerator::new(config.terrain.clone()));
        Self::new(
            config.streaming.clone(),
            generator,
            Mesher::from_config(registry, &config.mesher),
            FrustumCuller::new(&config.culling),
            ChunkPool::new(config.streaming.max_pooled),
        )
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn culler(&self) -> &FrustumCuller {
        &self.culler
    }

    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Observer chunk after the last update
    pub fn observer_chunk(&self) -> Option<ChunkCoord> {
        self.observer
    }

    /// Whether `coord` has generated terrain
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.get(&coord).is_some_and(|c| c.loaded)
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> Option<ChunkState> {
        self.chunks.get(&coord).map(|c| c.state())
    }

    /// Read access to a live chunk
    pub fn chunk(&self, coord: ChunkCoord) -> Option<Ref<'_, ChunkCoord, Chunk>> {
        self.chunks.get(&coord)
    }

    pub fn loaded_coords(&self) -> Vec<ChunkCoord> {
        self.chunks
            .iter()
            .filter(|e| e.loaded)
            .map(|e| *e.key())
            .collect()
    }

    /// Advance streaming for one frame
    pub fn update(&mut self, observer_position: Vec3) {
        self.budget.begin_frame();
        self.frame = FrameCounters::default();

        let mut center = ChunkCoord::from_world_pos(observer_position);
        center.y = 0;
        let moved = self.observer != Some(center);
        self.observer = Some(center);

        let mut topology = Vec::new();
        if moved {
            self.unload_out_of_range(center, &mut topology);
        }
        if moved || self.rescan {
            self.enqueue_in_range(center);
        }
        self.generate_batch(&mut topology);
        if !topology.is_empty() {
            self.refresh_neighbors(&topology);
        }
        self.mesh_batch();

        log::trace!(
            "Frame: generated {}, meshed {}, unloaded {} in {:?}",
            self.budget.generated(),
            self.budget.meshed(),
            self.frame.unloaded,
            self.budget.elapsed()
        );
    }

    fn unload_out_of_range(&mut self, center: ChunkCoord, topology: &mut Vec<ChunkCoord>) {
        let limit = self.config.unload_radius as f32;
        let doomed: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter(|e| e.key().planar_distance(&center) > limit)
            .map(|e| *e.key())
            .collect();
        if doomed.is_empty() {
            return;
        }

        let doomed_set: HashSet<ChunkCoord> = doomed.iter().copied().collect();
        self.generation_queue.retain(|c| !doomed_set.contains(c));
        self.meshing_queue.retain(|c| !doomed_set.contains(c));

        for coord in doomed {
            let Some((_, mut chunk)) = self.chunks.remove(&coord) else {
                continue;
            };
            if chunk.loaded {
                topology.push(coord);
            }
            if let Err(e) = chunk.transition(ChunkState::Unloading) {
                log::debug!("{e}");
            }
            self.mesh_pending.remove(&coord);
            self.truncate_next.remove(&coord);
            self.culler.invalidate(coord);
            self.pool.release(chunk);
            self.frame.unloaded += 1;
            log::debug!("Unloaded chunk {:?}", coord);
        }
    }

    fn enqueue_in_range(&mut self, center: ChunkCoord) {
        let r = self.config.load_radius as i32;
        let limit = self.config.load_radius as f32;
        let mut wanted: Vec<(f32, ChunkCoord)> = Vec::new();
        for dz in -r..=r {
            for dx in -r..=r {
                let coord = ChunkCoord::new(center.x.saturating_add(dx), 0, center.z.saturating_add(dz));
                let d = coord.planar_distance(&center);
                if d <= limit && !self.chunks.contains_key(&coord) {
                    wanted.push((d, coord));
                }
            }
        }
        wanted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let slots = self.budget.enqueue_slots();
        self.rescan = wanted.len() > slots;
        for &(_, coord) in wanted.iter().take(slots) {
            let mut chunk = self.pool.acquire(coord);
            if let Err(e) = chunk.transition(ChunkState::Loading) {
                log::warn!("{e}");
                self.pool.release(chunk);
                continue;
            }
            self.chunks.insert(coord, chunk);
            self.generation_queue.push_back(coord);
            self.budget.record_enqueued(1);
        }
    }

    fn generate_batch(&mut self, topology: &mut Vec<ChunkCoord>) {
        let count = self.budget.generation_slots().min(self.generation_queue.len());
        if count == 0 {
            return;
        }

        let mut batch: Vec<(ChunkCoord, Chunk)> = Vec::with_capacity(count);
        for coord in self.generation_queue.drain(..count) {
            if let Some((coord, mut chunk)) = self.chunks.remove(&coord) {
                match chunk.transition(ChunkState::Generating) {
                    Ok(()) => batch.push((coord, chunk)),
                    Err(e) => {
                        log::warn!("{e}");
                        self.chunks.insert(coord, chunk);
                    }
                }
            }
        }

        let generator = &self.generator;
        let run = |(coord, chunk): &mut (ChunkCoord, Chunk)| -> Result<()> {
            let coord = *coord;
            catch_unwind(AssertUnwindSafe(|| generator.generate(coord, chunk))).unwrap_or_else(|payload| {
                Err(Error::Generation {
                    coord,
                    reason: Error::panic_reason(payload.as_ref()),
                })
            })
        };
        let results: Vec<Result<()>> = if self.config.parallel {
            batch.par_iter_mut().map(run).collect()
        } else {
            batch.iter_mut().map(run).collect()
        };

        for ((coord, mut chunk), result) in batch.into_iter().zip(results) {
            match result.and_then(|()| chunk.transition(ChunkState::Ready)) {
                Ok(()) => {
                    chunk.loaded = true;
                    chunk.dirty = true;
                    self.chunks.insert(coord, chunk);
                    self.budget.record_generated(1);
                    self.enqueue_mesh(coord);
                    topology.push(coord);
                    log::debug!("Generated chunk {:?}", coord);
                }
                Err(e) => {
                    log::warn!("Generation failed, will retry: {e}");
                    if let Err(e) = chunk.transition(ChunkState::Unloaded) {
                        log::debug!("{e}");
                    }
                    self.pool.release(chunk);
                    self.frame.generation_failures += 1;
                    self.rescan = true;
                }
            }
        }
    }

    /// Recompute neighbour links around chunks that appeared or disappeared.
    ///
    /// A loaded chunk whose set of axis neighbours changed is re-meshed, since
    /// its boundary faces depend on them.
    fn refresh_neighbors(&mut self, changed: &[ChunkCoord]) {
        let mut affected: HashSet<ChunkCoord> = HashSet::new();
        for &coord in changed {
            affected.insert(coord);
            for offset in NEIGHBOR_OFFSETS {
                affected.insert(coord.offset(offset));
            }
        }

        let mut updates = Vec::new();
        for coord in affected {
            let Some(chunk) = self.chunks.get(&coord) else {
                continue;
            };
            if !chunk.loaded {
                continue;
            }
            let old = chunk.neighbors;
            drop(chunk);

            let mut links = [None; 26];
            for (slot, offset) in links.iter_mut().zip(NEIGHBOR_OFFSETS) {
                let n = coord.offset(offset);
                if self.is_loaded(n) {
                    *slot = Some(n);
                }
            }
            if links != old {
                updates.push((coord, links, axis_links(&links) != axis_links(&old)));
            }
        }

        for (coord, links, remesh) in updates {
            let mut needs_mesh = false;
            if let Some(mut chunk) = self.chunks.get_mut(&coord) {
                chunk.neighbors = links;
                if remesh && chunk.mesh_generated {
                    chunk.dirty = true;
                    needs_mesh = true;
                }
            }
            if needs_mesh {
                self.enqueue_mesh(coord);
            }
        }
    }

    fn enqueue_mesh(&mut self, coord: ChunkCoord) {
        if self.mesh_pending.insert(coord) {
            self.meshing_queue.push_back(coord);
        }
    }

    /// Move up to the frame's mesh budget of chunks into `Meshing`
    fn take_mesh_jobs(&mut self) -> Vec<MeshJob> {
        let slots = self.budget.mesh_slots();
        if slots == 0 && !self.meshing_queue.is_empty() {
            log::trace!("Mesh phase skipped, frame budget spent");
        }

        let mut jobs = Vec::new();
        while jobs.len() < slots {
            let Some(coord) = self.meshing_queue.pop_front() else {
                break;
            };
            self.mesh_pending.remove(&coord);
            let Some(mut chunk) = self.chunks.get_mut(&coord) else {
                continue;
            };
            if !chunk.loaded || !chunk.dirty {
                continue;
            }
            if let Err(e) = chunk.transition(ChunkState::Meshing) {
                log::debug!("{e}");
                continue;
            }
            let buffers = chunk.take_mesh_buffers();
            drop(chunk);

            let policy = if self.truncate_next.contains(&coord) {
                MeshPolicy::Truncate
            } else {
                MeshPolicy::Strict
            };
            jobs.push(MeshJob {
                coord,
                policy,
                buffers,
                result: Ok(()),
            });
        }
        jobs
    }

    fn build_mesh_jobs(&self, jobs: &mut [MeshJob]) {
        let chunks = &self.chunks;
        let mesher = &self.mesher;
        let run = |job: &mut MeshJob| {
            let coord = job.coord;
            let Some(chunk) = chunks.get(&coord) else {
                job.result = Err(Error::Meshing {
                    coord,
                    reason: "chunk left the map".into(),
                });
                return;
            };
            let guards: [Option<Ref<'_, ChunkCoord, Chunk>>; 6] = Face::ALL.map(|face| {
                chunks
                    .get(&coord.offset(face.offset()))
                    .filter(|n| n.loaded)
            });
            let neighbors = ChunkNeighborhood {
                chunks: std::array::from_fn(|i| guards[i].as_deref()),
            };
            let buffers = &mut job.buffers;
            job.result = catch_unwind(AssertUnwindSafe(|| {
                mesher.build_into(&chunk, &neighbors, job.policy, buffers)
            }))
            .unwrap_or_else(|payload| {
                Err(Error::Meshing {
                    coord,
                    reason: Error::panic_reason(payload.as_ref()),
                })
            });
        };

        if self.config.parallel {
            jobs.par_iter_mut().for_each(run);
        } else {
            jobs.iter_mut().for_each(run);
        }
    }

    /// Install finished meshes. Jobs whose chunk left `Meshing` are discarded.
    fn commit_mesh_jobs(&mut self, jobs: Vec<MeshJob>) {
        for job in jobs {
            let coord = job.coord;
            let mut retry = false;
            {
                let Some(mut chunk) = self.chunks.get_mut(&coord) else {
                    log::debug!("Discarding mesh for departed chunk {:?}", coord);
                    continue;
                };
                if chunk.state() != ChunkState::Meshing {
                    log::debug!("Discarding stale mesh for chunk {:?}", coord);
                    continue;
                }
                if let Err(e) = chunk.transition(ChunkState::Ready) {
                    log::warn!("{e}");
                    continue;
                }
                match job.result {
                    Ok(()) => {
                        chunk.commit_mesh(job.buffers);
                        self.budget.record_meshed(1);
                    }
                    Err(e) => {
                        log::warn!("Meshing failed, will retry: {e}");
                        chunk.return_mesh_buffers(job.buffers);
                        chunk.dirty = true;
                        chunk.mesh_failures += 1;
                        self.frame.meshing_failures += 1;
                        if matches!(e, Error::MeshOverflow { .. }) {
                            self.truncate_next.insert(coord);
                        }
                        retry = true;
                    }
                }
            }
            if retry {
                self.enqueue_mesh(coord);
            } else {
                self.truncate_next.remove(&coord);
            }
        }
    }

    fn mesh_batch(&mut self) {
        let mut jobs = self.take_mesh_jobs();
        if jobs.is_empty() {
            return;
        }
        self.build_mesh_jobs(&mut jobs);
        self.commit_mesh_jobs(jobs);
    }

    /// Block at a world position; air when the owning chunk is not loaded
    pub fn get_block(&self, pos: IVec3) -> BlockCell {
        let coord = ChunkCoord::from_block_pos(pos);
        let (x, y, z) = ChunkCoord::local_pos(pos);
        self.chunks
            .get(&coord)
            .filter(|c| c.loaded)
            .map(|c| c.get(x, y, z))
            .unwrap_or(BlockCell::AIR)
    }

    /// Write a block. Returns false when the owning chunk is not loaded or is
    /// being meshed.
    ///
    /// The chunk is marked dirty, and so is any loaded chunk sharing the
    /// written cell's boundary.
    pub fn set_block(&mut self, pos: IVec3, cell: BlockCell) -> bool {
        let coord = ChunkCoord::from_block_pos(pos);
        let (x, y, z) = ChunkCoord::local_pos(pos);
        {
            let Some(mut chunk) = self.chunks.get_mut(&coord) else {
                return false;
            };
            if !chunk.loaded || chunk.is_meshing() {
                return false;
            }
            chunk.set(x, y, z, cell);
        }
        self.enqueue_mesh(coord);

        let mut edges = Vec::new();
        if x == 0 {
            edges.push(IVec3::NEG_X);
        }
        if x == CHUNK_WIDTH - 1 {
            edges.push(IVec3::X);
        }
        if z == 0 {
            edges.push(IVec3::NEG_Z);
        }
        if z == CHUNK_DEPTH - 1 {
            edges.push(IVec3::Z);
        }
        debug_assert!(y < CHUNK_HEIGHT);

        for d in edges {
            let n = coord.offset(d);
            let marked = match self.chunks.get_mut(&n) {
                Some(mut other) if other.loaded => {
                    other.dirty = true;
                    true
                }
                _ => false,
            };
            if marked {
                self.enqueue_mesh(n);
            }
        }
        true
    }

    /// Loaded, meshed, non-empty chunks that pass culling, nearest first
    pub fn visible_chunks(&mut self, ctx: &CullingContext) -> Vec<VisibleChunk> {
        let candidates: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter(|e| e.loaded && e.mesh().is_some_and(|m| !m.is_empty()))
            .map(|e| *e.key())
            .collect();

        self.culler
            .cull_and_sort(ctx, candidates)
            .into_iter()
            .filter_map(|coord| {
                let chunk = self.chunks.get(&coord)?;
                let mesh = chunk.mesh()?.clone();
                Some(VisibleChunk {
                    coord,
                    mesh,
                    mesh_revision: chunk.mesh_revision(),
                })
            })
            .collect()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            loaded: self.chunks.iter().filter(|e| e.loaded).count(),
            resident: self.chunks.len(),
            generation_queue: self.generation_queue.len(),
            meshing_queue: self.meshing_queue.len(),
            generated_this_frame: self.budget.generated(),
            meshed_this_frame: self.budget.meshed(),
            unloaded_this_frame: self.frame.unloaded,
            generation_failures: self.frame.generation_failures,
            meshing_failures: self.frame.meshing_failures,
            pool_free: self.pool.free_count(),
            pool_allocated: self.pool.allocated_count(),
            observer_chunk: self.observer,
        }
    }

    /// Return every chunk to the pool
    pub fn clear(&mut self) {
        let coords: Vec<ChunkCoord> = self.chunks.iter().map(|e| *e.key()).collect();
        for coord in coords {
            if let Some((_, chunk)) = self.chunks.remove(&coord) {
                self.culler.invalidate(coord);
                self.pool.release(chunk);
            }
        }
        self.generation_queue.clear();
        self.meshing_queue.clear();
        self.mesh_pending.clear();
        self.truncate_next.clear();
        self.observer = None;
        self.rescan = true;
        log::info!("Chunk manager cleared, {} pooled", self.pool.free_count());
    }
}

/// The four horizontal axis neighbours out of a 26-link table
fn axis_links(links: &[Option<ChunkCoord>; 26]) -> [Option<ChunkCoord>; 4] {
    use crate::voxel::chunk::neighbor_index;
    [IVec3::X, IVec3::NEG_X, IVec3::Z, IVec3::NEG_Z].map(|d| links[neighbor_index(d)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::culling::CullingConfig;
    use crate::render::mesher::MAX_CHUNK_VERTICES;
    use crate::voxel::block::BlockType;
    use crate::voxel::registry::BlockRegistry;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SURFACE: usize = 3;

    /// Solid stone up to `SURFACE` everywhere
    struct FlatGenerator;

    impl ChunkGenerator for FlatGenerator {
        fn generate(&self, _coord: ChunkCoord, chunk: &mut Chunk) -> Result<()> {
            for z in 0..CHUNK_DEPTH {
                for y in 0..=SURFACE {
                    for x in 0..CHUNK_WIDTH {
                        chunk.write(x, y, z, BlockType::Stone.into());
                    }
                }
            }
            Ok(())
        }
    }

    /// Fails (or panics) the first time each listed coordinate is generated
    struct FlakyGenerator {
        targets: Vec<ChunkCoord>,
        panic: bool,
        failed: Mutex<HashSet<ChunkCoord>>,
        calls: AtomicUsize,
    }

    impl FlakyGenerator {
        fn new(targets: Vec<ChunkCoord>, panic: bool) -> Self {
            Self {
                targets,
                panic,
                failed: Mutex::new(HashSet::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ChunkGenerator for FlakyGenerator {
        fn generate(&self, coord: ChunkCoord, chunk: &mut Chunk) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.targets.contains(&coord) && self.failed.lock().unwrap().insert(coord) {
                if self.panic {
                    panic!("column overflow at {coord:?}");
                }
                return Err(Error::Generation {
                    coord,
                    reason: "transient".into(),
                });
            }
            FlatGenerator.generate(coord, chunk)
        }
    }

    fn config(load: u32, unload: u32) -> StreamingConfig {
        StreamingConfig {
            load_radius: load,
            unload_radius: unload,
            max_enqueue_per_frame: 256,
            max_generations_per_frame: 256,
            max_meshes_per_frame: 256,
            frame_time_budget_ms: None,
            max_pooled: 256,
            parallel: true,
        }
    }

    fn manager_with(config: StreamingConfig, generator: Arc<dyn ChunkGenerator>) -> ChunkManager {
        crate::core::logging::init_for_tests();
        let pool = ChunkPool::new(config.max_pooled);
        ChunkManager::new(
            config,
            generator,
            Mesher::new(Arc::new(BlockRegistry::builtin()), MAX_CHUNK_VERTICES),
            FrustumCuller::new(&CullingConfig::default()),
            pool,
        )
        .unwrap()
    }

    fn manager(load: u32, unload: u32) -> ChunkManager {
        manager_with(config(load, unload), Arc::new(FlatGenerator))
    }

    fn center_of(cx: i32, cz: i32) -> Vec3 {
        Vec3::new(cx as f32 * 16.0 + 8.0, 100.0, cz as f32 * 16.0 + 8.0)
    }

    fn face_count(mgr: &ChunkManager, coord: ChunkCoord) -> usize {
        mgr.chunk(coord)
            .and_then(|c| c.mesh().map(|m| m.face_count()))
            .unwrap_or(0)
    }

    #[test]
    fn test_rejects_oversized_radius() {
        let cfg = config(MAX_STREAMING_RADIUS, MAX_STREAMING_RADIUS + 1);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        assert!(config(MAX_STREAMING_RADIUS - 1, MAX_STREAMING_RADIUS).validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_radii() {
        let result = ChunkManager::new(
            config(4, 4),
            Arc::new(FlatGenerator),
            Mesher::new(Arc::new(BlockRegistry::builtin()), MAX_CHUNK_VERTICES),
            FrustumCuller::new(&CullingConfig::default()),
            ChunkPool::new(4),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_update_loads_load_radius() {
        let mut mgr = manager(2, 3);
        mgr.update(center_of(0, 0));

        // Disc of radius 2: 13 chunks
        let stats = mgr.stats();
        assert_eq!(stats.loaded, 13);
        assert_eq!(stats.generated_this_frame, 13);
        assert_eq!(stats.meshed_this_frame, 13);
        assert_eq!(stats.observer_chunk, Some(ChunkCoord::new(0, 0, 0)));
        for coord in mgr.loaded_coords() {
            assert!(coord.planar_distance(&ChunkCoord::new(0, 0, 0)) <= 2.0);
            assert_eq!(mgr.chunk_state(coord), Some(ChunkState::Ready));
            let chunk = mgr.chunk(coord).unwrap();
            assert!(chunk.mesh_generated && !chunk.dirty);
            assert!(chunk.mesh().unwrap().validate());
        }
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let mut seq_config = config(1, 2);
        seq_config.parallel = false;
        let mut seq = manager_with(seq_config, Arc::new(FlatGenerator));
        let mut par = manager(1, 2);
        seq.update(center_of(0, 0));
        par.update(center_of(0, 0));
        for coord in par.loaded_coords() {
            assert_eq!(face_count(&seq, coord), face_count(&par, coord));
        }
        assert_eq!(seq.stats().loaded, par.stats().loaded);
    }

    #[test]
    fn test_per_frame_caps() {
        let mut cfg = config(2, 3);
        cfg.max_enqueue_per_frame = 4;
        cfg.max_generations_per_frame = 2;
        cfg.max_meshes_per_frame = 1;
        let mut mgr = manager_with(cfg, Arc::new(FlatGenerator));

        mgr.update(center_of(0, 0));
        let stats = mgr.stats();
        assert_eq!(stats.resident, 4);
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.generation_queue, 2);
        assert_eq!(stats.meshed_this_frame, 1);
        assert_eq!(stats.meshing_queue, 1);

        // Same position: the truncated enqueue continues
        mgr.update(center_of(0, 0));
        let stats = mgr.stats();
        assert_eq!(stats.resident, 8);
        assert_eq!(stats.loaded, 4);

        for _ in 0..40 {
            mgr.update(center_of(0, 0));
        }
        let stats = mgr.stats();
        assert_eq!(stats.loaded, 13);
        assert_eq!(stats.generation_queue, 0);
        assert_eq!(stats.meshing_queue, 0);
    }

    #[test]
    fn test_nearest_chunk_generated_first() {
        let mut cfg = config(3, 4);
        cfg.max_generations_per_frame = 1;
        let mut mgr = manager_with(cfg, Arc::new(FlatGenerator));
        mgr.update(center_of(4, -2));
        assert_eq!(mgr.loaded_coords(), vec![ChunkCoord::new(4, 0, -2)]);
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));

        let pos = IVec3::new(-3, 200, 7);
        let cell = BlockCell::new(BlockType::Glass, 11);
        assert!(mgr.set_block(pos, cell));
        assert_eq!(mgr.get_block(pos), cell);
        assert_eq!(mgr.get_block(pos).metadata(), 11);

        assert_eq!(mgr.get_block(IVec3::new(5, SURFACE as i32, 5)).block_type(), BlockType::Stone);
        assert_eq!(mgr.get_block(IVec3::new(5, SURFACE as i32 + 1, 5)), BlockCell::AIR);
    }

    #[test]
    fn test_unloaded_positions() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let far = IVec3::new(1000, 1, 1000);
        assert_eq!(mgr.get_block(far), BlockCell::AIR);
        assert!(!mgr.set_block(far, BlockType::Stone.into()));
        assert!(!mgr.set_block(IVec3::new(0, -1, 0), BlockType::Stone.into()));
        assert!(!mgr.set_block(IVec3::new(0, 256, 0), BlockType::Stone.into()));
    }

    #[test]
    fn test_set_block_marks_dirty_and_rebuilds() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let origin = ChunkCoord::new(0, 0, 0);
        let before = face_count(&mgr, origin);
        let revision = mgr.chunk(origin).unwrap().mesh_revision();

        assert!(mgr.set_block(IVec3::new(3, SURFACE as i32, 3), BlockCell::AIR));
        assert!(mgr.chunk(origin).unwrap().dirty);

        mgr.update(center_of(0, 0));
        let chunk = mgr.chunk(origin).unwrap();
        assert!(!chunk.dirty);
        assert_eq!(chunk.mesh_revision(), revision + 1);
        drop(chunk);

        // One top face gone; the floor of the hole and its four walls appear
        assert_eq!(face_count(&mgr, origin), before + 4);

        let mesh = mgr.chunk(origin).unwrap().mesh().unwrap().clone();
        let top_y = SURFACE as f32 + 1.0;
        let hole_top = mesh.vertices.chunks(4).any(|q| {
            q[0].normal == [0.0, 1.0, 0.0]
                && q.iter().all(|v| v.position[1] == top_y && (3.0..=4.0).contains(&v.position[0]) && (3.0..=4.0).contains(&v.position[2]))
        });
        assert!(!hole_top);
    }

    #[test]
    fn test_boundary_edit_dirties_neighbor() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let east = ChunkCoord::new(1, 0, 0);
        let revision = mgr.chunk(east).unwrap().mesh_revision();

        assert!(mgr.set_block(IVec3::new(15, SURFACE as i32, 5), BlockCell::AIR));
        assert!(mgr.chunk(east).unwrap().dirty);
        mgr.update(center_of(0, 0));
        assert_eq!(mgr.chunk(east).unwrap().mesh_revision(), revision + 1);
    }

    #[test]
    fn test_set_block_refused_while_meshing() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let origin = ChunkCoord::new(0, 0, 0);
        mgr.chunks.get_mut(&origin).unwrap().transition(ChunkState::Meshing).unwrap();
        assert!(!mgr.set_block(IVec3::new(1, 1, 1), BlockCell::AIR));
        assert_eq!(mgr.get_block(IVec3::new(1, 1, 1)).block_type(), BlockType::Stone);
    }

    #[test]
    fn test_unload_returns_instances_to_pool() {
        let mut mgr = manager(2, 3);
        mgr.update(center_of(0, 0));
        assert!(!mgr.is_loaded(ChunkCoord::new(5, 0, 5)));
        assert!(mgr.is_loaded(ChunkCoord::new(2, 0, 0)));
        let free_before = mgr.pool().free_count();

        // Seen from (-2, 0, 0): (2, 0, 0) is 4 away and (1, 0, +-1) are ~3.16 away
        let mut topology = Vec::new();
        mgr.unload_out_of_range(ChunkCoord::new(-2, 0, 0), &mut topology);
        assert!(!mgr.is_loaded(ChunkCoord::new(2, 0, 0)));
        assert!(mgr.is_loaded(ChunkCoord::new(1, 0, 0)));
        assert_eq!(topology.len(), 3);
        assert_eq!(mgr.pool().free_count(), free_before + 3);
    }

    #[test]
    fn test_update_unloads_within_one_call() {
        let mut mgr = manager(2, 3);
        mgr.update(center_of(0, 0));
        let allocated = mgr.stats().pool_allocated;

        mgr.update(center_of(-2, 0));
        let stats = mgr.stats();
        assert_eq!(stats.unloaded_this_frame, 3);
        for coord in mgr.loaded_coords() {
            assert!(coord.planar_distance(&ChunkCoord::new(-2, 0, 0)) <= 3.0);
        }
        // Eight new chunks, three of them served by recycled instances
        assert_eq!(stats.generated_this_frame, 8);
        assert_eq!(stats.pool_allocated, allocated + 8 - 3);
        assert_eq!(stats.pool_free, 0);
    }

    #[test]
    fn test_hysteresis_keeps_chunks_between_radii() {
        let mut mgr = manager(2, 4);
        mgr.update(center_of(0, 0));
        // (2, 0, 0) is 3 away: outside load radius, inside unload radius
        mgr.update(center_of(-1, 0));
        assert!(mgr.is_loaded(ChunkCoord::new(2, 0, 0)));
        assert_eq!(mgr.stats().unloaded_this_frame, 0);
    }

    #[test]
    fn test_generation_failure_retried() {
        let flaky = ChunkCoord::new(1, 0, 0);
        let generator = Arc::new(FlakyGenerator::new(vec![flaky], false));
        let mut mgr = manager_with(config(1, 2), generator.clone());

        mgr.update(center_of(0, 0));
        assert!(!mgr.is_loaded(flaky));
        assert_eq!(mgr.chunk_state(flaky), None);
        assert_eq!(mgr.stats().generation_failures, 1);
        assert_eq!(mgr.stats().loaded, 4);
        // Failed jobs are not reported as generated work
        assert_eq!(mgr.stats().generated_this_frame, 4);

        mgr.update(center_of(0, 0));
        assert!(mgr.is_loaded(flaky));
        assert_eq!(mgr.stats().loaded, 5);
        assert_eq!(mgr.stats().generated_this_frame, 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_generation_panic_contained() {
        let flaky = ChunkCoord::new(0, 0, -1);
        let mut mgr = manager_with(config(1, 2), Arc::new(FlakyGenerator::new(vec![flaky], true)));
        mgr.update(center_of(0, 0));
        assert!(!mgr.is_loaded(flaky));
        assert_eq!(mgr.stats().generation_failures, 1);
        mgr.update(center_of(0, 0));
        assert!(mgr.is_loaded(flaky));
    }

    #[test]
    fn test_neighbor_links_and_remesh_on_unload() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let origin = ChunkCoord::new(0, 0, 0);
        {
            let chunk = mgr.chunk(origin).unwrap();
            let linked = chunk.neighbors.iter().filter(|n| n.is_some()).count();
            assert_eq!(linked, 4);
        }
        // Loaded neighbours hide the slab's side faces
        let enclosed = face_count(&mgr, origin);
        assert_eq!(enclosed, 2 * CHUNK_WIDTH * CHUNK_DEPTH);

        // From (2, 0, 0) the -X and both Z neighbours are past the unload radius
        mgr.update(center_of(2, 0));
        assert!(!mgr.is_loaded(ChunkCoord::new(-1, 0, 0)));
        assert!(mgr.is_loaded(origin));
        let chunk = mgr.chunk(origin).unwrap();
        assert!(chunk.neighbors.iter().flatten().all(|n| *n != ChunkCoord::new(-1, 0, 0)));
        drop(chunk);
        // Three boundaries are exposed again
        assert_eq!(face_count(&mgr, origin), enclosed + 3 * CHUNK_DEPTH * (SURFACE + 1));
    }

    #[test]
    fn test_mesh_overflow_falls_back_to_truncation() {
        crate::core::logging::init_for_tests();
        let cfg = config(1, 2);
        let mut mgr = ChunkManager::new(
            cfg,
            Arc::new(FlatGenerator),
            Mesher::new(Arc::new(BlockRegistry::builtin()), 64),
            FrustumCuller::new(&CullingConfig::default()),
            ChunkPool::new(16),
        )
        .unwrap();

        mgr.update(center_of(0, 0));
        let stats = mgr.stats();
        assert_eq!(stats.meshing_failures, stats.loaded);
        assert_eq!(mgr.chunk_state(ChunkCoord::new(0, 0, 0)), Some(ChunkState::Ready));
        assert!(mgr.chunk(ChunkCoord::new(0, 0, 0)).unwrap().dirty);

        mgr.update(center_of(0, 0));
        let chunk = mgr.chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        let mesh = chunk.mesh().unwrap();
        assert!(mesh.truncated);
        assert_eq!(mesh.vertex_count(), 64);
        assert!(mesh.validate());
    }

    #[test]
    fn test_stale_mesh_commit_discarded() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let origin = ChunkCoord::new(0, 0, 0);
        assert!(mgr.set_block(IVec3::new(2, 2, 2), BlockCell::AIR));

        mgr.budget.begin_frame();
        let mut jobs = mgr.take_mesh_jobs();
        assert_eq!(mgr.chunk_state(origin), Some(ChunkState::Meshing));
        mgr.build_mesh_jobs(&mut jobs);

        // The chunk leaves the world while its job is in flight
        let (_, chunk) = mgr.chunks.remove(&origin).unwrap();
        mgr.pool.release(chunk);
        mgr.commit_mesh_jobs(jobs);
        assert!(mgr.chunk(origin).is_none());
        assert_eq!(mgr.stats().meshed_this_frame, 0);
    }

    #[test]
    fn test_time_budget_skips_meshing() {
        let mut cfg = config(1, 2);
        cfg.frame_time_budget_ms = Some(0.0);
        let mut mgr = manager_with(cfg, Arc::new(FlatGenerator));
        mgr.update(center_of(0, 0));
        let stats = mgr.stats();
        assert_eq!(stats.loaded, 5);
        assert_eq!(stats.meshed_this_frame, 0);
        assert_eq!(stats.meshing_queue, 5);
    }

    #[test]
    fn test_visible_chunks_respect_distance_and_order() {
        let mut cfg = config(3, 4);
        cfg.parallel = false;
        let pool = ChunkPool::new(64);
        let mut mgr = ChunkManager::new(
            cfg,
            Arc::new(FlatGenerator),
            Mesher::new(Arc::new(BlockRegistry::builtin()), MAX_CHUNK_VERTICES),
            FrustumCuller::new(&CullingConfig {
                max_render_distance: 40.0,
            }),
            pool,
        )
        .unwrap();
        mgr.update(center_of(0, 0));

        let eye = Vec3::new(8.0, 40.0, 8.0);
        let view = glam::Mat4::look_at_rh(eye, eye + Vec3::new(0.0, -0.5, -1.0), Vec3::Y);
        let proj = glam::Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 500.0);
        let ctx = CullingContext::new(view, proj, eye);

        let visible = mgr.visible_chunks(&ctx);
        assert!(!visible.is_empty());
        let mut last = 0.0;
        for v in &visible {
            assert!(FrustumCuller::distance_to(eye, v.coord) <= 40.0);
            assert!(!v.mesh.is_empty());
            let d = eye.distance_squared(v.coord.world_bounds().center());
            assert!(d >= last);
            last = d;
        }
        assert!(visible.iter().any(|v| v.coord == ChunkCoord::new(0, 0, -1)));
        assert!(mgr.culler().stats().culled_by_distance > 0);
    }

    #[test]
    fn test_stats_serialize() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        let json = serde_json::to_string(&mgr.stats()).unwrap();
        assert!(json.contains("\"loaded\":5"));
    }

    #[test]
    fn test_clear_pools_everything() {
        let mut mgr = manager(1, 2);
        mgr.update(center_of(0, 0));
        mgr.clear();
        let stats = mgr.stats();
        assert_eq!(stats.resident, 0);
        assert_eq!(stats.pool_free, 5);
        mgr.update(center_of(0, 0));
        assert_eq!(mgr.stats().loaded, 5);
        assert_eq!(mgr.stats().pool_allocated, 5);
    }

    #[test]
    fn test_far_observer_streams_edge_of_world() {
        use crate::voxel::chunk::MAX_CHUNK_XZ;

        let mut mgr = manager(1, 2);
        mgr.update(Vec3::new(1.0e12, 100.0, 0.0));
        assert_eq!(mgr.observer_chunk(), Some(ChunkCoord::new(MAX_CHUNK_XZ, 0, 0)));
        assert_eq!(mgr.stats().loaded, 5);
        assert!(mgr.is_loaded(ChunkCoord::new(MAX_CHUNK_XZ + 1, 0, 0)));

        let edge = ChunkCoord::new(MAX_CHUNK_XZ, 0, 0).block_origin();
        assert_eq!(mgr.get_block(edge + IVec3::new(0, 2, 0)), BlockType::Stone.into());

        // Jumping across the whole world unloads everything in one call
        mgr.update(Vec3::new(f32::NEG_INFINITY, 100.0, f32::INFINITY));
        let stats = mgr.stats();
        assert_eq!(stats.unloaded_this_frame, 5);
        assert_eq!(stats.observer_chunk, Some(ChunkCoord::new(-MAX_CHUNK_XZ, 0, MAX_CHUNK_XZ)));
        assert_eq!(stats.loaded, 5);
    }

    /// Whether `mesh` holds the +Y quad of the block at (x, y, z)
    fn has_top_quad(mesh: &ChunkMesh, x: i32, y: i32, z: i32) -> bool {
        let (x, top, z) = (x as f32, (y + 1) as f32, z as f32);
        mesh.vertices.chunks(4).any(|quad| {
            quad.iter().all(|v| {
                v.normal == [0.0, 1.0, 0.0]
                    && v.position[1] == top
                    && (x..=x + 1.0).contains(&v.position[0])
                    && (z..=z + 1.0).contains(&v.position[2])
            })
        })
    }

    fn drain(mgr: &mut ChunkManager, observer: Vec3) {
        for _ in 0..64 {
            mgr.update(observer);
            let stats = mgr.stats();
            if stats.generation_queue == 0 && stats.meshing_queue == 0 {
                return;
            }
        }
        panic!("streaming queues never drained: {:?}", mgr.stats());
    }

    #[test]
    fn test_generated_terrain_meshes_and_edits() {
        crate::core::logging::init_for_tests();
        let mut config = EngineConfig::default();
        config.terrain.seed = 42;
        config.streaming.load_radius = 2;
        config.streaming.unload_radius = 3;
        let mut mgr = ChunkManager::from_config(&config).unwrap();
        let terrain = TerrainGenerator::new(config.terrain.clone());

        let observer = center_of(0, 0);
        drain(&mut mgr, observer);
        assert_eq!(mgr.stats().loaded, 13);
        for coord in mgr.loaded_coords() {
            let chunk = mgr.chunk(coord).unwrap();
            assert_eq!(chunk.state(), ChunkState::Ready);
            let mesh = chunk.mesh().unwrap();
            assert!(mesh.validate());
            assert!(!mesh.truncated, "{:?} truncated", coord);
            assert!(!mesh.is_empty());
        }

        let h = terrain.height_at(0, 0);
        let surface = IVec3::new(0, h, 0);
        assert!(!mgr.get_block(surface).is_air());
        let origin = ChunkCoord::new(0, 0, 0);
        assert!(has_top_quad(mgr.chunk(origin).unwrap().mesh().unwrap(), 0, h, 0));

        assert!(mgr.set_block(surface, BlockCell::AIR));
        assert!(mgr.chunk(origin).unwrap().dirty);
        drain(&mut mgr, observer);

        let chunk = mgr.chunk(origin).unwrap();
        assert!(!chunk.dirty);
        let mesh = chunk.mesh().unwrap();
        assert!(mesh.validate());
        assert!(!has_top_quad(mesh, 0, h, 0));
        assert!(mgr.get_block(surface).is_air());
    }
}
