//! CPU-side chunk culling: distance cutoff, bounding sphere, then AABB

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::camera::Camera;
use crate::math::{Aabb, Frustum};
use crate::voxel::chunk::ChunkCoord;

/// Culling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Chunks whose column origin is further than this (world units) are dropped
    pub max_render_distance: f32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            max_render_distance: 160.0,
        }
    }
}

/// Camera state for one culling pass
#[derive(Clone, Copy, Debug)]
pub struct CullingContext {
    pub frustum: Frustum,
    pub camera_position: Vec3,
}

impl CullingContext {
    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            frustum: Frustum::from_view_and_projection(&view, &projection),
            camera_position,
        }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        Self::new(camera.view_matrix(), camera.projection_matrix(), camera.position)
    }
}

/// Counters for the current query batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CullStats {
    pub tested: u32,
    pub culled_by_distance: u32,
    pub culled_by_frustum: u32,
    pub visible: u32,
}

#[derive(Clone, Copy, Debug)]
struct ChunkBounds {
    aabb: Aabb,
    center: Vec3,
    radius: f32,
}

impl ChunkBounds {
    fn of(coord: ChunkCoord) -> Self {
        let aabb = coord.world_bounds();
        Self {
            aabb,
            center: aabb.center(),
            radius: aabb.bounding_radius(),
        }
    }
}

/// Per-chunk visibility tests with cached bounding volumes
pub struct FrustumCuller {
    max_render_distance: f32,
    bounds: HashMap<ChunkCoord, ChunkBounds>,
    stats: CullStats,
}

impl FrustumCuller {
    pub fn new(config: &CullingConfig) -> Self {
        Self {
            max_render_distance: config.max_render_distance,
            bounds: HashMap::new(),
            stats: CullStats::default(),
        }
    }

    pub fn max_render_distance(&self) -> f32 {
        self.max_render_distance
    }

    pub fn set_max_render_distance(&mut self, distance: f32) {
        self.max_render_distance = distance;
    }

    /// Reset the counters for a new query batch
    pub fn begin_batch(&mut self) {
        self.stats = CullStats::default();
    }

    pub fn stats(&self) -> &CullStats {
        &self.stats
    }

    /// Horizontal distance from the camera to the chunk's column origin
    pub fn distance_to(camera_position: Vec3, coord: ChunkCoord) -> f32 {
        let origin = coord.world_origin();
        let dx = camera_position.x - origin.x;
        let dz = camera_position.z - origin.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Distance cutoff, then sphere, then AABB. Counts into the batch stats.
    pub fn is_chunk_visible(&mut self, ctx: &CullingContext, coord: ChunkCoord) -> bool {
        self.stats.tested += 1;

        if Self::distance_to(ctx.camera_position, coord) > self.max_render_distance {
            self.stats.culled_by_distance += 1;
            return false;
        }

        let bounds = *self.bounds.entry(coord).or_insert_with(|| ChunkBounds::of(coord));
        if !ctx.frustum.intersects_sphere(bounds.center, bounds.radius)
            || !ctx.frustum.intersects_aabb(&bounds.aabb)
        {
            self.stats.culled_by_frustum += 1;
            return false;
        }

        self.stats.visible += 1;
        true
    }

    /// Drop the cached bounds of an unloaded chunk
    pub fn invalidate(&mut self, coord: ChunkCoord) {
        self.bounds.remove(&coord);
    }

    pub fn cached_bounds(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_point_visible(&self, ctx: &CullingContext, point: Vec3) -> bool {
        ctx.frustum.contains_point(point)
    }

    pub fn is_sphere_visible(&self, ctx: &CullingContext, center: Vec3, radius: f32) -> bool {
        ctx.frustum.intersects_sphere(center, radius)
    }

    pub fn is_box_visible(&self, ctx: &CullingContext, aabb: &Aabb) -> bool {
        ctx.frustum.intersects_aabb(aabb)
    }

    /// Filter coordinates and sort the survivors front to back
    pub fn cull_and_sort(&mut self, ctx: &CullingContext, coords: impl IntoIterator<Item = ChunkCoord>) -> Vec<ChunkCoord> {
        self.begin_batch();
        let mut keyed: Vec<(f32, ChunkCoord)> = coords
            .into_iter()
            .filter(|&c| self.is_chunk_visible(ctx, c))
            .map(|c| (ctx.camera_position.distance_squared(c.world_bounds().center()), c))
            .collect();
        keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        keyed.into_iter().map(|(_, c)| c).collect()
    }
}
