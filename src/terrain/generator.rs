//! Noise-based procedural terrain generation

use serde::{Deserialize, Serialize};

use super::biome::{Biome, BiomeMap};
use super::noise::{Fractal, NoiseField, SeedStream};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::block::{BlockCell, BlockType};
use crate::voxel::chunk::{Chunk, ChunkCoord, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};

/// Parameters controlling terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u64,
    pub height_frequency: f32,
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    pub min_height: i32,
    pub max_height: i32,
    pub biome_frequency: f32,
    /// Offset applied to humidity samples
    pub humidity_offset: f32,
    pub cave_frequency: f32,
    pub cave_octaves: u32,
    /// Cells whose cave noise exceeds this become air
    pub cave_threshold: f32,
    /// Caves are only carved below this height
    pub cave_max_y: i32,
    pub bedrock_layers: i32,
    /// Thickness of the biome sub-surface band
    pub subsurface_depth: i32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            height_frequency: 0.005,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            min_height: 0,
            max_height: CHUNK_HEIGHT as i32,
            biome_frequency: 0.002,
            humidity_offset: 10_000.0,
            cave_frequency: 0.02,
            cave_octaves: 3,
            cave_threshold: 0.6,
            cave_max_y: 50,
            bedrock_layers: 5,
            subsurface_depth: 4,
        }
    }
}

/// Height and biome of one world column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerrainSample {
    pub height: i32,
    pub biome: Biome,
}

/// Fills chunks with block data
///
/// Implementations must be pure in the chunk coordinate so the manager can run
/// them concurrently for different chunks.
pub trait ChunkGenerator: Send + Sync {
    fn generate(&self, coord: ChunkCoord, chunk: &mut Chunk) -> Result<()>;
}

/// Procedural terrain generator over fractal Perlin fields
pub struct TerrainGenerator {
    params: TerrainParams,
    height_noise: NoiseField,
    cave_noise: NoiseField,
    biomes: BiomeMap,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        // Field seeds are drawn in a fixed order; changing it reshapes every world
        let mut seeds = SeedStream::new(params.seed);
        let height_noise = NoiseField::new(seeds.next_seed());
        let cave_noise = NoiseField::new(seeds.next_seed());
        let biomes = BiomeMap::new(
            NoiseField::new(seeds.next_seed()),
            params.biome_frequency,
            params.humidity_offset,
        );
        log::debug!("Terrain generator seeded with {}", params.seed);

        Self {
            params,
            height_noise,
            cave_noise,
            biomes,
        }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    fn height_fractal(&self) -> Fractal {
        Fractal {
            octaves: self.params.octaves,
            persistence: self.params.persistence,
            lacunarity: self.params.lacunarity,
        }
    }

    /// Surface height of the column at (x, z)
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let p = &self.params;
        let n = self
            .height_noise
            .fractal2(x as f32, z as f32, p.height_frequency, self.height_fractal());
        let span = (p.max_height - p.min_height) as f32;
        let h = p.min_height as f32 + (n + 1.0) * 0.5 * span;
        let top = p.max_height.min(CHUNK_HEIGHT as i32 - 1);
        (h.floor() as i32).clamp(p.min_height.max(0), top)
    }

    pub fn biome_at(&self, x: i32, z: i32) -> Biome {
        self.biomes.biome_at(x as f32, z as f32)
    }

    pub fn sample(&self, x: i32, z: i32) -> TerrainSample {
        TerrainSample {
            height: self.height_at(x, z),
            biome: self.biome_at(x, z),
        }
    }

    /// Raw cave noise at a world cell
    pub fn cave_value(&self, x: i32, y: i32, z: i32) -> f32 {
        let fractal = Fractal {
            octaves: self.params.cave_octaves,
            persistence: self.params.persistence,
            lacunarity: self.params.lacunarity,
        };
        self.cave_noise
            .fractal3(x as f32, y as f32, z as f32, self.params.cave_frequency, fractal)
    }

    /// Whether the cell is carved to air under a column of height `height`
    pub fn is_cave(&self, x: i32, y: i32, z: i32, height: i32) -> bool {
        let p = &self.params;
        y > p.bedrock_layers
            && y < height
            && y < p.cave_max_y
            && self.cave_value(x, y, z) > p.cave_threshold
    }

    /// Block at (x, y, z) for a column described by `sample`
    pub fn block_at(&self, x: i32, y: i32, z: i32, sample: TerrainSample) -> BlockType {
        let p = &self.params;
        let h = sample.height;
        if y > h || y < 0 {
            return BlockType::Air;
        }
        if y < p.bedrock_layers {
            return BlockType::Bedrock;
        }
        if self.is_cave(x, y, z, h) {
            return BlockType::Air;
        }
        if y == h {
            sample.biome.surface_block()
        } else if y >= h - p.subsurface_depth {
            sample.biome.subsurface_block()
        } else {
            BlockType::Stone
        }
    }

    /// Allocate and fill a chunk
    pub fn generate_chunk(&self, coord: ChunkCoord) -> Result<Chunk> {
        let mut chunk = Chunk::new(coord);
        self.generate(coord, &mut chunk)?;
        Ok(chunk)
    }
}

impl ChunkGenerator for TerrainGenerator {
    fn generate(&self, coord: ChunkCoord, chunk: &mut Chunk) -> Result<()> {
        if coord.y != 0 {
            return Err(Error::Generation {
                coord,
                reason: format!("world is one chunk tall, got y = {}", coord.y),
            });
        }

        let origin = coord.block_origin();
        for lz in 0..CHUNK_DEPTH {
            for lx in 0..CHUNK_WIDTH {
                let wx = origin.x + lx as i32;
                let wz = origin.z + lz as i32;
                let sample = self.sample(wx, wz);
                for ly in 0..CHUNK_HEIGHT {
                    let block = self.block_at(wx, ly as i32, wz, sample);
                    chunk.write(lx, ly, lz, BlockCell::from(block));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64) -> TerrainGenerator {
        TerrainGenerator::new(TerrainParams {
            seed,
            ..Default::default()
        })
    }

    #[test]
    fn test_height_deterministic() {
        let a = generator(42);
        let b = generator(42);
        let h = a.height_at(0, 0);
        assert_eq!(h, a.height_at(0, 0));
        assert_eq!(h, b.height_at(0, 0));
        assert_eq!(a.biome_at(0, 0), b.biome_at(0, 0));
        assert_eq!(a.sample(-517, 90), b.sample(-517, 90));
    }

    #[test]
    fn test_height_in_range() {
        let gen_ = generator(7);
        for i in -50..50 {
            let h = gen_.height_at(i * 37, i * -19);
            assert!((0..CHUNK_HEIGHT as i32).contains(&h));
        }
    }

    #[test]
    fn test_column_layers() {
        let gen_ = TerrainGenerator::new(TerrainParams {
            seed: 3,
            cave_threshold: 2.0, // no caves
            ..Default::default()
        });
        let sample = gen_.sample(10, 10);
        let h = sample.height;
        assert!(h > 10, "test assumes terrain above the bedrock band");

        for y in 0..5 {
            assert_eq!(gen_.block_at(10, y, 10, sample), BlockType::Bedrock);
        }
        assert_eq!(gen_.block_at(10, h - 5, 10, sample), BlockType::Stone);
        assert_eq!(gen_.block_at(10, h - 1, 10, sample), sample.biome.subsurface_block());
        assert_eq!(gen_.block_at(10, h, 10, sample), sample.biome.surface_block());
        assert_eq!(gen_.block_at(10, h + 1, 10, sample), BlockType::Air);
    }

    #[test]
    fn test_caves_respect_bounds() {
        let gen_ = TerrainGenerator::new(TerrainParams {
            seed: 5,
            cave_threshold: -2.0, // every eligible cell carves
            ..Default::default()
        });
        assert!(!gen_.is_cave(0, 5, 0, 100));
        assert!(gen_.is_cave(0, 6, 0, 100));
        assert!(gen_.is_cave(0, 49, 0, 100));
        assert!(!gen_.is_cave(0, 50, 0, 100));
        assert!(!gen_.is_cave(0, 30, 0, 30));
    }

    #[test]
    fn test_cave_noise_above_threshold_carves_air() {
        let gen_ = TerrainGenerator::new(TerrainParams {
            seed: 42,
            cave_threshold: 0.3,
            ..Default::default()
        });
        let chunk = gen_.generate_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        for z in 0..CHUNK_DEPTH as i32 {
            for x in 0..CHUNK_WIDTH as i32 {
                let h = gen_.height_at(x, z);
                if h <= 30 {
                    continue;
                }
                let cell = chunk.get(x as usize, 30, z as usize);
                if gen_.cave_value(x, 30, z) > 0.3 {
                    assert!(cell.is_air());
                } else {
                    assert!(!cell.is_air());
                }
            }
        }
    }

    #[test]
    fn test_generate_fills_chunk() {
        let gen_ = generator(42);
        let chunk = gen_.generate_chunk(ChunkCoord::new(2, 0, -3)).unwrap();
        let origin = ChunkCoord::new(2, 0, -3).block_origin();
        let h = gen_.height_at(origin.x, origin.z) as usize;
        assert!(!chunk.get(0, 0, 0).is_air());
        assert!(h + 1 >= CHUNK_HEIGHT || chunk.get(0, h + 1, 0).is_air());
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_rejects_vertical_chunks() {
        let gen_ = generator(1);
        let mut chunk = Chunk::new(ChunkCoord::new(0, 1, 0));
        let err = gen_.generate(ChunkCoord::new(0, 1, 0), &mut chunk).unwrap_err();
        assert!(matches!(err, Error::Generation { .. }));
    }
}
