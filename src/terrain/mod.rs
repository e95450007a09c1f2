//! Procedural terrain generation

pub mod noise;
pub mod generator;
pub mod biome;

pub use noise::{Fractal, NoiseField, SeedStream};
pub use generator::{ChunkGenerator, TerrainGenerator, TerrainParams, TerrainSample};
pub use biome::{Biome, BiomeMap};
