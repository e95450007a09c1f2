//! Biome system based on temperature and humidity

use serde::{Deserialize, Serialize};

use super::noise::{Fractal, NoiseField};
use crate::voxel::block::BlockType;

/// Biome types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Biome {
    Plains,
    Desert,
    Forest,
    Taiga,
    Jungle,
    Tundra,
    Mountains,
    Ocean,
}

impl Biome {
    pub const ALL: [Biome; 8] = [
        Biome::Plains,
        Biome::Desert,
        Biome::Forest,
        Biome::Taiga,
        Biome::Jungle,
        Biome::Tundra,
        Biome::Mountains,
        Biome::Ocean,
    ];

    /// Block placed at the surface height
    pub fn surface_block(&self) -> BlockType {
        match self {
            Biome::Plains | Biome::Forest => BlockType::Grass,
            Biome::Desert => BlockType::Sand,
            Biome::Taiga => BlockType::Podzol,
            Biome::Jungle => BlockType::JungleGrass,
            Biome::Tundra => BlockType::Snow,
            Biome::Mountains => BlockType::Stone,
            Biome::Ocean => BlockType::Sand,
        }
    }

    /// Block filling the band just below the surface
    pub fn subsurface_block(&self) -> BlockType {
        match self {
            Biome::Desert => BlockType::Sandstone,
            Biome::Mountains => BlockType::Stone,
            Biome::Ocean => BlockType::Gravel,
            _ => BlockType::Dirt,
        }
    }
}

/// Classify a biome from temperature and humidity, both in [-1, 1].
///
/// Temperature picks the band first, humidity refines it.
pub fn classify(temperature: f32, humidity: f32) -> Biome {
    if temperature < -0.35 {
        Biome::Tundra
    } else if temperature < -0.15 {
        Biome::Taiga
    } else if temperature > 0.35 {
        if humidity > 0.1 { Biome::Jungle } else { Biome::Desert }
    } else if humidity > 0.35 {
        Biome::Ocean
    } else if humidity > 0.1 {
        Biome::Forest
    } else if humidity < -0.35 {
        Biome::Mountains
    } else {
        Biome::Plains
    }
}

/// Temperature/humidity fields over the XZ plane
pub struct BiomeMap {
    field: NoiseField,
    frequency: f32,
    humidity_offset: f32,
    fractal: Fractal,
}

impl BiomeMap {
    /// Create a biome map. Both fields read `field`; humidity samples it at an
    /// offset position so the two stay decorrelated.
    pub fn new(field: NoiseField, frequency: f32, humidity_offset: f32) -> Self {
        Self {
            field,
            frequency,
            humidity_offset,
            fractal: Fractal {
                octaves: 3,
                ..Default::default()
            },
        }
    }

    /// Temperature at world position (-1 to 1, cold to hot)
    pub fn temperature_at(&self, x: f32, z: f32) -> f32 {
        self.field.fractal2(x, z, self.frequency, self.fractal)
    }

    /// Humidity at world position (-1 to 1, dry to wet)
    pub fn humidity_at(&self, x: f32, z: f32) -> f32 {
        self.field.fractal2(
            x + self.humidity_offset,
            z + self.humidity_offset,
            self.frequency,
            self.fractal,
        )
    }

    pub fn biome_at(&self, x: f32, z: f32) -> Biome {
        classify(self.temperature_at(x, z), self.humidity_at(x, z))
    }
}
