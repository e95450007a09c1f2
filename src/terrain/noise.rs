//! Seeded Perlin fields and fractal sums
//!
//! Each field wraps a `noise::Perlin` basis. The 64-bit world seed feeds a
//! ChaCha stream that hands out the 32-bit seeds of the individual fields, so
//! height, caves and biomes never share a permutation table.

use noise::{NoiseFn, Perlin};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Parameters of a fractal (octave) sum
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fractal {
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
}

impl Default for Fractal {
    fn default() -> Self {
        Self {
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Deterministic source of per-field seeds
pub struct SeedStream {
    rng: ChaCha8Rng,
}

impl SeedStream {
    pub fn new(world_seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(world_seed),
        }
    }

    /// Seed for the next noise field
    pub fn next_seed(&mut self) -> u32 {
        self.rng.next_u32()
    }
}

/// One Perlin field with octave summation
#[derive(Clone)]
pub struct NoiseField {
    perlin: Perlin,
    seed: u32,
}

impl NoiseField {
    pub fn new(seed: u32) -> Self {
        Self {
            perlin: Perlin::new(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Single-octave 2D sample in roughly [-1, 1]
    pub fn get2(&self, x: f64, y: f64) -> f32 {
        self.perlin.get([x, y]) as f32
    }

    /// Single-octave 3D sample in roughly [-1, 1]
    pub fn get3(&self, x: f64, y: f64, z: f64) -> f32 {
        self.perlin.get([x, y, z]) as f32
    }

    /// Octave sum of 2D noise, normalised by total amplitude
    pub fn fractal2(&self, x: f32, y: f32, frequency: f32, fractal: Fractal) -> f32 {
        octave_sum(fractal, frequency, |freq| {
            self.perlin.get([x as f64 * freq, y as f64 * freq])
        })
    }

    /// Octave sum of 3D noise, normalised by total amplitude
    pub fn fractal3(&self, x: f32, y: f32, z: f32, frequency: f32, fractal: Fractal) -> f32 {
        octave_sum(fractal, frequency, |freq| {
            self.perlin.get([x as f64 * freq, y as f64 * freq, z as f64 * freq])
        })
    }
}

/// Σ sample(freq_i) * amp_i / Σ amp_i, zero when there are no octaves
fn octave_sum(fractal: Fractal, frequency: f32, sample: impl Fn(f64) -> f64) -> f32 {
    let mut sum = 0.0;
    let mut amp = 1.0;
    let mut total = 0.0;
    let mut freq = frequency as f64;
    for _ in 0..fractal.octaves {
        sum += sample(freq) * amp;
        total += amp;
        amp *= fractal.persistence as f64;
        freq *= fractal.lacunarity as f64;
    }
    if total > 0.0 { (sum / total) as f32 } else { 0.0 }
}
