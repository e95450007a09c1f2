//! Engine configuration loaded from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Error;
use super::types::Result;
use crate::render::culling::CullingConfig;
use crate::render::mesher::MesherConfig;
use crate::streaming::StreamingConfig;
use crate::terrain::generator::TerrainParams;
use crate::voxel::registry::{BlockDefinitionOverride, BlockRegistry};

/// Top-level configuration. Every section falls back to its defaults, so a
/// file only needs the fields it changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub terrain: TerrainParams,
    pub streaming: StreamingConfig,
    pub culling: CullingConfig,
    pub mesher: MesherConfig,
    /// Changes to the built-in block registry
    pub blocks: Option<Vec<BlockDefinitionOverride>>,
}

impl EngineConfig {
    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.streaming.validate()?;

        let t = &self.terrain;
        if t.octaves == 0 || t.cave_octaves == 0 {
            return Err(Error::InvalidConfig("octave counts must be at least 1".into()));
        }
        if t.min_height >= t.max_height {
            return Err(Error::InvalidConfig(format!(
                "min_height ({}) must be below max_height ({})",
                t.min_height, t.max_height
            )));
        }
        if self.mesher.vertex_budget < 4 {
            return Err(Error::InvalidConfig("vertex_budget must fit at least one quad".into()));
        }
        if !(self.culling.max_render_distance > 0.0) {
            return Err(Error::InvalidConfig("max_render_distance must be positive".into()));
        }
        Ok(())
    }

    /// Block registry with this config's overrides applied
    pub fn block_registry(&self) -> BlockRegistry {
        match &self.blocks {
            Some(overrides) => BlockRegistry::with_overrides(overrides),
            None => BlockRegistry::builtin(),
        }
    }
}
