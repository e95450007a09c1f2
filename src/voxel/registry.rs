//! Block registry: per-type rendering flags and base colours
//!
//! The registry is the single authority on what a type id means. Cells whose
//! id has no definition here behave exactly like air, both for meshing and for
//! face occlusion.

use serde::{Deserialize, Serialize};

use super::block::{BlockCell, BlockType};

/// Rendering properties of one block type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    /// Participates in collision and hides faces behind it
    pub solid: bool,
    /// Lets neighbouring faces show through
    pub transparent: bool,
    /// Linear RGB base colour
    pub color: [f32; 3],
}

impl BlockDefinition {
    fn new(name: &str, solid: bool, transparent: bool, color: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            solid,
            transparent,
            color,
        }
    }

    /// Whether a face next to this block is hidden by it
    pub fn is_opaque(&self) -> bool {
        self.solid && !self.transparent
    }
}

/// Partial change to a built-in definition, read from configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDefinitionOverride {
    pub block: BlockType,
    pub solid: Option<bool>,
    pub transparent: Option<bool>,
    pub color: Option<[f32; 3]>,
    /// Drop the definition entirely; the id then resolves to air
    pub removed: bool,
}

/// Maps type ids to definitions
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    definitions: Vec<Option<BlockDefinition>>,
    air: BlockDefinition,
}

impl BlockRegistry {
    /// The built-in block set
    pub fn builtin() -> Self {
        let air = BlockDefinition::new("air", false, true, [0.0, 0.0, 0.0]);
        let definitions = BlockType::ALL
            .iter()
            .map(|&block| {
                Some(match block {
                    BlockType::Air => air.clone(),
                    BlockType::Stone => BlockDefinition::new("stone", true, false, [0.50, 0.50, 0.50]),
                    BlockType::Bedrock => BlockDefinition::new("bedrock", true, false, [0.20, 0.20, 0.22]),
                    BlockType::Dirt => BlockDefinition::new("dirt", true, false, [0.45, 0.32, 0.20]),
                    BlockType::Grass => BlockDefinition::new("grass", true, false, [0.35, 0.65, 0.25]),
                    BlockType::Sand => BlockDefinition::new("sand", true, false, [0.93, 0.84, 0.62]),
                    BlockType::Sandstone => BlockDefinition::new("sandstone", true, false, [0.85, 0.75, 0.55]),
                    BlockType::Gravel => BlockDefinition::new("gravel", true, false, [0.55, 0.52, 0.50]),
                    BlockType::Snow => BlockDefinition::new("snow", true, false, [0.95, 0.97, 1.00]),
                    BlockType::Podzol => BlockDefinition::new("podzol", true, false, [0.40, 0.30, 0.18]),
                    BlockType::JungleGrass => BlockDefinition::new("jungle_grass", true, false, [0.20, 0.60, 0.15]),
                    BlockType::Glass => BlockDefinition::new("glass", true, true, [0.80, 0.90, 0.95]),
                })
            })
            .collect();

        Self { definitions, air }
    }

    /// Built-in set with configuration overrides applied in order
    pub fn with_overrides(overrides: &[BlockDefinitionOverride]) -> Self {
        let mut registry = Self::builtin();
        for o in overrides {
            registry.apply_override(o);
        }
        registry
    }

    pub fn apply_override(&mut self, o: &BlockDefinitionOverride) {
        if o.block.is_air() {
            log::warn!("Ignoring override for air; air is always registered");
            return;
        }
        let slot = &mut self.definitions[o.block.id() as usize];
        if o.removed {
            *slot = None;
            return;
        }
        let mut def = slot
            .take()
            .unwrap_or_else(|| BlockDefinition::new(&format!("{:?}", o.block).to_lowercase(), true, false, [1.0; 3]));
        if let Some(solid) = o.solid {
            def.solid = solid;
        }
        if let Some(transparent) = o.transparent {
            def.transparent = transparent;
        }
        if let Some(color) = o.color {
            def.color = color;
        }
        *slot = Some(def);
    }

    pub fn is_registered(&self, type_id: u16) -> bool {
        matches!(self.definitions.get(type_id as usize), Some(Some(_)))
    }

    /// Block type of a cell after registry lookup (unregistered ⇒ air)
    pub fn resolve_type(&self, cell: BlockCell) -> BlockType {
        if self.is_registered(cell.type_id()) {
            cell.block_type()
        } else {
            BlockType::Air
        }
    }

    /// Definition for a cell (unregistered ⇒ the air definition)
    pub fn resolve(&self, cell: BlockCell) -> &BlockDefinition {
        match self.definitions.get(cell.type_id() as usize) {
            Some(Some(def)) => def,
            _ => &self.air,
        }
    }

    pub fn get(&self, block: BlockType) -> &BlockDefinition {
        self.resolve(BlockCell::from(block))
    }

    /// Whether the face of `block` towards `neighbor` must be drawn
    pub fn face_visible(&self, block: BlockType, neighbor: BlockCell) -> bool {
        let neighbor_type = self.resolve_type(neighbor);
        if neighbor_type.is_air() {
            return true;
        }
        let def = self.get(neighbor_type);
        !def.is_opaque() && neighbor_type != block
    }

    pub fn len(&self) -> usize {
        self.definitions.iter().filter(|d| d.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
