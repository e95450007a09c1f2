//! Block types and the packed 16-bit block cell

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Bits reserved for the block type identifier
pub const TYPE_BITS: u16 = 12;
/// Mask selecting the type identifier from a packed cell
pub const TYPE_MASK: u16 = (1 << TYPE_BITS) - 1;
/// Largest metadata value (4 bits)
pub const MAX_METADATA: u8 = 0x0F;

/// Known block types. Discriminants are the on-disk/in-memory type ids.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockType {
    #[default]
    Air = 0,
    Stone = 1,
    Bedrock = 2,
    Dirt = 3,
    Grass = 4,
    Sand = 5,
    Sandstone = 6,
    Gravel = 7,
    Snow = 8,
    Podzol = 9,
    JungleGrass = 10,
    Glass = 11,
}

impl BlockType {
    /// All block types, in id order
    pub const ALL: [BlockType; 12] = [
        BlockType::Air,
        BlockType::Stone,
        BlockType::Bedrock,
        BlockType::Dirt,
        BlockType::Grass,
        BlockType::Sand,
        BlockType::Sandstone,
        BlockType::Gravel,
        BlockType::Snow,
        BlockType::Podzol,
        BlockType::JungleGrass,
        BlockType::Glass,
    ];

    /// Numeric type id
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a type by id. Returns `None` for ids no variant uses.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn is_air(self) -> bool {
        self == BlockType::Air
    }
}

/// One block cell packed into 16 bits: low 12 bits type id, high 4 bits metadata.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BlockCell(u16);

impl BlockCell {
    /// Empty/air cell
    pub const AIR: BlockCell = BlockCell(0);

    /// Pack a block type with metadata. Metadata above 15 is masked.
    pub fn new(block: BlockType, metadata: u8) -> Self {
        Self::from_parts(block.id(), metadata)
    }

    /// Pack a raw type id with metadata. Both are masked to their bit widths.
    pub fn from_parts(type_id: u16, metadata: u8) -> Self {
        let meta = (metadata & MAX_METADATA) as u16;
        Self((type_id & TYPE_MASK) | (meta << TYPE_BITS))
    }

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    /// The 12-bit type identifier, registered or not
    pub fn type_id(self) -> u16 {
        self.0 & TYPE_MASK
    }

    pub fn metadata(self) -> u8 {
        (self.0 >> TYPE_BITS) as u8
    }

    /// Decoded block type; unknown ids decode as air
    pub fn block_type(self) -> BlockType {
        BlockType::from_id(self.type_id()).unwrap_or(BlockType::Air)
    }

    pub fn is_air(self) -> bool {
        self.block_type().is_air()
    }
}

impl From<BlockType> for BlockCell {
    fn from(block: BlockType) -> Self {
        BlockCell::new(block, 0)
    }
}
