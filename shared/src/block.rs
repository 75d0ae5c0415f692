//! Block registry shared by every tick context
//!
//! The registry is loaded once and handed out behind an `Arc`; nothing in the
//! engine reaches for a global.

use serde::{Deserialize, Serialize};

/// Identifies a block type (and the item produced when it is broken).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockType(pub u16);

impl BlockType {
    pub const AIR: BlockType = BlockType(0);
    pub const STONE: BlockType = BlockType(1);
    pub const DIRT: BlockType = BlockType(2);
    pub const SAND: BlockType = BlockType(3);
    pub const WATER: BlockType = BlockType(4);
    pub const LAMP: BlockType = BlockType(5);
    pub const SWITCH: BlockType = BlockType(6);
    pub const WIRE: BlockType = BlockType(7);
    pub const CHEST: BlockType = BlockType(8);
    pub const LAVA: BlockType = BlockType(9);
}

/// Static properties of a block type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    /// Entities cannot pass through solid blocks.
    pub solid: bool,
    /// Opaque blocks stop light.
    pub opaque: bool,
    pub light_emission: u8,
    pub logic_source: bool,
    pub conducts_logic: bool,
    /// Falls when the block below is not solid.
    pub falls: bool,
    /// Entities with their head inside a liquid lose breath.
    pub liquid: bool,
    /// Damage per second to entities standing in the block.
    pub contact_damage: u8,
    /// Zero means the block cannot hold items.
    pub inventory_capacity: u32,
    /// Accumulated damage required to break the block; zero is unbreakable.
    pub toughness: u16,
}

impl BlockDefinition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            solid: true,
            opaque: true,
            light_emission: 0,
            logic_source: false,
            conducts_logic: false,
            falls: false,
            liquid: false,
            contact_damage: 0,
            inventory_capacity: 0,
            toughness: 100,
        }
    }

    fn passable(mut self) -> Self {
        self.solid = false;
        self.opaque = false;
        self
    }
}

/// Immutable registry of block definitions indexed by `BlockType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    blocks: Vec<BlockDefinition>,
}

impl Environment {
    pub fn new(blocks: Vec<BlockDefinition>) -> Self {
        assert!(!blocks.is_empty(), "registry must define air at index 0");
        Self { blocks }
    }

    /// A small registry covering every block behaviour the engine knows about.
    pub fn standard() -> Self {
        let mut air = BlockDefinition::new("air").passable();
        air.toughness = 0;

        let stone = BlockDefinition::new("stone");
        let mut dirt = BlockDefinition::new("dirt");
        dirt.toughness = 40;
        let mut sand = BlockDefinition::new("sand");
        sand.toughness = 30;
        sand.falls = true;

        let mut water = BlockDefinition::new("water").passable();
        water.liquid = true;
        water.toughness = 0;

        let mut lamp = BlockDefinition::new("lamp");
        lamp.light_emission = 15;
        lamp.toughness = 20;

        let mut switch = BlockDefinition::new("switch").passable();
        switch.logic_source = true;
        switch.toughness = 10;

        let mut wire = BlockDefinition::new("wire").passable();
        wire.conducts_logic = true;
        wire.toughness = 10;

        let mut chest = BlockDefinition::new("chest");
        chest.inventory_capacity = 64;
        chest.toughness = 50;

        let mut lava = BlockDefinition::new("lava").passable();
        lava.liquid = true;
        lava.light_emission = 15;
        lava.contact_damage = 10;
        lava.toughness = 0;

        Self::new(vec![air, stone, dirt, sand, water, lamp, switch, wire, chest, lava])
    }

    /// Definition of `block`; unknown types panic since they can only come from a corrupt world.
    pub fn block(&self, block: BlockType) -> &BlockDefinition {
        match self.blocks.get(block.0 as usize) {
            Some(definition) => definition,
            None => panic!("unknown block type {}", block.0),
        }
    }

    pub fn is_solid(&self, block: BlockType) -> bool {
        self.block(block).solid
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_shapes() {
        let env = Environment::standard();
        assert!(!env.is_solid(BlockType::AIR));
        assert!(env.is_solid(BlockType::STONE));
        assert!(env.block(BlockType::SAND).falls);
        assert!(env.block(BlockType::WATER).liquid);
        assert_eq!(env.block(BlockType::LAMP).light_emission, 15);
        assert!(env.block(BlockType::WIRE).conducts_logic);
        assert_eq!(env.block(BlockType::CHEST).inventory_capacity, 64);
        assert_eq!(env.block_count(), 10);
    }

    #[test]
    #[should_panic(expected = "unknown block type")]
    fn test_unknown_block_panics() {
        Environment::standard().block(BlockType(500));
    }
}
