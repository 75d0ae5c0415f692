//! Cuboid storage: the 32³ unit of world state and partitioning

use crate::block::BlockType;
use crate::inventory::Inventory;
use crate::octree::OctreeAspect;
use crate::types::{BlockAddress, CuboidAddress, CUBOID_EDGE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every aspect of one block, as read and written through a block proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub block: BlockType,
    pub damage: u16,
    pub light: u8,
    pub logic: u8,
    pub inventory: Option<Inventory>,
}

impl BlockState {
    pub fn of(block: BlockType) -> Self {
        Self {
            block,
            damage: 0,
            light: 0,
            logic: 0,
            inventory: None,
        }
    }
}

/// Immutable once published; a tick produces a new instance only when a block changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuboidData {
    address: CuboidAddress,
    block_types: OctreeAspect<BlockType>,
    damage: OctreeAspect<u16>,
    light: OctreeAspect<u8>,
    logic: OctreeAspect<u8>,
    inventories: BTreeMap<BlockAddress, Inventory>,
}

impl CuboidData {
    pub fn filled(address: CuboidAddress, block: BlockType) -> Self {
        Self {
            address,
            block_types: OctreeAspect::filled(block),
            damage: OctreeAspect::filled(0),
            light: OctreeAspect::filled(0),
            logic: OctreeAspect::filled(0),
            inventories: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> CuboidAddress {
        self.address
    }

    pub fn block_type(&self, block: BlockAddress) -> BlockType {
        self.block_types.get(block)
    }

    pub fn light(&self, block: BlockAddress) -> u8 {
        self.light.get(block)
    }

    pub fn logic(&self, block: BlockAddress) -> u8 {
        self.logic.get(block)
    }

    pub fn inventory(&self, block: BlockAddress) -> Option<&Inventory> {
        self.inventories.get(&block)
    }

    pub fn block_state(&self, block: BlockAddress) -> BlockState {
        BlockState {
            block: self.block_types.get(block),
            damage: self.damage.get(block),
            light: self.light.get(block),
            logic: self.logic.get(block),
            inventory: self.inventories.get(&block).cloned(),
        }
    }

    pub fn set_block_type(&mut self, block: BlockAddress, value: BlockType) {
        self.block_types.set(block, value);
    }

    pub fn write_block_state(&mut self, block: BlockAddress, state: &BlockState) {
        self.block_types.set(block, state.block);
        self.damage.set(block, state.damage);
        self.light.set(block, state.light);
        self.logic.set(block, state.logic);
        match &state.inventory {
            Some(inventory) => {
                self.inventories.insert(block, inventory.clone());
            }
            None => {
                self.inventories.remove(&block);
            }
        }
    }

    pub fn height_map(&self) -> CuboidHeightMap {
        CuboidHeightMap::build(self)
    }
}

/// Highest non-air block per (x,y) column of one cuboid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuboidHeightMap {
    heights: Vec<i8>,
}

impl CuboidHeightMap {
    pub const NO_BLOCK: i8 = -1;

    pub fn build(cuboid: &CuboidData) -> Self {
        let edge = CUBOID_EDGE as usize;
        let mut heights = vec![Self::NO_BLOCK; edge * edge];
        if cuboid.block_types.uniform_value() == Some(BlockType::AIR) {
            return Self { heights };
        }
        for x in 0..CUBOID_EDGE as u8 {
            for y in 0..CUBOID_EDGE as u8 {
                let top = (0..CUBOID_EDGE as u8)
                    .rev()
                    .find(|z| cuboid.block_type(BlockAddress::new(x, y, *z)) != BlockType::AIR);
                if let Some(z) = top {
                    heights[x as usize * edge + y as usize] = z as i8;
                }
            }
        }
        Self { heights }
    }

    pub fn height(&self, x: u8, y: u8) -> i8 {
        self.heights[x as usize * CUBOID_EDGE as usize + y as usize]
    }
}

/// Which aspects of a block changed during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AspectMask(pub u8);

impl AspectMask {
    pub const BLOCK: u8 = 1;
    pub const DAMAGE: u8 = 1 << 1;
    pub const LIGHT: u8 = 1 << 2;
    pub const LOGIC: u8 = 1 << 3;
    pub const INVENTORY: u8 = 1 << 4;

    pub fn between(before: &BlockState, after: &BlockState) -> Self {
        let mut mask = 0;
        if before.block != after.block {
            mask |= Self::BLOCK;
        }
        if before.damage != after.damage {
            mask |= Self::DAMAGE;
        }
        if before.light != after.light {
            mask |= Self::LIGHT;
        }
        if before.logic != after.logic {
            mask |= Self::LOGIC;
        }
        if before.inventory != after.inventory {
            mask |= Self::INVENTORY;
        }
        Self(mask)
    }

    pub fn contains(&self, aspect: u8) -> bool {
        self.0 & aspect != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Per-block description of what a tick changed in a cuboid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockChangeDescription {
    pub block: BlockAddress,
    pub previous_block: BlockType,
    pub new_block: BlockType,
    pub changed: AspectMask,
}
