//! The read surface of a tick: every loaded cuboid and entity

use crate::block::BlockType;
use crate::cuboid::{BlockState, CuboidData};
use crate::entity::{CreatureEntity, Entity, PassiveEntity};
use crate::propagation::AspectChannel;
use crate::types::{AbsoluteLocation, CuboidAddress, EntityLocation, EntityVolume};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered maps keep iteration (and therefore partitioning and merging) deterministic.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub cuboids: BTreeMap<CuboidAddress, Arc<CuboidData>>,
    pub players: BTreeMap<i32, Arc<Entity>>,
    pub creatures: BTreeMap<i32, Arc<CreatureEntity>>,
    pub passives: BTreeMap<i32, Arc<PassiveEntity>>,
}

/// What a change can learn about any other entity from the previous tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimalEntity {
    pub id: i32,
    pub location: EntityLocation,
    pub volume: EntityVolume,
    pub health: u8,
}

impl WorldState {
    pub fn is_loaded(&self, address: CuboidAddress) -> bool {
        self.cuboids.contains_key(&address)
    }

    pub fn block_type(&self, location: AbsoluteLocation) -> Option<BlockType> {
        self.cuboids
            .get(&location.cuboid_address())
            .map(|cuboid| cuboid.block_type(location.block_address()))
    }

    pub fn block_state(&self, location: AbsoluteLocation) -> Option<BlockState> {
        self.cuboids
            .get(&location.cuboid_address())
            .map(|cuboid| cuboid.block_state(location.block_address()))
    }

    pub fn aspect(&self, location: AbsoluteLocation, channel: AspectChannel) -> Option<u8> {
        self.cuboids.get(&location.cuboid_address()).map(|cuboid| {
            let block = location.block_address();
            match channel {
                AspectChannel::Light => cuboid.light(block),
                AspectChannel::Logic => cuboid.logic(block),
            }
        })
    }

    /// Players and creatures share one id space split by sign.
    pub fn minimal_entity(&self, id: i32) -> Option<MinimalEntity> {
        if id > 0 {
            self.players.get(&id).map(|player| MinimalEntity {
                id,
                location: player.location,
                volume: player.volume,
                health: player.health,
            })
        } else {
            self.creatures.get(&id).map(|creature| MinimalEntity {
                id,
                location: creature.location,
                volume: creature.volume,
                health: creature.health,
            })
        }
    }

    pub fn contains_target(&self, id: i32) -> bool {
        if id > 0 {
            self.players.contains_key(&id)
        } else {
            self.creatures.contains_key(&id)
        }
    }
}
