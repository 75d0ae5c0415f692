//! Immutable entity records
//!
//! Snapshots hold these behind `Arc` so that an unchanged entity is the same
//! allocation from one tick to the next, which is what listeners diff on.

use crate::block::BlockType;
use crate::inventory::Inventory;
use crate::types::{EntityLocation, EntityVolume};
use serde::{Deserialize, Serialize};

pub const MAX_HEALTH: u8 = 100;
pub const MAX_FOOD: u8 = 100;
pub const MAX_BREATH: u8 = 100;
pub const PLAYER_VOLUME: EntityVolume = EntityVolume::new(1.8, 0.6);
pub const PLAYER_INVENTORY_CAPACITY: u32 = 100;

/// A player-controlled entity; ids are positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i32,
    pub location: EntityLocation,
    pub velocity: EntityLocation,
    pub volume: EntityVolume,
    pub health: u8,
    pub food: u8,
    pub breath: u8,
    pub inventory: Inventory,
}

impl Entity {
    pub fn new(id: i32, location: EntityLocation) -> Self {
        assert!(id > 0, "player entity ids must be positive, got {}", id);
        Self {
            id,
            location,
            velocity: EntityLocation::default(),
            volume: PLAYER_VOLUME,
            health: MAX_HEALTH,
            food: MAX_FOOD,
            breath: MAX_BREATH,
            inventory: Inventory::new(PLAYER_INVENTORY_CAPACITY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CreatureType {
    Cow,
    Orc,
}

impl CreatureType {
    pub fn volume(&self) -> EntityVolume {
        match self {
            CreatureType::Cow => EntityVolume::new(1.4, 0.9),
            CreatureType::Orc => EntityVolume::new(1.8, 0.7),
        }
    }

    pub fn max_health(&self) -> u8 {
        match self {
            CreatureType::Cow => 40,
            CreatureType::Orc => 60,
        }
    }

    pub fn is_hostile(&self) -> bool {
        matches!(self, CreatureType::Orc)
    }

    /// Horizontal blocks per second.
    pub fn speed(&self) -> f32 {
        match self {
            CreatureType::Cow => 1.5,
            CreatureType::Orc => 3.0,
        }
    }
}

/// An AI-driven entity; ids are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureEntity {
    pub id: i32,
    pub creature_type: CreatureType,
    pub location: EntityLocation,
    pub velocity: EntityLocation,
    pub volume: EntityVolume,
    pub health: u8,
    pub breath: u8,
}

impl CreatureEntity {
    pub fn new(id: i32, creature_type: CreatureType, location: EntityLocation) -> Self {
        assert!(id < 0, "creature ids must be negative, got {}", id);
        Self {
            id,
            creature_type,
            location,
            velocity: EntityLocation::default(),
            volume: creature_type.volume(),
            health: creature_type.max_health(),
            breath: MAX_BREATH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PassiveKind {
    ItemStack { item: BlockType, count: u32 },
    FallingBlock { block: BlockType },
}

/// A physics-only object: dropped items and falling blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveEntity {
    pub id: i32,
    pub kind: PassiveKind,
    pub location: EntityLocation,
    pub velocity: EntityLocation,
    pub age_millis: u64,
}

impl PassiveEntity {
    pub const VOLUME: EntityVolume = EntityVolume::new(0.98, 0.98);

    pub fn new(id: i32, kind: PassiveKind, location: EntityLocation) -> Self {
        assert!(id > 0, "passive ids must be positive, got {}", id);
        Self {
            id,
            kind,
            location,
            velocity: EntityLocation::default(),
            age_millis: 0,
        }
    }
}

/// Spawn request emitted during a tick; the id is assigned when the tick merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureSpawn {
    pub creature_type: CreatureType,
    pub location: EntityLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveSpawn {
    pub kind: PassiveKind,
    pub location: EntityLocation,
    pub velocity: EntityLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_creation() {
        let player = Entity::new(1, EntityLocation::new(1.0, 2.0, 3.0));
        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!(player.volume, PLAYER_VOLUME);
        assert!(player.inventory.is_empty());
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_player_id_must_be_positive() {
        Entity::new(0, EntityLocation::default());
    }

    #[test]
    #[should_panic(expected = "must be negative")]
    fn test_creature_id_must_be_negative() {
        CreatureEntity::new(3, CreatureType::Cow, EntityLocation::default());
    }

    #[test]
    fn test_creature_takes_type_defaults() {
        let orc = CreatureEntity::new(-1, CreatureType::Orc, EntityLocation::default());
        assert_eq!(orc.health, 60);
        assert_eq!(orc.volume, CreatureType::Orc.volume());
        assert!(orc.creature_type.is_hostile());
    }
}
