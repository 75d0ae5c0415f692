//! Mutable shadows of immutable world values
//!
//! A change or mutation only ever writes to one of these. Freezing compares
//! the result against the original and hands back the original `Arc` when no
//! field differs, so "did anything change" is a pointer comparison downstream.

use crate::block::BlockType;
use crate::cuboid::{AspectMask, BlockState, CuboidData};
use crate::entity::{CreatureEntity, Entity, PassiveEntity};
use crate::inventory::Inventory;
use crate::propagation::AspectChannel;
use crate::types::{AbsoluteLocation, EntityLocation, EntityVolume};
use std::sync::Arc;

/// The fields every change can touch regardless of whether it targets a player or a creature.
pub trait MutableMinimalEntity {
    fn id(&self) -> i32;
    fn location(&self) -> EntityLocation;
    fn set_location(&mut self, location: EntityLocation);
    fn velocity(&self) -> EntityLocation;
    fn set_velocity(&mut self, velocity: EntityLocation);
    fn volume(&self) -> EntityVolume;
    fn health(&self) -> u8;
    fn set_health(&mut self, health: u8);
    fn breath(&self) -> u8;
    fn set_breath(&mut self, breath: u8);
    /// Only players carry an inventory.
    fn inventory_mut(&mut self) -> Option<&mut Inventory>;
}

pub struct MutableEntity {
    original: Arc<Entity>,
    pub current: Entity,
}

impl MutableEntity {
    pub fn existing(original: &Arc<Entity>) -> Self {
        Self {
            original: Arc::clone(original),
            current: (**original).clone(),
        }
    }

    pub fn original(&self) -> &Arc<Entity> {
        &self.original
    }

    /// Returns the original instance when nothing differs.
    pub fn freeze(self) -> Arc<Entity> {
        if self.current == *self.original {
            self.original
        } else {
            Arc::new(self.current)
        }
    }
}

impl MutableMinimalEntity for MutableEntity {
    fn id(&self) -> i32 {
        self.current.id
    }
    fn location(&self) -> EntityLocation {
        self.current.location
    }
    fn set_location(&mut self, location: EntityLocation) {
        self.current.location = location;
    }
    fn velocity(&self) -> EntityLocation {
        self.current.velocity
    }
    fn set_velocity(&mut self, velocity: EntityLocation) {
        self.current.velocity = velocity;
    }
    fn volume(&self) -> EntityVolume {
        self.current.volume
    }
    fn health(&self) -> u8 {
        self.current.health
    }
    fn set_health(&mut self, health: u8) {
        self.current.health = health;
    }
    fn breath(&self) -> u8 {
        self.current.breath
    }
    fn set_breath(&mut self, breath: u8) {
        self.current.breath = breath;
    }
    fn inventory_mut(&mut self) -> Option<&mut Inventory> {
        Some(&mut self.current.inventory)
    }
}

pub struct MutableCreature {
    original: Arc<CreatureEntity>,
    pub current: CreatureEntity,
    despawned: bool,
}

impl MutableCreature {
    pub fn existing(original: &Arc<CreatureEntity>) -> Self {
        Self {
            original: Arc::clone(original),
            current: (**original).clone(),
            despawned: false,
        }
    }

    pub fn despawn(&mut self) {
        self.despawned = true;
    }

    /// `None` once the creature has died or been despawned.
    pub fn freeze(self) -> Option<Arc<CreatureEntity>> {
        if self.despawned {
            None
        } else if self.current == *self.original {
            Some(self.original)
        } else {
            Some(Arc::new(self.current))
        }
    }
}

impl MutableMinimalEntity for MutableCreature {
    fn id(&self) -> i32 {
        self.current.id
    }
    fn location(&self) -> EntityLocation {
        self.current.location
    }
    fn set_location(&mut self, location: EntityLocation) {
        self.current.location = location;
    }
    fn velocity(&self) -> EntityLocation {
        self.current.velocity
    }
    fn set_velocity(&mut self, velocity: EntityLocation) {
        self.current.velocity = velocity;
    }
    fn volume(&self) -> EntityVolume {
        self.current.volume
    }
    fn health(&self) -> u8 {
        self.current.health
    }
    fn set_health(&mut self, health: u8) {
        self.current.health = health;
    }
    fn breath(&self) -> u8 {
        self.current.breath
    }
    fn set_breath(&mut self, breath: u8) {
        self.current.breath = breath;
    }
    fn inventory_mut(&mut self) -> Option<&mut Inventory> {
        None
    }
}

pub struct MutablePassive {
    original: Arc<PassiveEntity>,
    pub current: PassiveEntity,
    despawned: bool,
}

impl MutablePassive {
    pub fn existing(original: &Arc<PassiveEntity>) -> Self {
        Self {
            original: Arc::clone(original),
            current: (**original).clone(),
            despawned: false,
        }
    }

    pub fn despawn(&mut self) {
        self.despawned = true;
    }

    pub fn freeze(self) -> Option<Arc<PassiveEntity>> {
        if self.despawned {
            None
        } else if self.current == *self.original {
            Some(self.original)
        } else {
            Some(Arc::new(self.current))
        }
    }
}

/// Scratch copy of one block's aspects, created only for blocks a tick touches.
#[derive(Debug, Clone)]
pub struct MutableBlockProxy {
    location: AbsoluteLocation,
    original: BlockState,
    current: BlockState,
    light_seed: bool,
    logic_seed: bool,
}

impl MutableBlockProxy {
    pub fn new(location: AbsoluteLocation, cuboid: &CuboidData) -> Self {
        let state = cuboid.block_state(location.block_address());
        Self {
            location,
            original: state.clone(),
            current: state,
            light_seed: false,
            logic_seed: false,
        }
    }

    pub fn location(&self) -> AbsoluteLocation {
        self.location
    }

    pub fn block(&self) -> BlockType {
        self.current.block
    }

    pub fn set_block(&mut self, block: BlockType) {
        self.current.block = block;
    }

    pub fn damage(&self) -> u16 {
        self.current.damage
    }

    pub fn set_damage(&mut self, damage: u16) {
        self.current.damage = damage;
    }

    pub fn light(&self) -> u8 {
        self.current.light
    }

    pub fn logic(&self) -> u8 {
        self.current.logic
    }

    pub fn aspect(&self, channel: AspectChannel) -> u8 {
        match channel {
            AspectChannel::Light => self.current.light,
            AspectChannel::Logic => self.current.logic,
        }
    }

    pub fn set_aspect(&mut self, channel: AspectChannel, value: u8) {
        match channel {
            AspectChannel::Light => self.current.light = value,
            AspectChannel::Logic => self.current.logic = value,
        }
    }

    pub fn inventory(&self) -> Option<&Inventory> {
        self.current.inventory.as_ref()
    }

    pub fn set_inventory(&mut self, inventory: Option<Inventory>) {
        self.current.inventory = inventory;
    }

    /// Marks this block as a starting point for propagation of `channel` this tick.
    pub fn request_propagation(&mut self, channel: AspectChannel) {
        match channel {
            AspectChannel::Light => self.light_seed = true,
            AspectChannel::Logic => self.logic_seed = true,
        }
    }

    pub fn is_propagation_seed(&self, channel: AspectChannel) -> bool {
        match channel {
            AspectChannel::Light => self.light_seed,
            AspectChannel::Logic => self.logic_seed,
        }
    }

    pub fn original_block(&self) -> BlockType {
        self.original.block
    }

    pub fn changed_aspects(&self) -> AspectMask {
        AspectMask::between(&self.original, &self.current)
    }

    pub fn did_change(&self) -> bool {
        self.original != self.current
    }

    pub fn state(&self) -> &BlockState {
        &self.current
    }
}
