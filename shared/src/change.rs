//! Entity-targeted commands
//!
//! Changes are applied to a mutable shadow of their target. Anything they do
//! to other entities or to blocks goes through the context's output sinks and
//! happens next tick.

use crate::block::BlockType;
use crate::context::TickProcessingContext;
use crate::entity::CreatureType;
use crate::mutable::MutableMinimalEntity;
use crate::mutation::Mutation;
use crate::physics;
use crate::types::{AbsoluteLocation, EntityLocation};
use serde::{Deserialize, Serialize};

/// Fastest horizontal movement a `Move` may claim, blocks per second.
pub const MAX_MOVE_SPEED: f32 = 10.0;
/// Moves are coalesced until they cover this much time.
pub const MAX_MERGED_MOVE_MILLIS: u64 = 200;
/// How far a player can reach blocks, measured from the centre of its box.
pub const BLOCK_REACH: f32 = 4.0;
pub const ATTACK_RANGE: f32 = 2.5;
pub const ATTACK_DAMAGE: u8 = 10;

const SPEED_TOLERANCE: f32 = 1.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityChange {
    /// Horizontal displacement spread over `millis`.
    Move { delta: EntityLocation, millis: u64 },
    Jump,
    Attack { target: i32 },
    TakeDamage { amount: u8 },
    AcceptItems { item: BlockType, count: u32 },
    /// Moves items from the entity's inventory into a container block.
    PushItems {
        target: AbsoluteLocation,
        item: BlockType,
        count: u32,
    },
    /// Spends `millis` hitting a block.
    HitBlock { target: AbsoluteLocation, millis: u64 },
    /// Phase 1 of placing a block: checks it is possible and asks for phase 2 after `millis`.
    BeginPlaceBlock {
        target: AbsoluteLocation,
        block: BlockType,
        millis: u64,
    },
    /// Phase 2 of placing a block; re-validates before consuming the item.
    FinishPlaceBlock { target: AbsoluteLocation, block: BlockType },
    SpawnCreature {
        creature_type: CreatureType,
        location: EntityLocation,
    },
}

impl EntityChange {
    pub fn time_cost_millis(&self) -> u64 {
        match self {
            EntityChange::Move { millis, .. }
            | EntityChange::HitBlock { millis, .. }
            | EntityChange::BeginPlaceBlock { millis, .. } => *millis,
            _ => 0,
        }
    }

    /// Movement intents are meaningless after a reload since the location itself is saved.
    pub fn can_save_to_disk(&self) -> bool {
        !matches!(self, EntityChange::Move { .. } | EntityChange::Jump)
    }

    pub fn is_phase1(&self) -> bool {
        matches!(self, EntityChange::BeginPlaceBlock { .. })
    }

    /// Whether this change can be folded into `previous` instead of being sent separately.
    pub fn can_replace_previous(&self, previous: &EntityChange) -> bool {
        match (self, previous) {
            (
                EntityChange::Move { millis, .. },
                EntityChange::Move {
                    millis: previous_millis,
                    ..
                },
            ) => millis + previous_millis <= MAX_MERGED_MOVE_MILLIS,
            _ => false,
        }
    }

    /// The single change equivalent to applying `previous` and then `self`.
    pub fn merge_with_previous(&self, previous: &EntityChange) -> EntityChange {
        match (self, previous) {
            (
                EntityChange::Move { delta, millis },
                EntityChange::Move {
                    delta: previous_delta,
                    millis: previous_millis,
                },
            ) => EntityChange::Move {
                delta: previous_delta.add(delta),
                millis: millis + previous_millis,
            },
            _ => panic!("{:?} cannot replace {:?}", self, previous),
        }
    }

    pub fn apply(&self, ctx: &mut TickProcessingContext, entity: &mut dyn MutableMinimalEntity) -> bool {
        match self {
            EntityChange::Move { delta, millis } => {
                if *millis == 0 || delta.z != 0.0 || !delta.is_finite() {
                    return false;
                }
                let limit = MAX_MOVE_SPEED * (*millis as f32 / 1000.0) * SPEED_TOLERANCE;
                if delta.magnitude() > limit {
                    return false;
                }
                let target = entity.location().add(delta);
                if !physics::is_region_free(ctx.previous(), ctx.env, target, entity.volume()) {
                    return false;
                }
                entity.set_location(target);
                true
            }
            EntityChange::Jump => {
                let mut velocity = entity.velocity();
                if velocity.z != 0.0
                    || !physics::is_on_ground(ctx.previous(), ctx.env, entity.location(), entity.volume())
                {
                    return false;
                }
                velocity.z = physics::JUMP_VELOCITY;
                entity.set_velocity(velocity);
                true
            }
            EntityChange::Attack { target } => {
                if *target == entity.id() || entity.health() == 0 {
                    return false;
                }
                let attacker_is_creature = entity.id() < 0;
                let scale = if attacker_is_creature {
                    ctx.config.difficulty.damage_scale()
                } else {
                    1
                };
                if scale == 0 {
                    return false;
                }
                let victim = match ctx.previous_entity(*target) {
                    Some(victim) => victim,
                    None => return false,
                };
                if victim.health == 0 || victim.location.distance(&entity.location()) > ATTACK_RANGE {
                    return false;
                }
                ctx.next_change(
                    *target,
                    EntityChange::TakeDamage {
                        amount: ATTACK_DAMAGE.saturating_mul(scale),
                    },
                );
                true
            }
            EntityChange::TakeDamage { amount } => {
                if *amount == 0 || entity.health() == 0 {
                    return false;
                }
                entity.set_health(entity.health().saturating_sub(*amount));
                true
            }
            EntityChange::AcceptItems { item, count } => match entity.inventory_mut() {
                Some(inventory) => inventory.add(*item, *count),
                None => false,
            },
            EntityChange::PushItems {
                target,
                item,
                count,
            } => {
                if !within_reach(&*entity, *target) {
                    return false;
                }
                let accepts = ctx
                    .previous_block_type(*target)
                    .map_or(false, |block| ctx.env.block(block).inventory_capacity > 0);
                if !accepts {
                    return false;
                }
                let removed = match entity.inventory_mut() {
                    Some(inventory) => inventory.remove(*item, *count),
                    None => false,
                };
                if removed {
                    ctx.next_mutation(Mutation::StoreItems {
                        location: *target,
                        item: *item,
                        count: *count,
                    });
                }
                removed
            }
            EntityChange::HitBlock { target, millis } => {
                if *millis == 0 || !within_reach(&*entity, *target) {
                    return false;
                }
                let block = match ctx.previous_block_type(*target) {
                    Some(block) if block != BlockType::AIR => block,
                    _ => return false,
                };
                if ctx.env.block(block).toughness == 0 {
                    return false;
                }
                let breaker = if entity.id() > 0 { Some(entity.id()) } else { None };
                ctx.next_mutation(Mutation::IncrementDamage {
                    location: *target,
                    expected: block,
                    damage: (*millis).min(u16::MAX as u64) as u16,
                    breaker,
                });
                true
            }
            EntityChange::BeginPlaceBlock {
                target,
                block,
                millis,
            } => {
                if !can_place(ctx, entity, *target, *block) {
                    return false;
                }
                ctx.schedule_phase2(
                    entity.id(),
                    EntityChange::FinishPlaceBlock {
                        target: *target,
                        block: *block,
                    },
                    *millis,
                );
                true
            }
            EntityChange::FinishPlaceBlock { target, block } => {
                if !can_place(ctx, entity, *target, *block) {
                    return false;
                }
                let removed = match entity.inventory_mut() {
                    Some(inventory) => inventory.remove(*block, 1),
                    None => false,
                };
                if removed {
                    ctx.next_mutation(Mutation::ReplaceBlock {
                        location: *target,
                        expected: BlockType::AIR,
                        replacement: *block,
                    });
                }
                removed
            }
            EntityChange::SpawnCreature {
                creature_type,
                location,
            } => {
                if !location.is_finite()
                    || !physics::is_region_free(ctx.previous(), ctx.env, *location, creature_type.volume())
                {
                    return false;
                }
                ctx.spawn_creature(*creature_type, *location);
                true
            }
        }
    }
}

fn within_reach(entity: &dyn MutableMinimalEntity, target: AbsoluteLocation) -> bool {
    let volume = entity.volume();
    let centre = entity.location().add(&EntityLocation::new(
        volume.width / 2.0,
        volume.width / 2.0,
        volume.height / 2.0,
    ));
    centre.distance(&target.centre()) <= BLOCK_REACH
}

/// The target must be in reach, empty, not overlapping the placer, and the item must be held.
fn can_place(
    ctx: &TickProcessingContext,
    entity: &mut dyn MutableMinimalEntity,
    target: AbsoluteLocation,
    block: BlockType,
) -> bool {
    if block == BlockType::AIR || !within_reach(&*entity, target) {
        return false;
    }
    if ctx.previous_block_type(target) != Some(BlockType::AIR) {
        return false;
    }
    if physics::overlapped_blocks(entity.location(), entity.volume()).contains(&target) {
        return false;
    }
    match entity.inventory_mut() {
        Some(inventory) => inventory.count(block) > 0,
        None => false,
    }
}
