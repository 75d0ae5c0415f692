//! Axis-aligned collision against the block grid
//!
//! Entities are boxes whose `location` is the minimum corner. A box may only
//! occupy blocks that are loaded and not solid, so nothing ever walks or falls
//! into a cuboid the server has not loaded.

use crate::block::Environment;
use crate::state::WorldState;
use crate::types::{AbsoluteLocation, EntityLocation, EntityVolume};

/// Downward acceleration, blocks per second squared.
pub const GRAVITY: f32 = -20.0;
/// Fastest an entity can fall, blocks per second.
pub const TERMINAL_VELOCITY: f32 = -40.0;
/// Initial upward speed of a jump, blocks per second.
pub const JUMP_VELOCITY: f32 = 7.0;
/// Landing slower than this does no damage.
pub const SAFE_LANDING_VELOCITY: f32 = -12.0;
/// How far below its feet an entity looks for ground.
const GROUND_PROBE: f32 = 0.05;

///Every block a box at `location` overlaps.
pub fn overlapped_blocks(location: EntityLocation, volume: EntityVolume) -> Vec<AbsoluteLocation> {
    let span = |start: f32, extent: f32| {
        let first = start.floor() as i32;
        let last = ((start + extent).ceil() as i32 - 1).max(first);
        first..=last
    };
    let mut blocks = Vec::new();
    for x in span(location.x, volume.width) {
        for y in span(location.y, volume.width) {
            for z in span(location.z, volume.height) {
                blocks.push(AbsoluteLocation::new(x, y, z));
            }
        }
    }
    blocks
}

///Returns true if a box at `location` only overlaps loaded, non-solid blocks.
pub fn is_region_free(
    previous: &WorldState,
    env: &Environment,
    location: EntityLocation,
    volume: EntityVolume,
) -> bool {
    overlapped_blocks(location, volume)
        .into_iter()
        .all(|block| match previous.block_type(block) {
            Some(block_type) => !env.is_solid(block_type),
            None => false,
        })
}

///Returns true if the box cannot move down at all.
pub fn is_on_ground(
    previous: &WorldState,
    env: &Environment,
    location: EntityLocation,
    volume: EntityVolume,
) -> bool {
    let probe = location.add(&EntityLocation::new(0.0, 0.0, -GROUND_PROBE));
    !is_region_free(previous, env, probe, volume)
}

/// Block containing the top of the box, used for breath checks.
pub fn head_block(location: EntityLocation, volume: EntityVolume) -> AbsoluteLocation {
    location
        .add(&EntityLocation::new(
            volume.width / 2.0,
            volume.width / 2.0,
            volume.height * 0.9,
        ))
        .block_location()
}

/// Result of one tick of vertical motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallStep {
    pub location: EntityLocation,
    pub velocity_z: f32,
    /// Downward speed at the moment the box hit something, if it did.
    pub impact_velocity: Option<f32>,
}

///Applies gravity for `millis` and moves the box vertically as far as the grid allows.
pub fn fall(
    previous: &WorldState,
    env: &Environment,
    location: EntityLocation,
    volume: EntityVolume,
    velocity_z: f32,
    millis: u64,
) -> FallStep {
    let seconds = millis as f32 / 1000.0;
    let on_ground = is_on_ground(previous, env, location, volume);
    if on_ground && velocity_z <= 0.0 {
        return FallStep {
            location,
            velocity_z: 0.0,
            impact_velocity: None,
        };
    }

    let velocity = (velocity_z + GRAVITY * seconds).max(TERMINAL_VELOCITY);
    let target = location.add(&EntityLocation::new(0.0, 0.0, velocity * seconds));
    if is_region_free(previous, env, target, volume) {
        return FallStep {
            location: target,
            velocity_z: velocity,
            impact_velocity: None,
        };
    }

    if velocity < 0.0 {
        // Snap onto the block below if it lies within this step.
        let snapped = EntityLocation::new(location.x, location.y, target.z.ceil());
        let landed = if snapped.z <= location.z && is_region_free(previous, env, snapped, volume) {
            snapped
        } else {
            location
        };
        FallStep {
            location: landed,
            velocity_z: 0.0,
            impact_velocity: Some(velocity),
        }
    } else {
        // Hit a ceiling.
        FallStep {
            location,
            velocity_z: 0.0,
            impact_velocity: None,
        }
    }
}

/// Damage for landing at `velocity` (negative), zero within the safe range.
pub fn landing_damage(velocity: f32) -> u8 {
    if velocity >= SAFE_LANDING_VELOCITY {
        0
    } else {
        ((SAFE_LANDING_VELOCITY - velocity) * 2.0).min(u8::MAX as f32) as u8
    }
}
