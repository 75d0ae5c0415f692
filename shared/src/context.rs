//! Per-target processing context and the explicit output sinks of a tick
//!
//! Every mutation or change is applied with a fresh context. Anything it wants
//! to schedule lands in [`TickOutputs`]; the processor drains that after a
//! successful application (or throws it away after a failed one) and the work
//! is handed to the next tick, never re-entered into the current one.

use crate::block::{BlockType, Environment};
use crate::change::EntityChange;
use crate::config::WorldConfig;
use crate::cuboid::BlockState;
use crate::entity::{CreatureSpawn, CreatureType, PassiveKind, PassiveSpawn};
use crate::mutation::Mutation;
use crate::state::{MinimalEntity, WorldState};
use crate::types::{AbsoluteLocation, CuboidAddress, EntityLocation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A block mutation waiting in a cuboid's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMutation {
    pub mutation: Mutation,
    pub millis_until_ready: u64,
}

impl ScheduledMutation {
    pub fn now(mutation: Mutation) -> Self {
        Self {
            mutation,
            millis_until_ready: 0,
        }
    }

    pub fn delayed(mutation: Mutation, millis_until_ready: u64) -> Self {
        Self {
            mutation,
            millis_until_ready,
        }
    }

    /// The entry carried into the next tick, clamped at zero.
    pub fn decremented(&self, millis: u64) -> Self {
        Self {
            mutation: self.mutation.clone(),
            millis_until_ready: self.millis_until_ready.saturating_sub(millis),
        }
    }
}

/// How the single "schedule phase 2" call-out of a change is routed, and what
/// bookkeeping its outcome produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEnvelope {
    /// Internally generated follow-up work; phase 2 goes to the ordinary queue.
    Plain,
    /// An externally submitted ordinary change; completion is reported as a non-activity.
    Standard,
    /// Phase 1 of a two-phase activity; the phase 2 request is captured for the activity manager.
    Phase1 { activity_id: i64 },
    /// Phase 2 of an activity; its outcome completes the activity.
    Phase2 { activity_id: i64 },
    /// Replay of an already-committed change; phase 2 requests are discarded.
    SuppressPhase2,
}

/// An entity change waiting in an entity's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledChange {
    pub change: EntityChange,
    pub envelope: ChangeEnvelope,
    pub millis_until_ready: u64,
    /// Client commit number this change carries, zero for internal work.
    pub commit_level: i64,
}

impl ScheduledChange {
    pub fn plain(change: EntityChange, millis_until_ready: u64) -> Self {
        Self {
            change,
            envelope: ChangeEnvelope::Plain,
            millis_until_ready,
            commit_level: 0,
        }
    }

    pub fn decremented(&self, millis: u64) -> Self {
        Self {
            change: self.change.clone(),
            envelope: self.envelope,
            millis_until_ready: self.millis_until_ready.saturating_sub(millis),
            commit_level: self.commit_level,
        }
    }
}

/// A phase 2 request intercepted from a phase 1 change.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPhase2 {
    pub activity_id: i64,
    pub change: EntityChange,
    pub delay_millis: u64,
}

/// Everything one mutation or change asked to schedule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutputs {
    pub mutations: Vec<ScheduledMutation>,
    pub changes: Vec<(i32, ScheduledChange)>,
    pub creature_spawns: Vec<CreatureSpawn>,
    pub passive_spawns: Vec<PassiveSpawn>,
    pub phase2: Option<CapturedPhase2>,
}

impl TickOutputs {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
            && self.changes.is_empty()
            && self.creature_spawns.is_empty()
            && self.passive_spawns.is_empty()
            && self.phase2.is_none()
    }

    /// Appends `other`, keeping its order after ours.  Captured phase 2
    /// requests are per-change and never merged.
    pub fn append(&mut self, mut other: TickOutputs) {
        self.mutations.append(&mut other.mutations);
        self.changes.append(&mut other.changes);
        self.creature_spawns.append(&mut other.creature_spawns);
        self.passive_spawns.append(&mut other.passive_spawns);
    }
}

/// Read-only inputs shared by every context built during one tick.
#[derive(Clone, Copy)]
pub struct ContextBase<'a> {
    pub tick_number: u64,
    pub millis_per_tick: u64,
    pub config: &'a WorldConfig,
    pub env: &'a Environment,
    pub previous: &'a WorldState,
}

pub struct TickProcessingContext<'a> {
    pub tick_number: u64,
    pub millis_per_tick: u64,
    pub config: &'a WorldConfig,
    pub env: &'a Environment,
    previous: &'a WorldState,
    envelope: ChangeEnvelope,
    rng: StdRng,
    outputs: TickOutputs,
}

impl<'a> TickProcessingContext<'a> {
    /// The random source depends only on the world seed, the tick and `random_key`,
    /// so results do not depend on which thread processes a target.
    pub fn new(base: &ContextBase<'a>, random_key: u64) -> Self {
        Self {
            tick_number: base.tick_number,
            millis_per_tick: base.millis_per_tick,
            config: base.config,
            env: base.env,
            previous: base.previous,
            envelope: ChangeEnvelope::Plain,
            rng: seeded_rng(base.config.seed, base.tick_number, random_key),
            outputs: TickOutputs::default(),
        }
    }

    pub fn set_envelope(&mut self, envelope: ChangeEnvelope) {
        self.envelope = envelope;
    }

    pub fn previous(&self) -> &'a WorldState {
        self.previous
    }

    pub fn previous_block(&self, location: AbsoluteLocation) -> Option<BlockState> {
        self.previous.block_state(location)
    }

    pub fn previous_block_type(&self, location: AbsoluteLocation) -> Option<BlockType> {
        self.previous.block_type(location)
    }

    pub fn previous_entity(&self, id: i32) -> Option<MinimalEntity> {
        self.previous.minimal_entity(id)
    }

    /// Uniform in `[0, bound)`.
    pub fn random_int(&mut self, bound: i32) -> i32 {
        assert!(bound > 0, "random bound must be positive");
        self.rng.gen_range(0..bound)
    }

    pub fn next_mutation(&mut self, mutation: Mutation) {
        self.outputs.mutations.push(ScheduledMutation::now(mutation));
    }

    pub fn future_mutation(&mut self, mutation: Mutation, delay_millis: u64) {
        self.outputs
            .mutations
            .push(ScheduledMutation::delayed(mutation, delay_millis));
    }

    pub fn next_change(&mut self, target_id: i32, change: EntityChange) {
        self.outputs
            .changes
            .push((target_id, ScheduledChange::plain(change, 0)));
    }

    pub fn spawn_creature(&mut self, creature_type: CreatureType, location: EntityLocation) {
        self.outputs.creature_spawns.push(CreatureSpawn {
            creature_type,
            location,
        });
    }

    pub fn spawn_passive(&mut self, kind: PassiveKind, location: EntityLocation, velocity: EntityLocation) {
        self.outputs.passive_spawns.push(PassiveSpawn {
            kind,
            location,
            velocity,
        });
    }

    /// The one call-out a phase 1 change may make, routed by the current envelope.
    pub fn schedule_phase2(&mut self, target_id: i32, change: EntityChange, delay_millis: u64) {
        match self.envelope {
            ChangeEnvelope::Phase1 { activity_id } => {
                assert!(
                    self.outputs.phase2.is_none(),
                    "a change may request phase 2 only once"
                );
                self.outputs.phase2 = Some(CapturedPhase2 {
                    activity_id,
                    change,
                    delay_millis,
                });
            }
            ChangeEnvelope::SuppressPhase2 => {}
            ChangeEnvelope::Plain | ChangeEnvelope::Standard | ChangeEnvelope::Phase2 { .. } => {
                self.outputs
                    .changes
                    .push((target_id, ScheduledChange::plain(change, delay_millis)));
            }
        }
    }

    pub fn take_outputs(&mut self) -> TickOutputs {
        std::mem::take(&mut self.outputs)
    }

    pub fn discard_outputs(&mut self) {
        self.outputs = TickOutputs::default();
    }
}

/// Random key for work done on behalf of a cuboid.
pub fn cuboid_random_key(address: CuboidAddress) -> u64 {
    ((address.x as u16 as u64) << 32) | ((address.y as u16 as u64) << 16) | address.z as u16 as u64
}

/// Random key for work done on behalf of a player or creature.
pub fn entity_random_key(id: i32) -> u64 {
    (1u64 << 63) | id as u32 as u64
}

/// Passive ids overlap player ids, so they get their own key space.
pub fn passive_random_key(id: i32) -> u64 {
    (1u64 << 62) | id as u32 as u64
}

/// Random source for one target in one tick of a world with `seed`.
pub fn seeded_rng(seed: u64, tick_number: u64, random_key: u64) -> StdRng {
    StdRng::seed_from_u64(mix(mix(seed ^ tick_number) ^ random_key))
}

// splitmix64 finaliser
fn mix(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
