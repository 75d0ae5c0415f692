//! The published result of one tick

use shared::cuboid::{BlockChangeDescription, CuboidData, CuboidHeightMap};
use shared::protocol::{SuspendedCuboid, SuspendedEntity};
use shared::two_phase::ActivityResult;
use shared::{CuboidAddress, Entity, EntityChange, Mutation, ScheduledChange, ScheduledMutation, WorldState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Counters and timings for one tick. Timings vary from run to run; nothing
/// else in a snapshot does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub changes_applied: usize,
    pub changes_dropped: usize,
    pub mutations_applied: usize,
    pub mutations_dropped: usize,
    pub cuboids_changed: usize,
    pub crowd_time: Duration,
    pub world_time: Duration,
    pub total_time: Duration,
}

/// Immutable view of the world after a tick, shared with callers as `Arc<Snapshot>`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tick_number: u64,
    pub state: WorldState,
    /// Work carried into the next tick, requeued entries first.
    pub pending_mutations: BTreeMap<CuboidAddress, Vec<ScheduledMutation>>,
    pub pending_changes: BTreeMap<i32, Vec<ScheduledChange>>,
    pub height_maps: BTreeMap<CuboidAddress, Arc<CuboidHeightMap>>,
    pub block_changes: BTreeMap<CuboidAddress, Vec<BlockChangeDescription>>,
    pub applied_changes: BTreeMap<i32, Vec<EntityChange>>,
    pub applied_mutations: BTreeMap<CuboidAddress, Vec<Mutation>>,
    /// Highest client commit level processed this tick, per entity.
    pub commit_levels: BTreeMap<i32, i64>,
    pub activity_results: BTreeMap<i32, Vec<ActivityResult>>,
    /// Cuboids and players as they were added, before this tick touched them.
    pub loaded_cuboids: Vec<Arc<CuboidData>>,
    pub joined_entities: Vec<Arc<Entity>>,
    /// Records handed back for persistence.
    pub unloaded_cuboids: Vec<SuspendedCuboid>,
    pub left_entities: Vec<SuspendedEntity>,
    pub spawned_creatures: Vec<i32>,
    pub spawned_passives: Vec<i32>,
    pub stats: TickStats,
}

impl Snapshot {
    pub fn latest_commit_level(&self, entity_id: i32) -> Option<i64> {
        self.commit_levels.get(&entity_id).copied()
    }

    /// True when this tick neither changed nor scheduled anything.
    pub fn is_quiet(&self) -> bool {
        self.applied_changes.is_empty()
            && self.applied_mutations.is_empty()
            && self.pending_changes.is_empty()
            && self.pending_mutations.is_empty()
    }
}
