//! Assembly of the inputs for one tick
//!
//! Everything that happened between two ticks (loads, joins, client changes,
//! due phase 2 work) is collected in a [`Mailbox`] and folded into the previous
//! snapshot here, on one thread, before any worker starts processing.

use crate::snapshot::Snapshot;
use log::warn;
use shared::cuboid::{CuboidData, CuboidHeightMap};
use shared::protocol::{SuspendedCuboid, SuspendedEntity};
use shared::two_phase::TwoPhaseActivityManager;
use shared::world_processor::face_block_updates;
use shared::{
    ChangeEnvelope, CuboidAddress, Entity, EntityChange, Mutation, ScheduledChange, ScheduledMutation, WorldConfig,
    WorldState,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A change a client submitted, with the commit level it was tagged with.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedChange {
    pub entity_id: i32,
    pub change: EntityChange,
    pub commit_level: i64,
}

/// Requests accumulated since the previous tick started.
#[derive(Debug, Default)]
pub struct Mailbox {
    pub mutations: Vec<Mutation>,
    pub changes: Vec<SubmittedChange>,
    pub loaded_cuboids: Vec<SuspendedCuboid>,
    pub unloaded_cuboids: Vec<CuboidAddress>,
    pub joined_entities: Vec<SuspendedEntity>,
    pub left_entities: Vec<i32>,
    /// Last commit level accepted per entity; carried from mailbox to mailbox.
    pub last_commit_levels: BTreeMap<i32, i64>,
}

impl Mailbox {
    /// Hands out the requests and keeps the commit bookkeeping.
    pub fn take(&mut self) -> Mailbox {
        Mailbox {
            mutations: std::mem::take(&mut self.mutations),
            changes: std::mem::take(&mut self.changes),
            loaded_cuboids: std::mem::take(&mut self.loaded_cuboids),
            unloaded_cuboids: std::mem::take(&mut self.unloaded_cuboids),
            joined_entities: std::mem::take(&mut self.joined_entities),
            left_entities: std::mem::take(&mut self.left_entities),
            last_commit_levels: BTreeMap::new(),
        }
    }
}

/// Everything the workers read while processing one tick.
#[derive(Debug, Default)]
pub struct TickMaterials {
    pub tick_number: u64,
    pub state: WorldState,
    pub mutations: BTreeMap<CuboidAddress, Vec<ScheduledMutation>>,
    pub changes: BTreeMap<i32, Vec<ScheduledChange>>,
    pub height_maps: BTreeMap<CuboidAddress, Arc<CuboidHeightMap>>,
    pub loaded_cuboids: Vec<Arc<CuboidData>>,
    pub joined_entities: Vec<Arc<Entity>>,
    pub unloaded_cuboids: Vec<SuspendedCuboid>,
    pub left_entities: Vec<SuspendedEntity>,
}

/// Builds the materials for the tick after `previous`.
///
/// Order matters and is fixed: removals, then additions, then the work the
/// previous tick exported (with due phase 2 changes), then client submissions.
/// Panics if a cuboid or entity is added while already present.
pub fn assemble(
    previous: &Snapshot,
    mailbox: Mailbox,
    manager: &mut TwoPhaseActivityManager,
    config: &WorldConfig,
) -> TickMaterials {
    let mut materials = TickMaterials {
        tick_number: previous.tick_number + 1,
        state: previous.state.clone(),
        mutations: previous.pending_mutations.clone(),
        changes: previous.pending_changes.clone(),
        height_maps: previous.height_maps.clone(),
        ..TickMaterials::default()
    };

    for address in mailbox.unloaded_cuboids {
        match materials.state.cuboids.remove(&address) {
            Some(cuboid) => {
                materials.height_maps.remove(&address);
                let mut suspended = SuspendedCuboid::new((*cuboid).clone());
                suspended.pending_mutations = materials.mutations.remove(&address).unwrap_or_default();
                suspended.retain_saveable();
                materials.unloaded_cuboids.push(suspended);
            }
            None => warn!("Ignoring unload of cuboid {:?} which is not loaded", address),
        }
    }
    for entity_id in mailbox.left_entities {
        match materials.state.players.remove(&entity_id) {
            Some(entity) => {
                let mut suspended = SuspendedEntity::new((*entity).clone());
                suspended.pending_changes = materials.changes.remove(&entity_id).unwrap_or_default();
                suspended.retain_saveable();
                materials.left_entities.push(suspended);
                manager.forget_entity(entity_id);
            }
            None => warn!("Ignoring departure of entity {} which is not present", entity_id),
        }
    }

    let mut newly_loaded = BTreeSet::new();
    for suspended in mailbox.loaded_cuboids {
        let address = suspended.cuboid.address();
        assert!(
            !materials.state.is_loaded(address),
            "cuboid {:?} loaded while already present",
            address
        );
        let cuboid = Arc::new(suspended.cuboid);
        materials
            .height_maps
            .insert(address, Arc::new(CuboidHeightMap::build(&cuboid)));
        materials.state.cuboids.insert(address, Arc::clone(&cuboid));
        if !suspended.pending_mutations.is_empty() {
            materials.mutations.insert(address, suspended.pending_mutations);
        }
        materials.loaded_cuboids.push(cuboid);
        newly_loaded.insert(address);
    }
    for suspended in mailbox.joined_entities {
        let entity_id = suspended.entity.id;
        assert!(
            !materials.state.players.contains_key(&entity_id),
            "entity {} joined while already present",
            entity_id
        );
        let entity = Arc::new(suspended.entity);
        materials.state.players.insert(entity_id, Arc::clone(&entity));
        if !suspended.pending_changes.is_empty() {
            materials.changes.insert(entity_id, suspended.pending_changes);
        }
        materials.joined_entities.push(entity);
    }

    if config.face_updates_on_load {
        for address in &newly_loaded {
            let state = &materials.state;
            for mutation in face_block_updates(*address, |neighbour| state.is_loaded(neighbour)) {
                let target = mutation.absolute_location().cuboid_address();
                materials
                    .mutations
                    .entry(target)
                    .or_default()
                    .push(ScheduledMutation::now(mutation));
            }
        }
    }

    // New work from a client cancels whatever phase 2 it was still waiting on.
    for submitted in &mailbox.changes {
        if manager.is_activity_in_progress(submitted.entity_id) {
            manager.cancel_activity(submitted.entity_id);
        }
    }
    for (entity_id, activity_id, change) in manager.advance(config.millis_per_tick) {
        if !materials.state.contains_target(entity_id) {
            warn!("Dropping phase 2 of activity {} for missing entity {}", activity_id, entity_id);
            manager.activity_completed(entity_id, activity_id, false);
            continue;
        }
        materials.changes.entry(entity_id).or_default().push(ScheduledChange {
            change,
            envelope: ChangeEnvelope::Phase2 { activity_id },
            millis_until_ready: 0,
            commit_level: 0,
        });
    }

    for mutation in mailbox.mutations {
        let target = mutation.absolute_location().cuboid_address();
        if !materials.state.is_loaded(target) {
            warn!("Dropping mutation for unloaded cuboid {:?}", target);
            continue;
        }
        materials
            .mutations
            .entry(target)
            .or_default()
            .push(ScheduledMutation::now(mutation));
    }
    for submitted in mailbox.changes {
        if !materials.state.contains_target(submitted.entity_id) {
            warn!("Dropping change for missing entity {}", submitted.entity_id);
            continue;
        }
        let envelope = if submitted.change.is_phase1() {
            ChangeEnvelope::Phase1 {
                activity_id: submitted.commit_level,
            }
        } else {
            ChangeEnvelope::Standard
        };
        materials
            .changes
            .entry(submitted.entity_id)
            .or_default()
            .push(ScheduledChange {
                change: submitted.change,
                envelope,
                millis_until_ready: 0,
                commit_level: submitted.commit_level,
            });
    }
    materials
}
