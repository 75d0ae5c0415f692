//! Client-side prediction on top of authoritative server ticks
//!
//! The projection keeps two worlds. The shadow is exactly what the server has
//! confirmed: every [`ServerTickUpdate`] is replayed onto it with the same
//! processors the server ran. The projected world is the shadow with every
//! local change the server has not yet confirmed applied on top, rebuilt after
//! each server tick. Server state always wins: a local change that no longer
//! applies after a rebuild is dropped, never retried.
//!
//! Not thread-safe; the owning runner calls it from one thread only.

use log::debug;
use shared::context::{CapturedPhase2, ChangeEnvelope, ContextBase, ScheduledChange};
use shared::crowd_processor::{apply_single_change, process_crowd_group, CrowdOptions};
use shared::cuboid::CuboidData;
use shared::listeners::NoopListener;
use shared::protocol::ServerTickUpdate;
use shared::sync::ProcessorElement;
use shared::world_processor::apply_mutations_now;
use shared::{
    CreatureEntity, CuboidAddress, Entity, EntityChange, Environment, Mutation, PassiveEntity, WorldConfig, WorldState,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An entity of any kind, as handed to a [`ProjectionListener`].
#[derive(Debug, Clone)]
pub enum ProjectedEntity {
    Player(Arc<Entity>),
    Creature(Arc<CreatureEntity>),
    Passive(Arc<PassiveEntity>),
}

/// Told about every cuboid and entity whose projected instance changed.
pub trait ProjectionListener {
    fn cuboid_did_load(&mut self, _cuboid: &Arc<CuboidData>) {}
    fn cuboid_did_change(&mut self, _cuboid: &Arc<CuboidData>) {}
    fn cuboid_did_unload(&mut self, _address: CuboidAddress) {}
    fn entity_did_load(&mut self, _entity: ProjectedEntity) {}
    fn entity_did_change(&mut self, _entity: ProjectedEntity) {}
    fn entity_did_unload(&mut self, _entity: ProjectedEntity) {}
}

pub struct IgnoreProjection;

impl ProjectionListener for IgnoreProjection {}

#[derive(Debug, Clone, PartialEq)]
struct PendingPhase2 {
    activity_id: i64,
    change: EntityChange,
    ready_at_millis: u64,
    /// Already folded into the current projected state.
    applied: bool,
}

impl PendingPhase2 {
    fn is_due(&self, now: u64) -> bool {
        now >= self.ready_at_millis
    }
}

/// A local change the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
struct ChangeWrapper {
    commit_level: i64,
    change: EntityChange,
    phase2: Option<PendingPhase2>,
}

pub struct SpeculativeProjection {
    local_entity_id: i32,
    config: WorldConfig,
    env: Arc<Environment>,
    listener: Box<dyn ProjectionListener>,
    tick_number: u64,
    shadow: WorldState,
    projected: WorldState,
    speculative: Vec<ChangeWrapper>,
    /// Phase 2 of an activity whose phase 1 the server already confirmed.
    orphaned_phase2: Option<PendingPhase2>,
    next_local_commit: i64,
    sealed: bool,
}

impl SpeculativeProjection {
    pub fn new(
        local_entity_id: i32,
        config: WorldConfig,
        env: Arc<Environment>,
        listener: Box<dyn ProjectionListener>,
    ) -> Self {
        Self {
            local_entity_id,
            config,
            env,
            listener,
            tick_number: 0,
            shadow: WorldState::default(),
            projected: WorldState::default(),
            speculative: Vec::new(),
            orphaned_phase2: None,
            next_local_commit: 1,
            sealed: false,
        }
    }

    pub fn local_entity_id(&self) -> i32 {
        self.local_entity_id
    }

    pub fn projected_state(&self) -> &WorldState {
        &self.projected
    }

    pub fn shadow_state(&self) -> &WorldState {
        &self.shadow
    }

    pub fn local_entity(&self) -> Option<&Arc<Entity>> {
        self.projected.players.get(&self.local_entity_id)
    }

    pub fn speculative_count(&self) -> usize {
        self.speculative.len()
    }

    /// The change currently recorded under `commit_level`, merges included.
    pub fn change_for_commit(&self, commit_level: i64) -> Option<&EntityChange> {
        self.speculative
            .iter()
            .find(|wrapper| wrapper.commit_level == commit_level)
            .map(|wrapper| &wrapper.change)
    }

    /// Nothing may merge into the last local change any more; it has been sent.
    pub fn seal_last_local_change(&mut self) {
        self.sealed = true;
    }

    /// Replays one authoritative tick onto the shadow, drops confirmed local
    /// changes and rebuilds the projection. Returns how many local changes are
    /// still unconfirmed.
    pub fn apply_changes_for_server_tick(&mut self, update: &ServerTickUpdate, current_time_millis: u64) -> usize {
        if update.full_state {
            self.replace_shadow(update);
        } else {
            self.replay_on_shadow(update);
        }
        self.tick_number = update.tick_number;

        let completed: BTreeSet<i64> = update
            .completed_activities
            .iter()
            .map(|outcome| outcome.activity_id)
            .collect();
        if let Some(orphan) = &self.orphaned_phase2 {
            if completed.contains(&orphan.activity_id) {
                self.orphaned_phase2 = None;
            }
        }
        let confirmed = self
            .speculative
            .iter()
            .take_while(|wrapper| wrapper.commit_level <= update.latest_local_commit)
            .count();
        for wrapper in self.speculative.drain(..confirmed) {
            if let Some(phase2) = wrapper.phase2 {
                if !completed.contains(&phase2.activity_id) {
                    self.orphaned_phase2 = Some(phase2);
                }
            }
        }

        self.rebuild_projection(current_time_millis);
        self.speculative.len()
    }

    /// Applies a change to the projected state ahead of the server.
    ///
    /// Returns the commit level the change should be sent under, or 0 if it
    /// did not apply and must not be sent. A change that can be folded into
    /// the previous unsent one reuses that commit level.
    pub fn apply_local_change(&mut self, change: EntityChange, current_time_millis: u64) -> i64 {
        let previous = self.projected.clone();
        self.resolve_due_phase2(current_time_millis);

        let commit_level = self.next_local_commit;
        self.next_local_commit += 1;
        let envelope = if change.is_phase1() {
            ChangeEnvelope::Phase1 {
                activity_id: commit_level,
            }
        } else {
            ChangeEnvelope::Standard
        };
        let mut projected = std::mem::take(&mut self.projected);
        let outcome = self.apply_to(&mut projected, &change, envelope);
        self.projected = projected;

        let result = match outcome {
            None => {
                self.next_local_commit -= 1;
                0
            }
            Some(captured) => {
                self.cancel_waiting_phase2();
                let merged_into = if self.sealed || captured.is_some() {
                    None
                } else {
                    self.speculative
                        .last_mut()
                        .filter(|last| last.phase2.is_none() && change.can_replace_previous(&last.change))
                        .map(|last| {
                            last.change = change.merge_with_previous(&last.change);
                            last.commit_level
                        })
                };
                match merged_into {
                    Some(previous_commit) => {
                        self.next_local_commit -= 1;
                        previous_commit
                    }
                    None => {
                        self.sealed = false;
                        self.speculative.push(ChangeWrapper {
                            commit_level,
                            change,
                            phase2: captured.map(|captured| PendingPhase2 {
                                activity_id: captured.activity_id,
                                change: captured.change,
                                ready_at_millis: current_time_millis + captured.delay_millis,
                                applied: false,
                            }),
                        });
                        commit_level
                    }
                }
            }
        };
        self.notify(&previous);
        result
    }

    fn base<'a>(&'a self, state: &'a WorldState) -> ContextBase<'a> {
        ContextBase {
            tick_number: self.tick_number,
            millis_per_tick: self.config.millis_per_tick,
            config: &self.config,
            env: &self.env,
            previous: state,
        }
    }

    /// Applies one local change and the block mutations it asked for to
    /// `state`. Returns the captured phase 2 request on success.
    fn apply_to(
        &self,
        state: &mut WorldState,
        change: &EntityChange,
        envelope: ChangeEnvelope,
    ) -> Option<Option<CapturedPhase2>> {
        let (entity, mut outputs) = apply_single_change(&self.base(state), self.local_entity_id, change, envelope)?;
        state.players.insert(self.local_entity_id, entity);
        let mutations: Vec<Mutation> = outputs
            .mutations
            .drain(..)
            .filter(|scheduled| scheduled.millis_until_ready == 0)
            .map(|scheduled| scheduled.mutation)
            .collect();
        if !mutations.is_empty() {
            let group = apply_mutations_now(&self.base(state), &mutations, &NoopListener);
            group.apply_to(state);
        }
        Some(outputs.phase2.take())
    }

    /// A change that is sent to the server cancels any phase 2 still waiting there.
    fn cancel_waiting_phase2(&mut self) {
        if matches!(&self.orphaned_phase2, Some(orphan) if !orphan.applied) {
            self.orphaned_phase2 = None;
        }
        for wrapper in &mut self.speculative {
            if matches!(&wrapper.phase2, Some(phase2) if !phase2.applied) {
                wrapper.phase2 = None;
            }
        }
    }

    fn resolve_due_phase2(&mut self, now: u64) {
        let mut due = Vec::new();
        if let Some(orphan) = &mut self.orphaned_phase2 {
            if !orphan.applied && orphan.is_due(now) {
                orphan.applied = true;
                due.push(orphan.change.clone());
            }
        }
        for wrapper in &mut self.speculative {
            if let Some(phase2) = &mut wrapper.phase2 {
                if !phase2.applied && phase2.is_due(now) {
                    phase2.applied = true;
                    due.push(phase2.change.clone());
                }
            }
        }
        let mut projected = std::mem::take(&mut self.projected);
        for change in due {
            if self.apply_to(&mut projected, &change, ChangeEnvelope::SuppressPhase2).is_none() {
                debug!("Speculative phase 2 {:?} did not apply", change);
            }
        }
        self.projected = projected;
    }

    fn rebuild_projection(&mut self, now: u64) {
        let previous = std::mem::take(&mut self.projected);
        let mut projected = self.shadow.clone();

        if let Some(orphan) = &mut self.orphaned_phase2 {
            orphan.applied = orphan.is_due(now);
        }
        if let Some(orphan) = self.orphaned_phase2.clone() {
            if orphan.applied {
                self.apply_to(&mut projected, &orphan.change, ChangeEnvelope::SuppressPhase2);
            }
        }

        let wrappers = std::mem::take(&mut self.speculative);
        let mut kept = Vec::with_capacity(wrappers.len());
        for mut wrapper in wrappers {
            if self
                .apply_to(&mut projected, &wrapper.change, ChangeEnvelope::SuppressPhase2)
                .is_none()
            {
                debug!(
                    "Dropping local change {} which no longer applies",
                    wrapper.commit_level
                );
                continue;
            }
            if let Some(phase2) = &mut wrapper.phase2 {
                phase2.applied = phase2.is_due(now);
                if phase2.applied {
                    self.apply_to(&mut projected, &phase2.change, ChangeEnvelope::SuppressPhase2);
                }
            }
            kept.push(wrapper);
        }
        self.speculative = kept;
        self.projected = projected;
        self.notify(&previous);
    }

    fn replace_shadow(&mut self, update: &ServerTickUpdate) {
        let mut shadow = WorldState::default();
        for cuboid in &update.loaded_cuboids {
            shadow.cuboids.insert(cuboid.address(), Arc::new(cuboid.clone()));
        }
        for entity in &update.joined_entities {
            shadow.players.insert(entity.id, Arc::new(entity.clone()));
        }
        for creature in &update.spawned_creatures {
            shadow.creatures.insert(creature.id, Arc::new(creature.clone()));
        }
        for passive in &update.spawned_passives {
            shadow.passives.insert(passive.id, Arc::new(passive.clone()));
        }
        self.shadow = shadow;
    }

    fn replay_on_shadow(&mut self, update: &ServerTickUpdate) {
        for address in &update.unloaded_cuboids {
            self.shadow.cuboids.remove(address);
        }
        for id in &update.left_entities {
            self.shadow.players.remove(id);
        }
        for cuboid in &update.loaded_cuboids {
            self.shadow.cuboids.insert(cuboid.address(), Arc::new(cuboid.clone()));
        }
        for entity in &update.joined_entities {
            self.shadow.players.insert(entity.id, Arc::new(entity.clone()));
        }

        let changes: BTreeMap<i32, Vec<ScheduledChange>> = update
            .entity_changes
            .iter()
            .map(|(id, changes)| {
                let queue = changes
                    .iter()
                    .map(|change| ScheduledChange {
                        change: change.clone(),
                        envelope: ChangeEnvelope::SuppressPhase2,
                        millis_until_ready: 0,
                        commit_level: 0,
                    })
                    .collect();
                (*id, queue)
            })
            .collect();
        let base = ContextBase {
            tick_number: update.tick_number,
            millis_per_tick: self.config.millis_per_tick,
            config: &self.config,
            env: &self.env,
            previous: &self.shadow,
        };
        let crowd = process_crowd_group(
            &ProcessorElement::single_threaded(),
            &base,
            &changes,
            &NoopListener,
            CrowdOptions { run_engine: true },
        );
        let mutations: Vec<Mutation> = update.cuboid_mutations.values().flatten().cloned().collect();
        let world = apply_mutations_now(&base, &mutations, &NoopListener);
        crowd.apply_to(&mut self.shadow);
        world.apply_to(&mut self.shadow);

        for creature in &update.spawned_creatures {
            self.shadow.creatures.insert(creature.id, Arc::new(creature.clone()));
        }
        for passive in &update.spawned_passives {
            self.shadow.passives.insert(passive.id, Arc::new(passive.clone()));
        }
    }

    /// Tells the listener about everything whose instance differs from `previous`.
    fn notify(&mut self, previous: &WorldState) {
        let projected = &self.projected;
        let listener = self.listener.as_mut();

        let cuboids = diff(&previous.cuboids, &projected.cuboids);
        for cuboid in cuboids.loaded {
            listener.cuboid_did_load(cuboid);
        }
        for cuboid in cuboids.changed {
            listener.cuboid_did_change(cuboid);
        }
        for cuboid in cuboids.unloaded {
            listener.cuboid_did_unload(cuboid.address());
        }

        let players = diff(&previous.players, &projected.players);
        players.report(&mut *listener, ProjectedEntity::Player);
        let creatures = diff(&previous.creatures, &projected.creatures);
        creatures.report(&mut *listener, ProjectedEntity::Creature);
        let passives = diff(&previous.passives, &projected.passives);
        passives.report(&mut *listener, ProjectedEntity::Passive);
    }
}

struct MapDiff<'a, V> {
    loaded: Vec<&'a Arc<V>>,
    changed: Vec<&'a Arc<V>>,
    unloaded: Vec<&'a Arc<V>>,
}

impl<'a, V> MapDiff<'a, V> {
    fn report(self, listener: &mut dyn ProjectionListener, wrap: fn(Arc<V>) -> ProjectedEntity) {
        for value in self.loaded {
            listener.entity_did_load(wrap(Arc::clone(value)));
        }
        for value in self.changed {
            listener.entity_did_change(wrap(Arc::clone(value)));
        }
        for value in self.unloaded {
            listener.entity_did_unload(wrap(Arc::clone(value)));
        }
    }
}

/// Compares by identity only; equal values in different allocations count as changed.
fn diff<'a, K: Ord, V>(before: &'a BTreeMap<K, Arc<V>>, after: &'a BTreeMap<K, Arc<V>>) -> MapDiff<'a, V> {
    let mut result = MapDiff {
        loaded: Vec::new(),
        changed: Vec::new(),
        unloaded: Vec::new(),
    };
    for (key, value) in after {
        match before.get(key) {
            None => result.loaded.push(value),
            Some(old) if !Arc::ptr_eq(old, value) => result.changed.push(value),
            Some(_) => {}
        }
    }
    for (key, value) in before {
        if !after.contains_key(key) {
            result.unloaded.push(value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::ActivityOutcome;
    use shared::{AbsoluteLocation, BlockType, EntityLocation};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counts {
        cuboid_loads: usize,
        cuboid_changes: usize,
        entity_changes: usize,
    }

    struct Recorder(Rc<RefCell<Counts>>);

    impl ProjectionListener for Recorder {
        fn cuboid_did_load(&mut self, _cuboid: &Arc<CuboidData>) {
            self.0.borrow_mut().cuboid_loads += 1;
        }
        fn cuboid_did_change(&mut self, _cuboid: &Arc<CuboidData>) {
            self.0.borrow_mut().cuboid_changes += 1;
        }
        fn entity_did_change(&mut self, _entity: ProjectedEntity) {
            self.0.borrow_mut().entity_changes += 1;
        }
    }

    fn initial_update() -> ServerTickUpdate {
        let mut player = Entity::new(1, EntityLocation::new(4.0, 4.0, 0.0));
        player.inventory.add(BlockType::STONE, 5);
        ServerTickUpdate {
            tick_number: 1,
            full_state: true,
            loaded_cuboids: vec![
                CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR),
                CuboidData::filled(CuboidAddress::new(0, 0, -1), BlockType::STONE),
            ],
            joined_entities: vec![player],
            ..ServerTickUpdate::default()
        }
    }

    fn projection() -> (SpeculativeProjection, Rc<RefCell<Counts>>) {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut projection = SpeculativeProjection::new(
            1,
            WorldConfig::default(),
            Arc::new(Environment::standard()),
            Box::new(Recorder(Rc::clone(&counts))),
        );
        projection.apply_changes_for_server_tick(&initial_update(), 0);
        (projection, counts)
    }

    fn step(x: f32) -> EntityChange {
        EntityChange::Move {
            delta: EntityLocation::new(x, 0.0, 0.0),
            millis: 50,
        }
    }

    #[test]
    fn test_initial_state_is_reported() {
        let (projection, counts) = projection();
        assert_eq!(counts.borrow().cuboid_loads, 2);
        assert!(projection.local_entity().is_some());
        assert_eq!(projection.speculative_count(), 0);
    }

    #[test]
    fn test_local_change_moves_only_projection() {
        let (mut projection, counts) = projection();
        assert_eq!(projection.apply_local_change(step(0.4), 10), 1);
        assert_approx_eq!(projection.local_entity().unwrap().location.x, 4.4, 1e-4);
        assert_approx_eq!(projection.shadow_state().players[&1].location.x, 4.0, 1e-4);
        assert_eq!(counts.borrow().entity_changes, 1);
    }

    #[test]
    fn test_rejected_change_returns_zero_and_reuses_commit() {
        let (mut projection, _) = projection();
        assert_eq!(projection.apply_local_change(step(5.0), 10), 0);
        projection.seal_last_local_change();
        assert_eq!(projection.apply_local_change(step(0.1), 20), 1);
    }

    #[test]
    fn test_moves_merge_until_sealed() {
        let (mut projection, _) = projection();
        assert_eq!(projection.apply_local_change(step(0.2), 10), 1);
        assert_eq!(projection.apply_local_change(step(0.2), 20), 1);
        assert_eq!(
            projection.change_for_commit(1),
            Some(&EntityChange::Move {
                delta: EntityLocation::new(0.4, 0.0, 0.0),
                millis: 100,
            })
        );
        projection.seal_last_local_change();
        assert_eq!(projection.apply_local_change(step(0.2), 30), 2);
        assert_eq!(projection.speculative_count(), 2);
    }

    #[test]
    fn test_server_confirmation_prunes_and_replays() {
        let (mut projection, _) = projection();
        for commit in 1..=3 {
            assert_eq!(projection.apply_local_change(step(0.3), commit as u64 * 50), commit);
            projection.seal_last_local_change();
        }
        let mut entity_changes = BTreeMap::new();
        entity_changes.insert(1, vec![step(0.3)]);
        let update = ServerTickUpdate {
            tick_number: 2,
            entity_changes,
            latest_local_commit: 1,
            ..ServerTickUpdate::default()
        };
        assert_eq!(projection.apply_changes_for_server_tick(&update, 200), 2);
        assert_approx_eq!(projection.shadow_state().players[&1].location.x, 4.3, 1e-4);
        assert_approx_eq!(projection.local_entity().unwrap().location.x, 4.9, 1e-4);
    }

    #[test]
    fn test_conflicting_change_is_dropped() {
        let (mut projection, _) = projection();
        assert_eq!(projection.apply_local_change(step(0.4), 10), 1);
        // The server put the player somewhere the move is blocked.
        let mut moved = Entity::new(1, EntityLocation::new(31.2, 4.0, 0.0));
        moved.inventory.add(BlockType::STONE, 5);
        let mut update = initial_update();
        update.tick_number = 2;
        update.joined_entities = vec![moved];
        assert_eq!(projection.apply_changes_for_server_tick(&update, 20), 0);
        assert_approx_eq!(projection.local_entity().unwrap().location.x, 31.2, 1e-4);
    }

    #[test]
    fn test_phase2_waits_for_delay_and_orphans_on_confirmation() {
        let (mut projection, counts) = projection();
        let target = AbsoluteLocation::new(5, 4, 0);
        let begin = EntityChange::BeginPlaceBlock {
            target,
            block: BlockType::STONE,
            millis: 100,
        };
        assert_eq!(projection.apply_local_change(begin.clone(), 0), 1);
        projection.seal_last_local_change();
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::AIR));

        // The server confirmed phase 1 but phase 2 is still pending there.
        let mut entity_changes = BTreeMap::new();
        entity_changes.insert(1, vec![begin]);
        let update = ServerTickUpdate {
            tick_number: 2,
            entity_changes,
            latest_local_commit: 1,
            ..ServerTickUpdate::default()
        };
        assert_eq!(projection.apply_changes_for_server_tick(&update, 50), 0);
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::AIR));

        let before = counts.borrow().cuboid_changes;
        let update = ServerTickUpdate {
            tick_number: 3,
            latest_local_commit: 1,
            ..ServerTickUpdate::default()
        };
        projection.apply_changes_for_server_tick(&update, 150);
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::STONE));
        assert_eq!(projection.shadow_state().block_type(target), Some(BlockType::AIR));
        assert!(counts.borrow().cuboid_changes > before);

        let update = ServerTickUpdate {
            tick_number: 4,
            latest_local_commit: 1,
            completed_activities: vec![ActivityOutcome {
                activity_id: 1,
                success: false,
            }],
            ..ServerTickUpdate::default()
        };
        projection.apply_changes_for_server_tick(&update, 200);
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::AIR));
    }

    #[test]
    fn test_rejected_change_keeps_waiting_phase2() {
        let (mut projection, _) = projection();
        let target = AbsoluteLocation::new(5, 4, 0);
        let begin = EntityChange::BeginPlaceBlock {
            target,
            block: BlockType::STONE,
            millis: 100,
        };
        assert_eq!(projection.apply_local_change(begin.clone(), 0), 1);
        projection.seal_last_local_change();
        assert_eq!(projection.apply_local_change(step(5.0), 50), 0);

        let mut entity_changes = BTreeMap::new();
        entity_changes.insert(1, vec![begin]);
        let update = ServerTickUpdate {
            tick_number: 2,
            entity_changes,
            latest_local_commit: 1,
            ..ServerTickUpdate::default()
        };
        assert_eq!(projection.apply_changes_for_server_tick(&update, 150), 0);
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::STONE));
    }

    #[test]
    fn test_new_change_cancels_waiting_phase2() {
        let (mut projection, _) = projection();
        let target = AbsoluteLocation::new(5, 4, 0);
        let begin = EntityChange::BeginPlaceBlock {
            target,
            block: BlockType::STONE,
            millis: 100,
        };
        assert_eq!(projection.apply_local_change(begin, 0), 1);
        projection.seal_last_local_change();
        assert_eq!(projection.apply_local_change(step(0.1), 50), 2);
        let update = ServerTickUpdate {
            tick_number: 2,
            ..ServerTickUpdate::default()
        };
        projection.apply_changes_for_server_tick(&update, 500);
        assert_eq!(projection.projected_state().block_type(target), Some(BlockType::AIR));
    }
}
