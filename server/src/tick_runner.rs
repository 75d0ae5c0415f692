//! The authoritative tick loop
//!
//! A fixed pool of worker threads processes one tick at a time. Each tick goes
//! through three barrier crossings, and the last thread to arrive at each one
//! does the single-threaded part before releasing the others:
//!
//! 1. assemble the tick materials from the previous snapshot and the mailbox
//! 2. (after every worker ran its share of entity changes) merge the crowd groups
//! 3. (after every worker ran its share of block mutations) merge, schedule the
//!    next tick's work and publish the new snapshot
//!
//! Callers talk to the runner from any thread: requests go into the mailbox
//! and are picked up when the next tick starts.

use crate::creature_ai::{CreaturePlanner, WanderPlanner};
use crate::materials::{self, Mailbox, SubmittedChange, TickMaterials};
use crate::snapshot::{Snapshot, TickStats};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use shared::context::{entity_random_key, seeded_rng};
use shared::crowd_processor::{process_crowd_group, CrowdGroup, CrowdOptions};
use shared::listeners::{BlockChangeListener, EntityChangeListener, NoopListener};
use shared::protocol::{SuspendedCuboid, SuspendedEntity};
use shared::sync::{ProcessorElement, SyncPoint};
use shared::two_phase::TwoPhaseActivityManager;
use shared::world_processor::{process_world_group, WorldGroup};
use shared::{
    ContextBase, CreatureEntity, CuboidAddress, EntityChange, Environment, Mutation, PassiveEntity, ScheduledChange,
    WorldConfig,
};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SHUTDOWN_REQUESTED: i64 = -1;
/// Keeps the planner's random stream apart from the one the creature's changes use.
const PLANNER_RANDOM_SALT: u64 = 0x5EED_0F_C4EA7;

/// Callbacks and policies plugged into the runner.
pub struct TickHooks {
    pub block_listener: Arc<dyn BlockChangeListener>,
    pub entity_listener: Arc<dyn EntityChangeListener>,
    pub planner: Box<dyn CreaturePlanner>,
}

impl Default for TickHooks {
    fn default() -> Self {
        Self {
            block_listener: Arc::new(NoopListener),
            entity_listener: Arc::new(NoopListener),
            planner: Box::new(WanderPlanner::default()),
        }
    }
}

struct Monitor {
    /// Tick the workers should run next; negative once shutdown was requested.
    requested_tick: i64,
    completed_tick: u64,
    snapshot: Arc<Snapshot>,
}

/// Hand-off between the parallel phases of the current tick.
#[derive(Default)]
struct WorkSlots {
    materials: Arc<TickMaterials>,
    crowd_parts: Vec<CrowdGroup>,
    crowd: CrowdGroup,
    world_parts: Vec<WorldGroup>,
    started: Option<Instant>,
    crowd_time: Duration,
}

/// State only touched by whichever thread does the single-threaded work.
struct Coordinator {
    manager: TwoPhaseActivityManager,
    next_creature_id: i32,
    next_passive_id: i32,
}

struct Shared {
    config: WorldConfig,
    env: Arc<Environment>,
    hooks: TickHooks,
    mailbox: Mutex<Mailbox>,
    monitor: Mutex<Monitor>,
    monitor_changed: Condvar,
    work: Mutex<WorkSlots>,
    coordinator: Mutex<Coordinator>,
}

/// Runs ticks on a fixed pool of worker threads.
///
/// Work for the next tick (mutations, changes, loads and joins) is queued
/// from any thread through `&self` methods and picked up when that tick
/// starts. Every worker takes part in every tick; one of them assembles the
/// inputs and publishes the resulting `Snapshot`.
pub struct TickRunner {
    shared: Arc<Shared>,
    thread_count: usize,
    workers: Vec<JoinHandle<()>>,
}

impl TickRunner {
    /// Creates a runner with an empty world. Call `start` before requesting ticks.
    ///
    /// # Arguments
    /// * `thread_count` - Number of workers sharing each tick, at least one
    /// * `config` - World rules and the random seed
    /// * `env` - Block registry shared with clients
    /// * `hooks` - Listeners and the creature planner
    pub fn new(thread_count: usize, config: WorldConfig, env: Arc<Environment>, hooks: TickHooks) -> Self {
        assert!(thread_count > 0, "tick runner needs at least one thread");
        let shared = Shared {
            config,
            env,
            hooks,
            mailbox: Mutex::new(Mailbox::default()),
            monitor: Mutex::new(Monitor {
                requested_tick: 0,
                completed_tick: 0,
                snapshot: Arc::new(Snapshot::default()),
            }),
            monitor_changed: Condvar::new(),
            work: Mutex::new(WorkSlots::default()),
            coordinator: Mutex::new(Coordinator {
                manager: TwoPhaseActivityManager::new(),
                next_creature_id: -1,
                next_passive_id: 1,
            }),
        };
        Self {
            shared: Arc::new(shared),
            thread_count,
            workers: Vec::new(),
        }
    }

    /// Number of worker threads, whether started or not.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Spawns the worker threads. They idle until the first tick is requested.
    pub fn start(&mut self) -> std::io::Result<()> {
        assert!(self.workers.is_empty(), "tick runner already started");
        let sync = Arc::new(SyncPoint::new(self.thread_count));
        for index in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let element = ProcessorElement::new(index, Arc::clone(&sync));
            let handle = thread::Builder::new()
                .name(format!("tick-worker-{}", index))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_worker(&shared, element)));
                    if outcome.is_err() {
                        error!("Tick worker {} panicked; the world state can no longer be trusted", index);
                        std::process::abort();
                    }
                })?;
            self.workers.push(handle);
        }
        info!("Tick runner started with {} worker threads", self.thread_count);
        Ok(())
    }

    /// Waits for the tick in flight, then lets the workers start the next one.
    /// Returns the snapshot of the tick that just completed.
    pub fn start_next_tick(&self) -> Arc<Snapshot> {
        assert!(!self.workers.is_empty(), "tick runner not started");
        let mut monitor = self.shared.monitor.lock();
        while monitor.requested_tick >= 0 && monitor.completed_tick < monitor.requested_tick as u64 {
            self.shared.monitor_changed.wait(&mut monitor);
        }
        let snapshot = Arc::clone(&monitor.snapshot);
        if monitor.requested_tick >= 0 {
            monitor.requested_tick += 1;
            self.shared.monitor_changed.notify_all();
        }
        snapshot
    }

    /// Blocks until the most recently requested tick has been published.
    pub fn wait_for_previous_tick(&self) -> Arc<Snapshot> {
        let mut monitor = self.shared.monitor.lock();
        while monitor.requested_tick >= 0 && monitor.completed_tick < monitor.requested_tick as u64 {
            self.shared.monitor_changed.wait(&mut monitor);
        }
        Arc::clone(&monitor.snapshot)
    }

    /// Runs one whole tick and returns its snapshot.
    pub fn run_tick(&self) -> Arc<Snapshot> {
        self.start_next_tick();
        self.wait_for_previous_tick()
    }

    /// The latest published snapshot, without waiting.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.monitor.lock().snapshot)
    }

    /// Queues a block mutation for the next tick. It is dropped if its cuboid
    /// is not loaded by then.
    pub fn enqueue_mutation(&self, mutation: Mutation) {
        self.shared.mailbox.lock().mutations.push(mutation);
    }

    /// Queues a client change. Commit levels must strictly increase per
    /// entity; zero marks a change that did not come from a client.
    pub fn enqueue_entity_change(&self, entity_id: i32, change: EntityChange, commit_level: i64) {
        let mut mailbox = self.shared.mailbox.lock();
        if commit_level > 0 {
            let last = mailbox.last_commit_levels.entry(entity_id).or_insert(0);
            assert!(
                commit_level > *last,
                "commit level {} for entity {} does not follow {}",
                commit_level,
                entity_id,
                last
            );
            *last = commit_level;
        }
        mailbox.changes.push(SubmittedChange {
            entity_id,
            change,
            commit_level,
        });
    }

    /// Adds the cuboid, and any mutations saved with it, at the next tick.
    pub fn cuboid_was_loaded(&self, cuboid: SuspendedCuboid) {
        self.shared.mailbox.lock().loaded_cuboids.push(cuboid);
    }

    /// The cuboid and its saveable queue show up in the next snapshot's `unloaded_cuboids`.
    pub fn cuboid_was_unloaded(&self, address: CuboidAddress) {
        self.shared.mailbox.lock().unloaded_cuboids.push(address);
    }

    /// Adds a player at the next tick. Commit levels for the id start again
    /// from zero.
    pub fn entity_did_join(&self, entity: SuspendedEntity) {
        let mut mailbox = self.shared.mailbox.lock();
        mailbox.last_commit_levels.remove(&entity.entity.id);
        mailbox.joined_entities.push(entity);
    }

    /// Removes the player at the next tick; it comes back in `left_entities`.
    pub fn entity_did_leave(&self, entity_id: i32) {
        self.shared.mailbox.lock().left_entities.push(entity_id);
    }

    /// Lets the tick in flight finish, then stops and joins every worker.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        {
            let mut monitor = self.shared.monitor.lock();
            while monitor.requested_tick >= 0 && monitor.completed_tick < monitor.requested_tick as u64 {
                self.shared.monitor_changed.wait(&mut monitor);
            }
            monitor.requested_tick = SHUTDOWN_REQUESTED;
            self.shared.monitor_changed.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Tick worker exited abnormally");
            }
        }
        info!("Tick runner stopped");
    }
}

impl Drop for TickRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &Shared, element: ProcessorElement) {
    let mut last_tick = 0u64;
    loop {
        let tick = {
            let mut monitor = shared.monitor.lock();
            while monitor.requested_tick >= 0 && monitor.requested_tick as u64 <= last_tick {
                shared.monitor_changed.wait(&mut monitor);
            }
            if monitor.requested_tick < 0 {
                return;
            }
            monitor.requested_tick as u64
        };
        last_tick = tick;

        if element.synchronize_and_release_last() {
            shared.prepare_tick();
            element.release_waiting_threads();
        }
        let materials = Arc::clone(&shared.work.lock().materials);
        let base = ContextBase {
            tick_number: materials.tick_number,
            millis_per_tick: shared.config.millis_per_tick,
            config: &shared.config,
            env: &shared.env,
            previous: &materials.state,
        };

        let crowd_started = Instant::now();
        let crowd = process_crowd_group(
            &element,
            &base,
            &materials.changes,
            shared.hooks.entity_listener.as_ref(),
            CrowdOptions::default(),
        );
        shared.work.lock().crowd_parts.push(crowd);
        if element.synchronize_and_release_last() {
            shared.merge_crowd(crowd_started.elapsed());
            element.release_waiting_threads();
        }

        let world_started = Instant::now();
        let world = process_world_group(
            &element,
            &base,
            &materials.mutations,
            shared.hooks.block_listener.as_ref(),
        );
        shared.work.lock().world_parts.push(world);
        if element.synchronize_and_release_last() {
            shared.finish_tick(world_started.elapsed());
            element.release_waiting_threads();
        }
    }
}

impl Shared {
    fn prepare_tick(&self) {
        let mailbox = self.mailbox.lock().take();
        let previous = Arc::clone(&self.monitor.lock().snapshot);
        let materials = {
            let mut coordinator = self.coordinator.lock();
            materials::assemble(&previous, mailbox, &mut coordinator.manager, &self.config)
        };
        trace!(
            "Tick {} assembled: {} cuboid queues, {} entity queues",
            materials.tick_number,
            materials.mutations.len(),
            materials.changes.len()
        );
        let mut work = self.work.lock();
        work.materials = Arc::new(materials);
        work.started = Some(Instant::now());
    }

    fn merge_crowd(&self, elapsed: Duration) {
        let mut work = self.work.lock();
        let mut merged = CrowdGroup::default();
        for part in work.crowd_parts.drain(..) {
            merged.merge(part);
        }
        work.crowd = merged;
        work.crowd_time = elapsed;
    }

    fn finish_tick(&self, world_time: Duration) {
        let (materials, mut crowd, mut world, started, crowd_time) = {
            let mut work = self.work.lock();
            let mut world = WorldGroup::default();
            for part in work.world_parts.drain(..) {
                world.merge(part);
            }
            (
                Arc::clone(&work.materials),
                std::mem::take(&mut work.crowd),
                world,
                work.started.take(),
                work.crowd_time,
            )
        };
        let tick_number = materials.tick_number;

        let mut state = materials.state.clone();
        crowd.apply_to(&mut state);
        world.apply_to(&mut state);

        let mut height_maps = materials.height_maps.clone();
        let mut block_changes = BTreeMap::new();
        let cuboids_changed = world.cuboids.len();
        for (address, outcome) in std::mem::take(&mut world.cuboids) {
            height_maps.insert(address, Arc::new(outcome.height_map));
            block_changes.insert(address, outcome.block_changes);
        }

        let mut pending_mutations = std::mem::take(&mut world.pending);
        let mut pending_changes = std::mem::take(&mut crowd.pending);
        let mut exports = crowd.take_exports();
        exports.append(world.take_exports());
        for scheduled in exports.mutations {
            let target = scheduled.mutation.absolute_location().cuboid_address();
            if state.is_loaded(target) {
                pending_mutations.entry(target).or_default().push(scheduled);
            } else {
                warn!("Dropping mutation scheduled for unloaded cuboid {:?}", target);
            }
        }
        for (target, scheduled) in exports.changes {
            if state.contains_target(target) {
                pending_changes.entry(target).or_default().push(scheduled);
            } else {
                warn!("Dropping change scheduled for missing entity {}", target);
            }
        }

        let mut spawned_creatures = Vec::new();
        let mut spawned_passives = Vec::new();
        let activity_results = {
            let mut coordinator = self.coordinator.lock();
            for spawn in exports.creature_spawns {
                let id = coordinator.next_creature_id;
                coordinator.next_creature_id -= 1;
                state.creatures.insert(
                    id,
                    Arc::new(CreatureEntity::new(id, spawn.creature_type, spawn.location)),
                );
                spawned_creatures.push(id);
            }
            for spawn in exports.passive_spawns {
                let id = coordinator.next_passive_id;
                coordinator.next_passive_id += 1;
                let mut passive = PassiveEntity::new(id, spawn.kind, spawn.location);
                passive.velocity = spawn.velocity;
                state.passives.insert(id, Arc::new(passive));
                spawned_passives.push(id);
            }
            for (entity_id, events) in std::mem::take(&mut crowd.activity_events) {
                for event in events {
                    coordinator.manager.handle_event(entity_id, event);
                }
            }
            coordinator.manager.drain_results()
        };

        if self.config.creature_actions {
            for (id, creature) in &state.creatures {
                if pending_changes.contains_key(id) {
                    continue;
                }
                let mut rng = seeded_rng(
                    self.config.seed,
                    tick_number,
                    entity_random_key(*id) ^ PLANNER_RANDOM_SALT,
                );
                let planned = self
                    .hooks
                    .planner
                    .next_action(creature, &state, self.config.millis_per_tick, &mut rng);
                if let Some(change) = planned {
                    pending_changes
                        .entry(*id)
                        .or_default()
                        .push(ScheduledChange::plain(change, 0));
                }
            }
        }

        let stats = TickStats {
            changes_applied: crowd.changes_applied,
            changes_dropped: crowd.changes_dropped,
            mutations_applied: world.mutations_applied,
            mutations_dropped: world.mutations_dropped,
            cuboids_changed,
            crowd_time,
            world_time,
            total_time: started.map(|instant| instant.elapsed()).unwrap_or_default(),
        };
        debug!(
            "Tick {} done in {:?}: {} changes ({} dropped), {} mutations ({} dropped)",
            tick_number,
            stats.total_time,
            stats.changes_applied,
            stats.changes_dropped,
            stats.mutations_applied,
            stats.mutations_dropped
        );

        let snapshot = Snapshot {
            tick_number,
            state,
            pending_mutations,
            pending_changes,
            height_maps,
            block_changes,
            applied_changes: std::mem::take(&mut crowd.applied_changes),
            applied_mutations: std::mem::take(&mut world.applied_mutations),
            commit_levels: std::mem::take(&mut crowd.committed_levels),
            activity_results,
            loaded_cuboids: materials.loaded_cuboids.clone(),
            joined_entities: materials.joined_entities.clone(),
            unloaded_cuboids: materials.unloaded_cuboids.clone(),
            left_entities: materials.left_entities.clone(),
            spawned_creatures,
            spawned_passives,
            stats,
        };

        let mut monitor = self.monitor.lock();
        monitor.snapshot = Arc::new(snapshot);
        monitor.completed_tick = tick_number;
        self.monitor_changed.notify_all();
    }
}
