//! Client session management for the tick runner
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Session lifecycle (connect, disconnect, timeout) and the player entity behind each client
//! - Buffering client changes and forwarding them in commit order
//! - Building the per-tick update each client replays against its projection
//!
//! Transport is out of scope: whatever carries bytes calls into the manager
//! and ships the [`ServerTickUpdate`]s it builds.

use crate::snapshot::Snapshot;
use crate::tick_runner::TickRunner;
use log::{info, warn};
use shared::protocol::{ActivityOutcome, ServerTickUpdate, SuspendedEntity};
use shared::two_phase::ActivityResult;
use shared::{Entity, EntityChange, EntityLocation};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Represents a connected client and the changes it sent
///
/// Each client maintains:
/// - Session metadata (ID, player entity, last activity)
/// - Commit tracking for forwarding and acknowledgement
/// - Buffered changes waiting for the next forward, in commit order
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// The player entity this client controls
    pub entity_id: i32,
    /// Last time we heard anything from this client
    pub last_seen: Instant,
    /// Highest commit level handed to the tick runner
    pub last_forwarded_commit: i64,
    /// Highest commit level the server has reported back as processed
    pub last_processed_commit: i64,
    /// Buffered changes waiting to be forwarded
    pub pending_changes: Vec<(i64, EntityChange)>,
    /// The next update must carry the whole world
    pub needs_full_state: bool,
}

impl Client {
    pub fn new(id: u32, entity_id: i32) -> Self {
        Self {
            id,
            entity_id,
            last_seen: Instant::now(),
            last_forwarded_commit: 0,
            last_processed_commit: 0,
            pending_changes: Vec::new(),
            needs_full_state: true,
        }
    }

    /// Buffers a change, keeping the buffer sorted by commit level
    ///
    /// Changes at or below a commit level already forwarded, and repeats of a
    /// buffered commit level, are duplicates from the transport and are ignored.
    pub fn add_change(&mut self, commit_level: i64, change: EntityChange) -> bool {
        self.last_seen = Instant::now();
        if commit_level <= self.last_forwarded_commit
            || self.pending_changes.iter().any(|(pending, _)| *pending == commit_level)
        {
            return false;
        }
        self.pending_changes.push((commit_level, change));
        self.pending_changes.sort_by_key(|(commit, _)| *commit);
        true
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks every connected client and routes their changes into the tick runner
///
/// Client IDs start at 1 and double as the positive id of the player entity
/// the client controls.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Admits a client and has its player join at `spawn` on the next tick
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, runner: &TickRunner, spawn: EntityLocation) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        let entity_id = client_id as i32;

        runner.entity_did_join(SuspendedEntity::new(Entity::new(entity_id, spawn)));
        info!("Client {} connected as entity {}", client_id, entity_id);
        self.clients.insert(client_id, Client::new(client_id, entity_id));
        Some(client_id)
    }

    /// Removes a client; its player leaves on the next tick
    pub fn remove_client(&mut self, runner: &TickRunner, client_id: u32) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            runner.entity_did_leave(client.entity_id);
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn add_change(&mut self, client_id: u32, commit_level: i64, change: EntityChange) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.add_change(commit_level, change),
            None => false,
        }
    }

    /// Hands every buffered change to the runner, clients in id order and each
    /// client's changes in commit order. Returns how many were forwarded.
    pub fn forward_changes(&mut self, runner: &TickRunner) -> usize {
        let mut ids: Vec<u32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        let mut forwarded = 0;
        for id in ids {
            if let Some(client) = self.clients.get_mut(&id) {
                for (commit_level, change) in client.pending_changes.drain(..) {
                    runner.enqueue_entity_change(client.entity_id, change, commit_level);
                    client.last_forwarded_commit = commit_level;
                    forwarded += 1;
                }
            }
        }
        forwarded
    }

    /// Disconnects clients that have been silent for longer than `timeout`
    pub fn check_timeouts(&mut self, runner: &TickRunner, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            warn!("Client {} timed out", client_id);
            self.remove_client(runner, *client_id);
        }
        timed_out
    }

    /// Builds the update `client_id` should replay for `snapshot`
    ///
    /// A client's first update carries the whole world as of the snapshot;
    /// every later one carries only what that tick did.
    pub fn build_update(&mut self, client_id: u32, snapshot: &Snapshot) -> Option<ServerTickUpdate> {
        let client = self.clients.get_mut(&client_id)?;
        if let Some(level) = snapshot.latest_commit_level(client.entity_id) {
            client.last_processed_commit = client.last_processed_commit.max(level);
        }
        let completed_activities: Vec<ActivityOutcome> = snapshot
            .activity_results
            .get(&client.entity_id)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| match result {
                        ActivityResult::Completed { activity_id, success } => Some(ActivityOutcome {
                            activity_id: *activity_id,
                            success: *success,
                        }),
                        ActivityResult::NonActivity => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let state = &snapshot.state;
        let update = if client.needs_full_state {
            client.needs_full_state = false;
            ServerTickUpdate {
                tick_number: snapshot.tick_number,
                full_state: true,
                loaded_cuboids: state.cuboids.values().map(|cuboid| (**cuboid).clone()).collect(),
                joined_entities: state.players.values().map(|player| (**player).clone()).collect(),
                spawned_creatures: state.creatures.values().map(|creature| (**creature).clone()).collect(),
                spawned_passives: state.passives.values().map(|passive| (**passive).clone()).collect(),
                completed_activities,
                latest_local_commit: client.last_processed_commit,
                ..ServerTickUpdate::default()
            }
        } else {
            ServerTickUpdate {
                tick_number: snapshot.tick_number,
                full_state: false,
                loaded_cuboids: snapshot
                    .loaded_cuboids
                    .iter()
                    .map(|cuboid| (**cuboid).clone())
                    .collect(),
                unloaded_cuboids: snapshot
                    .unloaded_cuboids
                    .iter()
                    .map(|suspended| suspended.cuboid.address())
                    .collect(),
                joined_entities: snapshot
                    .joined_entities
                    .iter()
                    .map(|entity| (**entity).clone())
                    .collect(),
                left_entities: snapshot
                    .left_entities
                    .iter()
                    .map(|suspended| suspended.entity.id)
                    .collect(),
                entity_changes: snapshot.applied_changes.clone(),
                cuboid_mutations: snapshot.applied_mutations.clone(),
                spawned_creatures: snapshot
                    .spawned_creatures
                    .iter()
                    .filter_map(|id| state.creatures.get(id))
                    .map(|creature| (**creature).clone())
                    .collect(),
                spawned_passives: snapshot
                    .spawned_passives
                    .iter()
                    .filter_map(|id| state.passives.get(id))
                    .map(|passive| (**passive).clone())
                    .collect(),
                completed_activities,
                latest_local_commit: client.last_processed_commit,
            }
        };
        Some(update)
    }

    pub fn entity_for_client(&self, client_id: u32) -> Option<i32> {
        self.clients.get(&client_id).map(|client| client.entity_id)
    }

    pub fn client_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
