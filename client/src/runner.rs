//! Drives a [`SpeculativeProjection`] from network events and local input
//!
//! The network layer runs on its own thread and only ever pushes calls into
//! [`NetworkCallbacks`]. The owner of the runner drains them on its own thread
//! with [`ClientRunner::run_pending_calls`], so the projection itself is never
//! shared.

use crate::projection::{IgnoreProjection, ProjectionListener, SpeculativeProjection};
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::protocol::ServerTickUpdate;
use shared::{AbsoluteLocation, BlockType, EntityChange, EntityLocation, Environment, WorldConfig};
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

/// The outgoing side of a connection.
pub trait ClientAdapter {
    fn send_change(&mut self, change: &EntityChange, commit_level: i64);

    fn disconnect(&mut self) {}
}

#[derive(Debug, Clone)]
pub enum NetworkCall {
    Connected { entity_id: i32 },
    ReceivedTick(ServerTickUpdate),
    Disconnected,
}

/// Handed to the network thread; every method only queues a call.
#[derive(Clone, Default)]
pub struct NetworkCallbacks {
    calls: Arc<Mutex<VecDeque<NetworkCall>>>,
}

impl NetworkCallbacks {
    pub fn client_connected(&self, entity_id: i32) {
        self.calls.lock().push_back(NetworkCall::Connected { entity_id });
    }

    pub fn received_tick(&self, update: ServerTickUpdate) {
        self.calls.lock().push_back(NetworkCall::ReceivedTick(update));
    }

    pub fn disconnected(&self) {
        self.calls.lock().push_back(NetworkCall::Disconnected);
    }

    fn drain(&self) -> Vec<NetworkCall> {
        self.calls.lock().drain(..).collect()
    }
}

pub struct ClientRunner<A: ClientAdapter> {
    adapter: A,
    callbacks: NetworkCallbacks,
    config: WorldConfig,
    env: Arc<Environment>,
    listener: Option<Box<dyn ProjectionListener>>,
    projection: Option<SpeculativeProjection>,
    /// Applied locally but not sent yet, so later changes may still merge into it.
    buffered: Option<(i64, EntityChange)>,
}

impl<A: ClientAdapter> ClientRunner<A> {
    pub fn new(adapter: A, config: WorldConfig, env: Arc<Environment>, listener: Box<dyn ProjectionListener>) -> Self {
        Self {
            adapter,
            callbacks: NetworkCallbacks::default(),
            config,
            env,
            listener: Some(listener),
            projection: None,
            buffered: None,
        }
    }

    pub fn callbacks(&self) -> NetworkCallbacks {
        self.callbacks.clone()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn is_connected(&self) -> bool {
        self.projection.is_some()
    }

    pub fn projection(&self) -> Option<&SpeculativeProjection> {
        self.projection.as_ref()
    }

    pub fn local_entity_id(&self) -> Option<i32> {
        self.projection.as_ref().map(|projection| projection.local_entity_id())
    }

    /// Processes everything the network thread queued, in arrival order.
    /// Returns how many calls were handled.
    pub fn run_pending_calls(&mut self, current_time_millis: u64) -> usize {
        let calls = self.callbacks.drain();
        let count = calls.len();
        for call in calls {
            match call {
                NetworkCall::Connected { entity_id } => {
                    info!("Connected as entity {}", entity_id);
                    let listener = self
                        .listener
                        .take()
                        .unwrap_or_else(|| Box::new(IgnoreProjection));
                    self.projection = Some(SpeculativeProjection::new(
                        entity_id,
                        self.config.clone(),
                        Arc::clone(&self.env),
                        listener,
                    ));
                    self.buffered = None;
                }
                NetworkCall::ReceivedTick(update) => match &mut self.projection {
                    Some(projection) => {
                        let remaining = projection.apply_changes_for_server_tick(&update, current_time_millis);
                        debug!(
                            "Tick {} applied, {} local changes unconfirmed",
                            update.tick_number, remaining
                        );
                    }
                    None => warn!("Ignoring tick {} received before connecting", update.tick_number),
                },
                NetworkCall::Disconnected => {
                    info!("Disconnected from server");
                    self.projection = None;
                    self.buffered = None;
                }
            }
        }
        count
    }

    /// Applies `change` locally and buffers it for sending.
    /// Returns false if it was rejected and will not be sent.
    pub fn apply_local_change(&mut self, change: EntityChange, current_time_millis: u64) -> bool {
        let projection = match &mut self.projection {
            Some(projection) => projection,
            None => {
                warn!("Dropping {:?} while not connected", change);
                return false;
            }
        };
        let commit_level = projection.apply_local_change(change, current_time_millis);
        if commit_level == 0 {
            return false;
        }
        let recorded = match projection.change_for_commit(commit_level) {
            Some(recorded) => recorded.clone(),
            None => return false,
        };
        match mem::replace(&mut self.buffered, Some((commit_level, recorded))) {
            Some((previous_commit, previous)) if previous_commit != commit_level => {
                self.adapter.send_change(&previous, previous_commit);
            }
            _ => {}
        }
        true
    }

    pub fn move_horizontal(&mut self, dx: f32, dy: f32, millis: u64, current_time_millis: u64) -> bool {
        self.apply_local_change(
            EntityChange::Move {
                delta: EntityLocation::new(dx, dy, 0.0),
                millis,
            },
            current_time_millis,
        )
    }

    pub fn jump(&mut self, current_time_millis: u64) -> bool {
        self.apply_local_change(EntityChange::Jump, current_time_millis)
    }

    pub fn place_block(&mut self, target: AbsoluteLocation, block: BlockType, millis: u64, current_time_millis: u64) -> bool {
        self.apply_local_change(EntityChange::BeginPlaceBlock { target, block, millis }, current_time_millis)
    }

    pub fn hit_block(&mut self, target: AbsoluteLocation, millis: u64, current_time_millis: u64) -> bool {
        self.apply_local_change(EntityChange::HitBlock { target, millis }, current_time_millis)
    }

    /// Sends the buffered change; nothing merges into it afterwards.
    pub fn flush(&mut self) {
        if let Some((commit_level, change)) = self.buffered.take() {
            self.adapter.send_change(&change, commit_level);
            if let Some(projection) = &mut self.projection {
                projection.seal_last_local_change();
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.flush();
        self.adapter.disconnect();
    }
}
