//! Callbacks invoked from worker threads while a tick runs
//!
//! Implementations must be cheap and must not block: they run inside the
//! parallel phase, once per applied or dropped command.

use crate::change::EntityChange;
use crate::mutation::Mutation;

pub trait BlockChangeListener: Send + Sync {
    fn mutation_applied(&self, _mutation: &Mutation) {}
    fn mutation_dropped(&self, _mutation: &Mutation) {}
}

pub trait EntityChangeListener: Send + Sync {
    fn change_applied(&self, _target_id: i32, _change: &EntityChange) {}
    fn change_dropped(&self, _target_id: i32, _change: &EntityChange) {}
}

/// Listener for callers that only want the returned counts.
pub struct NoopListener;

impl BlockChangeListener for NoopListener {}

impl EntityChangeListener for NoopListener {}
