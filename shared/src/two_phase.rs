//! Bookkeeping for activities split into a phase 1 and a delayed phase 2
//!
//! The manager holds at most one pending phase 2 per entity. It never cancels
//! anything on its own: whoever submits new work for an entity is expected to
//! check [`TwoPhaseActivityManager::is_activity_in_progress`] and call
//! [`TwoPhaseActivityManager::cancel_activity`] first.

use crate::change::EntityChange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityResult {
    Completed { activity_id: i64, success: bool },
    /// An ordinary change finished; nothing was pending for it.
    NonActivity,
}

/// What processing a change meant for the activity bookkeeping of its entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    /// Phase 1 applied and asked for its phase 2.
    Started {
        activity_id: i64,
        phase2: EntityChange,
        delay_millis: u64,
    },
    /// Phase 1 failed, or phase 2 ran.
    Finished { activity_id: i64, success: bool },
    NonActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Waiting { millis_until_ready: u64 },
    /// Phase 2 has been handed to the change queue.
    Submitted,
}

#[derive(Debug, Clone)]
struct PendingActivity {
    activity_id: i64,
    phase2: EntityChange,
    state: PendingState,
}

#[derive(Debug, Default)]
pub struct TwoPhaseActivityManager {
    pending: BTreeMap<i32, PendingActivity>,
    results: BTreeMap<i32, Vec<ActivityResult>>,
}

impl TwoPhaseActivityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the phase 2 of a new activity. Panics if one is already pending.
    pub fn schedule_new_activity(&mut self, entity_id: i32, activity_id: i64, phase2: EntityChange, delay_millis: u64) {
        let previous = self.pending.insert(
            entity_id,
            PendingActivity {
                activity_id,
                phase2,
                state: PendingState::Waiting {
                    millis_until_ready: delay_millis,
                },
            },
        );
        assert!(
            previous.is_none(),
            "entity {} already has a pending activity",
            entity_id
        );
    }

    pub fn is_activity_in_progress(&self, entity_id: i32) -> bool {
        self.pending.contains_key(&entity_id)
    }

    pub fn pending_activity_id(&self, entity_id: i32) -> Option<i64> {
        self.pending.get(&entity_id).map(|pending| pending.activity_id)
    }

    /// Drops a phase 2 that has not been submitted yet and records the
    /// activity as failed. Returns false if there was nothing to cancel.
    pub fn cancel_activity(&mut self, entity_id: i32) -> bool {
        match self.pending.get(&entity_id) {
            Some(pending) if matches!(pending.state, PendingState::Waiting { .. }) => {
                let activity_id = pending.activity_id;
                self.pending.remove(&entity_id);
                self.record(
                    entity_id,
                    ActivityResult::Completed {
                        activity_id,
                        success: false,
                    },
                );
                true
            }
            _ => false,
        }
    }

    pub fn activity_completed(&mut self, entity_id: i32, activity_id: i64, success: bool) {
        if self.pending_activity_id(entity_id) == Some(activity_id) {
            self.pending.remove(&entity_id);
        }
        self.record(entity_id, ActivityResult::Completed { activity_id, success });
    }

    pub fn non_activity_completed(&mut self, entity_id: i32) {
        self.record(entity_id, ActivityResult::NonActivity);
    }

    /// Feeds one processed change's outcome in. A new activity replaces any
    /// pending one, which counts as cancelled.
    pub fn handle_event(&mut self, entity_id: i32, event: ActivityEvent) {
        match event {
            ActivityEvent::Started {
                activity_id,
                phase2,
                delay_millis,
            } => {
                if self.is_activity_in_progress(entity_id) && !self.cancel_activity(entity_id) {
                    // Already submitted; its result arrives when it runs.
                    self.pending.remove(&entity_id);
                }
                self.schedule_new_activity(entity_id, activity_id, phase2, delay_millis);
            }
            ActivityEvent::Finished { activity_id, success } => {
                self.activity_completed(entity_id, activity_id, success)
            }
            ActivityEvent::NonActivity => self.non_activity_completed(entity_id),
        }
    }

    /// Advances every waiting activity by one tick and returns the phase 2
    /// changes that are now due, as `(entity, activity_id, change)` in entity order.
    /// An activity is due once its remaining delay has reached zero, never before.
    pub fn advance(&mut self, millis: u64) -> Vec<(i32, i64, EntityChange)> {
        let mut due = Vec::new();
        for (entity_id, pending) in self.pending.iter_mut() {
            if let PendingState::Waiting { millis_until_ready } = pending.state {
                if millis_until_ready == 0 {
                    pending.state = PendingState::Submitted;
                    due.push((*entity_id, pending.activity_id, pending.phase2.clone()));
                } else {
                    pending.state = PendingState::Waiting {
                        millis_until_ready: millis_until_ready.saturating_sub(millis),
                    };
                }
            }
        }
        due
    }

    /// Results recorded for `entity_id` since the last drain.
    pub fn get_results_for_entity(&self, entity_id: i32) -> &[ActivityResult] {
        self.results.get(&entity_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn drain_results(&mut self) -> BTreeMap<i32, Vec<ActivityResult>> {
        std::mem::take(&mut self.results)
    }

    /// Forgets an entity that left; nothing it had pending will complete.
    pub fn forget_entity(&mut self, entity_id: i32) {
        self.pending.remove(&entity_id);
        self.results.remove(&entity_id);
    }

    fn record(&mut self, entity_id: i32, result: ActivityResult) {
        self.results.entry(entity_id).or_default().push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::types::AbsoluteLocation;

    fn finish() -> EntityChange {
        EntityChange::FinishPlaceBlock {
            target: AbsoluteLocation::new(1, 1, 1),
            block: BlockType::STONE,
        }
    }

    #[test]
    fn test_phase2_due_after_delay() {
        let mut manager = TwoPhaseActivityManager::new();
        manager.schedule_new_activity(1, 5, finish(), 100);
        assert!(manager.advance(50).is_empty());
        assert!(manager.advance(50).is_empty());
        let due = manager.advance(50);
        assert_eq!(due, vec![(1, 5, finish())]);
        // Submitted once only.
        assert!(manager.advance(50).is_empty());
        assert!(manager.is_activity_in_progress(1));

        manager.activity_completed(1, 5, true);
        assert!(!manager.is_activity_in_progress(1));
        assert_eq!(
            manager.get_results_for_entity(1),
            &[ActivityResult::Completed {
                activity_id: 5,
                success: true
            }]
        );
    }

    #[test]
    fn test_cancel_records_failure() {
        let mut manager = TwoPhaseActivityManager::new();
        manager.schedule_new_activity(2, 9, finish(), 500);
        manager.advance(50);
        assert!(manager.cancel_activity(2));
        assert!(!manager.is_activity_in_progress(2));
        assert!(!manager.cancel_activity(2));
        assert_eq!(
            manager.get_results_for_entity(2),
            &[ActivityResult::Completed {
                activity_id: 9,
                success: false
            }]
        );
        assert!(manager.advance(1000).is_empty());
    }

    #[test]
    fn test_submitted_phase2_cannot_be_cancelled() {
        let mut manager = TwoPhaseActivityManager::new();
        manager.schedule_new_activity(3, 1, finish(), 0);
        assert_eq!(manager.advance(50).len(), 1);
        assert!(!manager.cancel_activity(3));
    }

    #[test]
    #[should_panic(expected = "already has a pending activity")]
    fn test_second_activity_panics() {
        let mut manager = TwoPhaseActivityManager::new();
        manager.schedule_new_activity(4, 1, finish(), 100);
        manager.schedule_new_activity(4, 2, finish(), 100);
    }

    #[test]
    fn test_new_activity_event_supersedes_pending() {
        let mut manager = TwoPhaseActivityManager::new();
        manager.handle_event(
            5,
            ActivityEvent::Started {
                activity_id: 1,
                phase2: finish(),
                delay_millis: 100,
            },
        );
        manager.handle_event(
            5,
            ActivityEvent::Started {
                activity_id: 2,
                phase2: finish(),
                delay_millis: 100,
            },
        );
        assert_eq!(manager.pending_activity_id(5), Some(2));
        manager.handle_event(5, ActivityEvent::NonActivity);
        let results = manager.drain_results();
        assert_eq!(
            results[&5],
            vec![
                ActivityResult::Completed {
                    activity_id: 1,
                    success: false
                },
                ActivityResult::NonActivity
            ]
        );
        assert!(manager.get_results_for_entity(5).is_empty());
    }
}
