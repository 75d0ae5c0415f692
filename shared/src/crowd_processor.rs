//! Parallel application of entity changes, partitioned by entity id
//!
//! Players, creatures and passives are each walked in id order and split
//! round-robin across workers. After a target's due changes the engine rules
//! run on the same mutable shadow, then it is frozen; a target nothing
//! happened to keeps its original `Arc`.

use crate::change::EntityChange;
use crate::context::{
    entity_random_key, passive_random_key, ChangeEnvelope, ContextBase, ScheduledChange, TickOutputs,
    TickProcessingContext,
};
use crate::engine;
use crate::entity::{CreatureEntity, Entity, PassiveEntity};
use crate::listeners::EntityChangeListener;
use crate::mutable::{MutableCreature, MutableEntity, MutableMinimalEntity, MutablePassive};
use crate::state::WorldState;
use crate::sync::ProcessorElement;
use crate::two_phase::ActivityEvent;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Switches for the crowd pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrowdOptions {
    /// Run gravity, damage, breath, food and passive physics after the changes.
    pub run_engine: bool,
}

impl Default for CrowdOptions {
    fn default() -> Self {
        Self { run_engine: true }
    }
}

/// One worker's results for its share of players, creatures and passives.
#[derive(Debug, Default)]
pub struct CrowdGroup {
    /// Only players whose frozen instance differs from the previous tick.
    pub players: BTreeMap<i32, Arc<Entity>>,
    /// Changed creatures; `None` when the creature died or despawned.
    pub creatures: BTreeMap<i32, Option<Arc<CreatureEntity>>>,
    pub passives: BTreeMap<i32, Option<Arc<PassiveEntity>>>,
    /// Delayed changes carried to the next tick.
    pub pending: BTreeMap<i32, Vec<ScheduledChange>>,
    pub applied_changes: BTreeMap<i32, Vec<EntityChange>>,
    /// Highest client commit level processed for each entity, applied or not.
    pub committed_levels: BTreeMap<i32, i64>,
    /// Phase 1 and phase 2 outcomes for the activity manager.
    pub activity_events: BTreeMap<i32, Vec<ActivityEvent>>,
    /// Follow-up work keyed by the player or creature that produced it.
    pub exports: BTreeMap<i32, TickOutputs>,
    pub passive_exports: BTreeMap<i32, TickOutputs>,
    pub changes_applied: usize,
    pub changes_dropped: usize,
}

impl CrowdGroup {
    /// Folds another worker's group into this one; every id belongs to one worker.
    pub fn merge(&mut self, other: CrowdGroup) {
        fn disjoint<V>(into: &mut BTreeMap<i32, V>, from: BTreeMap<i32, V>, what: &str) {
            for (id, value) in from {
                assert!(into.insert(id, value).is_none(), "{} {} processed twice", what, id);
            }
        }
        disjoint(&mut self.players, other.players, "player");
        disjoint(&mut self.creatures, other.creatures, "creature");
        disjoint(&mut self.passives, other.passives, "passive");
        disjoint(&mut self.pending, other.pending, "queue of");
        disjoint(&mut self.applied_changes, other.applied_changes, "changes of");
        disjoint(&mut self.committed_levels, other.committed_levels, "commit of");
        disjoint(&mut self.activity_events, other.activity_events, "activity of");
        disjoint(&mut self.exports, other.exports, "exports of");
        disjoint(&mut self.passive_exports, other.passive_exports, "exports of passive");
        self.changes_applied += other.changes_applied;
        self.changes_dropped += other.changes_dropped;
    }

    /// Writes every changed, died or despawned entity into `state`.
    pub fn apply_to(&self, state: &mut WorldState) {
        for (id, player) in &self.players {
            state.players.insert(*id, Arc::clone(player));
        }
        for (id, creature) in &self.creatures {
            match creature {
                Some(creature) => {
                    state.creatures.insert(*id, Arc::clone(creature));
                }
                None => {
                    state.creatures.remove(id);
                }
            }
        }
        for (id, passive) in &self.passives {
            match passive {
                Some(passive) => {
                    state.passives.insert(*id, Arc::clone(passive));
                }
                None => {
                    state.passives.remove(id);
                }
            }
        }
    }

    /// Exports flattened: creatures and players in id order, then passives.
    pub fn take_exports(&mut self) -> TickOutputs {
        let mut outputs = TickOutputs::default();
        for (_, exports) in std::mem::take(&mut self.exports) {
            outputs.append(exports);
        }
        for (_, exports) in std::mem::take(&mut self.passive_exports) {
            outputs.append(exports);
        }
        outputs
    }
}

/// Everything running one target's queue produced.
#[derive(Default)]
struct QueueResult {
    pending: Vec<ScheduledChange>,
    applied: Vec<EntityChange>,
    commit_level: i64,
    events: Vec<ActivityEvent>,
    outputs: TickOutputs,
    applied_count: usize,
    dropped_count: usize,
}

/// Applies this worker's share of entity changes, then the end-of-tick rules.
///
/// Players, creatures and passives are each split round-robin over their
/// sorted ids. Changes for an entity run in queue order against its mutable
/// shadow; an entity nothing touched freezes back to the same instance.
pub fn process_crowd_group(
    element: &ProcessorElement,
    base: &ContextBase,
    changes: &BTreeMap<i32, Vec<ScheduledChange>>,
    listener: &dyn EntityChangeListener,
    options: CrowdOptions,
) -> CrowdGroup {
    let mut group = CrowdGroup::default();
    let empty: Vec<ScheduledChange> = Vec::new();

    for (ordinal, (id, player)) in base.previous.players.iter().enumerate() {
        if !element.handles(ordinal) {
            continue;
        }
        let queue = changes.get(id);
        if queue.is_none() && !options.run_engine {
            continue;
        }
        let mut ctx = TickProcessingContext::new(base, entity_random_key(*id));
        let mut mutable = MutableEntity::existing(player);
        let mut result = run_queue(&mut ctx, &mut mutable, queue.unwrap_or(&empty), base.millis_per_tick, listener);
        if options.run_engine {
            ctx.set_envelope(ChangeEnvelope::Plain);
            engine::tick_player(&mut ctx, &mut mutable);
        }
        result.outputs.append(ctx.take_outputs());
        let frozen = mutable.freeze();
        if !Arc::ptr_eq(&frozen, player) {
            group.players.insert(*id, frozen);
        }
        record(&mut group, *id, result);
    }

    for (ordinal, (id, creature)) in base.previous.creatures.iter().enumerate() {
        if !element.handles(ordinal) {
            continue;
        }
        let queue = changes.get(id);
        if queue.is_none() && !options.run_engine {
            continue;
        }
        let mut ctx = TickProcessingContext::new(base, entity_random_key(*id));
        let mut mutable = MutableCreature::existing(creature);
        let mut result = run_queue(&mut ctx, &mut mutable, queue.unwrap_or(&empty), base.millis_per_tick, listener);
        if options.run_engine {
            ctx.set_envelope(ChangeEnvelope::Plain);
            engine::tick_creature(&mut ctx, &mut mutable);
        }
        result.outputs.append(ctx.take_outputs());
        match mutable.freeze() {
            Some(frozen) if Arc::ptr_eq(&frozen, creature) => {}
            Some(frozen) => {
                group.creatures.insert(*id, Some(frozen));
            }
            None => {
                group.creatures.insert(*id, None);
            }
        }
        record(&mut group, *id, result);
    }

    if options.run_engine {
        for (ordinal, (id, passive)) in base.previous.passives.iter().enumerate() {
            if !element.handles(ordinal) {
                continue;
            }
            let mut ctx = TickProcessingContext::new(base, passive_random_key(*id));
            let mut mutable = MutablePassive::existing(passive);
            engine::tick_passive(&mut ctx, &mut mutable);
            let outputs = ctx.take_outputs();
            match mutable.freeze() {
                Some(frozen) if Arc::ptr_eq(&frozen, passive) => {}
                frozen => {
                    group.passives.insert(*id, frozen);
                }
            }
            if !outputs.is_empty() {
                group.passive_exports.insert(*id, outputs);
            }
        }
    }
    group
}

/// Applies one change to one player of `state`, for client speculation.
///
/// Returns the frozen player and whatever the change scheduled, or `None`
/// if the player is unknown or the change did not apply.
pub fn apply_single_change(
    base: &ContextBase,
    entity_id: i32,
    change: &EntityChange,
    envelope: ChangeEnvelope,
) -> Option<(Arc<Entity>, TickOutputs)> {
    let player = base.previous.players.get(&entity_id)?;
    let mut ctx = TickProcessingContext::new(base, entity_random_key(entity_id));
    ctx.set_envelope(envelope);
    let mut mutable = MutableEntity::existing(player);
    if change.apply(&mut ctx, &mut mutable) {
        Some((mutable.freeze(), ctx.take_outputs()))
    } else {
        None
    }
}

fn run_queue(
    ctx: &mut TickProcessingContext,
    entity: &mut dyn MutableMinimalEntity,
    queue: &[ScheduledChange],
    millis_per_tick: u64,
    listener: &dyn EntityChangeListener,
) -> QueueResult {
    let mut result = QueueResult::default();
    let id = entity.id();
    for scheduled in queue {
        if scheduled.millis_until_ready > 0 {
            result.pending.push(scheduled.decremented(millis_per_tick));
            continue;
        }
        result.commit_level = result.commit_level.max(scheduled.commit_level);
        ctx.set_envelope(scheduled.envelope);
        let applied = scheduled.change.apply(ctx, entity);
        if applied {
            let mut outputs = ctx.take_outputs();
            let captured = outputs.phase2.take();
            result.outputs.append(outputs);
            listener.change_applied(id, &scheduled.change);
            result.applied.push(scheduled.change.clone());
            result.applied_count += 1;
            match (scheduled.envelope, captured) {
                (ChangeEnvelope::Phase1 { activity_id }, Some(phase2)) => {
                    result.events.push(ActivityEvent::Started {
                        activity_id,
                        phase2: phase2.change,
                        delay_millis: phase2.delay_millis,
                    })
                }
                (ChangeEnvelope::Phase1 { activity_id }, None) => result.events.push(ActivityEvent::Finished {
                    activity_id,
                    success: true,
                }),
                (ChangeEnvelope::Phase2 { activity_id }, _) => result.events.push(ActivityEvent::Finished {
                    activity_id,
                    success: true,
                }),
                (ChangeEnvelope::Standard, _) => result.events.push(ActivityEvent::NonActivity),
                (ChangeEnvelope::Plain, _) | (ChangeEnvelope::SuppressPhase2, _) => {}
            }
        } else {
            ctx.discard_outputs();
            listener.change_dropped(id, &scheduled.change);
            result.dropped_count += 1;
            match scheduled.envelope {
                ChangeEnvelope::Phase1 { activity_id } | ChangeEnvelope::Phase2 { activity_id } => {
                    result.events.push(ActivityEvent::Finished {
                        activity_id,
                        success: false,
                    })
                }
                ChangeEnvelope::Standard => result.events.push(ActivityEvent::NonActivity),
                ChangeEnvelope::Plain | ChangeEnvelope::SuppressPhase2 => {}
            }
        }
    }
    result
}

fn record(group: &mut CrowdGroup, id: i32, result: QueueResult) {
    group.changes_applied += result.applied_count;
    group.changes_dropped += result.dropped_count;
    if !result.pending.is_empty() {
        group.pending.insert(id, result.pending);
    }
    if !result.applied.is_empty() {
        group.applied_changes.insert(id, result.applied);
    }
    if result.commit_level > 0 {
        group.committed_levels.insert(id, result.commit_level);
    }
    if !result.events.is_empty() {
        group.activity_events.insert(id, result.events);
    }
    if !result.outputs.is_empty() {
        group.exports.insert(id, result.outputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, Environment};
    use crate::config::WorldConfig;
    use crate::cuboid::CuboidData;
    use crate::entity::CreatureType;
    use crate::listeners::NoopListener;
    use crate::sync::SyncPoint;
    use crate::types::{CuboidAddress, EntityLocation};
    use assert_approx_eq::assert_approx_eq;

    fn floor_world() -> WorldState {
        let mut state = WorldState::default();
        let air = CuboidAddress::new(0, 0, 0);
        let ground = CuboidAddress::new(0, 0, -1);
        state
            .cuboids
            .insert(air, Arc::new(CuboidData::filled(air, BlockType::AIR)));
        state
            .cuboids
            .insert(ground, Arc::new(CuboidData::filled(ground, BlockType::STONE)));
        for id in 1..=4 {
            state.players.insert(
                id,
                Arc::new(Entity::new(id, EntityLocation::new(2.0 * id as f32, 2.0, 0.0))),
            );
        }
        state
    }

    fn move_by(x: f32) -> ScheduledChange {
        ScheduledChange {
            change: EntityChange::Move {
                delta: EntityLocation::new(x, 0.0, 0.0),
                millis: 50,
            },
            envelope: ChangeEnvelope::Standard,
            millis_until_ready: 0,
            commit_level: 1,
        }
    }

    #[test]
    fn test_idle_entities_keep_their_instance() {
        let state = floor_world();
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config: &config,
            env: &env,
            previous: &state,
        };
        let mut changes = BTreeMap::new();
        changes.insert(2, vec![move_by(0.4)]);
        let group = process_crowd_group(
            &ProcessorElement::single_threaded(),
            &base,
            &changes,
            &NoopListener,
            CrowdOptions::default(),
        );
        assert_eq!(group.players.len(), 1);
        assert_approx_eq!(group.players[&2].location.x, 4.4);
        assert_eq!(group.committed_levels[&2], 1);
        assert_eq!(group.activity_events[&2], vec![ActivityEvent::NonActivity]);

        let mut next = state.clone();
        group.apply_to(&mut next);
        assert!(Arc::ptr_eq(&next.players[&1], &state.players[&1]));
        assert!(!Arc::ptr_eq(&next.players[&2], &state.players[&2]));
    }

    #[test]
    fn test_dropped_change_counts_and_reports() {
        let state = floor_world();
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config: &config,
            env: &env,
            previous: &state,
        };
        let mut changes = BTreeMap::new();
        changes.insert(1, vec![move_by(5.0)]);
        let group = process_crowd_group(
            &ProcessorElement::single_threaded(),
            &base,
            &changes,
            &NoopListener,
            CrowdOptions::default(),
        );
        assert_eq!(group.changes_dropped, 1);
        assert!(group.players.is_empty());
        assert_eq!(group.committed_levels[&1], 1);
    }

    #[test]
    fn test_attack_becomes_next_tick_damage() {
        let mut state = floor_world();
        let orc = CreatureEntity::new(-1, CreatureType::Orc, EntityLocation::new(3.0, 2.0, 0.0));
        state.creatures.insert(-1, Arc::new(orc));
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config: &config,
            env: &env,
            previous: &state,
        };
        let mut changes = BTreeMap::new();
        changes.insert(
            1,
            vec![ScheduledChange::plain(EntityChange::Attack { target: -1 }, 0)],
        );
        let mut group = process_crowd_group(
            &ProcessorElement::single_threaded(),
            &base,
            &changes,
            &NoopListener,
            CrowdOptions::default(),
        );
        // The orc is untouched this tick.
        assert!(group.creatures.is_empty());
        let exports = group.take_exports();
        assert_eq!(exports.changes.len(), 1);
        assert_eq!(exports.changes[0].0, -1);
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let state = floor_world();
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config: &config,
            env: &env,
            previous: &state,
        };
        let mut changes = BTreeMap::new();
        for id in 1..=4 {
            changes.insert(id, vec![move_by(0.1 * id as f32)]);
        }
        let single = process_crowd_group(
            &ProcessorElement::single_threaded(),
            &base,
            &changes,
            &NoopListener,
            CrowdOptions::default(),
        );
        let sync = Arc::new(SyncPoint::new(3));
        let mut merged = CrowdGroup::default();
        for index in 0..3 {
            merged.merge(process_crowd_group(
                &ProcessorElement::new(index, Arc::clone(&sync)),
                &base,
                &changes,
                &NoopListener,
                CrowdOptions::default(),
            ));
        }
        assert_eq!(single.players.len(), merged.players.len());
        for (id, player) in &single.players {
            assert_eq!(**player, *merged.players[id]);
        }
        assert_eq!(single.applied_changes, merged.applied_changes);
    }

    #[test]
    fn test_single_change_for_projection() {
        let state = floor_world();
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config: &config,
            env: &env,
            previous: &state,
        };
        let change = EntityChange::Move {
            delta: EntityLocation::new(0.0, 0.4, 0.0),
            millis: 50,
        };
        let (player, outputs) = apply_single_change(&base, 3, &change, ChangeEnvelope::Plain).unwrap();
        assert_approx_eq!(player.location.y, 2.4);
        assert!(outputs.is_empty());
        assert!(apply_single_change(&base, 9, &change, ChangeEnvelope::Plain).is_none());
    }
}
