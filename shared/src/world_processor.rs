//! Parallel application of block mutations, partitioned by cuboid
//!
//! Each worker walks the queued cuboids in address order and takes the ones
//! its [`ProcessorElement`] owns. Everything a cuboid produces for the next
//! tick is kept under that cuboid's address so that merging the per-thread
//! groups gives the same result whatever the thread count.

use crate::context::{cuboid_random_key, ContextBase, ScheduledMutation, TickOutputs, TickProcessingContext};
use crate::cuboid::{AspectMask, BlockChangeDescription, CuboidData, CuboidHeightMap};
use crate::listeners::BlockChangeListener;
use crate::mutable::MutableBlockProxy;
use crate::mutation::Mutation;
use crate::propagation::{self, AspectChannel};
use crate::state::WorldState;
use crate::sync::ProcessorElement;
use crate::types::{AbsoluteLocation, BlockAddress, CuboidAddress, Direction, CUBOID_EDGE};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A cuboid that changed this tick.
#[derive(Debug, Clone)]
pub struct CuboidOutcome {
    pub cuboid: Arc<CuboidData>,
    /// Recomputed from the new cuboid.
    pub height_map: CuboidHeightMap,
    /// One entry per block whose type or aspects differ from before the tick.
    pub block_changes: Vec<BlockChangeDescription>,
}

/// What one worker produced; merged with the other workers' groups afterwards.
#[derive(Debug, Default)]
pub struct WorldGroup {
    /// Only cuboids with at least one changed block.
    pub cuboids: BTreeMap<CuboidAddress, CuboidOutcome>,
    /// Mutations that were not yet due, with their delay already decremented.
    pub pending: BTreeMap<CuboidAddress, Vec<ScheduledMutation>>,
    /// Mutations that applied, in the order they ran.
    pub applied_mutations: BTreeMap<CuboidAddress, Vec<Mutation>>,
    /// Follow-up work for the next tick, keyed by the cuboid that produced it.
    pub exports: BTreeMap<CuboidAddress, TickOutputs>,
    pub mutations_applied: usize,
    pub mutations_dropped: usize,
}

impl WorldGroup {
    /// Folds another worker's group into this one. Keys never overlap since
    /// every cuboid is owned by exactly one worker.
    pub fn merge(&mut self, other: WorldGroup) {
        for (address, outcome) in other.cuboids {
            let previous = self.cuboids.insert(address, outcome);
            assert!(previous.is_none(), "cuboid {:?} processed twice", address);
        }
        for (address, pending) in other.pending {
            assert!(self.pending.insert(address, pending).is_none());
        }
        for (address, applied) in other.applied_mutations {
            assert!(self.applied_mutations.insert(address, applied).is_none());
        }
        for (address, exports) in other.exports {
            assert!(self.exports.insert(address, exports).is_none());
        }
        self.mutations_applied += other.mutations_applied;
        self.mutations_dropped += other.mutations_dropped;
    }

    /// Replaces every changed cuboid in `state`.
    pub fn apply_to(&self, state: &mut WorldState) {
        for (address, outcome) in &self.cuboids {
            state.cuboids.insert(*address, Arc::clone(&outcome.cuboid));
        }
    }

    /// Exports flattened in cuboid order.
    pub fn take_exports(&mut self) -> TickOutputs {
        let mut outputs = TickOutputs::default();
        for (_, exports) in std::mem::take(&mut self.exports) {
            outputs.append(exports);
        }
        outputs
    }
}

/// Runs this worker's share of the tick's block mutations.
///
/// Cuboids are handed out round-robin over their sorted addresses, so each
/// one is processed by exactly one worker and the split depends only on the
/// set of cuboids with queued work. Each cuboid gets its own context seeded
/// from its address; mutations that are not due yet go back to `pending`.
///
/// # Arguments
/// * `element` - Which share of the cuboids this worker owns
/// * `base` - Tick number, config and the previous tick's state
/// * `mutations` - Queued mutations for every cuboid, in submission order
/// * `listener` - Told about every mutation applied or dropped
pub fn process_world_group(
    element: &ProcessorElement,
    base: &ContextBase,
    mutations: &BTreeMap<CuboidAddress, Vec<ScheduledMutation>>,
    listener: &dyn BlockChangeListener,
) -> WorldGroup {
    let mut group = WorldGroup::default();
    for (ordinal, (address, queue)) in mutations.iter().enumerate() {
        if !element.handles(ordinal) {
            continue;
        }
        // Missing cuboids were already reported when the queue was assembled.
        let cuboid = match base.previous.cuboids.get(address) {
            Some(cuboid) => cuboid,
            None => continue,
        };
        process_cuboid(base, *address, cuboid, queue, listener, &mut group);
    }
    group
}

/// Applies `mutations` immediately on the calling thread. Used by client projections.
pub fn apply_mutations_now(
    base: &ContextBase,
    mutations: &[Mutation],
    listener: &dyn BlockChangeListener,
) -> WorldGroup {
    let mut queues: BTreeMap<CuboidAddress, Vec<ScheduledMutation>> = BTreeMap::new();
    for mutation in mutations {
        queues
            .entry(mutation.absolute_location().cuboid_address())
            .or_default()
            .push(ScheduledMutation::now(mutation.clone()));
    }
    process_world_group(&ProcessorElement::single_threaded(), base, &queues, listener)
}

fn process_cuboid(
    base: &ContextBase,
    address: CuboidAddress,
    cuboid: &Arc<CuboidData>,
    queue: &[ScheduledMutation],
    listener: &dyn BlockChangeListener,
    group: &mut WorldGroup,
) {
    let mut ctx = TickProcessingContext::new(base, cuboid_random_key(address));
    let mut proxies: BTreeMap<BlockAddress, MutableBlockProxy> = BTreeMap::new();
    let mut pending = Vec::new();
    let mut applied = Vec::new();
    let mut outputs = TickOutputs::default();

    for scheduled in queue {
        if scheduled.millis_until_ready > 0 {
            pending.push(scheduled.decremented(base.millis_per_tick));
            continue;
        }
        let mutation = &scheduled.mutation;
        let location = mutation.absolute_location();
        debug_assert_eq!(location.cuboid_address(), address);
        let proxy = proxies
            .entry(location.block_address())
            .or_insert_with(|| MutableBlockProxy::new(location, cuboid));
        let before = proxy.clone();
        if mutation.apply(&mut ctx, proxy) {
            outputs.append(ctx.take_outputs());
            listener.mutation_applied(mutation);
            applied.push(mutation.clone());
            group.mutations_applied += 1;
        } else {
            *proxy = before;
            ctx.discard_outputs();
            listener.mutation_dropped(mutation);
            group.mutations_dropped += 1;
        }
    }

    let type_changes: Vec<AbsoluteLocation> = proxies
        .values()
        .filter(|proxy| proxy.changed_aspects().contains(AspectMask::BLOCK))
        .map(|proxy| proxy.location())
        .collect();

    for channel in AspectChannel::ALL {
        let seeds: Vec<BlockAddress> = proxies
            .iter()
            .filter(|(_, proxy)| {
                proxy.changed_aspects().contains(AspectMask::BLOCK) || proxy.is_propagation_seed(channel)
            })
            .map(|(block, _)| *block)
            .collect();
        let crossings = propagation::propagate(channel, base.env, base.previous, cuboid, &mut proxies, &seeds);
        for location in crossings {
            outputs
                .mutations
                .push(ScheduledMutation::now(Mutation::PropagateAspect { location, channel }));
        }
    }

    let mut updates = BTreeSet::new();
    for location in type_changes {
        for direction in Direction::ALL {
            let neighbour = location.step(direction);
            if base.previous.is_loaded(neighbour.cuboid_address()) {
                updates.insert(neighbour);
            }
        }
    }
    for location in updates {
        outputs
            .mutations
            .push(ScheduledMutation::now(Mutation::BlockUpdate { location }));
    }

    let changed: Vec<&MutableBlockProxy> = proxies.values().filter(|proxy| proxy.did_change()).collect();
    if !changed.is_empty() {
        let mut data = (**cuboid).clone();
        let mut block_changes = Vec::with_capacity(changed.len());
        for proxy in changed {
            let block = proxy.location().block_address();
            data.write_block_state(block, proxy.state());
            block_changes.push(BlockChangeDescription {
                block,
                previous_block: proxy.original_block(),
                new_block: proxy.block(),
                changed: proxy.changed_aspects(),
            });
        }
        let height_map = data.height_map();
        group.cuboids.insert(
            address,
            CuboidOutcome {
                cuboid: Arc::new(data),
                height_map,
                block_changes,
            },
        );
    }
    if !pending.is_empty() {
        group.pending.insert(address, pending);
    }
    if !applied.is_empty() {
        group.applied_mutations.insert(address, applied);
    }
    if !outputs.is_empty() {
        group.exports.insert(address, outputs);
    }
}

/// Block updates for both sides of every face where `address` meets a cuboid
/// for which `is_loaded` holds.
pub fn face_block_updates(address: CuboidAddress, is_loaded: impl Fn(CuboidAddress) -> bool) -> Vec<Mutation> {
    let mut updates = Vec::new();
    let last = (CUBOID_EDGE - 1) as u8;
    for direction in Direction::ALL {
        let neighbour = address.neighbour(direction);
        if !is_loaded(neighbour) {
            continue;
        }
        for a in 0..CUBOID_EDGE as u8 {
            for b in 0..CUBOID_EDGE as u8 {
                let face = match direction {
                    Direction::East => BlockAddress::new(last, a, b),
                    Direction::West => BlockAddress::new(0, a, b),
                    Direction::North => BlockAddress::new(a, last, b),
                    Direction::South => BlockAddress::new(a, 0, b),
                    Direction::Up => BlockAddress::new(a, b, last),
                    Direction::Down => BlockAddress::new(a, b, 0),
                };
                let inside = AbsoluteLocation::from_parts(address, face);
                updates.push(Mutation::BlockUpdate { location: inside });
                updates.push(Mutation::BlockUpdate {
                    location: inside.step(direction),
                });
            }
        }
    }
    updates
}
