//! Block-targeted commands
//!
//! A mutation is applied to the block proxy at its location. `false` means the
//! precondition no longer holds (the block changed under it, the container is
//! full) and the mutation is dropped without retry.

use crate::block::BlockType;
use crate::change::EntityChange;
use crate::context::TickProcessingContext;
use crate::entity::{PassiveEntity, PassiveKind};
use crate::inventory::Inventory;
use crate::mutable::MutableBlockProxy;
use crate::propagation::AspectChannel;
use crate::types::{AbsoluteLocation, Direction, EntityLocation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Swaps `expected` for `replacement`, resetting damage and container state.
    ReplaceBlock {
        location: AbsoluteLocation,
        expected: BlockType,
        replacement: BlockType,
    },
    /// A neighbour changed; lets gravity-affected blocks react.
    BlockUpdate { location: AbsoluteLocation },
    /// Accumulates break damage, breaking the block once its toughness is reached.
    IncrementDamage {
        location: AbsoluteLocation,
        expected: BlockType,
        damage: u16,
        /// Player that receives the broken block, if any.
        breaker: Option<i32>,
    },
    StoreItems {
        location: AbsoluteLocation,
        item: BlockType,
        count: u32,
    },
    /// Re-evaluates light or logic at a block, usually across a cuboid face.
    PropagateAspect {
        location: AbsoluteLocation,
        channel: AspectChannel,
    },
}

impl Mutation {
    pub fn absolute_location(&self) -> AbsoluteLocation {
        match self {
            Mutation::ReplaceBlock { location, .. }
            | Mutation::BlockUpdate { location }
            | Mutation::IncrementDamage { location, .. }
            | Mutation::StoreItems { location, .. }
            | Mutation::PropagateAspect { location, .. } => *location,
        }
    }

    /// Block updates and propagation requests are recomputed after a reload.
    pub fn can_save_to_disk(&self) -> bool {
        !matches!(
            self,
            Mutation::BlockUpdate { .. } | Mutation::PropagateAspect { .. }
        )
    }

    /// Block mutations complete within the tick that applies them.
    pub fn time_cost_millis(&self) -> u64 {
        0
    }

    pub fn apply(&self, ctx: &mut TickProcessingContext, proxy: &mut MutableBlockProxy) -> bool {
        debug_assert_eq!(proxy.location(), self.absolute_location());
        match self {
            Mutation::ReplaceBlock {
                expected,
                replacement,
                ..
            } => {
                if proxy.block() != *expected {
                    return false;
                }
                spill_inventory(ctx, proxy);
                replace_block(ctx, proxy, *replacement);
                true
            }
            Mutation::BlockUpdate { location } => {
                let block = proxy.block();
                if !ctx.env.block(block).falls {
                    return false;
                }
                let below = location.step(Direction::Down);
                match ctx.previous_block_type(below) {
                    Some(under) if !ctx.env.is_solid(under) => {
                        replace_block(ctx, proxy, BlockType::AIR);
                        ctx.spawn_passive(
                            PassiveKind::FallingBlock { block },
                            block_corner(*location),
                            EntityLocation::default(),
                        );
                        true
                    }
                    _ => false,
                }
            }
            Mutation::IncrementDamage {
                location,
                expected,
                damage,
                breaker,
            } => {
                if proxy.block() != *expected {
                    return false;
                }
                let toughness = ctx.env.block(*expected).toughness;
                if toughness == 0 {
                    return false;
                }
                let total = proxy.damage().saturating_add(*damage);
                if total < toughness {
                    proxy.set_damage(total);
                    return true;
                }
                spill_inventory(ctx, proxy);
                replace_block(ctx, proxy, BlockType::AIR);
                match breaker {
                    Some(player) => ctx.next_change(
                        *player,
                        EntityChange::AcceptItems {
                            item: *expected,
                            count: 1,
                        },
                    ),
                    None => ctx.spawn_passive(
                        PassiveKind::ItemStack {
                            item: *expected,
                            count: 1,
                        },
                        block_corner(*location),
                        EntityLocation::default(),
                    ),
                }
                true
            }
            Mutation::StoreItems { item, count, .. } => {
                let capacity = ctx.env.block(proxy.block()).inventory_capacity;
                if capacity == 0 {
                    return false;
                }
                let mut inventory = proxy
                    .inventory()
                    .cloned()
                    .unwrap_or_else(|| Inventory::new(capacity));
                if !inventory.add(*item, *count) {
                    return false;
                }
                proxy.set_inventory(Some(inventory));
                true
            }
            Mutation::PropagateAspect { channel, .. } => {
                proxy.request_propagation(*channel);
                true
            }
        }
    }
}

fn replace_block(ctx: &TickProcessingContext, proxy: &mut MutableBlockProxy, block: BlockType) {
    proxy.set_block(block);
    proxy.set_damage(0);
    let capacity = ctx.env.block(block).inventory_capacity;
    proxy.set_inventory(if capacity > 0 {
        Some(Inventory::new(capacity))
    } else {
        None
    });
}

/// Drops whatever a container held as item stacks at its location.
fn spill_inventory(ctx: &mut TickProcessingContext, proxy: &MutableBlockProxy) {
    let items: Vec<(BlockType, u32)> = match proxy.inventory() {
        Some(inventory) => inventory.items().collect(),
        None => return,
    };
    let corner = block_corner(proxy.location());
    for (item, count) in items {
        ctx.spawn_passive(
            PassiveKind::ItemStack { item, count },
            corner,
            EntityLocation::default(),
        );
    }
}

/// Places a passive inside the block, centred horizontally.
fn block_corner(location: AbsoluteLocation) -> EntityLocation {
    let inset = (1.0 - PassiveEntity::VOLUME.width) / 2.0;
    EntityLocation::new(
        location.x as f32 + inset,
        location.y as f32 + inset,
        location.z as f32,
    )
}
