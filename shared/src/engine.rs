//! End-of-tick rules run for every entity after its changes
//!
//! These run inside the crowd processor's parallel pass, on the same mutable
//! shadow the changes wrote to, so an entity that nothing happened to freezes
//! back to its original instance.

use crate::block::BlockType;
use crate::context::TickProcessingContext;
use crate::entity::{CreatureType, PassiveEntity, PassiveKind, MAX_BREATH, MAX_FOOD, MAX_HEALTH};
use crate::inventory::Inventory;
use crate::mutable::{MutableCreature, MutableEntity, MutableMinimalEntity, MutablePassive};
use crate::mutation::Mutation;
use crate::physics;
use crate::types::EntityLocation;
use log::trace;

/// A player loses one food point this often.
pub const FOOD_INTERVAL_MILLIS: u64 = 10_000;
/// Dropped items vanish after this long.
pub const ITEM_DESPAWN_MILLIS: u64 = 300_000;
/// Breath lost per tick with the head in a liquid.
pub const BREATH_LOSS_PER_TICK: u8 = 2;
/// Breath regained per tick in open air.
pub const BREATH_GAIN_PER_TICK: u8 = 5;
pub const DROWNING_DAMAGE: u8 = 1;
pub const STARVATION_DAMAGE: u8 = 1;

pub fn tick_player(ctx: &mut TickProcessingContext, player: &mut MutableEntity) {
    tick_body(ctx, player);

    if crosses_food_interval(ctx.tick_number, ctx.millis_per_tick) {
        if player.current.food > 0 {
            player.current.food -= 1;
        } else {
            let health = player.current.health;
            player.current.health = health.saturating_sub(STARVATION_DAMAGE);
        }
    }

    if player.current.health == 0 {
        respawn(ctx, player);
    }
}

pub fn tick_creature(ctx: &mut TickProcessingContext, creature: &mut MutableCreature) {
    tick_body(ctx, creature);
    if creature.current.health == 0 {
        trace!("Creature {} died", creature.current.id);
        let (item, most) = creature_loot(creature.current.creature_type);
        let count = 1 + ctx.random_int(most) as u32;
        ctx.spawn_passive(
            PassiveKind::ItemStack { item, count },
            creature.current.location,
            EntityLocation::default(),
        );
        creature.despawn();
    }
}

/// The item a creature leaves behind and the most of it that can drop.
fn creature_loot(creature_type: CreatureType) -> (BlockType, i32) {
    match creature_type {
        CreatureType::Cow => (BlockType::DIRT, 2),
        CreatureType::Orc => (BlockType::STONE, 3),
    }
}

pub fn tick_passive(ctx: &mut TickProcessingContext, passive: &mut MutablePassive) {
    passive.current.age_millis += ctx.millis_per_tick;
    let kind = passive.current.kind.clone();
    if matches!(kind, PassiveKind::ItemStack { .. }) && passive.current.age_millis >= ITEM_DESPAWN_MILLIS {
        passive.despawn();
        return;
    }

    let step = physics::fall(
        ctx.previous(),
        ctx.env,
        passive.current.location,
        PassiveEntity::VOLUME,
        passive.current.velocity.z,
        ctx.millis_per_tick,
    );
    passive.current.location = step.location;
    passive.current.velocity.z = step.velocity_z;

    if let PassiveKind::FallingBlock { block } = kind {
        if physics::is_on_ground(ctx.previous(), ctx.env, step.location, PassiveEntity::VOLUME) {
            ctx.next_mutation(Mutation::ReplaceBlock {
                location: step.location.block_location(),
                expected: BlockType::AIR,
                replacement: block,
            });
            passive.despawn();
        }
    }
}

/// Hunger follows world time rather than a per-player timer so an idle player
/// stays the same instance between food ticks.
fn crosses_food_interval(tick_number: u64, millis_per_tick: u64) -> bool {
    let before = tick_number.saturating_sub(1) * millis_per_tick;
    let after = tick_number * millis_per_tick;
    after / FOOD_INTERVAL_MILLIS > before / FOOD_INTERVAL_MILLIS
}

/// Gravity, landing, contact damage and breath, shared by players and creatures.
fn tick_body(ctx: &mut TickProcessingContext, entity: &mut dyn MutableMinimalEntity) {
    if entity.health() == 0 {
        return;
    }
    let scale = ctx.config.difficulty.damage_scale();
    let volume = entity.volume();
    let mut velocity = entity.velocity();
    let step = physics::fall(
        ctx.previous(),
        ctx.env,
        entity.location(),
        volume,
        velocity.z,
        ctx.millis_per_tick,
    );
    entity.set_location(step.location);
    velocity.z = step.velocity_z;
    entity.set_velocity(velocity);
    if let Some(impact) = step.impact_velocity {
        let damage = physics::landing_damage(impact).saturating_mul(scale);
        if damage > 0 {
            entity.set_health(entity.health().saturating_sub(damage));
        }
    }

    let mut contact = 0u32;
    for block in physics::overlapped_blocks(entity.location(), volume) {
        if let Some(block_type) = ctx.previous_block_type(block) {
            contact = contact.max(ctx.env.block(block_type).contact_damage as u32);
        }
    }
    if contact > 0 {
        let per_tick = ((contact * ctx.millis_per_tick as u32 + 999) / 1000).min(u8::MAX as u32) as u8;
        entity.set_health(entity.health().saturating_sub(per_tick.saturating_mul(scale)));
    }

    let head = physics::head_block(entity.location(), volume);
    let submerged = ctx
        .previous_block_type(head)
        .map_or(false, |block| ctx.env.block(block).liquid);
    let breath = entity.breath();
    if submerged {
        if breath == 0 {
            entity.set_health(entity.health().saturating_sub(DROWNING_DAMAGE.saturating_mul(scale)));
        } else {
            entity.set_breath(breath.saturating_sub(BREATH_LOSS_PER_TICK));
        }
    } else if breath < MAX_BREATH {
        entity.set_breath(breath.saturating_add(BREATH_GAIN_PER_TICK).min(MAX_BREATH));
    }
}

/// Drops the inventory where the player died and restores it at the configured spawn.
fn respawn(ctx: &mut TickProcessingContext, player: &mut MutableEntity) {
    let death_location = player.current.location;
    let items: Vec<(BlockType, u32)> = player.current.inventory.items().collect();
    for (item, count) in items {
        ctx.spawn_passive(
            PassiveKind::ItemStack { item, count },
            death_location,
            EntityLocation::default(),
        );
    }
    let capacity = player.current.inventory.capacity;
    let current = &mut player.current;
    current.inventory = Inventory::new(capacity);
    current.location = ctx.config.spawn_location;
    current.velocity = EntityLocation::default();
    current.health = MAX_HEALTH;
    current.food = MAX_FOOD;
    current.breath = MAX_BREATH;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Environment;
    use crate::config::{Difficulty, WorldConfig};
    use crate::context::ContextBase;
    use crate::cuboid::CuboidData;
    use crate::entity::{CreatureEntity, Entity};
    use crate::state::WorldState;
    use crate::types::{AbsoluteLocation, CuboidAddress};
    use std::sync::Arc;

    fn floor_world(fill: BlockType) -> WorldState {
        let mut state = WorldState::default();
        let air = CuboidAddress::new(0, 0, 0);
        let ground = CuboidAddress::new(0, 0, -1);
        state
            .cuboids
            .insert(air, Arc::new(CuboidData::filled(air, fill)));
        state
            .cuboids
            .insert(ground, Arc::new(CuboidData::filled(ground, BlockType::STONE)));
        state
    }

    fn base<'a>(config: &'a WorldConfig, env: &'a Environment, state: &'a WorldState) -> ContextBase<'a> {
        ContextBase {
            tick_number: 1,
            millis_per_tick: 50,
            config,
            env,
            previous: state,
        }
    }

    #[test]
    fn test_idle_player_on_ground_is_unchanged() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut ctx = TickProcessingContext::new(&base, 0);
        let player = Arc::new(Entity::new(1, EntityLocation::new(3.0, 3.0, 0.0)));
        let mut mutable = MutableEntity::existing(&player);
        tick_player(&mut ctx, &mut mutable);
        assert!(Arc::ptr_eq(&player, &mutable.freeze()));
        assert!(ctx.take_outputs().is_empty());
    }

    #[test]
    fn test_food_drains_on_interval_ticks() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let ticks_per_interval = FOOD_INTERVAL_MILLIS / 50;
        let base = ContextBase {
            tick_number: ticks_per_interval,
            ..base(&config, &env, &state)
        };
        let mut ctx = TickProcessingContext::new(&base, 0);
        let player = Arc::new(Entity::new(1, EntityLocation::new(3.0, 3.0, 0.0)));
        let mut mutable = MutableEntity::existing(&player);
        tick_player(&mut ctx, &mut mutable);
        assert_eq!(mutable.current.food, MAX_FOOD - 1);

        assert!(!crosses_food_interval(ticks_per_interval + 1, 50));
        assert!(crosses_food_interval(2 * ticks_per_interval, 50));
    }

    #[test]
    fn test_player_in_water_loses_breath() {
        let state = floor_world(BlockType::WATER);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut ctx = TickProcessingContext::new(&base, 0);
        let player = Arc::new(Entity::new(1, EntityLocation::new(3.0, 3.0, 0.0)));
        let mut mutable = MutableEntity::existing(&player);
        tick_player(&mut ctx, &mut mutable);
        assert_eq!(mutable.current.breath, MAX_BREATH - BREATH_LOSS_PER_TICK);
    }

    #[test]
    fn test_dead_player_respawns_and_drops_items() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig {
            spawn_location: EntityLocation::new(10.0, 10.0, 0.0),
            ..WorldConfig::default()
        };
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut ctx = TickProcessingContext::new(&base, 0);
        let mut player = Entity::new(1, EntityLocation::new(3.0, 3.0, 0.0));
        player.health = 0;
        player.inventory.add(BlockType::STONE, 5);
        let mut mutable = MutableEntity::existing(&Arc::new(player));
        tick_player(&mut ctx, &mut mutable);

        assert_eq!(mutable.current.health, MAX_HEALTH);
        assert_eq!(mutable.current.location, config.spawn_location);
        assert!(mutable.current.inventory.is_empty());
        let outputs = ctx.take_outputs();
        assert_eq!(
            outputs.passive_spawns[0].kind,
            PassiveKind::ItemStack {
                item: BlockType::STONE,
                count: 5
            }
        );
    }

    #[test]
    fn test_lava_damage_scales_with_difficulty() {
        let state = floor_world(BlockType::LAVA);
        let env = Environment::standard();
        let cow = Arc::new(CreatureEntity::new(-1, CreatureType::Cow, EntityLocation::new(3.0, 3.0, 0.0)));

        let peaceful = WorldConfig {
            difficulty: Difficulty::Peaceful,
            ..WorldConfig::default()
        };
        let base_peaceful = base(&peaceful, &env, &state);
        let mut ctx = TickProcessingContext::new(&base_peaceful, 0);
        let mut mutable = MutableCreature::existing(&cow);
        tick_creature(&mut ctx, &mut mutable);
        assert_eq!(mutable.current.health, cow.health);

        let hard = WorldConfig {
            difficulty: Difficulty::Hard,
            ..WorldConfig::default()
        };
        let base_hard = base(&hard, &env, &state);
        let mut ctx = TickProcessingContext::new(&base_hard, 0);
        let mut mutable = MutableCreature::existing(&cow);
        tick_creature(&mut ctx, &mut mutable);
        assert_eq!(mutable.current.health, cow.health - 2);
    }

    #[test]
    fn test_dead_creature_drops_loot() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut orc = CreatureEntity::new(-4, CreatureType::Orc, EntityLocation::new(3.0, 3.0, 0.0));
        orc.health = 0;
        let orc = Arc::new(orc);

        let mut drops = Vec::new();
        for _ in 0..2 {
            let mut ctx = TickProcessingContext::new(&base, crate::context::entity_random_key(orc.id));
            let mut mutable = MutableCreature::existing(&orc);
            tick_creature(&mut ctx, &mut mutable);
            assert!(mutable.freeze().is_none());
            let outputs = ctx.take_outputs();
            assert_eq!(outputs.passive_spawns.len(), 1);
            drops.push(outputs.passive_spawns[0].kind.clone());
        }

        assert_eq!(drops[0], drops[1]);
        match &drops[0] {
            PassiveKind::ItemStack { item, count } => {
                assert_eq!(*item, BlockType::STONE);
                assert!((1..=3).contains(count));
            }
            other => panic!("unexpected drop {:?}", other),
        }
    }

    #[test]
    fn test_falling_block_lands_as_replacement() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut ctx = TickProcessingContext::new(&base, 0);
        let sand = Arc::new(PassiveEntity::new(
            1,
            PassiveKind::FallingBlock {
                block: BlockType::SAND,
            },
            EntityLocation::new(2.01, 2.01, 0.0),
        ));
        let mut mutable = MutablePassive::existing(&sand);
        tick_passive(&mut ctx, &mut mutable);
        assert!(mutable.freeze().is_none());
        let outputs = ctx.take_outputs();
        assert_eq!(
            outputs.mutations[0].mutation,
            Mutation::ReplaceBlock {
                location: AbsoluteLocation::new(2, 2, 0),
                expected: BlockType::AIR,
                replacement: BlockType::SAND
            }
        );
    }

    #[test]
    fn test_old_items_despawn() {
        let state = floor_world(BlockType::AIR);
        let config = WorldConfig::default();
        let env = Environment::standard();
        let base = base(&config, &env, &state);
        let mut ctx = TickProcessingContext::new(&base, 0);
        let mut item = PassiveEntity::new(
            1,
            PassiveKind::ItemStack {
                item: BlockType::DIRT,
                count: 1,
            },
            EntityLocation::new(2.0, 2.0, 0.0),
        );
        item.age_millis = ITEM_DESPAWN_MILLIS - 10;
        let mut mutable = MutablePassive::existing(&Arc::new(item));
        tick_passive(&mut ctx, &mut mutable);
        assert!(mutable.freeze().is_none());
    }
}
