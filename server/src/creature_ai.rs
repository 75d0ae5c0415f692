//! Action planning for idle creatures
//!
//! Planning happens once per tick on the merging thread, for every creature
//! with nothing queued. The planned change runs next tick like any other.

use rand::rngs::StdRng;
use rand::Rng;
use shared::change::ATTACK_RANGE;
use shared::{CreatureEntity, EntityChange, EntityLocation, WorldState};

/// How far a hostile creature notices players.
pub const CHASE_RADIUS: f32 = 10.0;

pub trait CreaturePlanner: Send + Sync {
    /// The next change for `creature`, or `None` to stay idle this tick.
    fn next_action(
        &self,
        creature: &CreatureEntity,
        state: &WorldState,
        millis_per_tick: u64,
        rng: &mut StdRng,
    ) -> Option<EntityChange>;
}

/// Hostile creatures chase and attack nearby players; everything else wanders.
#[derive(Debug, Clone)]
pub struct WanderPlanner {
    /// Percent chance per idle tick that a creature starts moving.
    pub wander_chance: u32,
}

impl Default for WanderPlanner {
    fn default() -> Self {
        Self { wander_chance: 20 }
    }
}

impl WanderPlanner {
    fn nearest_player(creature: &CreatureEntity, state: &WorldState) -> Option<(i32, EntityLocation, f32)> {
        state
            .players
            .values()
            .filter(|player| player.health > 0)
            .map(|player| (player.id, player.location, creature.location.distance(&player.location)))
            .filter(|(_, _, distance)| *distance <= CHASE_RADIUS)
            .min_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)))
    }

    fn step_towards(creature: &CreatureEntity, target: EntityLocation, millis: u64) -> Option<EntityChange> {
        let mut delta = EntityLocation::new(target.x - creature.location.x, target.y - creature.location.y, 0.0);
        let distance = delta.magnitude();
        if distance < f32::EPSILON {
            return None;
        }
        let reach = creature.creature_type.speed() * millis as f32 / 1000.0;
        if distance > reach {
            delta = delta.scale(reach / distance);
        }
        Some(EntityChange::Move { delta, millis })
    }
}

impl CreaturePlanner for WanderPlanner {
    fn next_action(
        &self,
        creature: &CreatureEntity,
        state: &WorldState,
        millis_per_tick: u64,
        rng: &mut StdRng,
    ) -> Option<EntityChange> {
        if creature.health == 0 {
            return None;
        }
        if creature.creature_type.is_hostile() {
            if let Some((target, location, distance)) = Self::nearest_player(creature, state) {
                if distance <= ATTACK_RANGE {
                    return Some(EntityChange::Attack { target });
                }
                return Self::step_towards(creature, location, millis_per_tick);
            }
        }
        if rng.gen_range(0..100) >= self.wander_chance {
            return None;
        }
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let reach = creature.creature_type.speed() * millis_per_tick as f32 / 1000.0;
        Some(EntityChange::Move {
            delta: EntityLocation::new(angle.cos() * reach, angle.sin() * reach, 0.0),
            millis: millis_per_tick,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use shared::{CreatureType, Entity};
    use std::sync::Arc;

    fn state_with_player_at(x: f32) -> WorldState {
        let mut state = WorldState::default();
        state
            .players
            .insert(1, Arc::new(Entity::new(1, EntityLocation::new(x, 0.0, 0.0))));
        state
    }

    #[test]
    fn test_orc_attacks_player_in_range() {
        let orc = CreatureEntity::new(-1, CreatureType::Orc, EntityLocation::new(1.0, 0.0, 0.0));
        let mut rng = StdRng::seed_from_u64(1);
        let action = WanderPlanner::default().next_action(&orc, &state_with_player_at(2.0), 50, &mut rng);
        assert_eq!(action, Some(EntityChange::Attack { target: 1 }));
    }

    #[test]
    fn test_orc_chases_within_radius() {
        let orc = CreatureEntity::new(-1, CreatureType::Orc, EntityLocation::new(0.0, 0.0, 0.0));
        let mut rng = StdRng::seed_from_u64(1);
        match WanderPlanner::default().next_action(&orc, &state_with_player_at(6.0), 50, &mut rng) {
            Some(EntityChange::Move { delta, millis }) => {
                assert_eq!(millis, 50);
                assert!(delta.x > 0.0);
                assert_approx_eq!(delta.magnitude(), 0.15, 1e-4);
            }
            other => panic!("expected a move, got {:?}", other),
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let cow = CreatureEntity::new(-2, CreatureType::Cow, EntityLocation::default());
        let planner = WanderPlanner { wander_chance: 100 };
        let state = WorldState::default();
        let first = planner.next_action(&cow, &state, 50, &mut StdRng::seed_from_u64(9));
        let second = planner.next_action(&cow, &state, 50, &mut StdRng::seed_from_u64(9));
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_chance_stays_idle() {
        let cow = CreatureEntity::new(-2, CreatureType::Cow, EntityLocation::default());
        let planner = WanderPlanner { wander_chance: 0 };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(planner.next_action(&cow, &WorldState::default(), 50, &mut rng).is_none());
    }
}
