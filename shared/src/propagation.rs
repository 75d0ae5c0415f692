//! Light and logic propagation inside one cuboid
//!
//! Both aspects are a 0..=15 level that drops by one per block travelled
//! through passable blocks. Propagation starts from seed blocks (blocks whose
//! type changed this tick, or blocks marked by a `PropagateAspect` mutation),
//! first clearing everything the old value may have lit and then relighting
//! from sources and the surviving neighbours.
//!
//! Work never leaves the cuboid in the same tick. A boundary block whose level
//! changed yields the location on the other side of the face, and the caller
//! turns that into a `PropagateAspect` mutation for the next tick.

use crate::block::{BlockType, Environment};
use crate::cuboid::CuboidData;
use crate::mutable::MutableBlockProxy;
use crate::state::WorldState;
use crate::types::{AbsoluteLocation, BlockAddress, Direction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub const MAX_LEVEL: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AspectChannel {
    Light,
    Logic,
}

impl AspectChannel {
    pub const ALL: [AspectChannel; 2] = [AspectChannel::Light, AspectChannel::Logic];

    /// Level a block produces on its own.
    pub fn emission(&self, env: &Environment, block: BlockType) -> u8 {
        let definition = env.block(block);
        match self {
            AspectChannel::Light => definition.light_emission.min(MAX_LEVEL),
            AspectChannel::Logic => {
                if definition.logic_source {
                    MAX_LEVEL
                } else {
                    0
                }
            }
        }
    }

    /// Whether a level can travel through the block.
    pub fn passes_through(&self, env: &Environment, block: BlockType) -> bool {
        let definition = env.block(block);
        match self {
            AspectChannel::Light => !definition.opaque,
            AspectChannel::Logic => definition.conducts_logic,
        }
    }
}

/// Lazily populated view over one cuboid's proxies.
struct Levels<'a> {
    channel: AspectChannel,
    env: &'a Environment,
    cuboid: &'a CuboidData,
    proxies: &'a mut BTreeMap<BlockAddress, MutableBlockProxy>,
    originals: BTreeMap<BlockAddress, u8>,
}

impl<'a> Levels<'a> {
    fn get(&self, block: BlockAddress) -> u8 {
        match self.proxies.get(&block) {
            Some(proxy) => proxy.aspect(self.channel),
            None => match self.channel {
                AspectChannel::Light => self.cuboid.light(block),
                AspectChannel::Logic => self.cuboid.logic(block),
            },
        }
    }

    fn block_type(&self, block: BlockAddress) -> BlockType {
        match self.proxies.get(&block) {
            Some(proxy) => proxy.block(),
            None => self.cuboid.block_type(block),
        }
    }

    fn set(&mut self, block: BlockAddress, value: u8) {
        let current = self.get(block);
        if current == value {
            return;
        }
        self.originals.entry(block).or_insert(current);
        let cuboid = self.cuboid;
        self.proxies
            .entry(block)
            .or_insert_with(|| {
                MutableBlockProxy::new(AbsoluteLocation::from_parts(cuboid.address(), block), cuboid)
            })
            .set_aspect(self.channel, value);
    }

    fn emission(&self, block: BlockAddress) -> u8 {
        self.channel.emission(self.env, self.block_type(block))
    }

    fn passes_through(&self, block: BlockAddress) -> bool {
        self.channel.passes_through(self.env, self.block_type(block))
    }
}

/// Recomputes `channel` around `seeds` and returns the locations across the
/// cuboid faces that need to be revisited next tick.
pub fn propagate(
    channel: AspectChannel,
    env: &Environment,
    previous: &WorldState,
    cuboid: &CuboidData,
    proxies: &mut BTreeMap<BlockAddress, MutableBlockProxy>,
    seeds: &[BlockAddress],
) -> Vec<AbsoluteLocation> {
    if seeds.is_empty() {
        return Vec::new();
    }
    let mut levels = Levels {
        channel,
        env,
        cuboid,
        proxies,
        originals: BTreeMap::new(),
    };
    let base = cuboid.address();

    // Clear everything that could have been lit through a seed.
    let mut removal: VecDeque<(BlockAddress, u8)> = VecDeque::new();
    let mut pulls: Vec<BlockAddress> = Vec::new();
    let mut spread: VecDeque<BlockAddress> = VecDeque::new();
    for seed in seeds {
        let old = levels.get(*seed);
        if old > 0 {
            levels.set(*seed, 0);
            removal.push_back((*seed, old));
        }
        pulls.push(*seed);
    }
    while let Some((block, old)) = removal.pop_front() {
        for direction in Direction::ALL {
            if let Some(neighbour) = block.step(direction) {
                let level = levels.get(neighbour);
                if level != 0 && level < old {
                    levels.set(neighbour, 0);
                    removal.push_back((neighbour, level));
                    pulls.push(neighbour);
                } else if level >= old {
                    spread.push_back(neighbour);
                }
            }
        }
    }

    // Every cleared block takes the best of its own emission and its neighbours.
    for block in pulls {
        let mut candidate = levels.emission(block);
        if levels.passes_through(block) {
            for direction in Direction::ALL {
                let neighbour_level = match block.step(direction) {
                    Some(neighbour) => levels.get(neighbour),
                    None => {
                        let outside = AbsoluteLocation::from_parts(base, block).step(direction);
                        previous.aspect(outside, channel).unwrap_or(0)
                    }
                };
                candidate = candidate.max(neighbour_level.saturating_sub(1));
            }
        }
        if candidate > levels.get(block) {
            levels.set(block, candidate);
            spread.push_back(block);
        }
    }

    while let Some(block) = spread.pop_front() {
        let level = levels.get(block);
        if level <= 1 {
            continue;
        }
        for direction in Direction::ALL {
            if let Some(neighbour) = block.step(direction) {
                if levels.passes_through(neighbour) && levels.get(neighbour) < level - 1 {
                    levels.set(neighbour, level - 1);
                    spread.push_back(neighbour);
                }
            }
        }
    }

    let mut boundary = BTreeSet::new();
    for (block, original) in &levels.originals {
        if levels.get(*block) == *original {
            continue;
        }
        for direction in Direction::ALL {
            if block.step(direction).is_none() {
                let outside = AbsoluteLocation::from_parts(base, *block).step(direction);
                if previous.is_loaded(outside.cuboid_address()) {
                    boundary.insert(outside);
                }
            }
        }
    }
    boundary.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CuboidAddress;
    use std::sync::Arc;

    fn place(
        cuboid: &CuboidData,
        proxies: &mut BTreeMap<BlockAddress, MutableBlockProxy>,
        block: BlockAddress,
        block_type: BlockType,
    ) {
        let location = AbsoluteLocation::from_parts(cuboid.address(), block);
        proxies
            .entry(block)
            .or_insert_with(|| MutableBlockProxy::new(location, cuboid))
            .set_block(block_type);
    }

    #[test]
    fn test_lamp_lights_surroundings() {
        let env = Environment::standard();
        let cuboid = CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR);
        let previous = WorldState::default();
        let mut proxies = BTreeMap::new();
        let lamp = BlockAddress::new(10, 10, 10);
        place(&cuboid, &mut proxies, lamp, BlockType::LAMP);

        let exports = propagate(AspectChannel::Light, &env, &previous, &cuboid, &mut proxies, &[lamp]);
        assert!(exports.is_empty());
        assert_eq!(proxies[&lamp].light(), 15);
        assert_eq!(proxies[&BlockAddress::new(11, 10, 10)].light(), 14);
        assert_eq!(proxies[&BlockAddress::new(13, 10, 10)].light(), 12);
        assert_eq!(proxies[&BlockAddress::new(11, 11, 11)].light(), 12);
    }

    #[test]
    fn test_removing_lamp_clears_light() {
        let env = Environment::standard();
        let address = CuboidAddress::new(0, 0, 0);
        let empty = CuboidData::filled(address, BlockType::AIR);
        let previous = WorldState::default();
        let lamp = BlockAddress::new(10, 10, 10);

        let mut proxies = BTreeMap::new();
        place(&empty, &mut proxies, lamp, BlockType::LAMP);
        propagate(AspectChannel::Light, &env, &previous, &empty, &mut proxies, &[lamp]);
        let mut lit = empty.clone();
        for (block, proxy) in &proxies {
            lit.write_block_state(*block, proxy.state());
        }

        let mut proxies = BTreeMap::new();
        place(&lit, &mut proxies, lamp, BlockType::AIR);
        propagate(AspectChannel::Light, &env, &previous, &lit, &mut proxies, &[lamp]);
        assert!(proxies.values().all(|proxy| proxy.light() == 0));
    }

    #[test]
    fn test_logic_follows_wire_only() {
        let env = Environment::standard();
        let cuboid = CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR);
        let previous = WorldState::default();
        let mut proxies = BTreeMap::new();
        for x in 1..4 {
            place(&cuboid, &mut proxies, BlockAddress::new(x, 0, 0), BlockType::WIRE);
        }
        let switch = BlockAddress::new(0, 0, 0);
        place(&cuboid, &mut proxies, switch, BlockType::SWITCH);

        propagate(AspectChannel::Logic, &env, &previous, &cuboid, &mut proxies, &[switch]);
        assert_eq!(proxies[&switch].logic(), 15);
        assert_eq!(proxies[&BlockAddress::new(3, 0, 0)].logic(), 12);
        assert!(proxies
            .get(&BlockAddress::new(0, 1, 0))
            .map_or(true, |proxy| proxy.logic() == 0));
    }

    #[test]
    fn test_boundary_change_exports_to_loaded_neighbour() {
        let env = Environment::standard();
        let address = CuboidAddress::new(0, 0, 0);
        let cuboid = CuboidData::filled(address, BlockType::AIR);
        let mut previous = WorldState::default();
        previous.cuboids.insert(address, Arc::new(cuboid.clone()));
        let east = address.neighbour(Direction::East);
        previous
            .cuboids
            .insert(east, Arc::new(CuboidData::filled(east, BlockType::AIR)));

        let mut proxies = BTreeMap::new();
        let lamp = BlockAddress::new(31, 5, 5);
        place(&cuboid, &mut proxies, lamp, BlockType::LAMP);
        let exports = propagate(AspectChannel::Light, &env, &previous, &cuboid, &mut proxies, &[lamp]);

        assert!(exports.contains(&AbsoluteLocation::new(32, 5, 5)));
        assert!(exports.iter().all(|location| location.cuboid_address() == east));
    }

    #[test]
    fn test_seed_pulls_light_across_face() {
        let env = Environment::standard();
        let west = CuboidAddress::new(-1, 0, 0);
        let mut lit_west = CuboidData::filled(west, BlockType::AIR);
        lit_west.write_block_state(
            BlockAddress::new(31, 5, 5),
            &crate::cuboid::BlockState {
                light: 15,
                ..crate::cuboid::BlockState::of(BlockType::LAMP)
            },
        );
        let mut previous = WorldState::default();
        previous.cuboids.insert(west, Arc::new(lit_west));

        let cuboid = CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR);
        let mut proxies = BTreeMap::new();
        let edge = BlockAddress::new(0, 5, 5);
        propagate(AspectChannel::Light, &env, &previous, &cuboid, &mut proxies, &[edge]);
        assert_eq!(proxies[&edge].light(), 14);
        assert_eq!(proxies[&BlockAddress::new(1, 5, 5)].light(), 13);
    }
}
