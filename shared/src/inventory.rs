use crate::block::BlockType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Item counts held by a player or a container block, bounded by `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub capacity: u32,
    items: BTreeMap<BlockType, u32>,
}

impl Inventory {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            items: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.items.values().fold(0u32, |total, count| total.saturating_add(*count))
    }

    pub fn count(&self, item: BlockType) -> u32 {
        self.items.get(&item).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds all of `count` or nothing.
    pub fn add(&mut self, item: BlockType, count: u32) -> bool {
        let fits = self
            .total()
            .checked_add(count)
            .map_or(false, |total| total <= self.capacity);
        if count == 0 || !fits {
            return false;
        }
        *self.items.entry(item).or_insert(0) += count;
        true
    }

    /// Removes all of `count` or nothing.
    pub fn remove(&mut self, item: BlockType, count: u32) -> bool {
        match self.items.get_mut(&item) {
            Some(held) if *held >= count && count > 0 => {
                *held -= count;
                if *held == 0 {
                    self.items.remove(&item);
                }
                true
            }
            _ => false,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = (BlockType, u32)> + '_ {
        self.items.iter().map(|(item, count)| (*item, *count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_respects_capacity() {
        let mut inventory = Inventory::new(10);
        assert!(inventory.add(BlockType::STONE, 6));
        assert!(!inventory.add(BlockType::DIRT, 5));
        assert!(inventory.add(BlockType::DIRT, 4));
        assert_eq!(inventory.total(), 10);
    }

    #[test]
    fn test_huge_count_is_rejected() {
        let mut inventory = Inventory::new(64);
        assert!(inventory.add(BlockType::STONE, 1));
        assert!(!inventory.add(BlockType::DIRT, u32::MAX));
        assert!(!inventory.add(BlockType::STONE, u32::MAX));
        assert_eq!(inventory.total(), 1);
        assert_eq!(inventory.count(BlockType::DIRT), 0);
    }

    #[test]
    fn test_remove_is_all_or_nothing() {
        let mut inventory = Inventory::new(10);
        inventory.add(BlockType::SAND, 3);
        assert!(!inventory.remove(BlockType::SAND, 4));
        assert!(inventory.remove(BlockType::SAND, 3));
        assert!(inventory.is_empty());
        assert!(!inventory.remove(BlockType::SAND, 1));
    }
}
