//! Octree-compressed storage for one per-block aspect of a cuboid
//!
//! Uniform octants collapse into a single leaf, so a freshly generated cuboid
//! of air costs one node and only touched regions subdivide.

use crate::types::{BlockAddress, CUBOID_EDGE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Node<T> {
    Leaf(T),
    Branch(Box<[Node<T>; 8]>),
}

/// One aspect (block type, damage, light, ...) for all 32³ blocks of a cuboid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctreeAspect<T> {
    root: Node<T>,
}

const ROOT_HALF: u8 = (CUBOID_EDGE / 2) as u8;

impl<T: Copy + Eq> OctreeAspect<T> {
    /// Creates an aspect where every block holds `value`.
    pub fn filled(value: T) -> Self {
        Self {
            root: Node::Leaf(value),
        }
    }

    pub fn get(&self, address: BlockAddress) -> T {
        let mut node = &self.root;
        let mut half = ROOT_HALF;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Branch(children) => {
                    node = &children[child_index(address, half)];
                    half >>= 1;
                }
            }
        }
    }

    pub fn set(&mut self, address: BlockAddress, value: T) {
        Self::set_in(&mut self.root, address, value, ROOT_HALF);
    }

    /// The single value of the whole cuboid if it is uniform.
    pub fn uniform_value(&self) -> Option<T> {
        match &self.root {
            Node::Leaf(value) => Some(*value),
            Node::Branch(_) => None,
        }
    }

    /// Number of nodes in the tree, a proxy for its memory cost.
    pub fn node_count(&self) -> usize {
        fn count<T>(node: &Node<T>) -> usize {
            match node {
                Node::Leaf(_) => 1,
                Node::Branch(children) => 1 + children.iter().map(count).sum::<usize>(),
            }
        }
        count(&self.root)
    }

    fn set_in(node: &mut Node<T>, address: BlockAddress, value: T, half: u8) {
        if let Node::Leaf(existing) = node {
            if *existing == value {
                return;
            }
            if half == 0 {
                *existing = value;
                return;
            }
            let existing = *existing;
            *node = Node::Branch(Box::new(std::array::from_fn(|_| Node::Leaf(existing))));
        }
        if let Node::Branch(children) = node {
            Self::set_in(
                &mut children[child_index(address, half)],
                address,
                value,
                half >> 1,
            );
            if let Some(uniform) = uniform_leaves(children) {
                *node = Node::Leaf(uniform);
            }
        }
    }
}

fn child_index(address: BlockAddress, half: u8) -> usize {
    (((address.x & half) != 0) as usize) << 2
        | (((address.y & half) != 0) as usize) << 1
        | ((address.z & half) != 0) as usize
}

fn uniform_leaves<T: Copy + Eq>(children: &[Node<T>; 8]) -> Option<T> {
    let first = match &children[0] {
        Node::Leaf(value) => *value,
        Node::Branch(_) => return None,
    };
    let all_same = children[1..]
        .iter()
        .all(|child| matches!(child, Node::Leaf(value) if *value == first));
    if all_same {
        Some(first)
    } else {
        None
    }
}
