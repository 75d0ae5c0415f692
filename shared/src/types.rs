//! Coordinate types for blocks, cuboids and entities

use serde::{Deserialize, Serialize};

/// Blocks along each edge of a cuboid.
pub const CUBOID_EDGE: i32 = 32;
/// Blocks in a single cuboid.
pub const BLOCKS_PER_CUBOID: usize = (CUBOID_EDGE * CUBOID_EDGE * CUBOID_EDGE) as usize;

const EDGE_SHIFT: u32 = 5;
const EDGE_MASK: i32 = CUBOID_EDGE - 1;

/// Address of a cuboid in cuboid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CuboidAddress {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl CuboidAddress {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// The absolute location of the block at local (0,0,0).
    pub fn base(&self) -> AbsoluteLocation {
        AbsoluteLocation::new(
            (self.x as i32) << EDGE_SHIFT,
            (self.y as i32) << EDGE_SHIFT,
            (self.z as i32) << EDGE_SHIFT,
        )
    }

    pub fn relative(&self, dx: i16, dy: i16, dz: i16) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn neighbour(&self, direction: Direction) -> Self {
        let (dx, dy, dz) = direction.offset();
        self.relative(dx as i16, dy as i16, dz as i16)
    }
}

/// Offset of a block within its cuboid, each axis in [0,32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockAddress {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl BlockAddress {
    pub fn new(x: u8, y: u8, z: u8) -> Self {
        assert!(
            (x as i32) < CUBOID_EDGE && (y as i32) < CUBOID_EDGE && (z as i32) < CUBOID_EDGE,
            "block address ({}, {}, {}) outside of cuboid",
            x,
            y,
            z
        );
        Self { x, y, z }
    }

    /// Index into a flat x-major array of a cuboid's blocks.
    pub fn index(&self) -> usize {
        ((self.x as usize) << (2 * EDGE_SHIFT)) | ((self.y as usize) << EDGE_SHIFT) | self.z as usize
    }

    /// Neighbouring block inside the same cuboid, or `None` when the step crosses a face.
    pub fn step(&self, direction: Direction) -> Option<BlockAddress> {
        let (dx, dy, dz) = direction.offset();
        let x = self.x as i32 + dx;
        let y = self.y as i32 + dy;
        let z = self.z as i32 + dz;
        let inside = |v: i32| (0..CUBOID_EDGE).contains(&v);
        if inside(x) && inside(y) && inside(z) {
            Some(BlockAddress {
                x: x as u8,
                y: y as u8,
                z: z as u8,
            })
        } else {
            None
        }
    }
}

/// Location of a block in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsoluteLocation {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl AbsoluteLocation {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn from_parts(cuboid: CuboidAddress, block: BlockAddress) -> Self {
        let base = cuboid.base();
        Self::new(
            base.x + block.x as i32,
            base.y + block.y as i32,
            base.z + block.z as i32,
        )
    }

    pub fn cuboid_address(&self) -> CuboidAddress {
        CuboidAddress::new(
            (self.x >> EDGE_SHIFT) as i16,
            (self.y >> EDGE_SHIFT) as i16,
            (self.z >> EDGE_SHIFT) as i16,
        )
    }

    pub fn block_address(&self) -> BlockAddress {
        BlockAddress {
            x: (self.x & EDGE_MASK) as u8,
            y: (self.y & EDGE_MASK) as u8,
            z: (self.z & EDGE_MASK) as u8,
        }
    }

    pub fn relative(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn step(&self, direction: Direction) -> Self {
        let (dx, dy, dz) = direction.offset();
        self.relative(dx, dy, dz)
    }

    /// Centre of the block, used for reach checks.
    pub fn centre(&self) -> EntityLocation {
        EntityLocation::new(
            self.x as f32 + 0.5,
            self.y as f32 + 0.5,
            self.z as f32 + 0.5,
        )
    }
}

/// The six faces of a block, for 6-connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    East,
    West,
    North,
    South,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::East,
        Direction::West,
        Direction::North,
        Direction::South,
        Direction::Up,
        Direction::Down,
    ];

    pub fn offset(&self) -> (i32, i32, i32) {
        match self {
            Direction::East => (1, 0, 0),
            Direction::West => (-1, 0, 0),
            Direction::North => (0, 1, 0),
            Direction::South => (0, -1, 0),
            Direction::Up => (0, 0, 1),
            Direction::Down => (0, 0, -1),
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Continuous location of an entity (the minimum corner of its volume).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityLocation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl EntityLocation {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(&self, other: &EntityLocation) -> EntityLocation {
        EntityLocation::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, scalar: f32) -> EntityLocation {
        EntityLocation::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &EntityLocation) -> f32 {
        EntityLocation::new(other.x - self.x, other.y - self.y, other.z - self.z).magnitude()
    }

    /// The block containing this point.
    pub fn block_location(&self) -> AbsoluteLocation {
        AbsoluteLocation::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// Collision box of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityVolume {
    pub height: f32,
    pub width: f32,
}

impl EntityVolume {
    pub const fn new(height: f32, width: f32) -> Self {
        Self { height, width }
    }
}
