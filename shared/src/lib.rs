//! # Shared Simulation Library
//!
//! Everything the server and the client projection must agree on bit for bit:
//! the world data model, the commands that change it, and the processors that
//! apply those commands for one tick.
//!
//! ## Data Model
//!
//! The world is split into cuboids of 32³ blocks ([`cuboid::CuboidData`]),
//! each storing its block aspects in octrees. Players, creatures and passive
//! objects are immutable records ([`entity`]). All of them are shared behind
//! `Arc`, and a tick only allocates a new instance for something that actually
//! changed, so downstream code can diff with `Arc::ptr_eq`.
//!
//! ## Commands
//!
//! Blocks are changed by [`mutation::Mutation`]s and entities by
//! [`change::EntityChange`]s. Both are applied to a mutable shadow of their
//! target ([`mutable`]) through a [`context::TickProcessingContext`], and return
//! `false` when their preconditions no longer hold. Anything a command wants
//! to happen elsewhere is collected as output and runs next tick.
//!
//! ## Processing
//!
//! A tick runs [`crowd_processor`] (entities) and then [`world_processor`]
//! (blocks) across a fixed set of workers that meet at a [`sync::SyncPoint`].
//! Each worker owns a deterministic slice of the keys, and per-key results are
//! merged in key order, so the outcome does not depend on the thread count.
//!
//! ## Module Organization
//!
//! - [`types`], [`block`], [`octree`], [`inventory`], [`cuboid`], [`entity`]: data model
//! - [`mutable`], [`state`]: mutable shadows and the read surface of a tick
//! - [`context`], [`mutation`], [`change`]: commands and their processing context
//! - [`physics`], [`engine`], [`propagation`]: rules applied while processing
//! - [`sync`], [`world_processor`], [`crowd_processor`]: parallel tick processing
//! - [`two_phase`]: begin/finish activity bookkeeping
//! - [`protocol`]: persistence records and per-tick client updates
//! - [`config`], [`error`]: configuration and error types

pub mod block;
pub mod change;
pub mod config;
pub mod context;
pub mod crowd_processor;
pub mod cuboid;
pub mod engine;
pub mod entity;
pub mod error;
pub mod inventory;
pub mod listeners;
pub mod mutable;
pub mod mutation;
pub mod octree;
pub mod physics;
pub mod propagation;
pub mod protocol;
pub mod state;
pub mod sync;
pub mod two_phase;
pub mod types;
pub mod world_processor;

pub use block::{BlockType, Environment};
pub use change::EntityChange;
pub use config::WorldConfig;
pub use context::{ChangeEnvelope, ContextBase, ScheduledChange, ScheduledMutation, TickOutputs};
pub use entity::{CreatureEntity, CreatureType, Entity, PassiveEntity, PassiveKind};
pub use error::{CodecError, ConfigError};
pub use mutation::Mutation;
pub use state::WorldState;
pub use types::{AbsoluteLocation, BlockAddress, CuboidAddress, EntityLocation};
