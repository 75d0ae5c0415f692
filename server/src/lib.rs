//! # Tick Server Library
//!
//! The authoritative side of the simulation. A [`tick_runner::TickRunner`]
//! owns the world, advances it one tick at a time across a pool of worker
//! threads, and publishes every result as an immutable [`snapshot::Snapshot`].
//!
//! ## Tick Lifecycle
//!
//! Requests (cuboid loads, player joins, client changes) accumulate in a
//! mailbox between ticks. When a tick starts they are folded into the previous
//! snapshot by [`materials::assemble`], together with whatever the previous
//! tick scheduled. The workers then apply entity changes, meet at a barrier,
//! apply block mutations, meet again, and the last one to arrive merges the
//! results into the next snapshot.
//!
//! ### Determinism
//! Every ordering the workers observe comes from sorted keys, and per-key
//! results are merged in key order, so a tick produces the same snapshot
//! regardless of how many threads ran it.
//!
//! ### Two-Phase Activities
//! Changes such as placing a block take time. Their first phase runs when the
//! client submits them; the second phase is held by a
//! [`shared::two_phase::TwoPhaseActivityManager`] until its delay expires,
//! and is cancelled if the client submits anything else in the meantime.
//!
//! ## Module Organization
//!
//! - [`tick_runner`]: worker pool, barriers and snapshot publication
//! - [`materials`]: single-threaded assembly of one tick's inputs
//! - [`snapshot`]: the published per-tick record and its statistics
//! - [`creature_ai`]: actions for idle creatures
//! - [`client_manager`]: client sessions, change forwarding and per-client updates
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::tick_runner::{TickHooks, TickRunner};
//! use shared::cuboid::CuboidData;
//! use shared::protocol::SuspendedCuboid;
//! use shared::{BlockType, CuboidAddress, Environment, WorldConfig};
//! use std::sync::Arc;
//!
//! let mut runner = TickRunner::new(4, WorldConfig::default(), Arc::new(Environment::standard()), TickHooks::default());
//! runner.cuboid_was_loaded(SuspendedCuboid::new(CuboidData::filled(
//!     CuboidAddress::new(0, 0, 0),
//!     BlockType::AIR,
//! )));
//! runner.start().unwrap();
//! let snapshot = runner.run_tick();
//! assert_eq!(snapshot.tick_number, 1);
//! runner.shutdown();
//! ```

pub mod client_manager;
pub mod creature_ai;
pub mod materials;
pub mod snapshot;
pub mod tick_runner;
