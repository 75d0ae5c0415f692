//! # Projection Client Library
//!
//! The client side of the simulation. A client never waits for the server
//! before showing the result of its own actions: it applies them to a local
//! projection of the world straight away and sends them to the server with an
//! increasing commit level.
//!
//! ## Architecture Overview
//!
//! ### Shadow State
//! Every authoritative tick arrives as a `ServerTickUpdate` listing the changes
//! and mutations the server applied. The client replays them with the same
//! processors the server uses, which keeps a shadow copy identical to the
//! server's world without the server ever sending full cuboids twice.
//!
//! ### Speculation
//! Local changes not yet confirmed by the server are kept in commit order and
//! reapplied on top of the shadow after every tick. Once the server reports a
//! commit level as processed, every change up to it is dropped from the list;
//! a change that no longer applies after the rebuild is dropped as well.
//!
//! ### Two-Phase Activities
//! Phase 2 of an activity such as placing a block is only projected once its
//! delay has passed on the local clock, and is withdrawn as soon as the client
//! does anything else first, matching what the server will do.
//!
//! ## Module Organization
//!
//! - [`projection`]: shadow and projected world state, listener notifications
//! - [`runner`]: network call queue, change buffering and sending
//!
//! ## Usage Example
//!
//! ```rust
//! use client::projection::IgnoreProjection;
//! use client::runner::{ClientAdapter, ClientRunner};
//! use shared::{EntityChange, Environment, WorldConfig};
//! use std::sync::Arc;
//!
//! struct Outbox(Vec<(i64, EntityChange)>);
//!
//! impl ClientAdapter for Outbox {
//!     fn send_change(&mut self, change: &EntityChange, commit_level: i64) {
//!         self.0.push((commit_level, change.clone()));
//!     }
//! }
//!
//! let mut runner = ClientRunner::new(
//!     Outbox(Vec::new()),
//!     WorldConfig::default(),
//!     Arc::new(Environment::standard()),
//!     Box::new(IgnoreProjection),
//! );
//! runner.callbacks().client_connected(1);
//! runner.run_pending_calls(0);
//! assert!(runner.is_connected());
//! ```

pub mod projection;
pub mod runner;
