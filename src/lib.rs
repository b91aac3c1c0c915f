//! # Arena Session Server
//!
//! Authoritative fixed-tick engine for small networked arena sessions:
//! races, turn-based table games and arcade rounds, all driven by one
//! data-driven [`GameVariant`] descriptor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ARENA SESSION SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  ├── vec2.rs      - 2D vector math                           │
//! │  ├── rng.rs       - Seeded Xorshift128+ PRNG                 │
//! │  └── hash.rs      - State hashing for verification           │
//! │                                                              │
//! │  game/            - Session simulation (no I/O)              │
//! │  ├── variant.rs   - Game descriptors and presets             │
//! │  ├── kinematics.rs- Per-class motion                         │
//! │  ├── collision.rs - Contacts, damage, sensor zones           │
//! │  ├── command.rs   - Validation and the inbound queue         │
//! │  ├── phase.rs     - waiting / playing / ended, turns         │
//! │  ├── tick.rs      - The authoritative tick                   │
//! │  └── replication.rs - Snapshots and deltas                   │
//! │                                                              │
//! │  network/         - Async runtime (non-deterministic)        │
//! │  ├── session.rs   - One tokio task per session               │
//! │  ├── manager.rs   - Session registry and join routing        │
//! │  ├── connection.rs- Client message dispatch                  │
//! │  └── protocol.rs  - Message types                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/` and `game/` are deterministic for a given seed and input
//! sequence:
//! - No HashMap (BTreeMap for sorted iteration)
//! - No wall clock; fixed `dt` per tick
//! - All randomness from the session's seeded Xorshift128+
//!
//! Replaying the same inputs reproduces the same state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use core::rng::DeterministicRng;
pub use game::command::Command;
pub use game::replication::{Delta, DeltaTracker, Snapshot};
pub use game::state::{PlayerId, SessionPhase, SessionState};
pub use game::tick::{Simulation, TickResult};
pub use game::variant::GameVariant;
pub use network::{SessionManager, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
