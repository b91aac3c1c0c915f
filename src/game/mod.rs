//! Session Simulation
//!
//! Everything that runs inside one session's tick. No I/O, no wall clock;
//! given a seed and an input sequence the result is reproducible.
//!
//! ## Module Structure
//!
//! - `entity`: Dynamic objects and sensor zones
//! - `variant`: Data-driven game descriptors and presets
//! - `state`: Session, player and turn state
//! - `kinematics`: Per-class motion integration
//! - `collision`: Contact detection and resolution
//! - `spawn`: Object factories
//! - `scheduler`: Tick-keyed deferred effects
//! - `command`: Command validation and the inbound queue
//! - `phase`: waiting / playing / ended transitions and turns
//! - `scoring`: Zone, slice and shot rules
//! - `tick`: The authoritative tick
//! - `replication`: Snapshots and deltas for observers
//! - `events`: Discrete notifications

pub mod entity;
pub mod variant;
pub mod state;
pub mod kinematics;
pub mod collision;
pub mod spawn;
pub mod scheduler;
pub mod command;
pub mod phase;
pub mod scoring;
pub mod tick;
pub mod replication;
pub mod events;

// Re-export key types
pub use command::{Command, ErrorCategory, RejectReason};
pub use entity::{DynamicObject, ObjectId, ObjectKind};
pub use events::{GameEvent, GameEventData};
pub use phase::{EndReason, Transition};
pub use replication::{Delta, DeltaTracker, Snapshot};
pub use state::{PlayerId, PlayerState, SessionPhase, SessionState};
pub use tick::{Admission, AdmissionError, Rejection, Simulation, TickResult};
pub use variant::{GameVariant, VariantError};
