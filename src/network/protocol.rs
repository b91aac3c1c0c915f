//! Protocol Messages
//!
//! Wire format between observers and a session. Messages are JSON
//! (internally tagged); snapshot and delta payloads can also travel as
//! bincode frames via [`Snapshot::to_bytes`] and [`Delta::to_bytes`].

use serde::{Serialize, Deserialize};

use crate::game::command::{Command, ErrorCategory, RejectReason};
use crate::game::entity::ObjectId;
use crate::game::events::GameEvent;
use crate::game::replication::{Delta, Snapshot};
use crate::game::state::PlayerId;
use crate::game::variant::GameVariant;
use crate::network::session::TeardownCause;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from an observer to its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Take (or resume) a seat.
    Join {
        /// Stable identity
        identity: String,
        /// Name shown to other observers
        display_name: String,
        /// Start a new session with this descriptor instead of joining a
        /// running one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<Box<GameVariant>>,
    },

    /// Intent for the next tick.
    Submit {
        /// Command payload
        command: Command,
    },

    /// Leave permanently.
    Leave,

    /// Round-trip latency check.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from a session to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Seat accepted.
    Joined {
        /// Session id (hex)
        session: String,
        /// Identity
        player: PlayerId,
        /// Controlled entity, if any
        entity: Option<ObjectId>,
        /// Resumed a disconnected seat
        reconnected: bool,
    },

    /// Full view; always precedes deltas for an observer.
    Snapshot {
        /// View
        snapshot: Box<Snapshot>,
    },

    /// Changes since the previous snapshot or delta.
    Delta {
        /// Changes
        delta: Box<Delta>,
    },

    /// One discrete notification.
    Event {
        /// Event
        event: GameEvent,
    },

    /// A submitted command was refused.
    Rejected {
        /// Command name
        command: String,
        /// Reason
        reason: RejectReason,
        /// Taxonomy bucket
        category: ErrorCategory,
    },

    /// Request failed.
    Error(ServerError),

    /// Session is gone; nothing follows.
    SessionClosed {
        /// Why
        cause: TeardownCause,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Session tick when answered
        server_tick: u64,
    },
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Occupancy at maximum
    SessionFull,
    /// Identity already seated, pending or departed
    IdentityInUse,
    /// Session does not exist
    UnknownSession,
    /// Message could not be parsed
    InvalidMessage,
    /// Variant descriptor invalid
    InvalidConfig,
    /// Session shutting down
    Closed,
    /// Request needs a seat first
    NotJoined,
    /// Connection already holds a seat
    AlreadyJoined,
}

impl ServerMessage {
    /// Build a rejection notice.
    pub fn rejected(command: &Command, reason: RejectReason) -> Self {
        let category = reason.category();
        ServerMessage::Rejected { command: command.name().to_string(), reason, category }
    }

    /// Build an error notice.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
