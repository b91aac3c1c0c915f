//! Game Events
//!
//! Discrete, one-time occurrences raised during a tick. They are delivered
//! to observers as their own ordered stream, separate from state deltas.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::entity::{ObjectId, ZoneId, ZoneRole};
use crate::game::phase::EndReason;
use crate::game::state::{PlayerId, SessionPhase};

/// Why a score changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCause {
    /// Lap completed
    Lap,
    /// Numbered piece pocketed
    Pocket,
    /// Marker sliced
    Slice,
    /// Another vehicle destroyed
    Takedown,
    /// Scoring area entered
    Zone,
}

/// One row of the end-of-round summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Player
    pub player: PlayerId,
    /// Final score
    pub score: i32,
    /// Disqualified this round
    pub disqualified: bool,
    /// Left the session before the end
    pub departed: bool,
}

/// Event payload (tagged union).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEventData {
    /// Occupant joined or reconnected
    OccupantJoined {
        /// Player
        player: PlayerId,
        /// Display name
        display_name: String,
        /// Controlled entity, if the variant assigns one
        entity: Option<ObjectId>,
        /// True when resuming a disconnected seat
        reconnected: bool,
    },

    /// Occupant disconnected or departed
    OccupantLeft {
        /// Player
        player: PlayerId,
        /// False for a transport disconnect inside the grace period
        permanent: bool,
    },

    /// Session phase changed
    PhaseChanged {
        /// Previous phase
        from: SessionPhase,
        /// New phase
        to: SessionPhase,
        /// Round number after the change
        round: u32,
    },

    /// A player's score changed
    Scored {
        /// Player
        player: PlayerId,
        /// Points added (may be negative)
        points: i32,
        /// New total
        total: i32,
        /// Cause
        cause: ScoreCause,
    },

    /// Two objects touched
    Collided {
        /// Lower object id
        a: ObjectId,
        /// Higher object id
        b: ObjectId,
        /// Contact point
        point: Vec2,
        /// Impact magnitude
        magnitude: f64,
        /// At or above the damage threshold
        severe: bool,
    },

    /// An object's health crossed zero
    Destroyed {
        /// Object
        object: ObjectId,
        /// Owner
        owner: Option<PlayerId>,
        /// True when the object was reset to its spawn template
        respawned: bool,
    },

    /// An object entered a sensor zone
    ZoneEntered {
        /// Object
        object: ObjectId,
        /// Zone
        zone: ZoneId,
        /// Zone role
        role: ZoneRole,
    },

    /// A vehicle passed the next checkpoint in order
    CheckpointReached {
        /// Player
        player: PlayerId,
        /// Checkpoint index
        checkpoint: u32,
        /// Laps completed
        lap: u32,
    },

    /// Active turn moved
    TurnChanged {
        /// New holder
        player: Option<PlayerId>,
        /// Turn sequence number
        turn: u32,
    },

    /// Round clock announcement
    TimerTick {
        /// Ticks left in the round
        remaining_ticks: u32,
    },

    /// Ready flag toggled
    ReadyChanged {
        /// Player
        player: PlayerId,
        /// New value
        ready: bool,
    },

    /// Rematch vote recorded
    RematchVoted {
        /// Player
        player: PlayerId,
        /// Votes so far
        votes: usize,
        /// Votes needed
        required: usize,
    },

    /// Player ran out of lives
    Disqualified {
        /// Player
        player: PlayerId,
    },

    /// Round ended; terminal summary
    MatchEnded {
        /// Winner, if any
        winner: Option<PlayerId>,
        /// Cause
        reason: EndReason,
        /// Scores, best first
        standings: Vec<Standing>,
    },
}

/// A game event with the tick it happened on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u64,

    /// Player involved, for filtering
    pub player: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        let player = match &data {
            GameEventData::OccupantJoined { player, .. }
            | GameEventData::OccupantLeft { player, .. }
            | GameEventData::Scored { player, .. }
            | GameEventData::CheckpointReached { player, .. }
            | GameEventData::ReadyChanged { player, .. }
            | GameEventData::RematchVoted { player, .. }
            | GameEventData::Disqualified { player } => Some(player.clone()),
            GameEventData::TurnChanged { player, .. } => player.clone(),
            GameEventData::Destroyed { owner, .. } => owner.clone(),
            GameEventData::MatchEnded { winner, .. } => winner.clone(),
            _ => None,
        };

        Self { tick, player, data }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self.data {
            GameEventData::OccupantJoined { .. } => "occupant_joined",
            GameEventData::OccupantLeft { .. } => "occupant_left",
            GameEventData::PhaseChanged { .. } => "phase_changed",
            GameEventData::Scored { .. } => "scored",
            GameEventData::Collided { .. } => "collided",
            GameEventData::Destroyed { .. } => "destroyed",
            GameEventData::ZoneEntered { .. } => "zone_entered",
            GameEventData::CheckpointReached { .. } => "checkpoint_reached",
            GameEventData::TurnChanged { .. } => "turn_changed",
            GameEventData::TimerTick { .. } => "timer_tick",
            GameEventData::ReadyChanged { .. } => "ready_changed",
            GameEventData::RematchVoted { .. } => "rematch_voted",
            GameEventData::Disqualified { .. } => "disqualified",
            GameEventData::MatchEnded { .. } => "match_ended",
        }
    }
}
