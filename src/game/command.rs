//! Command Queue & Validator
//!
//! Client commands pass three checks on receipt (payload, phase, authority)
//! and are then queued. The queue is drained only at the start of a tick,
//! in arrival order, before any motion is integrated. Membership changes
//! (join, leave, disconnect) share the same queue so their ordering relative
//! to commands is preserved.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::entity::{ObjectClass, ObjectId};
use crate::game::state::{PlayerId, SessionPhase, SessionState};
use crate::game::variant::{ControlScheme, GameVariant};

// =============================================================================
// COMMANDS
// =============================================================================

/// Client-issued command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Set vehicle throttle and steering (each -1..=1)
    Steer {
        /// Throttle
        throttle: f64,
        /// Steering
        steering: f64,
    },
    /// Fire a projectile along the vehicle heading
    Fire,
    /// Strike the cue piece
    Shoot {
        /// Direction (radians)
        angle: f64,
        /// Power, clamped to 0..=max_shot_power
        power: f64,
    },
    /// Swept slice between two points
    Slice {
        /// Segment start
        start: Vec2,
        /// Segment end
        end: Vec2,
    },
    /// Toggle the ready flag
    Ready {
        /// New value
        ready: bool,
    },
    /// Vote for a rematch
    RematchVote,
}

impl Command {
    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Steer { .. } => "steer",
            Self::Fire => "fire",
            Self::Shoot { .. } => "shoot",
            Self::Slice { .. } => "slice",
            Self::Ready { .. } => "ready",
            Self::RematchVote => "rematch_vote",
        }
    }

    /// Phase in which the command is legal.
    pub fn required_phase(&self) -> SessionPhase {
        match self {
            Self::Steer { .. } | Self::Fire | Self::Shoot { .. } | Self::Slice { .. } => SessionPhase::Playing,
            Self::Ready { .. } => SessionPhase::Waiting,
            Self::RematchVote => SessionPhase::Ended,
        }
    }

    /// Whether the command acts on the world (and is gated by turns).
    pub fn is_action(&self) -> bool {
        self.required_phase() == SessionPhase::Playing
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Error taxonomy bucket of a rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed payload
    Validation,
    /// Wrong sender or turn
    Authority,
    /// Illegal in the current phase
    Phase,
}

/// Why a command was dropped.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Payload failed structural checks
    #[error("malformed payload: {detail}")]
    MalformedPayload {
        /// What was wrong
        detail: String,
    },

    /// Command does not exist in this variant
    #[error("{command} is not supported by this game")]
    Unsupported {
        /// Command name
        command: String,
    },

    /// Command not legal in the current phase
    #[error("{command} is not allowed while {phase}")]
    PhaseIneligible {
        /// Command name
        command: String,
        /// Current phase
        phase: SessionPhase,
    },

    /// Pieces are still moving from the previous move
    #[error("a move is already in progress")]
    MoveInProgress,

    /// Sender is not the active turn holder
    #[error("not your turn")]
    NotYourTurn,

    /// Sender does not hold a seat
    #[error("sender is not an occupant of this session")]
    NotAnOccupant,

    /// Sender is out for this round
    #[error("sender is disqualified")]
    Disqualified,

    /// Target entity missing or inactive
    #[error("no controllable entity")]
    UnknownEntity,
}

impl RejectReason {
    /// Taxonomy bucket.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedPayload { .. } | Self::Unsupported { .. } => ErrorCategory::Validation,
            Self::PhaseIneligible { .. } | Self::MoveInProgress => ErrorCategory::Phase,
            Self::NotYourTurn | Self::NotAnOccupant | Self::Disqualified | Self::UnknownEntity => {
                ErrorCategory::Authority
            }
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn malformed(detail: impl Into<String>) -> RejectReason {
    RejectReason::MalformedPayload { detail: detail.into() }
}

fn unsupported(command: &Command) -> RejectReason {
    RejectReason::Unsupported { command: command.name().to_string() }
}

/// The active cue piece, if any.
pub fn cue_piece(state: &SessionState) -> Option<ObjectId> {
    state
        .objects
        .values()
        .find(|o| o.active && o.piece().is_some_and(|p| p.cue))
        .map(|o| o.id)
}

/// Layer (a): structural validity. Returns the normalized command.
pub fn check_payload(command: Command, variant: &GameVariant) -> Result<Command, RejectReason> {
    match command {
        Command::Steer { throttle, steering } => {
            if variant.control != ControlScheme::Vehicle {
                return Err(unsupported(&command));
            }
            if !throttle.is_finite() || !steering.is_finite() {
                return Err(malformed("throttle and steering must be finite"));
            }
            Ok(Command::Steer { throttle: throttle.clamp(-1.0, 1.0), steering: steering.clamp(-1.0, 1.0) })
        }
        Command::Fire => {
            if variant.control != ControlScheme::Vehicle || variant.projectile.is_none() {
                return Err(unsupported(&command));
            }
            Ok(command)
        }
        Command::Shoot { angle, power } => {
            if variant.control != ControlScheme::Cue {
                return Err(unsupported(&command));
            }
            if !angle.is_finite() || !power.is_finite() {
                return Err(malformed("angle and power must be finite"));
            }
            Ok(Command::Shoot { angle, power: power.clamp(0.0, variant.rules.max_shot_power) })
        }
        Command::Slice { start, end } => {
            if variant.control != ControlScheme::Blade {
                return Err(unsupported(&command));
            }
            if !start.is_finite() || !end.is_finite() {
                return Err(malformed("slice endpoints must be finite"));
            }
            let max = variant.rules.max_slice_length;
            let end = start + (end - start).clamp_length(max);
            Ok(Command::Slice { start, end })
        }
        Command::Ready { .. } | Command::RematchVote => Ok(command),
    }
}

/// Layer (b): phase eligibility.
pub fn check_phase(command: &Command, state: &SessionState) -> Result<(), RejectReason> {
    if command.required_phase() != state.phase {
        return Err(RejectReason::PhaseIneligible { command: command.name().to_string(), phase: state.phase });
    }
    Ok(())
}

/// Layer (c): authority. Sender must hold a seat, own the target entity
/// and, for turn-based variants, hold the turn.
pub fn check_authority(
    sender: &PlayerId,
    command: &Command,
    state: &SessionState,
    variant: &GameVariant,
) -> Result<(), RejectReason> {
    let player = state
        .get_player(sender)
        .filter(|p| p.is_occupant())
        .ok_or(RejectReason::NotAnOccupant)?;

    if !command.is_action() {
        return Ok(());
    }
    if player.disqualified {
        return Err(RejectReason::Disqualified);
    }
    if variant.rules.turn_based {
        if state.turn.holder.as_ref() != Some(sender) {
            return Err(RejectReason::NotYourTurn);
        }
        if state.turn.move_in_flight {
            return Err(RejectReason::MoveInProgress);
        }
    }

    match command {
        Command::Steer { .. } | Command::Fire => {
            let owned = state
                .controlled_object(sender)
                .is_some_and(|o| o.class() == ObjectClass::Vehicle && o.owner.as_ref() == Some(sender));
            if !owned {
                return Err(RejectReason::UnknownEntity);
            }
        }
        Command::Shoot { .. } => {
            if cue_piece(state).is_none() {
                return Err(RejectReason::UnknownEntity);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Run all three layers. Returns the normalized command.
pub fn validate(
    sender: &PlayerId,
    command: Command,
    state: &SessionState,
    variant: &GameVariant,
) -> Result<Command, RejectReason> {
    let command = check_payload(command, variant)?;
    check_phase(&command, state)?;
    check_authority(sender, &command, state, variant)?;
    Ok(command)
}

// =============================================================================
// QUEUE
// =============================================================================

/// Anything applied at a tick boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundAction {
    /// Seat a new occupant or resume a disconnected one
    Join {
        /// Identity
        player: PlayerId,
        /// Display name
        display_name: String,
        /// Entity id reserved at admission
        entity: Option<ObjectId>,
    },
    /// Permanent departure
    Leave {
        /// Identity
        player: PlayerId,
    },
    /// Transport lost
    Disconnect {
        /// Identity
        player: PlayerId,
    },
    /// Validated command
    Command {
        /// Sender
        sender: PlayerId,
        /// Normalized command
        command: Command,
    },
}

/// Queued action with its arrival sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedAction {
    /// Arrival order
    pub seq: u64,
    /// Action
    pub action: InboundAction,
}

/// FIFO of actions waiting for the next tick.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<QueuedAction>,
    next_seq: u64,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, returning its sequence number.
    pub fn push(&mut self, action: InboundAction) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(QueuedAction { seq, action });
        seq
    }

    /// Take everything queued, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedAction> {
        self.pending.drain(..).collect()
    }

    /// Joins queued but not yet applied.
    pub fn pending_joins(&self) -> impl Iterator<Item = &PlayerId> {
        self.pending.iter().filter_map(|q| match &q.action {
            InboundAction::Join { player, .. } => Some(player),
            _ => None,
        })
    }

    /// Departures queued but not yet applied.
    pub fn pending_leaves(&self) -> impl Iterator<Item = &PlayerId> {
        self.pending.iter().filter_map(|q| match &q.action {
            InboundAction::Leave { player } => Some(player),
            _ => None,
        })
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::PlayerState;

    fn seat(state: &mut SessionState, name: &str) -> PlayerId {
        let id = PlayerId::new(name);
        let seq = state.next_join_seq;
        state.next_join_seq += 1;
        state.players.insert(id.clone(), PlayerState::new(id.clone(), name.to_string(), seq));
        id
    }

    #[test]
    fn test_shot_power_clamped() {
        let variant = GameVariant::billiards();
        let high = check_payload(Command::Shoot { angle: 0.0, power: 250.0 }, &variant).unwrap();
        let low = check_payload(Command::Shoot { angle: 0.0, power: -4.0 }, &variant).unwrap();

        assert_eq!(high, Command::Shoot { angle: 0.0, power: 100.0 });
        assert_eq!(low, Command::Shoot { angle: 0.0, power: 0.0 });
    }

    #[test]
    fn test_non_finite_payload_rejected() {
        let variant = GameVariant::racing();
        let err = check_payload(Command::Steer { throttle: f64::NAN, steering: 0.0 }, &variant).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_steer_clamped() {
        let variant = GameVariant::racing();
        let cmd = check_payload(Command::Steer { throttle: 3.0, steering: -2.0 }, &variant).unwrap();
        assert_eq!(cmd, Command::Steer { throttle: 1.0, steering: -1.0 });
    }

    #[test]
    fn test_slice_length_clamped() {
        let variant = GameVariant::slicer();
        let cmd = check_payload(Command::Slice { start: Vec2::ZERO, end: Vec2::new(500.0, 0.0) }, &variant).unwrap();
        let Command::Slice { end, .. } = cmd else { panic!("expected slice") };
        assert!((end.x - variant.rules.max_slice_length).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_scheme_unsupported() {
        let variant = GameVariant::slicer();
        let err = check_payload(Command::Fire, &variant).unwrap_err();
        assert!(matches!(err, RejectReason::Unsupported { .. }));
    }

    #[test]
    fn test_phase_gate() {
        let variant = GameVariant::slicer();
        let mut state = SessionState::new(1, Vec::new());
        let p = seat(&mut state, "p");

        let slice = Command::Slice { start: Vec2::ZERO, end: Vec2::RIGHT };
        let err = validate(&p, slice.clone(), &state, &variant).unwrap_err();
        assert_eq!(err, RejectReason::PhaseIneligible { command: "slice".into(), phase: SessionPhase::Waiting });
        assert_eq!(err.category(), ErrorCategory::Phase);

        assert!(validate(&p, Command::Ready { ready: true }, &state, &variant).is_ok());
        state.phase = SessionPhase::Playing;
        assert!(validate(&p, slice, &state, &variant).is_ok());
        assert!(validate(&p, Command::RematchVote, &state, &variant).is_err());
    }

    #[test]
    fn test_not_your_turn() {
        let variant = GameVariant::billiards();
        let mut state = SessionState::new(1, Vec::new());
        let a = seat(&mut state, "a");
        let b = seat(&mut state, "b");
        crate::game::spawn::spawn_layout(&mut state, &variant);
        state.phase = SessionPhase::Playing;
        state.turn.holder = Some(a.clone());

        let shot = Command::Shoot { angle: 0.0, power: 50.0 };
        assert!(validate(&a, shot.clone(), &state, &variant).is_ok());

        let err = validate(&b, shot.clone(), &state, &variant).unwrap_err();
        assert_eq!(err, RejectReason::NotYourTurn);
        assert_eq!(err.category(), ErrorCategory::Authority);

        state.turn.move_in_flight = true;
        assert_eq!(validate(&a, shot, &state, &variant), Err(RejectReason::MoveInProgress));
    }

    #[test]
    fn test_unknown_entity_and_stranger() {
        let variant = GameVariant::racing();
        let mut state = SessionState::new(1, Vec::new());
        let p = seat(&mut state, "p");
        state.phase = SessionPhase::Playing;

        let steer = Command::Steer { throttle: 1.0, steering: 0.0 };
        assert_eq!(validate(&p, steer.clone(), &state, &variant), Err(RejectReason::UnknownEntity));
        assert_eq!(
            validate(&PlayerId::new("ghost"), steer, &state, &variant),
            Err(RejectReason::NotAnOccupant)
        );
    }

    #[test]
    fn test_queue_preserves_arrival_order() {
        let mut queue = CommandQueue::new();
        let p = PlayerId::new("p");
        queue.push(InboundAction::Join { player: p.clone(), display_name: "P".into(), entity: None });
        queue.push(InboundAction::Command { sender: p.clone(), command: Command::Ready { ready: true } });
        queue.push(InboundAction::Leave { player: p.clone() });

        assert_eq!(queue.pending_joins().count(), 1);
        let drained = queue.drain();
        assert_eq!(drained.iter().map(|q| q.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(matches!(drained[2].action, InboundAction::Leave { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reject_reason_json() {
        let json = serde_json::to_string(&RejectReason::NotYourTurn).unwrap();
        assert_eq!(json, r#"{"reason":"not_your_turn"}"#);
    }
}
