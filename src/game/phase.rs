//! Session State Machine
//!
//! `waiting -> playing -> ended -> waiting`. Predicates are evaluated once
//! per tick after the world has been simulated; at most one transition
//! fires per tick. Collision resolution never calls into this module.

use serde::{Serialize, Deserialize};
use tracing::info;

use crate::game::entity::ObjectClass;
use crate::game::events::{GameEventData, Standing};
use crate::game::scheduler::{ScheduledEffect, TickScheduler};
use crate::game::spawn;
use crate::game::state::{PlayerId, SessionPhase, SessionState};
use crate::game::variant::{ControlScheme, GameVariant, TieBreak, WinCondition};

/// Why a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Round clock reached zero
    TimeExpired,
    /// Occupants dropped below the minimum
    NotEnoughOccupants,
    /// A score reached the threshold
    ScoreReached,
    /// A vehicle completed the required laps
    LapsCompleted,
    /// At most one contender remains
    LastStanding,
    /// No numbered pieces remain
    PiecesCleared,
}

/// A phase change decided by [`evaluate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// `waiting -> playing`
    Start,
    /// `playing -> ended`
    End(EndReason),
    /// `ended -> waiting`
    Rematch,
}

// =============================================================================
// PREDICATES
// =============================================================================

/// Enough occupants (and, when required, all of them ready).
pub fn start_ready(state: &SessionState, variant: &GameVariant) -> bool {
    let rules = &variant.rules;
    if state.occupant_count() < rules.min_occupants {
        return false;
    }
    !rules.require_ready || state.occupants().all(|p| p.ready)
}

/// Every connected occupant has voted (and at least one is connected).
pub fn rematch_ready(state: &SessionState) -> bool {
    let mut connected = state.connected_occupants().peekable();
    if connected.peek().is_none() {
        return false;
    }
    connected.all(|p| state.rematch_votes.contains(&p.id))
}

fn contenders(state: &SessionState) -> Vec<PlayerId> {
    state.occupants().filter(|p| !p.disqualified).map(|p| p.id.clone()).collect()
}

fn lap_finishers(state: &SessionState, laps: u32) -> Vec<PlayerId> {
    state
        .objects
        .values()
        .filter(|o| o.active)
        .filter(|o| o.vehicle().is_some_and(|v| v.lap_count >= laps))
        .filter_map(|o| o.owner.clone())
        .filter(|id| state.get_player(id).is_some_and(|p| p.is_contender()))
        .collect()
}

/// The first terminal condition that holds while playing.
pub fn terminal_condition(state: &SessionState, variant: &GameVariant) -> Option<EndReason> {
    let rules = &variant.rules;

    if state.remaining_ticks == Some(0) {
        return Some(EndReason::TimeExpired);
    }
    if state.occupant_count() < rules.min_occupants {
        return Some(EndReason::NotEnoughOccupants);
    }

    let last_standing = rules.win == WinCondition::LastStanding || rules.lives.is_some();
    if last_standing && state.occupant_count() >= 2 && contenders(state).len() <= 1 {
        return Some(EndReason::LastStanding);
    }

    match rules.win {
        WinCondition::ScoreThreshold { score } => state
            .occupants()
            .any(|p| p.is_contender() && p.score >= score)
            .then_some(EndReason::ScoreReached),
        WinCondition::LapsCompleted { laps } => {
            (!lap_finishers(state, laps).is_empty()).then_some(EndReason::LapsCompleted)
        }
        WinCondition::PiecesCleared => {
            let remaining = state
                .objects
                .values()
                .any(|o| o.active && o.piece().is_some_and(|p| !p.cue));
            (!remaining).then_some(EndReason::PiecesCleared)
        }
        WinCondition::TimeOnly | WinCondition::LastStanding => None,
    }
}

/// Decide this tick's transition, if any.
pub fn evaluate(state: &SessionState, variant: &GameVariant) -> Option<Transition> {
    match state.phase {
        SessionPhase::Waiting => start_ready(state, variant).then_some(Transition::Start),
        SessionPhase::Playing => terminal_condition(state, variant).map(Transition::End),
        SessionPhase::Ended => rematch_ready(state).then_some(Transition::Rematch),
    }
}

// =============================================================================
// WINNER
// =============================================================================

/// Highest score among `candidates`, settling exact ties with `tiebreak`.
pub fn compute_winner(state: &SessionState, candidates: &[PlayerId], tiebreak: TieBreak) -> Option<PlayerId> {
    let best = candidates
        .iter()
        .filter_map(|id| state.get_player(id))
        .map(|p| p.score)
        .max()?;

    let mut tied: Vec<_> = candidates
        .iter()
        .filter_map(|id| state.get_player(id))
        .filter(|p| p.score == best)
        .collect();

    if tied.len() == 1 {
        return Some(tied[0].id.clone());
    }
    match tiebreak {
        TieBreak::NoWinner => None,
        TieBreak::EarliestJoined => {
            tied.sort_by_key(|p| p.join_seq);
            tied.first().map(|p| p.id.clone())
        }
        TieBreak::LowestIdentity => tied.iter().map(|p| p.id.clone()).min(),
    }
}

/// Everyone who played the round, best score first then join order.
pub fn standings(state: &SessionState) -> Vec<Standing> {
    let mut rows: Vec<_> = state.players.values().collect();
    rows.sort_by(|a, b| b.score.cmp(&a.score).then(a.join_seq.cmp(&b.join_seq)));
    rows.into_iter()
        .map(|p| Standing {
            player: p.id.clone(),
            score: p.score,
            disqualified: p.disqualified,
            departed: p.departed,
        })
        .collect()
}

// =============================================================================
// TRANSITIONS
// =============================================================================

fn set_phase(state: &mut SessionState, to: SessionPhase) {
    let from = state.phase;
    state.phase = to;
    let round = state.round;
    state.push_event(GameEventData::PhaseChanged { from, to, round });
}

/// Cancel every round timer. Reconnect grace timers are membership state
/// and survive.
pub fn cancel_round_timers(scheduler: &mut TickScheduler) -> usize {
    scheduler.cancel_where(|e| !matches!(e, ScheduledEffect::DisconnectExpiry { .. }))
}

/// First spawn slot not claimed by another active vehicle.
pub fn free_spawn_slot(state: &SessionState, variant: &GameVariant) -> usize {
    let spawns = &variant.vehicle.spawns;
    let taken: Vec<_> = state
        .objects
        .values()
        .filter(|o| o.active)
        .filter_map(|o| o.vehicle().map(|v| v.spawn.position))
        .collect();
    (0..spawns.len())
        .find(|i| !taken.contains(&spawns[*i].position))
        .unwrap_or(state.occupant_count())
}

/// Put the world back to the initial layout.
///
/// Seated vehicles are reset in place (their ids stay valid for clients);
/// occupants without a vehicle get a fresh one. Every other object is
/// removed and the piece layout is spawned again.
pub fn reset_world(state: &mut SessionState, variant: &GameVariant) {
    let stale: Vec<_> = state
        .objects
        .values()
        .filter(|o| o.active && o.class() != ObjectClass::Vehicle)
        .map(|o| o.id)
        .collect();
    for id in stale {
        state.deactivate_object(id);
    }
    state.zone_contacts.clear();
    spawn::spawn_layout(state, variant);

    if variant.control != ControlScheme::Vehicle {
        return;
    }

    for (slot, player) in state.join_order().into_iter().enumerate() {
        let existing = state.get_player(&player).and_then(|p| p.controlled_entity);
        let spawn_point = variant.vehicle.spawns.get(slot % variant.vehicle.spawns.len().max(1)).copied();

        match existing.and_then(|id| state.objects.get_mut(&id)).filter(|o| o.active) {
            Some(object) => {
                let Some(spawn_point) = spawn_point else { continue };
                let max_health = object.vehicle().map(|v| v.max_health).unwrap_or(variant.vehicle.health);
                if let Some(vehicle) = object.vehicle_mut() {
                    *vehicle = crate::game::entity::VehicleData::new(max_health, spawn_point);
                }
                object.reset_to(spawn_point);
            }
            None => {
                let id = state.allocate_object_id();
                spawn::spawn_vehicle(state, variant, &player, id, slot);
                if let Some(p) = state.get_player_mut(&player) {
                    p.controlled_entity = Some(id);
                }
            }
        }
    }
}

/// `waiting -> playing`: reset scores, world and timers, then start.
pub fn begin_round(state: &mut SessionState, variant: &GameVariant, scheduler: &mut TickScheduler) {
    state.round += 1;
    state.winner = None;
    state.rematch_votes.clear();
    for player in state.players.values_mut() {
        player.score = 0;
        player.disqualified = false;
    }

    reset_world(state, variant);
    state.remaining_ticks = variant.rules.round_ticks;

    cancel_round_timers(scheduler);
    let now = state.tick;
    if variant.rules.round_ticks.is_some() {
        scheduler.schedule_in(now, variant.ticks_per_second(), ScheduledEffect::ClockAnnouncement);
    }
    if let Some(spawner) = &variant.markers {
        scheduler.schedule_in(now, spawner.interval_ticks, ScheduledEffect::SpawnMarker);
    }

    set_phase(state, SessionPhase::Playing);
    info!(round = state.round, occupants = state.occupant_count(), "Round started");

    state.turn = Default::default();
    if variant.rules.turn_based {
        advance_turn(state, variant, scheduler);
    }
}

/// `playing -> ended`: freeze, pick the winner, publish the summary.
pub fn end_round(state: &mut SessionState, variant: &GameVariant, scheduler: &mut TickScheduler, reason: EndReason) {
    cancel_round_timers(scheduler);

    for object in state.objects.values_mut() {
        if let Some(vehicle) = object.vehicle_mut() {
            vehicle.neutralize();
        }
    }
    state.turn.holder = None;
    state.turn.move_in_flight = false;

    let candidates = match (reason, &variant.rules.win) {
        (EndReason::LapsCompleted, WinCondition::LapsCompleted { laps }) => lap_finishers(state, *laps),
        _ => contenders(state),
    };
    let winner = compute_winner(state, &candidates, variant.rules.tiebreak);
    state.winner = winner.clone();

    set_phase(state, SessionPhase::Ended);
    info!(round = state.round, ?reason, winner = ?winner, "Round ended");

    let summary = standings(state);
    state.push_event(GameEventData::MatchEnded { winner, reason, standings: summary });
}

/// `ended -> waiting`: clear votes and per-round player state.
pub fn rematch(state: &mut SessionState) {
    state.rematch_votes.clear();
    state.winner = None;
    state.remaining_ticks = None;
    for player in state.players.values_mut() {
        player.score = 0;
        player.ready = false;
        player.disqualified = false;
    }
    set_phase(state, SessionPhase::Waiting);
    info!(round = state.round, "Rematch agreed");
}

/// Apply a transition decided by [`evaluate`].
pub fn apply(state: &mut SessionState, variant: &GameVariant, scheduler: &mut TickScheduler, transition: Transition) {
    match transition {
        Transition::Start => begin_round(state, variant, scheduler),
        Transition::End(reason) => end_round(state, variant, scheduler, reason),
        Transition::Rematch => rematch(state),
    }
}

// =============================================================================
// TURNS
// =============================================================================

/// Next eligible holder after the current one, cycling in join order.
///
/// Only connected, non-disqualified occupants hold turns.
pub fn next_turn_holder(state: &SessionState) -> Option<PlayerId> {
    let eligible: Vec<_> = {
        let mut seated: Vec<_> = state.occupants().filter(|p| p.is_connected() && !p.disqualified).collect();
        seated.sort_by_key(|p| p.join_seq);
        seated
    };
    let first = eligible.first().map(|p| p.id.clone());

    let current = state
        .turn
        .holder
        .as_ref()
        .and_then(|id| state.get_player(id))
        .map(|p| p.join_seq)
        .or(state.turn.last_holder_seq);
    let Some(current) = current else {
        return first;
    };
    eligible
        .iter()
        .find(|p| p.join_seq > current)
        .map(|p| p.id.clone())
        .or(first)
}

/// Re-arm the idle timeout for the current turn.
pub fn arm_turn_timeout(state: &SessionState, variant: &GameVariant, scheduler: &mut TickScheduler) {
    scheduler.cancel_where(|e| matches!(e, ScheduledEffect::TurnTimeout { .. }));
    if let (Some(timeout), Some(_)) = (variant.rules.turn_timeout_ticks, state.turn.holder.as_ref()) {
        if !state.turn.move_in_flight {
            scheduler.schedule_in(state.tick, timeout, ScheduledEffect::TurnTimeout { turn: state.turn.seq });
        }
    }
}

/// Pass the turn on and announce it.
pub fn advance_turn(state: &mut SessionState, variant: &GameVariant, scheduler: &mut TickScheduler) {
    state.turn.holder = next_turn_holder(state);
    if let Some(holder) = state.turn.holder.as_ref().and_then(|id| state.get_player(id)) {
        state.turn.last_holder_seq = Some(holder.join_seq);
    }
    state.turn.seq += 1;
    state.turn.scored_this_move = false;

    let (player, turn) = (state.turn.holder.clone(), state.turn.seq);
    state.push_event(GameEventData::TurnChanged { player, turn });
    arm_turn_timeout(state, variant, scheduler);
}

// =============================================================================
// TESTS
// =============================================================================
