//! Authoritative Simulation Tick
//!
//! [`Simulation`] owns one session: its variant, state, command queue and
//! scheduler. Everything that changes the world happens inside
//! [`Simulation::tick`]; calls made between ticks only validate and queue.
//!
//! Deterministic for a given seed and input sequence:
//! - BTreeMap iteration everywhere
//! - session RNG for every random choice
//! - fixed `dt`, never wall-clock time

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::game::collision::{self, CollisionProvider};
use crate::game::command::{self, Command, CommandQueue, InboundAction, RejectReason};
use crate::game::entity::ObjectId;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::kinematics;
use crate::game::phase::{self, Transition};
use crate::game::scheduler::{ScheduledEffect, TickScheduler, TimerHandle};
use crate::game::scoring;
use crate::game::spawn;
use crate::game::state::{ConnectionState, IntegrityError, PlayerId, PlayerState, SessionPhase, SessionState};
use crate::game::variant::{ControlScheme, GameVariant, VariantError};

// =============================================================================
// ADMISSION
// =============================================================================

/// Why a join was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    /// Occupancy is at the maximum
    #[error("session is full ({max} occupants)")]
    SessionFull {
        /// Configured maximum
        max: usize,
    },

    /// Identity is connected, pending or has departed
    #[error("identity {0} is already in use")]
    IdentityInUse(PlayerId),

    /// Blank identity
    #[error("identity must not be empty")]
    EmptyIdentity,
}

/// Accepted join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    /// Identity
    pub player: PlayerId,
    /// Entity the occupant will control, if the variant assigns one
    pub entity: Option<ObjectId>,
    /// Resuming a disconnected seat
    pub reconnected: bool,
}

// =============================================================================
// TICK RESULT
// =============================================================================

/// A queued command dropped when it came up for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Sender
    pub player: PlayerId,
    /// Command as submitted
    pub command: Command,
    /// Why it no longer applied
    pub reason: RejectReason,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick just simulated
    pub tick: u64,
    /// Events generated this tick, in emission order
    pub events: Vec<GameEvent>,
    /// Queued commands that failed re-validation
    pub rejected: Vec<Rejection>,
    /// Phase transition, if one fired
    pub transition: Option<Transition>,
    /// Objects removed at the end of the tick
    pub removed: Vec<ObjectId>,
    /// References repaired at the tick boundary
    pub integrity: Vec<IntegrityError>,
}

impl TickResult {
    /// Whether the round ended this tick.
    pub fn round_ended(&self) -> bool {
        matches!(self.transition, Some(Transition::End(_)))
    }
}

// =============================================================================
// SIMULATION
// =============================================================================

/// One session's authoritative simulation.
pub struct Simulation {
    variant: GameVariant,
    state: SessionState,
    queue: CommandQueue,
    scheduler: TickScheduler,
    disconnect_timers: BTreeMap<PlayerId, TimerHandle>,
    provider: Option<Box<dyn CollisionProvider>>,
}

impl Simulation {
    /// Create a session in `waiting` with the initial layout spawned.
    pub fn new(variant: GameVariant, seed: u64) -> Result<Self, VariantError> {
        variant.validate()?;
        let mut state = SessionState::new(seed, variant.zones.clone());
        spawn::spawn_layout(&mut state, &variant);

        Ok(Self {
            variant,
            state,
            queue: CommandQueue::new(),
            scheduler: TickScheduler::new(),
            disconnect_timers: BTreeMap::new(),
            provider: None,
        })
    }

    /// Delegate motion and contact detection to an external engine.
    pub fn with_collision_provider(mut self, provider: Box<dyn CollisionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Variant descriptor.
    pub fn variant(&self) -> &GameVariant {
        &self.variant
    }

    /// Current state (read-only).
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// Ticks simulated so far.
    pub fn current_tick(&self) -> u64 {
        self.state.tick
    }

    /// Actions waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pending scheduled effects.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    /// Accept or refuse a join. The seat takes effect at the next tick.
    ///
    /// A disconnected identity inside its grace period reconnects to the
    /// same entity, even when the session is otherwise full.
    pub fn admit(&mut self, player: PlayerId, display_name: impl Into<String>) -> Result<Admission, AdmissionError> {
        if player.as_str().is_empty() {
            return Err(AdmissionError::EmptyIdentity);
        }
        if self.queue.pending_joins().chain(self.queue.pending_leaves()).any(|p| *p == player) {
            return Err(AdmissionError::IdentityInUse(player));
        }

        if let Some(existing) = self.state.get_player(&player) {
            if existing.departed || existing.is_connected() {
                return Err(AdmissionError::IdentityInUse(player));
            }
            let entity = existing.controlled_entity;
            self.queue.push(InboundAction::Join { player: player.clone(), display_name: display_name.into(), entity });
            return Ok(Admission { player, entity, reconnected: true });
        }

        let max = self.variant.rules.max_occupants;
        if self.state.occupant_count() + self.queue.pending_joins().count() >= max {
            return Err(AdmissionError::SessionFull { max });
        }

        let entity = match self.variant.control {
            ControlScheme::Vehicle => Some(self.state.allocate_object_id()),
            ControlScheme::Cue | ControlScheme::Blade => None,
        };
        self.queue.push(InboundAction::Join { player: player.clone(), display_name: display_name.into(), entity });
        Ok(Admission { player, entity, reconnected: false })
    }

    /// Validate and queue a command. Returns its queue sequence number.
    pub fn submit(&mut self, sender: &PlayerId, command: Command) -> Result<u64, RejectReason> {
        let command = command::validate(sender, command, &self.state, &self.variant)?;
        Ok(self.queue.push(InboundAction::Command { sender: sender.clone(), command }))
    }

    /// Queue a permanent departure. Unknown identities are ignored.
    pub fn leave(&mut self, player: &PlayerId) {
        let known = self.state.players.contains_key(player) || self.queue.pending_joins().any(|p| p == player);
        if known {
            self.queue.push(InboundAction::Leave { player: player.clone() });
        }
    }

    /// Queue a transport disconnect.
    pub fn disconnect(&mut self, player: &PlayerId) {
        if self.state.players.contains_key(player) || self.queue.pending_joins().any(|p| p == player) {
            self.queue.push(InboundAction::Disconnect { player: player.clone() });
        }
    }

    /// Cancel every scheduled effect. Returns how many were pending.
    pub fn shutdown(&mut self) -> usize {
        self.disconnect_timers.clear();
        self.scheduler.cancel_all()
    }

    /// Run one simulation tick.
    pub fn tick(&mut self) -> TickResult {
        let mut result = TickResult::default();

        // 0. Advance tick counter
        self.state.tick += 1;
        result.tick = self.state.tick;

        // 1. Apply queued actions in arrival order
        for queued in self.queue.drain() {
            self.apply_action(queued.action, &mut result);
        }

        // 2. Simulate the world
        if self.state.phase == SessionPhase::Playing {
            self.simulate();
        }

        // 3. Scheduled effects
        for effect in self.scheduler.drain_due(self.state.tick) {
            self.run_effect(effect);
        }

        // 4. Phase transition
        if let Some(transition) = phase::evaluate(&self.state, &self.variant) {
            phase::apply(&mut self.state, &self.variant, &mut self.scheduler, transition);
            result.transition = Some(transition);
        }

        // 5. Integrity repairs
        result.integrity = self.state.repair_references();
        self.resume_turns();

        // 6. Drop inactive objects
        result.removed = self.state.purge_inactive();

        // 7. Collect events
        result.events = self.state.take_events();

        result
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    fn apply_action(&mut self, action: InboundAction, result: &mut TickResult) {
        match action {
            InboundAction::Join { player, display_name, entity } => self.apply_join(player, display_name, entity),
            InboundAction::Leave { player } => self.depart(&player),
            InboundAction::Disconnect { player } => self.apply_disconnect(&player),
            InboundAction::Command { sender, command } => {
                // State may have moved on since the command was queued.
                let attempted = command.clone();
                match command::validate(&sender, command, &self.state, &self.variant) {
                    Ok(command) => self.execute(&sender, command),
                    Err(reason) => {
                        debug!(player = %sender, command = attempted.name(), %reason, "Dropped queued command");
                        result.rejected.push(Rejection { player: sender, command: attempted, reason });
                    }
                }
            }
        }
    }

    fn apply_join(&mut self, player: PlayerId, display_name: String, entity: Option<ObjectId>) {
        if let Some(existing) = self.state.get_player_mut(&player) {
            if existing.departed || existing.is_connected() {
                return;
            }
            existing.connection = ConnectionState::Connected;
            existing.display_name = display_name.clone();
            let entity = existing.controlled_entity;

            if let Some(handle) = self.disconnect_timers.remove(&player) {
                self.scheduler.cancel(handle);
            }
            info!(player = %player, "Occupant reconnected");
            self.state.push_event(GameEventData::OccupantJoined { player, display_name, entity, reconnected: true });
            self.resume_turns();
            return;
        }

        let seq = self.state.next_join_seq;
        self.state.next_join_seq += 1;
        self.state.players.insert(player.clone(), PlayerState::new(player.clone(), display_name.clone(), seq));

        if let Some(id) = entity.filter(|_| self.variant.control == ControlScheme::Vehicle) {
            let slot = phase::free_spawn_slot(&self.state, &self.variant);
            spawn::spawn_vehicle(&mut self.state, &self.variant, &player, id, slot);
            if let Some(p) = self.state.get_player_mut(&player) {
                p.controlled_entity = Some(id);
            }
        }

        info!(player = %player, occupants = self.state.occupant_count(), "Occupant joined");
        self.state.push_event(GameEventData::OccupantJoined { player, display_name, entity, reconnected: false });
        self.resume_turns();
    }

    fn apply_disconnect(&mut self, player: &PlayerId) {
        let tick = self.state.tick;
        let Some(p) = self.state.get_player_mut(player).filter(|p| p.is_connected()) else {
            return;
        };
        p.connection = ConnectionState::Disconnected { since_tick: tick };
        let entity = p.controlled_entity;

        if let Some(vehicle) = entity.and_then(|id| self.state.objects.get_mut(&id)).and_then(|o| o.vehicle_mut()) {
            vehicle.neutralize();
        }

        let grace = self.variant.rules.reconnect_grace_ticks;
        let handle = self.scheduler.schedule_in(tick, grace, ScheduledEffect::DisconnectExpiry { player: player.clone() });
        self.disconnect_timers.insert(player.clone(), handle);

        info!(player = %player, grace_ticks = grace, "Occupant disconnected");
        self.state.push_event(GameEventData::OccupantLeft { player: player.clone(), permanent: false });
        self.pass_turn_from(player);
    }

    /// Permanent departure: seat released, entity removed, state retained
    /// for end-of-round reporting.
    fn depart(&mut self, player: &PlayerId) {
        let Some(p) = self.state.get_player_mut(player).filter(|p| !p.departed) else {
            return;
        };
        p.departed = true;
        p.ready = false;
        let entity = p.controlled_entity;

        if let Some(id) = entity {
            self.state.deactivate_object(id);
        }
        if let Some(handle) = self.disconnect_timers.remove(player) {
            self.scheduler.cancel(handle);
        }
        self.state.rematch_votes.remove(player);

        info!(player = %player, occupants = self.state.occupant_count(), "Occupant departed");
        self.state.push_event(GameEventData::OccupantLeft { player: player.clone(), permanent: true });
        self.pass_turn_from(player);
    }

    /// Move the turn on if `player` held it and is not mid-move.
    fn pass_turn_from(&mut self, player: &PlayerId) {
        let holds = self.state.turn.holder.as_ref() == Some(player);
        if holds && self.state.phase == SessionPhase::Playing && !self.state.turn.move_in_flight {
            phase::advance_turn(&mut self.state, &self.variant, &mut self.scheduler);
        }
    }

    /// Hand out a turn when nobody holds one and someone can take it.
    fn resume_turns(&mut self) {
        if self.variant.rules.turn_based
            && self.state.phase == SessionPhase::Playing
            && self.state.turn.holder.is_none()
            && !self.state.turn.move_in_flight
            && phase::next_turn_holder(&self.state).is_some()
        {
            phase::advance_turn(&mut self.state, &self.variant, &mut self.scheduler);
        }
    }

    fn execute(&mut self, sender: &PlayerId, command: Command) {
        let entity = self.state.get_player(sender).and_then(|p| p.controlled_entity);

        match command {
            Command::Steer { throttle, steering } => {
                if let Some(vehicle) = entity.and_then(|id| self.state.objects.get_mut(&id)).and_then(|o| o.vehicle_mut()) {
                    vehicle.throttle = throttle;
                    vehicle.steering = steering;
                }
            }
            Command::Fire => {
                let fired = entity.and_then(|id| spawn::spawn_projectile(&mut self.state, &self.variant, id));
                if fired.is_none() {
                    debug!(player = %sender, "Fire ignored during cooldown");
                }
            }
            Command::Shoot { angle, power } => {
                if let Some(cue) = command::cue_piece(&self.state) {
                    if scoring::apply_shot(&mut self.state, &self.variant, cue, angle, power) {
                        self.scheduler.cancel_where(|e| matches!(e, ScheduledEffect::TurnTimeout { .. }));
                    }
                }
            }
            Command::Slice { start, end } => {
                scoring::apply_slice(&mut self.state, &self.variant, sender, start, end);
            }
            Command::Ready { ready } => {
                if let Some(p) = self.state.get_player_mut(sender).filter(|p| p.ready != ready) {
                    p.ready = ready;
                    self.state.push_event(GameEventData::ReadyChanged { player: sender.clone(), ready });
                }
            }
            Command::RematchVote => {
                if self.state.rematch_votes.insert(sender.clone()) {
                    let votes = self.state.rematch_votes.len();
                    let required = self.state.connected_occupants().count();
                    self.state.push_event(GameEventData::RematchVoted { player: sender.clone(), votes, required });
                }
            }
        }
    }

    // =========================================================================
    // WORLD
    // =========================================================================

    fn simulate(&mut self) {
        let dt = self.variant.dt();
        let tick_rate = self.variant.tick_rate;

        // 1. Motion
        match self.provider.as_mut() {
            Some(provider) => provider.step(&mut self.state.objects, dt),
            None => {
                for object in self.state.objects.values_mut().filter(|o| o.active) {
                    let profile = self.variant.physics.profile(object.class());
                    kinematics::step_object(object, profile, &self.variant.arena, dt, tick_rate);
                }
            }
        }

        // 2. Lifetimes
        let expired: Vec<ObjectId> = self
            .state
            .objects
            .values_mut()
            .filter(|o| o.active)
            .filter_map(|o| o.tick_lifetime().then_some(o.id))
            .collect();
        for id in expired {
            self.state.deactivate_object(id);
        }

        // 3. Contacts
        let contacts = match self.provider.as_ref() {
            Some(provider) => collision::sanitize_contacts(&self.state.objects, provider.query_contacts()),
            None => collision::detect_contacts(&self.state.objects),
        };
        let impulses = collision::resolve_contacts(&mut self.state, &self.variant, &contacts);
        match self.provider.as_mut() {
            Some(provider) => {
                for impulse in &impulses {
                    provider.apply_impulse(impulse.object, impulse.vector);
                }
            }
            None => collision::apply_impulses(&mut self.state, &self.variant, &impulses),
        }

        // 4. Sensor zones
        let entries = collision::detect_zone_entries(&mut self.state);
        scoring::apply_zone_entries(&mut self.state, &self.variant, &entries);

        // 5. Move completion
        if self.variant.rules.turn_based {
            if let Some(keep_turn) = scoring::settle_move(&mut self.state, &self.variant) {
                if keep_turn && self.state.turn.holder.is_some() {
                    phase::arm_turn_timeout(&self.state, &self.variant, &mut self.scheduler);
                } else {
                    phase::advance_turn(&mut self.state, &self.variant, &mut self.scheduler);
                }
            }
        }

        // 6. Round clock
        if let Some(remaining) = self.state.remaining_ticks.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    fn run_effect(&mut self, effect: ScheduledEffect) {
        let playing = self.state.phase == SessionPhase::Playing;

        match effect {
            ScheduledEffect::DisconnectExpiry { player } => {
                self.disconnect_timers.remove(&player);
                let still_away = self.state.get_player(&player).is_some_and(|p| p.is_occupant() && !p.is_connected());
                if still_away {
                    info!(player = %player, "Reconnect grace expired");
                    self.depart(&player);
                }
            }
            ScheduledEffect::TurnTimeout { turn } => {
                if playing && turn == self.state.turn.seq && !self.state.turn.move_in_flight {
                    info!(turn, "Turn timed out");
                    phase::advance_turn(&mut self.state, &self.variant, &mut self.scheduler);
                }
            }
            ScheduledEffect::SpawnMarker => {
                if let (true, Some(spawner)) = (playing, self.variant.markers.as_ref()) {
                    spawn::spawn_marker(&mut self.state, &self.variant, spawner);
                    self.scheduler.schedule_in(self.state.tick, spawner.interval_ticks, ScheduledEffect::SpawnMarker);
                }
            }
            ScheduledEffect::ClockAnnouncement => {
                if let (true, Some(remaining_ticks)) = (playing, self.state.remaining_ticks) {
                    self.state.push_event(GameEventData::TimerTick { remaining_ticks });
                    if remaining_ticks > 0 {
                        let second = self.variant.ticks_per_second();
                        self.scheduler.schedule_in(self.state.tick, second, ScheduledEffect::ClockAnnouncement);
                    }
                }
            }
        }
    }
}

// =============================================================================
// REPLAY
// =============================================================================

/// One input delivered just before tick `tick` runs.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedInput {
    /// Tick the input lands on
    pub tick: u64,
    /// Input (join entity ids are assigned by admission)
    pub action: InboundAction,
}

/// Re-run a session from its seed and an input script.
///
/// Refused joins and rejected commands are skipped, as they would be live.
pub fn replay_session(
    variant: GameVariant,
    seed: u64,
    script: &[ScriptedInput],
    tick_count: u64,
) -> Result<(SessionState, Vec<GameEvent>), VariantError> {
    let mut sim = Simulation::new(variant, seed)?;
    let mut all_events = Vec::new();

    for t in 1..=tick_count {
        for input in script.iter().filter(|i| i.tick == t) {
            match &input.action {
                InboundAction::Join { player, display_name, .. } => {
                    let _ = sim.admit(player.clone(), display_name.clone());
                }
                InboundAction::Leave { player } => sim.leave(player),
                InboundAction::Disconnect { player } => sim.disconnect(player),
                InboundAction::Command { sender, command } => {
                    let _ = sim.submit(sender, command.clone());
                }
            }
        }
        let result = sim.tick();
        all_events.extend(result.events);
    }

    Ok((sim.state, all_events))
}

// =============================================================================
// TESTS
// =============================================================================
