//! Session State Definitions
//!
//! The root aggregate of one session: phase, clock, players and the objects
//! the session owns. Uses BTreeMap for deterministic iteration order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::warn;

use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::core::rng::DeterministicRng;
use crate::game::entity::{DynamicObject, ObjectId, SensorZone, ZoneId};
use crate::game::events::GameEvent;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Stable occupant identity, supplied at join and never reused in a session.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create from any string-like identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Transport status of an occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Connected and receiving updates
    Connected,
    /// Lost transport; seat held until the grace period expires
    Disconnected {
        /// Tick the disconnect was applied
        since_tick: u64,
    },
}

/// One occupant of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Identity
    pub id: PlayerId,
    /// Display name
    pub display_name: String,
    /// Score this round
    pub score: i32,
    /// Ready flag (waiting phase)
    pub ready: bool,
    /// Transport status
    pub connection: ConnectionState,
    /// Left permanently; kept for end-of-round reporting
    pub departed: bool,
    /// Out of lives this round
    pub disqualified: bool,
    /// Entity this player steers; lookup only
    pub controlled_entity: Option<ObjectId>,
    /// Join order (lower joined earlier)
    pub join_seq: u32,
}

impl PlayerState {
    /// Create a freshly joined player.
    pub fn new(id: PlayerId, display_name: String, join_seq: u32) -> Self {
        Self {
            id,
            display_name,
            score: 0,
            ready: false,
            connection: ConnectionState::Connected,
            departed: false,
            disqualified: false,
            controlled_entity: None,
            join_seq,
        }
    }

    /// Connected right now.
    #[inline]
    pub fn is_connected(&self) -> bool {
        !self.departed && matches!(self.connection, ConnectionState::Connected)
    }

    /// Still holds a seat (connected or inside the reconnect grace period).
    #[inline]
    pub fn is_occupant(&self) -> bool {
        !self.departed
    }

    /// Can still act and win this round.
    #[inline]
    pub fn is_contender(&self) -> bool {
        !self.departed && !self.disqualified
    }

    /// Add points, returning the new total.
    pub fn add_score(&mut self, points: i32) -> i32 {
        self.score = self.score.saturating_add(points);
        self.score
    }

    /// Add to a state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_str(self.id.as_str());
        hasher.update_str(&self.display_name);
        hasher.update_i32(self.score);
        hasher.update_bool(self.ready);
        hasher.update_bool(self.is_connected());
        hasher.update_bool(self.departed);
        hasher.update_bool(self.disqualified);
        hasher.update_option(self.controlled_entity, |h, id| h.update_u32(id));
        hasher.update_u32(self.join_seq);
    }
}

// =============================================================================
// SESSION PHASE
// =============================================================================

/// Current phase of the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for occupants
    #[default]
    Waiting,
    /// Active gameplay
    Playing,
    /// Round over, collecting rematch votes
    Ended,
}

impl SessionPhase {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn arbitration for turn-based variants.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    /// Active turn holder
    pub holder: Option<PlayerId>,
    /// Incremented on every turn change
    pub seq: u32,
    /// Join order of the most recent holder; the cycle resumes after it
    /// when the holder leaves mid-move
    pub last_holder_seq: Option<u32>,
    /// A shot has been taken and pieces are still moving
    pub move_in_flight: bool,
    /// The current move pocketed a numbered piece
    pub scored_this_move: bool,
}

// =============================================================================
// INTEGRITY
// =============================================================================

/// Invariant violations found and repaired at a tick boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrityError {
    /// A player pointed at a missing or inactive object
    #[error("player {player} referenced unavailable object {object}")]
    DanglingEntity {
        /// Player
        player: PlayerId,
        /// Object id that did not resolve
        object: ObjectId,
    },

    /// The turn holder can no longer act
    #[error("turn holder {0} is no longer eligible")]
    StaleTurnHolder(PlayerId),
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Complete state of one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    /// RNG seed (for verification)
    pub seed: u64,

    /// Ticks since session creation
    pub tick: u64,

    /// Current phase
    pub phase: SessionPhase,

    /// Rounds started so far
    pub round: u32,

    /// Ticks left in the round (timed rounds only)
    pub remaining_ticks: Option<u32>,

    /// All players, departed ones included
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// All dynamic objects
    pub objects: BTreeMap<ObjectId, DynamicObject>,

    /// Static sensor zones
    pub zones: Vec<SensorZone>,

    /// (object, zone) pairs currently overlapping, for entry detection
    pub zone_contacts: BTreeSet<(ObjectId, ZoneId)>,

    /// Next object id (monotonic counter)
    pub next_object_id: ObjectId,

    /// Next join sequence number
    pub next_join_seq: u32,

    /// Turn arbitration
    pub turn: TurnState,

    /// Rematch votes (ended phase)
    pub rematch_votes: BTreeSet<PlayerId>,

    /// Winner of the last finished round
    pub winner: Option<PlayerId>,

    /// Deterministic RNG state
    #[serde(skip)]
    pub rng: DeterministicRng,

    /// Events generated this tick (cleared each tick)
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl SessionState {
    /// Create an empty session.
    pub fn new(seed: u64, zones: Vec<SensorZone>) -> Self {
        Self {
            seed,
            tick: 0,
            phase: SessionPhase::Waiting,
            round: 0,
            remaining_ticks: None,
            players: BTreeMap::new(),
            objects: BTreeMap::new(),
            zones,
            zone_contacts: BTreeSet::new(),
            next_object_id: 1,
            next_join_seq: 0,
            turn: TurnState::default(),
            rematch_votes: BTreeSet::new(),
            winner: None,
            rng: DeterministicRng::new(seed),
            pending_events: Vec::new(),
        }
    }

    /// Reserve the next object id.
    pub fn allocate_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    /// Insert an object under its own id.
    pub fn insert_object(&mut self, object: DynamicObject) -> ObjectId {
        let id = object.id;
        self.objects.insert(id, object);
        id
    }

    /// Get a player by ID.
    pub fn get_player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Get a player mutably by ID.
    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    /// Players holding a seat.
    pub fn occupants(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values().filter(|p| p.is_occupant())
    }

    /// Number of players holding a seat.
    pub fn occupant_count(&self) -> usize {
        self.occupants().count()
    }

    /// Connected occupants.
    pub fn connected_occupants(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values().filter(|p| p.is_connected())
    }

    /// Occupants sorted by join order.
    pub fn join_order(&self) -> Vec<PlayerId> {
        let mut seated: Vec<&PlayerState> = self.occupants().collect();
        seated.sort_by_key(|p| p.join_seq);
        seated.into_iter().map(|p| p.id.clone()).collect()
    }

    /// Active object a player controls, if any.
    pub fn controlled_object(&self, id: &PlayerId) -> Option<&DynamicObject> {
        let entity = self.players.get(id)?.controlled_entity?;
        self.objects.get(&entity).filter(|o| o.active)
    }

    /// Deactivate an object and drop every player reference to it.
    ///
    /// Returns `true` only on the active-to-inactive transition; a repeat
    /// call is a no-op.
    pub fn deactivate_object(&mut self, id: ObjectId) -> bool {
        let changed = match self.objects.get_mut(&id) {
            Some(object) => object.deactivate(),
            None => false,
        };
        if changed {
            for player in self.players.values_mut() {
                if player.controlled_entity == Some(id) {
                    player.controlled_entity = None;
                }
            }
        }
        changed
    }

    /// Find and clear references that no longer resolve.
    ///
    /// Runs at every tick boundary; each repair is logged and returned.
    pub fn repair_references(&mut self) -> Vec<IntegrityError> {
        let mut repaired = Vec::new();

        for player in self.players.values_mut() {
            if let Some(object) = player.controlled_entity {
                let resolves = self.objects.get(&object).map(|o| o.active).unwrap_or(false);
                if !resolves {
                    warn!(player = %player.id, object, "Clearing dangling controlled entity");
                    player.controlled_entity = None;
                    repaired.push(IntegrityError::DanglingEntity { player: player.id.clone(), object });
                }
            }
        }

        if let Some(holder) = self.turn.holder.clone() {
            let eligible = self.players.get(&holder).map(|p| p.is_contender()).unwrap_or(false);
            if !eligible {
                warn!(player = %holder, "Clearing stale turn holder");
                self.turn.holder = None;
                repaired.push(IntegrityError::StaleTurnHolder(holder));
            }
        }

        repaired
    }

    /// Remove inactive objects, returning their ids.
    pub fn purge_inactive(&mut self) -> Vec<ObjectId> {
        let dead: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, o)| !o.active)
            .map(|(id, _)| *id)
            .collect();

        for id in &dead {
            self.objects.remove(id);
        }
        if !dead.is_empty() {
            self.zone_contacts.retain(|(object, _)| !dead.contains(object));
        }
        dead
    }

    /// Compute hash of current state for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.seed, |hasher| {
            hasher.update_u8(self.phase as u8);
            hasher.update_u32(self.round);
            hasher.update_option(self.remaining_ticks, |h, t| h.update_u32(t));

            for player in self.players.values() {
                player.hash_into(hasher);
            }
            for object in self.objects.values() {
                object.hash_into(hasher);
            }

            hasher.update_option(self.turn.holder.as_ref(), |h, p| h.update_str(p.as_str()));
            hasher.update_u32(self.turn.seq);
            hasher.update_option(self.turn.last_holder_seq, |h, s| h.update_u32(s));
            hasher.update_u32(self.rematch_votes.len() as u32);
            for vote in &self.rematch_votes {
                hasher.update_str(vote.as_str());
            }

            let [s0, s1] = self.rng.state();
            hasher.update_u64(s0);
            hasher.update_u64(s1);
        })
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event stamped with the current tick.
    pub fn push_event(&mut self, data: crate::game::events::GameEventData) {
        self.pending_events.push(GameEvent::new(self.tick, data));
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::entity::{ObjectKind, SpawnPoint, VehicleData};

    fn vehicle(id: ObjectId) -> DynamicObject {
        let spawn = SpawnPoint::default();
        DynamicObject::new(id, Vec2::ZERO, 0.0, 1.0, ObjectKind::Vehicle(VehicleData::new(100.0, spawn)))
    }

    fn seated(state: &mut SessionState, name: &str) -> PlayerId {
        let id = PlayerId::new(name);
        let seq = state.next_join_seq;
        state.next_join_seq += 1;
        state.players.insert(id.clone(), PlayerState::new(id.clone(), name.to_string(), seq));
        id
    }

    #[test]
    fn test_player_id_ordering() {
        assert!(PlayerId::new("alice") < PlayerId::new("bob"));
        assert_eq!(PlayerId::new("x").to_string(), "x");
    }

    #[test]
    fn test_deactivate_clears_reference_once() {
        let mut state = SessionState::new(1, Vec::new());
        let player = seated(&mut state, "p1");
        let id = state.allocate_object_id();
        state.insert_object(vehicle(id));
        state.get_player_mut(&player).unwrap().controlled_entity = Some(id);

        assert!(state.deactivate_object(id));
        assert_eq!(state.get_player(&player).unwrap().controlled_entity, None);
        assert!(!state.deactivate_object(id));
        assert!(!state.deactivate_object(999));
    }

    #[test]
    fn test_repair_dangling_reference() {
        let mut state = SessionState::new(1, Vec::new());
        let player = seated(&mut state, "p1");
        state.get_player_mut(&player).unwrap().controlled_entity = Some(42);

        let repaired = state.repair_references();
        assert_eq!(repaired, vec![IntegrityError::DanglingEntity { player: player.clone(), object: 42 }]);
        assert_eq!(state.get_player(&player).unwrap().controlled_entity, None);
        assert!(state.repair_references().is_empty());
    }

    #[test]
    fn test_repair_stale_turn_holder() {
        let mut state = SessionState::new(1, Vec::new());
        let player = seated(&mut state, "p1");
        state.turn.holder = Some(player.clone());
        state.get_player_mut(&player).unwrap().departed = true;

        assert_eq!(state.repair_references(), vec![IntegrityError::StaleTurnHolder(player)]);
        assert_eq!(state.turn.holder, None);
    }

    #[test]
    fn test_purge_inactive() {
        let mut state = SessionState::new(1, Vec::new());
        let a = state.allocate_object_id();
        let b = state.allocate_object_id();
        state.insert_object(vehicle(a));
        state.insert_object(vehicle(b));
        state.zone_contacts.insert((a, 0));

        state.deactivate_object(a);
        assert_eq!(state.purge_inactive(), vec![a]);
        assert!(state.objects.contains_key(&b));
        assert!(state.zone_contacts.is_empty());
    }

    #[test]
    fn test_join_order_skips_departed() {
        let mut state = SessionState::new(1, Vec::new());
        let zed = seated(&mut state, "zed");
        let amy = seated(&mut state, "amy");
        let bob = seated(&mut state, "bob");
        state.get_player_mut(&amy).unwrap().departed = true;

        assert_eq!(state.join_order(), vec![zed, bob]);
        assert_eq!(state.occupant_count(), 2);
    }

    #[test]
    fn test_state_hash_determinism() {
        let build = || {
            let mut state = SessionState::new(12345, Vec::new());
            seated(&mut state, "p1");
            seated(&mut state, "p2");
            let id = state.allocate_object_id();
            state.insert_object(vehicle(id));
            state
        };

        assert_eq!(build().compute_hash(), build().compute_hash());

        let mut moved = build();
        if let Some(obj) = moved.objects.values_mut().next() {
            obj.position = Vec2::new(0.5, 0.0);
        }
        assert_ne!(build().compute_hash(), moved.compute_hash());
    }
}
