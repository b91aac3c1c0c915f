//! Replication
//!
//! Observer-facing view of a session: a full [`Snapshot`] on subscribe,
//! then [`Delta`]s carrying only the attributes that changed. Events travel
//! separately and are never folded into a delta.
//!
//! Floats are compared by bit pattern, so applying every delta to the
//! first snapshot reproduces the authoritative view exactly.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::vec2::Vec2;
use crate::game::entity::{DynamicObject, ObjectId, ObjectKind};
use crate::game::state::{PlayerId, PlayerState, SessionPhase, SessionState};
use crate::game::variant::GameVariant;

/// Replication frame errors.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Binary encoding failed
    #[error("frame encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    /// Delta does not follow the observer's current view
    #[error("delta expects base tick {expected}, view is at {found}")]
    BaseMismatch {
        /// Base tick the delta was computed against
        expected: u64,
        /// Tick of the view it was applied to
        found: u64,
    },
}

/// Object maps travel as `[id, value]` pairs. JSON object keys are
/// strings, and tagged messages cannot turn them back into ids.
mod object_entries {
    use std::collections::BTreeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::game::entity::ObjectId;

    pub fn serialize<T, S>(map: &BTreeMap<ObjectId, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<BTreeMap<ObjectId, T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries = Vec::<(ObjectId, T)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Session-level attributes visible to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    /// Variant name
    pub variant: String,
    /// Tick this view reflects
    pub tick: u64,
    /// Phase
    pub phase: SessionPhase,
    /// Round number
    pub round: u32,
    /// Round clock
    pub remaining_ticks: Option<u32>,
    /// Active turn holder
    pub turn_holder: Option<PlayerId>,
    /// Turn sequence number
    pub turn_seq: u32,
    /// Move in flight (turn-based variants)
    pub move_in_flight: bool,
    /// Winner of the last round
    pub winner: Option<PlayerId>,
    /// Rematch votes, sorted
    pub rematch_votes: Vec<PlayerId>,
}

/// Player attributes visible to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Display name
    pub display_name: String,
    /// Score
    pub score: i32,
    /// Ready flag
    pub ready: bool,
    /// Transport connected
    pub connected: bool,
    /// Left permanently
    pub departed: bool,
    /// Out of lives
    pub disqualified: bool,
    /// Controlled entity
    pub controlled_entity: Option<ObjectId>,
    /// Join order
    pub join_seq: u32,
}

impl From<&PlayerState> for PlayerView {
    fn from(p: &PlayerState) -> Self {
        Self {
            display_name: p.display_name.clone(),
            score: p.score,
            ready: p.ready,
            connected: p.is_connected(),
            departed: p.departed,
            disqualified: p.disqualified,
            controlled_entity: p.controlled_entity,
            join_seq: p.join_seq,
        }
    }
}

/// Full observable state at one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Session attributes
    pub session: SessionView,
    /// Players by identity
    pub players: BTreeMap<PlayerId, PlayerView>,
    /// Active objects by id
    #[serde(with = "object_entries")]
    pub objects: BTreeMap<ObjectId, DynamicObject>,
}

impl Snapshot {
    /// Capture the observable part of `state`. Inactive objects are left out.
    pub fn capture(state: &SessionState, variant: &GameVariant) -> Self {
        let session = SessionView {
            variant: variant.name.clone(),
            tick: state.tick,
            phase: state.phase,
            round: state.round,
            remaining_ticks: state.remaining_ticks,
            turn_holder: state.turn.holder.clone(),
            turn_seq: state.turn.seq,
            move_in_flight: state.turn.move_in_flight,
            winner: state.winner.clone(),
            rematch_votes: state.rematch_votes.iter().cloned().collect(),
        };

        Self {
            session,
            players: state.players.iter().map(|(id, p)| (id.clone(), PlayerView::from(p))).collect(),
            objects: state
                .objects
                .iter()
                .filter(|(_, o)| o.active)
                .map(|(id, o)| (*id, o.clone()))
                .collect(),
        }
    }

    /// Hash of the view, for comparing an observer's reconstruction
    /// against the server.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_snapshot();
        let s = &self.session;

        hasher.update_str(&s.variant);
        hasher.update_u64(s.tick);
        hasher.update_u8(s.phase as u8);
        hasher.update_u32(s.round);
        hasher.update_option(s.remaining_ticks, |h, t| h.update_u32(t));
        hasher.update_option(s.turn_holder.as_ref(), |h, p| h.update_str(p.as_str()));
        hasher.update_u32(s.turn_seq);
        hasher.update_bool(s.move_in_flight);
        hasher.update_option(s.winner.as_ref(), |h, p| h.update_str(p.as_str()));
        hasher.update_u32(s.rematch_votes.len() as u32);
        for vote in &s.rematch_votes {
            hasher.update_str(vote.as_str());
        }

        hasher.update_u32(self.players.len() as u32);
        for (id, p) in &self.players {
            hasher.update_str(id.as_str());
            hasher.update_str(&p.display_name);
            hasher.update_i32(p.score);
            hasher.update_bool(p.ready);
            hasher.update_bool(p.connected);
            hasher.update_bool(p.departed);
            hasher.update_bool(p.disqualified);
            hasher.update_option(p.controlled_entity, |h, e| h.update_u32(e));
            hasher.update_u32(p.join_seq);
        }

        hasher.update_u32(self.objects.len() as u32);
        for object in self.objects.values() {
            object.hash_into(&mut hasher);
        }

        hasher.finalize()
    }

    /// Encode as a binary frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a binary frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplicationError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// =============================================================================
// DELTA
// =============================================================================

/// Explicit null for optional attributes inside a delta.
///
/// `None` on the outer field means "unchanged"; `Some(Nullable::Null)`
/// means "cleared".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Nullable<T> {
    /// Attribute cleared
    Null,
    /// New value
    Value(T),
}

impl<T> From<Option<T>> for Nullable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Nullable::Value(v),
            None => Nullable::Null,
        }
    }
}

impl<T> Nullable<T> {
    /// Back to an `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Nullable::Null => None,
            Nullable::Value(v) => Some(v),
        }
    }
}

/// Changed session attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDelta {
    /// Phase
    pub phase: Option<SessionPhase>,
    /// Round number
    pub round: Option<u32>,
    /// Round clock
    pub remaining_ticks: Option<Nullable<u32>>,
    /// Turn holder
    pub turn_holder: Option<Nullable<PlayerId>>,
    /// Turn sequence
    pub turn_seq: Option<u32>,
    /// Move in flight
    pub move_in_flight: Option<bool>,
    /// Winner
    pub winner: Option<Nullable<PlayerId>>,
    /// Full vote list when it changed
    pub rematch_votes: Option<Vec<PlayerId>>,
}

impl SessionDelta {
    fn diff(old: &SessionView, new: &SessionView) -> Self {
        Self {
            phase: changed(&old.phase, &new.phase),
            round: changed(&old.round, &new.round),
            remaining_ticks: changed_nullable(&old.remaining_ticks, &new.remaining_ticks),
            turn_holder: changed_nullable(&old.turn_holder, &new.turn_holder),
            turn_seq: changed(&old.turn_seq, &new.turn_seq),
            move_in_flight: changed(&old.move_in_flight, &new.move_in_flight),
            winner: changed_nullable(&old.winner, &new.winner),
            rematch_votes: changed(&old.rematch_votes, &new.rematch_votes),
        }
    }

    fn apply(self, view: &mut SessionView) {
        set(&mut view.phase, self.phase);
        set(&mut view.round, self.round);
        set_nullable(&mut view.remaining_ticks, self.remaining_ticks);
        set_nullable(&mut view.turn_holder, self.turn_holder);
        set(&mut view.turn_seq, self.turn_seq);
        set(&mut view.move_in_flight, self.move_in_flight);
        set_nullable(&mut view.winner, self.winner);
        set(&mut view.rematch_votes, self.rematch_votes);
    }

    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Changed player attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    /// Display name
    pub display_name: Option<String>,
    /// Score
    pub score: Option<i32>,
    /// Ready flag
    pub ready: Option<bool>,
    /// Transport connected
    pub connected: Option<bool>,
    /// Left permanently
    pub departed: Option<bool>,
    /// Out of lives
    pub disqualified: Option<bool>,
    /// Controlled entity
    pub controlled_entity: Option<Nullable<ObjectId>>,
}

impl PlayerDelta {
    fn diff(old: &PlayerView, new: &PlayerView) -> Self {
        Self {
            display_name: changed(&old.display_name, &new.display_name),
            score: changed(&old.score, &new.score),
            ready: changed(&old.ready, &new.ready),
            connected: changed(&old.connected, &new.connected),
            departed: changed(&old.departed, &new.departed),
            disqualified: changed(&old.disqualified, &new.disqualified),
            controlled_entity: changed_nullable(&old.controlled_entity, &new.controlled_entity),
        }
    }

    fn apply(self, view: &mut PlayerView) {
        set(&mut view.display_name, self.display_name);
        set(&mut view.score, self.score);
        set(&mut view.ready, self.ready);
        set(&mut view.connected, self.connected);
        set(&mut view.departed, self.departed);
        set(&mut view.disqualified, self.disqualified);
        set_nullable(&mut view.controlled_entity, self.controlled_entity);
    }

    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Changed object attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDelta {
    /// Position
    pub position: Option<Vec2>,
    /// Velocity
    pub velocity: Option<Vec2>,
    /// Orientation
    pub orientation: Option<f64>,
    /// Collision radius
    pub radius: Option<f64>,
    /// Owner
    pub owner: Option<Nullable<PlayerId>>,
    /// Variant payload, whole, when any part of it changed
    pub kind: Option<ObjectKind>,
}

impl ObjectDelta {
    fn diff(old: &DynamicObject, new: &DynamicObject) -> Self {
        Self {
            position: changed_vec2(old.position, new.position),
            velocity: changed_vec2(old.velocity, new.velocity),
            orientation: changed_f64(old.orientation, new.orientation),
            radius: changed_f64(old.radius, new.radius),
            owner: changed_nullable(&old.owner, &new.owner),
            kind: changed(&old.kind, &new.kind),
        }
    }

    fn apply(self, object: &mut DynamicObject) {
        set(&mut object.position, self.position);
        set(&mut object.velocity, self.velocity);
        set(&mut object.orientation, self.orientation);
        set(&mut object.radius, self.radius);
        set_nullable(&mut object.owner, self.owner);
        set(&mut object.kind, self.kind);
    }

    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.velocity.is_none()
            && self.orientation.is_none()
            && self.radius.is_none()
            && self.owner.is_none()
            && self.kind.is_none()
    }
}

/// Everything that changed between two views, addressed by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Tick of the view this delta applies to
    pub base_tick: u64,
    /// Tick of the view it produces
    pub tick: u64,
    /// Session attributes
    pub session: SessionDelta,
    /// Newly seen players, whole
    pub players_added: BTreeMap<PlayerId, PlayerView>,
    /// Changed players
    pub players_changed: BTreeMap<PlayerId, PlayerDelta>,
    /// Newly spawned objects, whole
    #[serde(with = "object_entries")]
    pub objects_added: BTreeMap<ObjectId, DynamicObject>,
    /// Changed objects
    #[serde(with = "object_entries")]
    pub objects_changed: BTreeMap<ObjectId, ObjectDelta>,
    /// Objects gone since the base view
    pub objects_removed: Vec<ObjectId>,
}

impl Delta {
    /// Compute the delta that turns `old` into `new`.
    pub fn diff(old: &Snapshot, new: &Snapshot) -> Self {
        let mut players_added = BTreeMap::new();
        let mut players_changed = BTreeMap::new();
        for (id, view) in &new.players {
            match old.players.get(id) {
                None => {
                    players_added.insert(id.clone(), view.clone());
                }
                Some(prev) => {
                    let delta = PlayerDelta::diff(prev, view);
                    if !delta.is_empty() {
                        players_changed.insert(id.clone(), delta);
                    }
                }
            }
        }

        let mut objects_added = BTreeMap::new();
        let mut objects_changed = BTreeMap::new();
        for (id, object) in &new.objects {
            match old.objects.get(id) {
                None => {
                    objects_added.insert(*id, object.clone());
                }
                Some(prev) => {
                    let delta = ObjectDelta::diff(prev, object);
                    if !delta.is_empty() {
                        objects_changed.insert(*id, delta);
                    }
                }
            }
        }
        let objects_removed = old.objects.keys().filter(|id| !new.objects.contains_key(id)).copied().collect();

        Self {
            base_tick: old.session.tick,
            tick: new.session.tick,
            session: SessionDelta::diff(&old.session, &new.session),
            players_added,
            players_changed,
            objects_added,
            objects_changed,
            objects_removed,
        }
    }

    /// Nothing observable changed (the tick alone does not count).
    pub fn is_empty(&self) -> bool {
        self.session.is_empty()
            && self.players_added.is_empty()
            && self.players_changed.is_empty()
            && self.objects_added.is_empty()
            && self.objects_changed.is_empty()
            && self.objects_removed.is_empty()
    }

    /// Apply to an observer's view, which must be at `base_tick`.
    pub fn apply(self, view: &mut Snapshot) -> Result<(), ReplicationError> {
        if view.session.tick != self.base_tick {
            return Err(ReplicationError::BaseMismatch { expected: self.base_tick, found: view.session.tick });
        }

        view.session.tick = self.tick;
        self.session.apply(&mut view.session);

        view.players.extend(self.players_added);
        for (id, delta) in self.players_changed {
            if let Some(player) = view.players.get_mut(&id) {
                delta.apply(player);
            }
        }

        for id in &self.objects_removed {
            view.objects.remove(id);
        }
        view.objects.extend(self.objects_added);
        for (id, delta) in self.objects_changed {
            if let Some(object) = view.objects.get_mut(&id) {
                delta.apply(object);
            }
        }
        Ok(())
    }

    /// Encode as a binary frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a binary frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplicationError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// =============================================================================
// TRACKER
// =============================================================================

/// Last published view of a session; produces one delta per changed tick.
#[derive(Clone, Debug)]
pub struct DeltaTracker {
    last: Snapshot,
}

impl DeltaTracker {
    /// Start tracking from the current state.
    pub fn new(state: &SessionState, variant: &GameVariant) -> Self {
        Self { last: Snapshot::capture(state, variant) }
    }

    /// Diff the current state against the last published view.
    ///
    /// Returns `None` when nothing observable changed; the baseline then
    /// stays put so the next delta still chains onto what observers hold.
    pub fn update(&mut self, state: &SessionState, variant: &GameVariant) -> Option<Delta> {
        let current = Snapshot::capture(state, variant);
        let delta = Delta::diff(&self.last, &current);
        if delta.is_empty() {
            return None;
        }
        self.last = current;
        Some(delta)
    }

    /// View a newly subscribed observer starts from.
    pub fn baseline(&self) -> &Snapshot {
        &self.last
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
    (old != new).then(|| new.clone())
}

fn changed_nullable<T: PartialEq + Clone>(old: &Option<T>, new: &Option<T>) -> Option<Nullable<T>> {
    (old != new).then(|| new.clone().into())
}

fn changed_f64(old: f64, new: f64) -> Option<f64> {
    (old.to_bits() != new.to_bits()).then_some(new)
}

fn changed_vec2(old: Vec2, new: Vec2) -> Option<Vec2> {
    (old.x.to_bits() != new.x.to_bits() || old.y.to_bits() != new.y.to_bits()).then_some(new)
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn set_nullable<T>(slot: &mut Option<T>, value: Option<Nullable<T>>) {
    if let Some(v) = value {
        *slot = v.into_option();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::Command;
    use crate::game::tick::Simulation;

    fn pid(name: &str) -> PlayerId {
        PlayerId::new(name)
    }

    #[test]
    fn test_unchanged_state_yields_no_delta() {
        let variant = GameVariant::billiards();
        let sim = Simulation::new(variant.clone(), 4).unwrap();
        let mut tracker = DeltaTracker::new(sim.state(), &variant);
        assert!(tracker.update(sim.state(), &variant).is_none());
    }

    #[test]
    fn test_delta_omits_unchanged_attributes() {
        let variant = GameVariant::racing();
        let mut sim = Simulation::new(variant.clone(), 4).unwrap();
        sim.admit(pid("a"), "A").unwrap();
        sim.admit(pid("b"), "B").unwrap();
        sim.tick();
        let mut tracker = DeltaTracker::new(sim.state(), &variant);

        sim.submit(&pid("a"), Command::Steer { throttle: 1.0, steering: 0.0 }).unwrap();
        sim.tick();
        let delta = tracker.update(sim.state(), &variant).unwrap();

        let a = sim.state().get_player(&pid("a")).and_then(|p| p.controlled_entity).unwrap();
        let b = sim.state().get_player(&pid("b")).and_then(|p| p.controlled_entity).unwrap();
        assert!(delta.objects_changed.contains_key(&a));
        assert!(!delta.objects_changed.contains_key(&b));
        assert!(delta.players_changed.is_empty());
        assert_eq!(delta.session.phase, None);
        assert_eq!(delta.session.remaining_ticks, Some(Nullable::Value(variant.rules.round_ticks.unwrap() - 1)));
    }

    #[test]
    fn test_removed_objects_listed() {
        let variant = GameVariant::racing();
        let mut sim = Simulation::new(variant.clone(), 4).unwrap();
        sim.admit(pid("a"), "A").unwrap();
        sim.tick();
        let mut tracker = DeltaTracker::new(sim.state(), &variant);
        let entity = sim.state().get_player(&pid("a")).and_then(|p| p.controlled_entity).unwrap();

        sim.leave(&pid("a"));
        sim.tick();
        let delta = tracker.update(sim.state(), &variant).unwrap();

        assert_eq!(delta.objects_removed, vec![entity]);
        let change = &delta.players_changed[&pid("a")];
        assert_eq!(change.departed, Some(true));
        assert_eq!(change.controlled_entity, Some(Nullable::Null));
    }

    #[test]
    fn test_base_mismatch_rejected() {
        let variant = GameVariant::slicer();
        let mut sim = Simulation::new(variant.clone(), 4).unwrap();
        let mut view = Snapshot::capture(sim.state(), &variant);
        let mut tracker = DeltaTracker::new(sim.state(), &variant);

        sim.admit(pid("a"), "A").unwrap();
        sim.tick();
        let first = tracker.update(sim.state(), &variant).unwrap();
        sim.tick();
        let second = tracker.update(sim.state(), &variant).unwrap();

        assert!(matches!(second.clone().apply(&mut view), Err(ReplicationError::BaseMismatch { .. })));
        first.apply(&mut view).unwrap();
        second.apply(&mut view).unwrap();
        assert_eq!(view, Snapshot::capture(sim.state(), &variant));
    }

    #[test]
    fn test_reconstruction_is_bit_exact() {
        let variant = GameVariant::billiards();
        let mut sim = Simulation::new(variant.clone(), 21).unwrap();
        let mut tracker = DeltaTracker::new(sim.state(), &variant);
        let frame = tracker.baseline().to_bytes().unwrap();
        let mut view = Snapshot::from_bytes(&frame).unwrap();

        sim.admit(pid("a"), "A").unwrap();
        sim.admit(pid("b"), "B").unwrap();
        for t in 0..900 {
            if t == 2 {
                sim.submit(&pid("a"), Command::Shoot { angle: 0.05, power: 90.0 }).unwrap();
            }
            sim.tick();
            if let Some(delta) = tracker.update(sim.state(), &variant) {
                let bytes = delta.to_bytes().unwrap();
                Delta::from_bytes(&bytes).unwrap().apply(&mut view).unwrap();
            }
        }

        assert_eq!(view.compute_hash(), tracker.baseline().compute_hash());
        assert_eq!(&view, tracker.baseline());
    }
}
