//! Scoring Rules
//!
//! Interprets sensor-zone entries, slices and shots. Zones never push
//! objects; everything here is bookkeeping on players and pieces.

use tracing::debug;

use crate::core::vec2::Vec2;
use crate::game::collision::{slice_targets, ZoneEntry};
use crate::game::entity::{ObjectClass, ObjectId, ObjectKind, ZoneRole};
use crate::game::events::{GameEventData, ScoreCause};
use crate::game::spawn;
use crate::game::state::{PlayerId, SessionState};
use crate::game::variant::GameVariant;

/// Credit points to a player and announce it.
pub fn award(state: &mut SessionState, player: &PlayerId, points: i32, cause: ScoreCause) {
    if points == 0 {
        return;
    }
    if let Some(p) = state.get_player_mut(player) {
        let total = p.add_score(points);
        state.push_event(GameEventData::Scored { player: player.clone(), points, total, cause });
    }
}

/// Interpret zone entries in order.
pub fn apply_zone_entries(state: &mut SessionState, variant: &GameVariant, entries: &[ZoneEntry]) {
    for entry in entries {
        let Some(role) = state.zones.iter().find(|z| z.id == entry.zone).map(|z| z.role.clone()) else {
            continue;
        };
        let Some(class) = state.objects.get(&entry.object).filter(|o| o.active).map(|o| o.class()) else {
            continue;
        };

        state.push_event(GameEventData::ZoneEntered { object: entry.object, zone: entry.zone, role: role.clone() });

        match (role, class) {
            (ZoneRole::Checkpoint { index }, ObjectClass::Vehicle) => {
                pass_checkpoint(state, variant, entry.object, index);
            }
            (ZoneRole::Pocket, ObjectClass::ScoringPiece) => {
                pocket_piece(state, variant, entry.object);
            }
            (ZoneRole::ScoringArea { points }, ObjectClass::Vehicle) => {
                if let Some(owner) = state.objects.get(&entry.object).and_then(|o| o.owner.clone()) {
                    award(state, &owner, points, ScoreCause::Zone);
                }
            }
            _ => {}
        }
    }
}

/// Checkpoints count only in order; re-entering 0 after the last completes a lap.
fn pass_checkpoint(state: &mut SessionState, variant: &GameVariant, vehicle_id: ObjectId, index: u32) {
    let count = variant.checkpoint_count();
    let Some(object) = state.objects.get_mut(&vehicle_id) else { return };
    let owner = object.owner.clone();
    let Some(vehicle) = object.vehicle_mut() else { return };

    let expected = match vehicle.last_checkpoint {
        None => 0,
        Some(last) => (last + 1) % count.max(1),
    };
    if index != expected {
        return;
    }

    let completes_lap = index == 0 && vehicle.last_checkpoint == Some(count.saturating_sub(1));
    vehicle.last_checkpoint = Some(index);
    if completes_lap {
        vehicle.lap_count += 1;
    }
    let lap = vehicle.lap_count;

    let Some(player) = owner else { return };
    state.push_event(GameEventData::CheckpointReached { player: player.clone(), checkpoint: index, lap });
    if completes_lap {
        award(state, &player, variant.rules.lap_points, ScoreCause::Lap);
    }
}

/// Numbered pieces score for the turn holder; the cue piece is a foul.
fn pocket_piece(state: &mut SessionState, variant: &GameVariant, piece_id: ObjectId) {
    let Some(object) = state.objects.get_mut(&piece_id) else { return };
    let (cue, spawn_point) = match &object.kind {
        ObjectKind::ScoringPiece(p) => (p.cue, p.spawn),
        _ => return,
    };

    if cue {
        object.reset_to(spawn_point);
        debug!(piece = piece_id, "Cue piece pocketed; respotted");
        return;
    }

    state.deactivate_object(piece_id);
    if let Some(holder) = state.turn.holder.clone() {
        state.turn.scored_this_move = true;
        award(state, &holder, variant.rules.pocket_points, ScoreCause::Pocket);
    }
}

/// Slice every marker the segment touches. Returns the markers hit.
pub fn apply_slice(state: &mut SessionState, variant: &GameVariant, sender: &PlayerId, start: Vec2, end: Vec2) -> Vec<ObjectId> {
    let hits = slice_targets(&state.objects, start, end);

    for &id in &hits {
        let Some(object) = state.objects.get(&id) else { continue };
        let (points, position) = match &object.kind {
            ObjectKind::Marker(m) => (m.points, object.position),
            _ => continue,
        };
        if !state.deactivate_object(id) {
            continue;
        }
        award(state, sender, points, ScoreCause::Slice);
        spawn::spawn_particle_burst(state, &variant.collision, position);
    }
    hits
}

/// Strike the cue piece. Returns `false` when there is nothing to strike.
pub fn apply_shot(state: &mut SessionState, variant: &GameVariant, cue: ObjectId, angle: f64, power: f64) -> bool {
    let Some(object) = state.objects.get_mut(&cue).filter(|o| o.active) else {
        return false;
    };
    object.velocity = Vec2::from_angle(angle).scale(power * variant.rules.shot_speed_per_power);

    state.turn.move_in_flight = true;
    state.turn.scored_this_move = false;
    true
}

/// All active pieces slower than the rest threshold.
pub fn pieces_at_rest(state: &SessionState, variant: &GameVariant) -> bool {
    let rest = variant.rules.rest_speed;
    state
        .objects
        .values()
        .filter(|o| o.active && o.class() == ObjectClass::ScoringPiece)
        .all(|o| o.speed() <= rest)
}

/// Finish the move in flight once everything has stopped.
///
/// Returns `Some(keep_turn)` when the move completed this tick.
pub fn settle_move(state: &mut SessionState, variant: &GameVariant) -> Option<bool> {
    if !state.turn.move_in_flight || !pieces_at_rest(state, variant) {
        return None;
    }
    for object in state.objects.values_mut() {
        if object.class() == ObjectClass::ScoringPiece {
            object.velocity = Vec2::ZERO;
        }
    }
    state.turn.move_in_flight = false;
    Some(state.turn.scored_this_move && variant.rules.keep_turn_on_score)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::collision::detect_zone_entries;
    use crate::game::entity::{DynamicObject, MarkerData, SpawnPoint, VehicleData};
    use crate::game::state::PlayerState;

    fn seat(state: &mut SessionState, name: &str) -> PlayerId {
        let id = PlayerId::new(name);
        let seq = state.next_join_seq;
        state.next_join_seq += 1;
        state.players.insert(id.clone(), PlayerState::new(id.clone(), name.to_string(), seq));
        id
    }

    fn score(state: &SessionState, id: &PlayerId) -> i32 {
        state.get_player(id).map(|p| p.score).unwrap_or_default()
    }

    #[test]
    fn test_lap_counts_after_all_checkpoints_in_order() {
        let variant = GameVariant::racing();
        let mut state = SessionState::new(1, variant.zones.clone());
        let p = seat(&mut state, "p");
        let id = state.allocate_object_id();
        state.insert_object(
            DynamicObject::new(id, Vec2::ZERO, 0.0, 1.5, ObjectKind::Vehicle(VehicleData::new(100.0, SpawnPoint::default())))
                .with_owner(Some(p.clone())),
        );

        let enter = |state: &mut SessionState, zone| {
            apply_zone_entries(state, &variant, &[ZoneEntry { object: id, zone }]);
        };

        // Out of order: ignored
        enter(&mut state, 2);
        assert_eq!(state.objects[&id].vehicle().unwrap().last_checkpoint, None);

        for zone in [0, 1, 2, 3] {
            enter(&mut state, zone);
        }
        assert_eq!(state.objects[&id].vehicle().unwrap().lap_count, 0);

        enter(&mut state, 0);
        assert_eq!(state.objects[&id].vehicle().unwrap().lap_count, 1);
        assert_eq!(score(&state, &p), variant.rules.lap_points);
    }

    #[test]
    fn test_pocket_scores_for_turn_holder() {
        let variant = GameVariant::billiards();
        let mut state = SessionState::new(1, variant.zones.clone());
        let p = seat(&mut state, "p");
        state.turn.holder = Some(p.clone());
        spawn::spawn_layout(&mut state, &variant);

        let ball = state.objects.values().find(|o| o.piece().is_some_and(|x| x.number == 3)).map(|o| o.id).unwrap();
        state.objects.get_mut(&ball).unwrap().position = Vec2::new(0.0, -9.5);

        let entries = detect_zone_entries(&mut state);
        apply_zone_entries(&mut state, &variant, &entries);

        assert!(!state.objects[&ball].active);
        assert_eq!(score(&state, &p), variant.rules.pocket_points);
        assert!(state.turn.scored_this_move);
    }

    #[test]
    fn test_cue_pocket_is_foul() {
        let variant = GameVariant::billiards();
        let mut state = SessionState::new(1, variant.zones.clone());
        let p = seat(&mut state, "p");
        state.turn.holder = Some(p.clone());
        spawn::spawn_layout(&mut state, &variant);

        let cue = crate::game::command::cue_piece(&state).unwrap();
        state.objects.get_mut(&cue).unwrap().position = Vec2::new(19.5, 9.5);

        let entries = detect_zone_entries(&mut state);
        apply_zone_entries(&mut state, &variant, &entries);

        let cue_obj = &state.objects[&cue];
        assert!(cue_obj.active);
        assert_eq!(cue_obj.position, Vec2::new(-10.0, 0.0));
        assert_eq!(score(&state, &p), 0);
    }

    #[test]
    fn test_slice_scores_and_bombs() {
        let variant = GameVariant::slicer();
        let mut state = SessionState::new(1, Vec::new());
        let p = seat(&mut state, "p");
        for (x, points) in [(2.0, 1), (6.0, -3)] {
            let id = state.allocate_object_id();
            state.insert_object(DynamicObject::new(
                id,
                Vec2::new(x, 0.5),
                0.0,
                1.0,
                ObjectKind::Marker(MarkerData { points, time_to_live: 100 }),
            ));
        }

        let hits = apply_slice(&mut state, &variant, &p, Vec2::ZERO, Vec2::new(10.0, 0.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(score(&state, &p), -2);

        // Already sliced markers are not scored again
        apply_slice(&mut state, &variant, &p, Vec2::ZERO, Vec2::new(10.0, 0.0));
        assert_eq!(score(&state, &p), -2);
    }

    #[test]
    fn test_shot_and_settle() {
        let variant = GameVariant::billiards();
        let mut state = SessionState::new(1, Vec::new());
        spawn::spawn_layout(&mut state, &variant);
        let cue = crate::game::command::cue_piece(&state).unwrap();

        assert!(apply_shot(&mut state, &variant, cue, 0.0, 50.0));
        assert!((state.objects[&cue].velocity.x - 50.0 * variant.rules.shot_speed_per_power).abs() < 1e-9);
        assert_eq!(settle_move(&mut state, &variant), None);

        state.objects.get_mut(&cue).unwrap().velocity = Vec2::new(0.01, 0.0);
        assert_eq!(settle_move(&mut state, &variant), Some(false));
        assert_eq!(state.objects[&cue].velocity, Vec2::ZERO);
        assert!(!state.turn.move_in_flight);
    }
}
