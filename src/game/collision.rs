//! Collision Detection and Resolution
//!
//! Circle-circle proximity contacts, swept segment tests for slice actions,
//! and sensor-zone entry. Resolution mutates objects and players and raises
//! events; it never changes the session phase.
//!
//! Variants that delegate physics to an external engine implement
//! [`CollisionProvider`]; its contacts go through the same resolution path.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::entity::{DynamicObject, ObjectClass, ObjectId, ObjectKind, ZoneId};
use crate::game::events::{GameEventData, ScoreCause};
use crate::game::spawn;
use crate::game::state::{PlayerId, SessionState};
use crate::game::variant::GameVariant;

// =============================================================================
// CONTACTS
// =============================================================================

/// Two touching objects. `a` is always the lower id.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// First object
    pub a: ObjectId,
    /// Second object
    pub b: ObjectId,
    /// Point on A's surface facing B
    pub point: Vec2,
}

impl Contact {
    /// Create a contact with ids in canonical order.
    pub fn new(a: ObjectId, b: ObjectId, point: Vec2) -> Self {
        if a <= b {
            Self { a, b, point }
        } else {
            Self { a: b, b: a, point }
        }
    }
}

/// Momentum change to apply to one object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Impulse {
    /// Target object
    pub object: ObjectId,
    /// Impulse vector (mass times velocity change)
    pub vector: Vec2,
}

/// Check if two circles overlap (strict: touching edges do not count).
#[inline]
pub fn circles_overlap(pos_a: Vec2, radius_a: f64, pos_b: Vec2, radius_b: f64) -> bool {
    let combined = radius_a + radius_b;
    pos_a.distance_squared(pos_b) < combined * combined
}

/// Impact magnitude of a contact: speed difference times `scale`.
#[inline]
pub fn impact_magnitude(a: &DynamicObject, b: &DynamicObject, scale: f64) -> f64 {
    (a.speed() - b.speed()).abs() * scale
}

/// Unit axis from `from` to `to`; +X when the centres coincide.
#[inline]
fn separation_axis(from: Vec2, to: Vec2) -> Vec2 {
    let axis = (to - from).normalize();
    if axis == Vec2::ZERO { Vec2::RIGHT } else { axis }
}

/// Pairs that never interact: self, and a projectile with its source.
fn excluded_pair(a: &DynamicObject, b: &DynamicObject) -> bool {
    if a.id == b.id {
        return true;
    }
    let fired_by = |p: &DynamicObject, other: &DynamicObject| match &p.kind {
        ObjectKind::Projectile(data) => data.source == other.id,
        _ => false,
    };
    if fired_by(a, b) || fired_by(b, a) {
        return true;
    }
    a.class() == ObjectClass::Projectile && b.class() == ObjectClass::Projectile
}

/// Whether two objects may produce a contact at all.
pub fn may_interact(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.active && b.active && a.class().is_solid() && b.class().is_solid() && !excluded_pair(a, b)
}

/// Find all proximity contacts among active solid objects.
///
/// Pairs are visited in ascending id order, so the result is deterministic.
pub fn detect_contacts(objects: &BTreeMap<ObjectId, DynamicObject>) -> Vec<Contact> {
    let solid: Vec<&DynamicObject> = objects
        .values()
        .filter(|o| o.active && o.class().is_solid())
        .collect();

    let mut contacts = Vec::new();
    for i in 0..solid.len() {
        for j in (i + 1)..solid.len() {
            let (a, b) = (solid[i], solid[j]);
            if excluded_pair(a, b) {
                continue;
            }
            if circles_overlap(a.position, a.radius, b.position, b.radius) {
                let axis = separation_axis(a.position, b.position);
                contacts.push(Contact::new(a.id, b.id, a.position + axis.scale(a.radius)));
            }
        }
    }
    contacts
}

/// Drop contacts that reference unknown, inactive or excluded objects.
///
/// Applied to externally produced contacts so they obey the same rules as
/// built-in detection.
pub fn sanitize_contacts(objects: &BTreeMap<ObjectId, DynamicObject>, contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen = BTreeSet::new();
    contacts
        .into_iter()
        .map(|c| Contact::new(c.a, c.b, c.point))
        .filter(|c| match (objects.get(&c.a), objects.get(&c.b)) {
            (Some(a), Some(b)) => may_interact(a, b),
            _ => false,
        })
        .filter(|c| seen.insert((c.a, c.b)))
        .collect()
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolve contacts in order, returning the impulses to apply.
///
/// An object deactivated by an earlier contact is skipped for the rest of
/// the tick.
pub fn resolve_contacts(state: &mut SessionState, variant: &GameVariant, contacts: &[Contact]) -> Vec<Impulse> {
    let mut impulses = Vec::new();

    for contact in contacts {
        let (Some(a), Some(b)) = (state.objects.get(&contact.a), state.objects.get(&contact.b)) else {
            continue;
        };
        if !a.active || !b.active {
            continue;
        }

        match (a.class(), b.class()) {
            (ObjectClass::Vehicle, ObjectClass::Vehicle) => {
                resolve_vehicle_pair(state, variant, contact, &mut impulses);
            }
            (ObjectClass::Projectile, _) => resolve_projectile_hit(state, variant, contact.a, contact.b, contact.point),
            (_, ObjectClass::Projectile) => resolve_projectile_hit(state, variant, contact.b, contact.a, contact.point),
            (ObjectClass::ScoringPiece, _) | (_, ObjectClass::ScoringPiece) => {
                resolve_piece_bounce(state, variant, contact, &mut impulses);
            }
            _ => {}
        }
    }

    impulses
}

/// Vehicle against vehicle: bump below the threshold, damage at or above.
fn resolve_vehicle_pair(state: &mut SessionState, variant: &GameVariant, contact: &Contact, impulses: &mut Vec<Impulse>) {
    let tuning = &variant.collision;
    let mass = variant.physics.vehicle.mass;

    let (magnitude, axis, owner_a, owner_b) = {
        let a = &state.objects[&contact.a];
        let b = &state.objects[&contact.b];
        (
            impact_magnitude(a, b, tuning.impact_scale),
            separation_axis(a.position, b.position),
            a.owner.clone(),
            b.owner.clone(),
        )
    };
    let severe = magnitude >= tuning.damage_threshold;

    state.push_event(GameEventData::Collided {
        a: contact.a,
        b: contact.b,
        point: contact.point,
        magnitude,
        severe,
    });

    let mut destroyed = (false, false);
    if severe {
        let damage = magnitude * tuning.damage_per_impact;
        destroyed.0 = apply_damage(state, variant, contact.a, damage, contact.point, owner_b);
        destroyed.1 = apply_damage(state, variant, contact.b, damage, contact.point, owner_a);
    }

    // Symmetric separation; a respawned vehicle starts at rest.
    let push = axis.scale(tuning.bump_strength * mass);
    if !destroyed.0 {
        impulses.push(Impulse { object: contact.a, vector: -push });
    }
    if !destroyed.1 {
        impulses.push(Impulse { object: contact.b, vector: push });
    }
}

/// Projectile against a vehicle or piece: the projectile is consumed.
fn resolve_projectile_hit(
    state: &mut SessionState,
    variant: &GameVariant,
    projectile: ObjectId,
    target: ObjectId,
    point: Vec2,
) {
    let (damage, shooter) = match state.objects.get(&projectile) {
        Some(DynamicObject { kind: ObjectKind::Projectile(p), owner, .. }) => (p.damage, owner.clone()),
        _ => return,
    };
    if !state.deactivate_object(projectile) {
        return;
    }

    state.push_event(GameEventData::Collided {
        a: projectile.min(target),
        b: projectile.max(target),
        point,
        magnitude: damage,
        severe: true,
    });
    apply_damage(state, variant, target, damage, point, shooter);
}

/// Piece contacts: restitution impulse along the contact normal.
fn resolve_piece_bounce(state: &mut SessionState, variant: &GameVariant, contact: &Contact, impulses: &mut Vec<Impulse>) {
    let a = &state.objects[&contact.a];
    let b = &state.objects[&contact.b];
    let mass_a = variant.physics.profile(a.class()).mass;
    let mass_b = variant.physics.profile(b.class()).mass;

    let normal = separation_axis(a.position, b.position);
    let closing = (b.velocity - a.velocity).dot(normal);
    if closing >= 0.0 {
        // Already separating.
        return;
    }

    let magnitude = impact_magnitude(a, b, variant.collision.impact_scale);
    let j = -(1.0 + variant.collision.piece_restitution) * closing / (1.0 / mass_a + 1.0 / mass_b);

    impulses.push(Impulse { object: contact.a, vector: normal.scale(-j) });
    impulses.push(Impulse { object: contact.b, vector: normal.scale(j) });

    state.push_event(GameEventData::Collided {
        a: contact.a,
        b: contact.b,
        point: contact.point,
        magnitude,
        severe: false,
    });
}

/// Subtract health; on crossing zero respawn or disqualify and burst.
///
/// Returns `true` when the target was destroyed. Non-vehicles ignore damage.
pub fn apply_damage(
    state: &mut SessionState,
    variant: &GameVariant,
    target: ObjectId,
    damage: f64,
    point: Vec2,
    credited: Option<PlayerId>,
) -> bool {
    let Some(object) = state.objects.get_mut(&target) else {
        return false;
    };
    if !object.active {
        return false;
    }
    let owner = object.owner.clone();
    let Some(vehicle) = object.vehicle_mut() else {
        return false;
    };

    vehicle.health -= damage;
    if vehicle.health > 0.0 {
        return false;
    }

    vehicle.destroyed_count += 1;
    vehicle.health = vehicle.max_health;
    let spawn = vehicle.spawn;
    let out_of_lives = variant.rules.lives.is_some_and(|lives| vehicle.destroyed_count >= lives);
    object.reset_to(spawn);

    if out_of_lives {
        state.deactivate_object(target);
        if let Some(player) = owner.as_ref().and_then(|id| state.players.get_mut(id)) {
            player.disqualified = true;
            let id = player.id.clone();
            state.push_event(GameEventData::Disqualified { player: id });
        }
    }

    state.push_event(GameEventData::Destroyed { object: target, owner: owner.clone(), respawned: !out_of_lives });
    spawn::spawn_particle_burst(state, &variant.collision, point);

    let points = variant.rules.takedown_points;
    if let Some(scorer) = credited.filter(|c| Some(c) != owner.as_ref()) {
        if points != 0 {
            if let Some(player) = state.players.get_mut(&scorer) {
                let total = player.add_score(points);
                state.push_event(GameEventData::Scored { player: scorer, points, total, cause: ScoreCause::Takedown });
            }
        }
    }

    true
}

/// Apply impulses directly to built-in objects.
pub fn apply_impulses(state: &mut SessionState, variant: &GameVariant, impulses: &[Impulse]) {
    for impulse in impulses {
        if let Some(object) = state.objects.get_mut(&impulse.object) {
            if object.active {
                let mass = variant.physics.profile(object.class()).mass;
                object.velocity += impulse.vector.scale(1.0 / mass);
            }
        }
    }
}

// =============================================================================
// SWEPT SEGMENTS
// =============================================================================

/// Closest point to `point` on the segment `start..end`.
pub fn closest_point_on_segment(start: Vec2, end: Vec2, point: Vec2) -> Vec2 {
    let segment = end - start;
    let len_sq = segment.length_squared();
    if len_sq == 0.0 {
        return start;
    }
    let t = ((point - start).dot(segment) / len_sq).clamp(0.0, 1.0);
    start + segment.scale(t)
}

/// Minimum distance from a segment to a point.
#[inline]
pub fn segment_point_distance(start: Vec2, end: Vec2, point: Vec2) -> f64 {
    closest_point_on_segment(start, end, point).distance(point)
}

/// A swept segment hits a circle when the distance is at most its radius.
#[inline]
pub fn segment_hits_circle(start: Vec2, end: Vec2, center: Vec2, radius: f64) -> bool {
    segment_point_distance(start, end, center) <= radius
}

/// Active markers touched by a slice, in id order.
pub fn slice_targets(objects: &BTreeMap<ObjectId, DynamicObject>, start: Vec2, end: Vec2) -> Vec<ObjectId> {
    objects
        .values()
        .filter(|o| o.active && o.class() == ObjectClass::Marker)
        .filter(|o| segment_hits_circle(start, end, o.position, o.radius))
        .map(|o| o.id)
        .collect()
}

// =============================================================================
// SENSOR ZONES
// =============================================================================

/// An object crossed into a zone this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneEntry {
    /// Object
    pub object: ObjectId,
    /// Zone
    pub zone: ZoneId,
}

/// Detect outside-to-inside transitions and refresh the overlap set.
///
/// Vehicles and scoring pieces trigger zones; nothing else does.
pub fn detect_zone_entries(state: &mut SessionState) -> Vec<ZoneEntry> {
    let mut inside = BTreeSet::new();
    for object in state.objects.values() {
        if !object.active || !matches!(object.class(), ObjectClass::Vehicle | ObjectClass::ScoringPiece) {
            continue;
        }
        for zone in &state.zones {
            if zone.shape.overlaps_circle(object.position, object.radius) {
                inside.insert((object.id, zone.id));
            }
        }
    }

    let entries = inside
        .difference(&state.zone_contacts)
        .map(|&(object, zone)| ZoneEntry { object, zone })
        .collect();
    state.zone_contacts = inside;
    entries
}

// =============================================================================
// EXTERNAL PROVIDER
// =============================================================================

/// Physics backend for variants that delegate to an external engine.
///
/// The engine treats it as a black box: it advances the world, reports
/// contacts in the same shape as [`detect_contacts`], and accepts the
/// impulses produced by resolution.
pub trait CollisionProvider: Send {
    /// Advance by `dt`. Reads control inputs from `objects` and writes the
    /// resulting poses and velocities back.
    fn step(&mut self, objects: &mut BTreeMap<ObjectId, DynamicObject>, dt: f64);

    /// Contacts produced by the last step.
    fn query_contacts(&self) -> Vec<Contact>;

    /// Queue an impulse for the next step.
    fn apply_impulse(&mut self, object: ObjectId, impulse: Vec2);
}

// =============================================================================
// TESTS
// =============================================================================
