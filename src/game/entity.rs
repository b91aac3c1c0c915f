//! Entity Model
//!
//! Dynamic objects and static sensor zones owned by a session.
//!
//! Every simulated object shares one common header (`DynamicObject`) and
//! carries a discriminated payload (`ObjectKind`) for its variant. Match on
//! the payload; there is no per-variant trait.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::core::vec2::Vec2;
use crate::game::state::PlayerId;

/// Session-unique object identifier (monotonic counter, never reused).
pub type ObjectId = u32;

/// Sensor zone identifier (index into the variant's zone list).
pub type ZoneId = u32;

// =============================================================================
// OBJECT CLASS
// =============================================================================

/// Object variant tag, used to look up per-class physics constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ObjectClass {
    /// Player-steered vehicle
    Vehicle = 0,
    /// Fired projectile
    Projectile = 1,
    /// Ball, puck or other scoring piece
    ScoringPiece = 2,
    /// Cosmetic particle
    Particle = 3,
    /// Sliceable target
    Marker = 4,
}

impl ObjectClass {
    /// Whether objects of this class take part in proximity contacts.
    pub fn is_solid(self) -> bool {
        matches!(self, Self::Vehicle | Self::Projectile | Self::ScoringPiece)
    }
}

// =============================================================================
// VARIANT PAYLOADS
// =============================================================================

/// Spawn template: where an object (re)appears.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// Spawn position
    pub position: Vec2,
    /// Spawn orientation (radians)
    pub orientation: f64,
}

impl SpawnPoint {
    /// Create a spawn point.
    pub const fn new(position: Vec2, orientation: f64) -> Self {
        Self { position, orientation }
    }
}

/// Vehicle-specific state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleData {
    /// Throttle input, -1 (reverse) to 1 (full forward)
    pub throttle: f64,
    /// Steering input, -1 (right) to 1 (left)
    pub steering: f64,
    /// Remaining health
    pub health: f64,
    /// Health restored on respawn
    pub max_health: f64,
    /// Completed laps
    pub lap_count: u32,
    /// Index of the last checkpoint passed in order
    pub last_checkpoint: Option<u32>,
    /// Times this vehicle has been destroyed this round
    pub destroyed_count: u32,
    /// Tick before which `fire` is refused
    pub fire_ready_tick: u64,
    /// Respawn template
    pub spawn: SpawnPoint,
}

impl VehicleData {
    /// Create a fresh vehicle payload.
    pub fn new(health: f64, spawn: SpawnPoint) -> Self {
        Self {
            throttle: 0.0,
            steering: 0.0,
            health,
            max_health: health,
            lap_count: 0,
            last_checkpoint: None,
            destroyed_count: 0,
            fire_ready_tick: 0,
            spawn,
        }
    }

    /// Zero the control inputs.
    pub fn neutralize(&mut self) {
        self.throttle = 0.0;
        self.steering = 0.0;
    }
}

/// Projectile-specific state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectileData {
    /// Object that fired this projectile (never collides with it)
    pub source: ObjectId,
    /// Damage applied on hit
    pub damage: f64,
    /// Remaining lifetime in ticks
    pub time_to_live: u32,
}

/// Scoring piece state (billiard ball, puck).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceData {
    /// Piece number (0 for the cue piece)
    pub number: u8,
    /// True for the piece struck by `shoot`
    pub cue: bool,
    /// Respawn template (used when the cue piece is pocketed)
    pub spawn: SpawnPoint,
}

/// Cosmetic particle state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleData {
    /// Remaining lifetime in ticks
    pub time_to_live: u32,
}

/// Sliceable marker state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerData {
    /// Points awarded when sliced (negative for bombs)
    pub points: i32,
    /// Remaining lifetime in ticks
    pub time_to_live: u32,
}

/// Discriminated payload for each object variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Player-steered vehicle
    Vehicle(VehicleData),
    /// Fired projectile
    Projectile(ProjectileData),
    /// Scoring piece
    ScoringPiece(PieceData),
    /// Cosmetic particle
    Particle(ParticleData),
    /// Sliceable marker
    Marker(MarkerData),
}

impl ObjectKind {
    /// Class tag of this payload.
    pub fn class(&self) -> ObjectClass {
        match self {
            Self::Vehicle(_) => ObjectClass::Vehicle,
            Self::Projectile(_) => ObjectClass::Projectile,
            Self::ScoringPiece(_) => ObjectClass::ScoringPiece,
            Self::Particle(_) => ObjectClass::Particle,
            Self::Marker(_) => ObjectClass::Marker,
        }
    }

    /// Remaining lifetime, for the variants that expire.
    pub fn time_to_live(&self) -> Option<u32> {
        match self {
            Self::Projectile(p) => Some(p.time_to_live),
            Self::Particle(p) => Some(p.time_to_live),
            Self::Marker(m) => Some(m.time_to_live),
            Self::Vehicle(_) | Self::ScoringPiece(_) => None,
        }
    }

    fn time_to_live_mut(&mut self) -> Option<&mut u32> {
        match self {
            Self::Projectile(p) => Some(&mut p.time_to_live),
            Self::Particle(p) => Some(&mut p.time_to_live),
            Self::Marker(m) => Some(&mut m.time_to_live),
            Self::Vehicle(_) | Self::ScoringPiece(_) => None,
        }
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.class() as u8);
        match self {
            Self::Vehicle(v) => {
                hasher.update_f64(v.throttle);
                hasher.update_f64(v.steering);
                hasher.update_f64(v.health);
                hasher.update_u32(v.lap_count);
                hasher.update_option(v.last_checkpoint, |h, c| h.update_u32(c));
                hasher.update_u32(v.destroyed_count);
            }
            Self::Projectile(p) => {
                hasher.update_u32(p.source);
                hasher.update_u32(p.time_to_live);
            }
            Self::ScoringPiece(p) => {
                hasher.update_u8(p.number);
                hasher.update_bool(p.cue);
            }
            Self::Particle(p) => hasher.update_u32(p.time_to_live),
            Self::Marker(m) => {
                hasher.update_i32(m.points);
                hasher.update_u32(m.time_to_live);
            }
        }
    }
}

// =============================================================================
// DYNAMIC OBJECT
// =============================================================================

/// Any simulated object with position and velocity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    /// Session-unique id
    pub id: ObjectId,
    /// Centre position
    pub position: Vec2,
    /// Velocity (units per second)
    pub velocity: Vec2,
    /// Facing angle (radians)
    pub orientation: f64,
    /// Collision radius
    pub radius: f64,
    /// False once destroyed; inactive objects are purged at end of tick
    pub active: bool,
    /// Controlling or crediting player, if any
    pub owner: Option<PlayerId>,
    /// Variant payload
    pub kind: ObjectKind,
}

impl DynamicObject {
    /// Create an active object at rest.
    pub fn new(id: ObjectId, position: Vec2, orientation: f64, radius: f64, kind: ObjectKind) -> Self {
        Self {
            id,
            position,
            velocity: Vec2::ZERO,
            orientation,
            radius,
            active: true,
            owner: None,
            kind,
        }
    }

    /// Builder: set the initial velocity.
    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    /// Builder: set the owner.
    pub fn with_owner(mut self, owner: Option<PlayerId>) -> Self {
        self.owner = owner;
        self
    }

    /// Class tag.
    #[inline]
    pub fn class(&self) -> ObjectClass {
        self.kind.class()
    }

    /// Current speed.
    #[inline]
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }

    /// Unit vector along the facing direction.
    #[inline]
    pub fn heading(&self) -> Vec2 {
        Vec2::from_angle(self.orientation)
    }

    /// Vehicle payload, if this is a vehicle.
    pub fn vehicle(&self) -> Option<&VehicleData> {
        match &self.kind {
            ObjectKind::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable vehicle payload, if this is a vehicle.
    pub fn vehicle_mut(&mut self) -> Option<&mut VehicleData> {
        match &mut self.kind {
            ObjectKind::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    /// Scoring piece payload, if this is a piece.
    pub fn piece(&self) -> Option<&PieceData> {
        match &self.kind {
            ObjectKind::ScoringPiece(p) => Some(p),
            _ => None,
        }
    }

    /// Mark the object inactive.
    ///
    /// Returns `true` only on the active-to-inactive transition, so callers
    /// emit their event at most once.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        was_active
    }

    /// Count down the lifetime of expiring variants.
    ///
    /// Returns `true` when the lifetime reaches zero on this call.
    pub fn tick_lifetime(&mut self) -> bool {
        match self.kind.time_to_live_mut() {
            Some(ttl) if *ttl > 0 => {
                *ttl -= 1;
                *ttl == 0
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Move back to a spawn template, at rest.
    pub fn reset_to(&mut self, spawn: SpawnPoint) {
        self.position = spawn.position;
        self.orientation = spawn.orientation;
        self.velocity = Vec2::ZERO;
    }

    /// Add this object to a state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id);
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_f64(self.orientation);
        hasher.update_f64(self.radius);
        hasher.update_bool(self.active);
        hasher.update_option(self.owner.as_ref(), |h, o| h.update_str(o.as_str()));
        self.kind.hash_into(hasher);
    }
}

// =============================================================================
// SENSOR ZONES
// =============================================================================

/// Zone geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ZoneShape {
    /// Circle
    Circle {
        /// Centre
        center: Vec2,
        /// Radius
        radius: f64,
    },
    /// Axis-aligned rectangle
    Rect {
        /// Centre
        center: Vec2,
        /// Half width and half height
        half_extents: Vec2,
    },
}

impl ZoneShape {
    /// True when a circle at `position` with `radius` touches the zone.
    ///
    /// Uses the same strict test as object contacts.
    pub fn overlaps_circle(&self, position: Vec2, radius: f64) -> bool {
        match *self {
            Self::Circle { center, radius: zone_radius } => {
                position.distance_squared(center) < (radius + zone_radius).powi(2)
            }
            Self::Rect { center, half_extents } => {
                let local = position - center;
                let closest = Vec2::new(
                    local.x.clamp(-half_extents.x, half_extents.x),
                    local.y.clamp(-half_extents.y, half_extents.y),
                );
                local.distance_squared(closest) < radius * radius
            }
        }
    }

    /// Whether every value is finite and non-negative where required.
    pub fn is_well_formed(&self) -> bool {
        match *self {
            Self::Circle { center, radius } => center.is_finite() && radius.is_finite() && radius > 0.0,
            Self::Rect { center, half_extents } => {
                center.is_finite() && half_extents.is_finite() && half_extents.x > 0.0 && half_extents.y > 0.0
            }
        }
    }
}

/// What entering a zone means.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ZoneRole {
    /// Ordered race checkpoint; index 0 is the start/finish line
    Checkpoint {
        /// Position in the lap order
        index: u32,
    },
    /// Pocket that swallows scoring pieces
    Pocket,
    /// Area that awards points to the owner of the entering vehicle
    ScoringArea {
        /// Points per entry
        points: i32,
    },
}

/// Static, session-lifetime trigger geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorZone {
    /// Zone id
    pub id: ZoneId,
    /// Geometry
    pub shape: ZoneShape,
    /// Meaning of an entry
    pub role: ZoneRole,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(ttl: u32) -> DynamicObject {
        DynamicObject::new(7, Vec2::ZERO, 0.0, 0.1, ObjectKind::Particle(ParticleData { time_to_live: ttl }))
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let mut obj = particle(3);
        assert!(obj.deactivate());
        assert!(!obj.deactivate());
        assert!(!obj.active);
    }

    #[test]
    fn test_tick_lifetime_expires_once() {
        let mut obj = particle(2);
        assert!(!obj.tick_lifetime());
        assert!(obj.tick_lifetime());
        assert_eq!(obj.kind.time_to_live(), Some(0));
    }

    #[test]
    fn test_vehicle_has_no_lifetime() {
        let spawn = SpawnPoint::new(Vec2::new(1.0, 2.0), 0.5);
        let mut obj = DynamicObject::new(1, spawn.position, spawn.orientation, 1.0, ObjectKind::Vehicle(VehicleData::new(100.0, spawn)));
        assert!(!obj.tick_lifetime());
        assert_eq!(obj.class(), ObjectClass::Vehicle);
        assert!(obj.vehicle().is_some());
    }

    #[test]
    fn test_reset_to_spawn() {
        let mut obj = particle(5).with_velocity(Vec2::new(3.0, 0.0));
        obj.reset_to(SpawnPoint::new(Vec2::new(4.0, 4.0), 1.0));
        assert_eq!(obj.position, Vec2::new(4.0, 4.0));
        assert_eq!(obj.velocity, Vec2::ZERO);
        assert_eq!(obj.orientation, 1.0);
    }

    #[test]
    fn test_circle_zone_overlap_is_strict() {
        let zone = ZoneShape::Circle { center: Vec2::ZERO, radius: 1.0 };
        assert!(zone.overlaps_circle(Vec2::new(1.5, 0.0), 0.6));
        assert!(!zone.overlaps_circle(Vec2::new(2.0, 0.0), 1.0));
    }

    #[test]
    fn test_rect_zone_overlap() {
        let zone = ZoneShape::Rect { center: Vec2::new(10.0, 0.0), half_extents: Vec2::new(1.0, 5.0) };
        assert!(zone.overlaps_circle(Vec2::new(10.0, 4.0), 0.5));
        assert!(zone.overlaps_circle(Vec2::new(8.5, 0.0), 0.6));
        assert!(!zone.overlaps_circle(Vec2::new(8.0, 0.0), 0.5));
    }

    #[test]
    fn test_solid_classes() {
        assert!(ObjectClass::Vehicle.is_solid());
        assert!(ObjectClass::ScoringPiece.is_solid());
        assert!(!ObjectClass::Particle.is_solid());
        assert!(!ObjectClass::Marker.is_solid());
    }
}
