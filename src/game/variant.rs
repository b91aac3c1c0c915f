//! Game Variant Descriptor
//!
//! One session engine runs every game; a `GameVariant` tells it which
//! objects exist, how they move, what contacts do and how a round is won.
//! Descriptors are plain data: they load from JSON, and missing fields fall
//! back to the racing preset.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::entity::{ObjectClass, SensorZone, SpawnPoint, ZoneRole, ZoneShape};

/// Highest accepted tick rate (Hz).
pub const MAX_TICK_RATE: u32 = 1000;

// =============================================================================
// ERRORS
// =============================================================================

/// A descriptor that cannot drive a session.
#[derive(Debug, Error)]
pub enum VariantError {
    /// Occupancy bounds are empty or inverted
    #[error("occupancy range {min}..={max} is invalid")]
    OccupancyRange {
        /// Configured minimum
        min: usize,
        /// Configured maximum
        max: usize,
    },

    /// Tick rate outside 1..=MAX_TICK_RATE
    #[error("tick rate {0} Hz is outside 1..={max} Hz", max = MAX_TICK_RATE)]
    TickRate(u32),

    /// A numeric field is NaN, infinite or out of range
    #[error("field '{field}' is out of range")]
    OutOfRange {
        /// Offending field path
        field: String,
    },

    /// Vehicle control without spawn points
    #[error("vehicle control requires at least max_occupants spawn points ({needed})")]
    MissingSpawns {
        /// Required spawn points
        needed: usize,
    },

    /// Cue control without exactly one cue piece
    #[error("cue control requires exactly one cue piece, found {0}")]
    CuePieces(usize),

    /// Checkpoint indices are not 0..n
    #[error("checkpoint indices must be contiguous from 0")]
    CheckpointOrder,

    /// Win condition needs something the descriptor lacks
    #[error("win condition {0} is not supported by this control scheme")]
    UnsupportedWin(&'static str),

    /// JSON did not parse
    #[error("failed to parse variant: {0}")]
    Parse(#[from] serde_json::Error),
}

// =============================================================================
// PHYSICS CONSTANTS
// =============================================================================

/// Arena rectangle centred on the origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArenaBounds {
    /// Half width
    pub half_width: f64,
    /// Half height
    pub half_height: f64,
}

/// Per-class motion constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsProfile {
    /// Mass used to turn force into acceleration
    pub mass: f64,
    /// Force at full throttle
    pub engine_force: f64,
    /// Turn rate at full steering (radians per second)
    pub turn_rate: f64,
    /// Per-tick velocity multiplier
    pub friction: f64,
    /// Drag base, compounded as `drag^(dt * tick_rate)`
    pub drag: f64,
    /// Fraction of the heading misalignment removed per tick (0..=1)
    pub traction: f64,
    /// Hard speed limit
    pub max_speed: f64,
}

impl Default for KinematicsProfile {
    fn default() -> Self {
        Self {
            mass: 1.0,
            engine_force: 0.0,
            turn_rate: 0.0,
            friction: 1.0,
            drag: 1.0,
            traction: 0.0,
            max_speed: 1.0e6,
        }
    }
}

impl KinematicsProfile {
    fn validate(&self, class: &str) -> Result<(), VariantError> {
        let bad = |name: &str| VariantError::OutOfRange { field: format!("physics.{class}.{name}") };

        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(bad("mass"));
        }
        if !(self.friction.is_finite() && self.friction > 0.0 && self.friction <= 1.0) {
            return Err(bad("friction"));
        }
        if !(self.drag.is_finite() && self.drag > 0.0 && self.drag <= 1.0) {
            return Err(bad("drag"));
        }
        if !(0.0..=1.0).contains(&self.traction) {
            return Err(bad("traction"));
        }
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(bad("max_speed"));
        }
        if !(self.engine_force.is_finite() && self.turn_rate.is_finite()) {
            return Err(bad("engine_force"));
        }
        Ok(())
    }
}

/// Kinematics profile for each object class.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsTable {
    /// Vehicles
    pub vehicle: KinematicsProfile,
    /// Projectiles
    pub projectile: KinematicsProfile,
    /// Scoring pieces
    pub scoring_piece: KinematicsProfile,
    /// Particles
    pub particle: KinematicsProfile,
    /// Markers
    pub marker: KinematicsProfile,
}

impl PhysicsTable {
    /// Profile for a class.
    pub fn profile(&self, class: ObjectClass) -> &KinematicsProfile {
        match class {
            ObjectClass::Vehicle => &self.vehicle,
            ObjectClass::Projectile => &self.projectile,
            ObjectClass::ScoringPiece => &self.scoring_piece,
            ObjectClass::Particle => &self.particle,
            ObjectClass::Marker => &self.marker,
        }
    }
}

/// Contact response constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionTuning {
    /// Multiplier from speed difference to impact magnitude
    pub impact_scale: f64,
    /// Impact magnitude at which a contact becomes damaging
    pub damage_threshold: f64,
    /// Health lost per unit of impact magnitude
    pub damage_per_impact: f64,
    /// Speed change applied to each side of a bump
    pub bump_strength: f64,
    /// Restitution for piece-on-piece contacts (0..=1)
    pub piece_restitution: f64,
    /// Particles emitted when an object is destroyed
    pub burst_count: u32,
    /// Particle launch speed
    pub burst_speed: f64,
    /// Particle lifetime in ticks
    pub burst_ttl_ticks: u32,
    /// Particle radius
    pub particle_radius: f64,
}

impl Default for CollisionTuning {
    fn default() -> Self {
        Self {
            impact_scale: 1.0,
            damage_threshold: 12.0,
            damage_per_impact: 2.0,
            bump_strength: 4.0,
            piece_restitution: 0.95,
            burst_count: 12,
            burst_speed: 8.0,
            burst_ttl_ticks: 30,
            particle_radius: 0.2,
        }
    }
}

// =============================================================================
// TEMPLATES
// =============================================================================

/// How occupants act on the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlScheme {
    /// Each occupant drives their own vehicle
    Vehicle,
    /// The turn holder strikes a shared cue piece
    Cue,
    /// Occupants have no entity and act with swept slices
    Blade,
}

/// Vehicle spawn settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleTemplate {
    /// Collision radius
    pub radius: f64,
    /// Starting health
    pub health: f64,
    /// Spawn points, assigned in join order
    pub spawns: Vec<SpawnPoint>,
}

impl Default for VehicleTemplate {
    fn default() -> Self {
        Self { radius: 1.5, health: 100.0, spawns: Vec::new() }
    }
}

/// Projectile settings; `fire` is refused when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectileTemplate {
    /// Collision radius
    pub radius: f64,
    /// Launch speed along the vehicle heading
    pub speed: f64,
    /// Damage on hit
    pub damage: f64,
    /// Lifetime in ticks
    pub ttl_ticks: u32,
    /// Ticks between shots
    pub cooldown_ticks: u32,
}

/// A scoring piece in the initial layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceTemplate {
    /// Piece number
    pub number: u8,
    /// Struck by `shoot`
    #[serde(default)]
    pub cue: bool,
    /// Rack position
    pub position: Vec2,
    /// Collision radius
    pub radius: f64,
}

/// Timed marker spawner for slicing variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpawner {
    /// Ticks between spawns
    pub interval_ticks: u32,
    /// Marker lifetime in ticks
    pub ttl_ticks: u32,
    /// Marker radius
    pub radius: f64,
    /// Points for a regular marker
    pub points: i32,
    /// Probability a spawn is a bomb
    pub bomb_chance: f64,
    /// Points for slicing a bomb
    pub bomb_points: i32,
    /// Launch speed
    pub launch_speed: f64,
}

// =============================================================================
// RULES
// =============================================================================

/// Variant-specific terminal condition checked every playing tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WinCondition {
    /// Only the clock ends the round
    TimeOnly,
    /// First score to reach the threshold ends the round
    ScoreThreshold {
        /// Target score
        score: i32,
    },
    /// First vehicle to complete the laps ends the round
    LapsCompleted {
        /// Laps required
        laps: u32,
    },
    /// Round ends when at most one contender remains
    LastStanding,
    /// Round ends when no numbered pieces remain
    PiecesCleared,
}

impl WinCondition {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeOnly => "time_only",
            Self::ScoreThreshold { .. } => "score_threshold",
            Self::LapsCompleted { .. } => "laps_completed",
            Self::LastStanding => "last_standing",
            Self::PiecesCleared => "pieces_cleared",
        }
    }
}

/// How an exact score tie at the top is settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// A tie produces no winner
    #[default]
    NoWinner,
    /// The tied player who joined first wins
    EarliestJoined,
    /// The tied player with the lexicographically smallest identity wins
    LowestIdentity,
}

/// Round, turn and membership rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Occupants needed to start and to keep playing
    pub min_occupants: usize,
    /// Join limit
    pub max_occupants: usize,
    /// Round length in ticks; `None` for untimed rounds
    pub round_ticks: Option<u32>,
    /// Terminal condition
    pub win: WinCondition,
    /// Tie handling
    pub tiebreak: TieBreak,
    /// Start also requires every occupant to be ready
    pub require_ready: bool,
    /// Commands are gated by the active turn holder
    pub turn_based: bool,
    /// Ticks before an idle turn passes on
    pub turn_timeout_ticks: Option<u32>,
    /// Scoring during a shot keeps the turn
    pub keep_turn_on_score: bool,
    /// Speed under which pieces count as at rest
    pub rest_speed: f64,
    /// Upper bound for shot power (lower bound is 0)
    pub max_shot_power: f64,
    /// Cue speed per unit of shot power
    pub shot_speed_per_power: f64,
    /// Longest accepted slice segment
    pub max_slice_length: f64,
    /// Points for pocketing a numbered piece
    pub pocket_points: i32,
    /// Points for completing a lap
    pub lap_points: i32,
    /// Points for destroying another vehicle
    pub takedown_points: i32,
    /// Destructions allowed per round before disqualification
    pub lives: Option<u32>,
    /// Ticks a disconnected occupant keeps their seat
    pub reconnect_grace_ticks: u32,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            min_occupants: 2,
            max_occupants: 4,
            round_ticks: Some(180 * crate::TICK_RATE),
            win: WinCondition::LapsCompleted { laps: 3 },
            tiebreak: TieBreak::NoWinner,
            require_ready: false,
            turn_based: false,
            turn_timeout_ticks: None,
            keep_turn_on_score: false,
            rest_speed: 0.05,
            max_shot_power: 100.0,
            shot_speed_per_power: 0.4,
            max_slice_length: 50.0,
            pocket_points: 1,
            lap_points: 1,
            takedown_points: 1,
            lives: None,
            reconnect_grace_ticks: 10 * crate::TICK_RATE,
        }
    }
}

// =============================================================================
// GAME VARIANT
// =============================================================================

/// Complete, data-driven description of one game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameVariant {
    /// Variant name (also mixed into the session seed)
    pub name: String,
    /// Simulation rate in Hz
    pub tick_rate: u32,
    /// Arena rectangle
    pub arena: ArenaBounds,
    /// Control scheme
    pub control: ControlScheme,
    /// Per-class motion constants
    pub physics: PhysicsTable,
    /// Contact response constants
    pub collision: CollisionTuning,
    /// Vehicle spawn settings
    pub vehicle: VehicleTemplate,
    /// Projectile settings
    pub projectile: Option<ProjectileTemplate>,
    /// Initial piece layout
    pub layout: Vec<PieceTemplate>,
    /// Static sensor zones
    pub zones: Vec<SensorZone>,
    /// Timed marker spawner
    pub markers: Option<MarkerSpawner>,
    /// Round rules
    pub rules: RuleSet,
}

impl Default for GameVariant {
    fn default() -> Self {
        Self::racing()
    }
}

impl GameVariant {
    /// Fixed tick interval in seconds.
    #[inline]
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate as f64
    }

    /// Ticks in one second of simulated time.
    #[inline]
    pub fn ticks_per_second(&self) -> u32 {
        self.tick_rate
    }

    /// Parse and validate a JSON descriptor.
    pub fn from_json(json: &str) -> Result<Self, VariantError> {
        let variant: Self = serde_json::from_str(json)?;
        variant.validate()?;
        Ok(variant)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, VariantError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of checkpoints in the lap order.
    pub fn checkpoint_count(&self) -> u32 {
        self.zones
            .iter()
            .filter(|z| matches!(z.role, ZoneRole::Checkpoint { .. }))
            .count() as u32
    }

    /// Check that the descriptor can drive a session.
    pub fn validate(&self) -> Result<(), VariantError> {
        let rules = &self.rules;
        if rules.min_occupants == 0 || rules.max_occupants < rules.min_occupants {
            return Err(VariantError::OccupancyRange { min: rules.min_occupants, max: rules.max_occupants });
        }
        if !(1..=MAX_TICK_RATE).contains(&self.tick_rate) {
            return Err(VariantError::TickRate(self.tick_rate));
        }

        let positive = |v: f64| v.is_finite() && v > 0.0;
        let out_of_range = |field: &str| VariantError::OutOfRange { field: field.to_string() };

        if !positive(self.arena.half_width) || !positive(self.arena.half_height) {
            return Err(out_of_range("arena"));
        }

        self.physics.vehicle.validate("vehicle")?;
        self.physics.projectile.validate("projectile")?;
        self.physics.scoring_piece.validate("scoring_piece")?;
        self.physics.particle.validate("particle")?;
        self.physics.marker.validate("marker")?;

        let tuning = &self.collision;
        let tuning_fields = [
            ("collision.impact_scale", tuning.impact_scale),
            ("collision.damage_threshold", tuning.damage_threshold),
            ("collision.damage_per_impact", tuning.damage_per_impact),
            ("collision.bump_strength", tuning.bump_strength),
            ("collision.burst_speed", tuning.burst_speed),
            ("collision.particle_radius", tuning.particle_radius),
        ];
        for (field, value) in tuning_fields {
            if !(value.is_finite() && value >= 0.0) {
                return Err(out_of_range(field));
            }
        }
        if !(0.0..=1.0).contains(&tuning.piece_restitution) {
            return Err(out_of_range("collision.piece_restitution"));
        }

        if !positive(rules.max_shot_power) || !(rules.shot_speed_per_power.is_finite() && rules.shot_speed_per_power >= 0.0) {
            return Err(out_of_range("rules.max_shot_power"));
        }
        if !positive(rules.max_slice_length) {
            return Err(out_of_range("rules.max_slice_length"));
        }
        if !(rules.rest_speed.is_finite() && rules.rest_speed >= 0.0) {
            return Err(out_of_range("rules.rest_speed"));
        }

        for zone in &self.zones {
            if !zone.shape.is_well_formed() {
                return Err(out_of_range("zones.shape"));
            }
        }
        let mut indices: Vec<u32> = self
            .zones
            .iter()
            .filter_map(|z| match z.role {
                ZoneRole::Checkpoint { index } => Some(index),
                _ => None,
            })
            .collect();
        indices.sort_unstable();
        if indices.iter().enumerate().any(|(i, idx)| *idx != i as u32) {
            return Err(VariantError::CheckpointOrder);
        }

        for piece in &self.layout {
            if !positive(piece.radius) || !piece.position.is_finite() {
                return Err(out_of_range("layout.radius"));
            }
        }

        match self.control {
            ControlScheme::Vehicle => {
                if !positive(self.vehicle.radius) || !positive(self.vehicle.health) {
                    return Err(out_of_range("vehicle"));
                }
                if self.vehicle.spawns.len() < rules.max_occupants {
                    return Err(VariantError::MissingSpawns { needed: rules.max_occupants });
                }
            }
            ControlScheme::Cue => {
                let cues = self.layout.iter().filter(|p| p.cue).count();
                if cues != 1 {
                    return Err(VariantError::CuePieces(cues));
                }
            }
            ControlScheme::Blade => {}
        }

        match rules.win {
            WinCondition::LapsCompleted { .. } if self.checkpoint_count() == 0 => {
                return Err(VariantError::UnsupportedWin(rules.win.name()));
            }
            WinCondition::PiecesCleared if self.layout.iter().all(|p| p.cue) => {
                return Err(VariantError::UnsupportedWin(rules.win.name()));
            }
            _ => {}
        }

        if let Some(spawner) = &self.markers {
            if spawner.interval_ticks == 0 || !positive(spawner.radius) || !(0.0..=1.0).contains(&spawner.bomb_chance) {
                return Err(out_of_range("markers"));
            }
        }
        if let Some(projectile) = &self.projectile {
            if !positive(projectile.radius) || !positive(projectile.speed) || projectile.ttl_ticks == 0 {
                return Err(out_of_range("projectile"));
            }
        }

        Ok(())
    }

    // =========================================================================
    // PRESETS
    // =========================================================================

    /// Four-car lap race around a rectangular circuit.
    pub fn racing() -> Self {
        let tick_rate = crate::TICK_RATE;

        // Four gates around the loop; index 0 is the start/finish line.
        let gate = |id: u32, center: Vec2, half_extents: Vec2| SensorZone {
            id,
            shape: ZoneShape::Rect { center, half_extents },
            role: ZoneRole::Checkpoint { index: id },
        };

        Self {
            name: "racing".to_string(),
            tick_rate,
            arena: ArenaBounds { half_width: 60.0, half_height: 40.0 },
            control: ControlScheme::Vehicle,
            physics: PhysicsTable {
                vehicle: KinematicsProfile {
                    mass: 1.0,
                    engine_force: 30.0,
                    turn_rate: 3.0,
                    friction: 0.99,
                    drag: 0.995,
                    traction: 0.15,
                    max_speed: 25.0,
                },
                projectile: KinematicsProfile { max_speed: 60.0, ..KinematicsProfile::default() },
                particle: KinematicsProfile { friction: 0.95, ..KinematicsProfile::default() },
                ..PhysicsTable::default()
            },
            collision: CollisionTuning::default(),
            vehicle: VehicleTemplate {
                radius: 1.5,
                health: 100.0,
                spawns: vec![
                    SpawnPoint::new(Vec2::new(-6.0, -24.0), 0.0),
                    SpawnPoint::new(Vec2::new(-6.0, -32.0), 0.0),
                    SpawnPoint::new(Vec2::new(-11.0, -24.0), 0.0),
                    SpawnPoint::new(Vec2::new(-11.0, -32.0), 0.0),
                ],
            },
            projectile: Some(ProjectileTemplate {
                radius: 0.3,
                speed: 45.0,
                damage: 20.0,
                ttl_ticks: 90,
                cooldown_ticks: tick_rate / 2,
            }),
            layout: Vec::new(),
            zones: vec![
                gate(0, Vec2::new(0.0, -28.0), Vec2::new(1.0, 12.0)),
                gate(1, Vec2::new(48.0, 0.0), Vec2::new(12.0, 1.0)),
                gate(2, Vec2::new(0.0, 28.0), Vec2::new(1.0, 12.0)),
                gate(3, Vec2::new(-48.0, 0.0), Vec2::new(12.0, 1.0)),
            ],
            markers: None,
            rules: RuleSet::default(),
        }
    }

    /// Turn-based pocket billiards with a shared cue ball.
    pub fn billiards() -> Self {
        let tick_rate = crate::TICK_RATE;
        let (hw, hh) = (20.0, 10.0);
        let ball = 0.5;

        let mut layout = vec![PieceTemplate { number: 0, cue: true, position: Vec2::new(-10.0, 0.0), radius: ball }];
        // Triangle rack, apex towards the cue ball.
        let mut number = 1u8;
        for row in 0..3 {
            for col in 0..=row {
                let x = 8.0 + row as f64 * ball * 1.8;
                let y = (col as f64 - row as f64 / 2.0) * ball * 2.1;
                layout.push(PieceTemplate { number, cue: false, position: Vec2::new(x, y), radius: ball });
                number += 1;
            }
        }

        let pockets = [(-hw, -hh), (0.0, -hh), (hw, -hh), (-hw, hh), (0.0, hh), (hw, hh)];
        let zones = pockets
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| SensorZone {
                id: i as u32,
                shape: ZoneShape::Circle { center: Vec2::new(x, y), radius: 0.9 },
                role: ZoneRole::Pocket,
            })
            .collect();

        Self {
            name: "billiards".to_string(),
            tick_rate,
            arena: ArenaBounds { half_width: hw, half_height: hh },
            control: ControlScheme::Cue,
            physics: PhysicsTable {
                scoring_piece: KinematicsProfile {
                    friction: 0.985,
                    max_speed: 40.0,
                    ..KinematicsProfile::default()
                },
                particle: KinematicsProfile { friction: 0.9, ..KinematicsProfile::default() },
                ..PhysicsTable::default()
            },
            collision: CollisionTuning { burst_count: 0, ..CollisionTuning::default() },
            vehicle: VehicleTemplate::default(),
            projectile: None,
            layout,
            zones,
            markers: None,
            rules: RuleSet {
                min_occupants: 2,
                max_occupants: 4,
                round_ticks: None,
                win: WinCondition::PiecesCleared,
                turn_based: true,
                turn_timeout_ticks: Some(30 * tick_rate),
                keep_turn_on_score: true,
                ..RuleSet::default()
            },
        }
    }

    /// Timed arcade round: slice markers, avoid bombs.
    pub fn slicer() -> Self {
        let tick_rate = crate::TICK_RATE;

        Self {
            name: "slicer".to_string(),
            tick_rate,
            arena: ArenaBounds { half_width: 20.0, half_height: 12.0 },
            control: ControlScheme::Blade,
            physics: PhysicsTable {
                marker: KinematicsProfile { drag: 0.99, max_speed: 30.0, ..KinematicsProfile::default() },
                particle: KinematicsProfile { friction: 0.92, ..KinematicsProfile::default() },
                ..PhysicsTable::default()
            },
            collision: CollisionTuning { burst_count: 6, ..CollisionTuning::default() },
            vehicle: VehicleTemplate::default(),
            projectile: None,
            layout: Vec::new(),
            zones: Vec::new(),
            markers: Some(MarkerSpawner {
                interval_ticks: tick_rate / 2,
                ttl_ticks: tick_rate * 5 / 2,
                radius: 1.0,
                points: 1,
                bomb_chance: 0.15,
                bomb_points: -3,
                launch_speed: 14.0,
            }),
            rules: RuleSet {
                min_occupants: 1,
                max_occupants: 4,
                round_ticks: Some(60 * tick_rate),
                win: WinCondition::TimeOnly,
                ..RuleSet::default()
            },
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "racing" => Some(Self::racing()),
            "billiards" => Some(Self::billiards()),
            "slicer" => Some(Self::slicer()),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for variant in [GameVariant::racing(), GameVariant::billiards(), GameVariant::slicer()] {
            assert!(variant.validate().is_ok(), "{} should validate", variant.name);
        }
    }

    #[test]
    fn test_billiards_rack() {
        let variant = GameVariant::billiards();
        assert_eq!(variant.layout.len(), 7);
        assert_eq!(variant.layout.iter().filter(|p| p.cue).count(), 1);
        assert_eq!(variant.zones.len(), 6);
    }

    #[test]
    fn test_json_round_trip() {
        let variant = GameVariant::billiards();
        let json = variant.to_json().unwrap();
        let parsed = GameVariant::from_json(&json).unwrap();
        assert_eq!(parsed.name, variant.name);
        assert_eq!(parsed.control, ControlScheme::Cue);
        assert_eq!(parsed.layout.len(), variant.layout.len());
        assert_eq!(parsed.zones.len(), variant.zones.len());
        assert_eq!(parsed.rules.win, WinCondition::PiecesCleared);
        assert!(parsed.rules.turn_based);
    }

    #[test]
    fn test_partial_json_falls_back_to_racing() {
        let parsed = GameVariant::from_json(r#"{"name": "short-race", "rules": {"max_occupants": 2}}"#).unwrap();
        assert_eq!(parsed.name, "short-race");
        assert_eq!(parsed.rules.max_occupants, 2);
        assert_eq!(parsed.rules.min_occupants, 2);
        assert_eq!(parsed.control, ControlScheme::Vehicle);
    }

    #[test]
    fn test_invalid_occupancy_rejected() {
        let mut variant = GameVariant::racing();
        variant.rules.min_occupants = 5;
        assert!(matches!(variant.validate(), Err(VariantError::OccupancyRange { min: 5, max: 4 })));
    }

    #[test]
    fn test_tick_rate_bounds() {
        let mut variant = GameVariant::slicer();
        variant.tick_rate = 0;
        assert!(matches!(variant.validate(), Err(VariantError::TickRate(0))));

        variant.tick_rate = 2_000_000_000;
        assert!(matches!(variant.validate(), Err(VariantError::TickRate(2_000_000_000))));

        variant.tick_rate = MAX_TICK_RATE;
        assert!(variant.validate().is_ok());
    }

    #[test]
    fn test_bad_friction_rejected() {
        let mut variant = GameVariant::racing();
        variant.physics.vehicle.friction = 1.5;
        assert!(matches!(variant.validate(), Err(VariantError::OutOfRange { .. })));
    }

    #[test]
    fn test_missing_spawns_rejected() {
        let mut variant = GameVariant::racing();
        variant.vehicle.spawns.truncate(2);
        assert!(matches!(variant.validate(), Err(VariantError::MissingSpawns { needed: 4 })));
    }

    #[test]
    fn test_gapped_checkpoints_rejected() {
        let mut variant = GameVariant::racing();
        variant.zones.remove(1);
        assert!(matches!(variant.validate(), Err(VariantError::CheckpointOrder)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(GameVariant::from_json("{not json"), Err(VariantError::Parse(_))));
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(GameVariant::preset("slicer").map(|v| v.control), Some(ControlScheme::Blade));
        assert!(GameVariant::preset("chess").is_none());
    }
}
