//! Object Spawning
//!
//! Creates the objects a session owns: player vehicles, the piece layout,
//! projectiles, particle bursts and timed markers. All randomness comes from
//! the session RNG so spawns replay identically.

use crate::core::vec2::Vec2;
use crate::game::entity::{
    DynamicObject, MarkerData, ObjectId, ObjectKind, ParticleData, PieceData, ProjectileData, SpawnPoint, VehicleData,
};
use crate::game::state::{PlayerId, SessionState};
use crate::game::variant::{CollisionTuning, GameVariant, MarkerSpawner};

/// Spawn a vehicle for `owner` under a pre-reserved id.
///
/// Spawn points are handed out by join slot, wrapping when exhausted.
pub fn spawn_vehicle(state: &mut SessionState, variant: &GameVariant, owner: &PlayerId, id: ObjectId, slot: usize) -> ObjectId {
    let template = &variant.vehicle;
    let spawn = if template.spawns.is_empty() {
        SpawnPoint::default()
    } else {
        template.spawns[slot % template.spawns.len()]
    };

    let vehicle = DynamicObject::new(
        id,
        spawn.position,
        spawn.orientation,
        template.radius,
        ObjectKind::Vehicle(VehicleData::new(template.health, spawn)),
    )
    .with_owner(Some(owner.clone()));

    state.insert_object(vehicle)
}

/// Spawn every piece of the initial layout.
pub fn spawn_layout(state: &mut SessionState, variant: &GameVariant) -> Vec<ObjectId> {
    variant
        .layout
        .iter()
        .map(|piece| {
            let id = state.allocate_object_id();
            let spawn = SpawnPoint::new(piece.position, 0.0);
            let object = DynamicObject::new(
                id,
                piece.position,
                0.0,
                piece.radius,
                ObjectKind::ScoringPiece(PieceData { number: piece.number, cue: piece.cue, spawn }),
            );
            state.insert_object(object)
        })
        .collect()
}

/// Fire a projectile from a vehicle along its heading.
///
/// Returns `None` when the variant has no projectiles or the vehicle is
/// still cooling down.
pub fn spawn_projectile(state: &mut SessionState, variant: &GameVariant, shooter: ObjectId) -> Option<ObjectId> {
    let template = variant.projectile.as_ref()?;
    let tick = state.tick;

    let (position, velocity, owner) = {
        let vehicle_obj = state.objects.get_mut(&shooter).filter(|o| o.active)?;
        let heading = vehicle_obj.heading();
        let muzzle = vehicle_obj.position + heading.scale(vehicle_obj.radius + template.radius);
        let launch = vehicle_obj.velocity + heading.scale(template.speed);
        let owner = vehicle_obj.owner.clone();

        let vehicle = vehicle_obj.vehicle_mut()?;
        if tick < vehicle.fire_ready_tick {
            return None;
        }
        vehicle.fire_ready_tick = tick + template.cooldown_ticks as u64;
        (muzzle, launch, owner)
    };

    let id = state.allocate_object_id();
    let projectile = DynamicObject::new(
        id,
        position,
        velocity.angle(),
        template.radius,
        ObjectKind::Projectile(ProjectileData {
            source: shooter,
            damage: template.damage,
            time_to_live: template.ttl_ticks,
        }),
    )
    .with_velocity(velocity)
    .with_owner(owner);

    Some(state.insert_object(projectile))
}

/// Emit a ring of short-lived particles at `point`.
pub fn spawn_particle_burst(state: &mut SessionState, tuning: &CollisionTuning, point: Vec2) -> usize {
    for _ in 0..tuning.burst_count {
        let direction = state.rng.random_direction();
        let speed = tuning.burst_speed * state.rng.next_range(0.5, 1.0);
        let id = state.allocate_object_id();
        let particle = DynamicObject::new(
            id,
            point,
            direction.angle(),
            tuning.particle_radius,
            ObjectKind::Particle(ParticleData { time_to_live: tuning.burst_ttl_ticks }),
        )
        .with_velocity(direction.scale(speed));
        state.insert_object(particle);
    }
    tuning.burst_count as usize
}

/// Launch one marker from the bottom edge toward the middle of the arena.
pub fn spawn_marker(state: &mut SessionState, variant: &GameVariant, spawner: &MarkerSpawner) -> ObjectId {
    let arena = variant.arena;
    let x = state.rng.next_range(-arena.half_width * 0.8, arena.half_width * 0.8);
    let position = Vec2::new(x, -arena.half_height + spawner.radius);
    let aim = state.rng.random_in_rect(arena.half_width * 0.3, arena.half_height * 0.3);
    let velocity = (aim - position).normalize().scale(spawner.launch_speed);

    let points = if state.rng.next_bool(spawner.bomb_chance) {
        spawner.bomb_points
    } else {
        spawner.points
    };

    let id = state.allocate_object_id();
    let marker = DynamicObject::new(
        id,
        position,
        0.0,
        spawner.radius,
        ObjectKind::Marker(MarkerData { points, time_to_live: spawner.ttl_ticks }),
    )
    .with_velocity(velocity);

    state.insert_object(marker)
}
