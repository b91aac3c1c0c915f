//! Kinematics Integrator
//!
//! Game-feel motion for dynamic objects: control force, friction, drag,
//! traction, a hard speed clamp, explicit Euler position update, then arena
//! containment. `dt` is always the fixed tick interval.

use crate::core::vec2::Vec2;
use crate::game::entity::{DynamicObject, ObjectKind};
use crate::game::variant::{ArenaBounds, KinematicsProfile};

/// Result of one integration step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integration {
    /// Velocity after the step
    pub velocity: Vec2,
    /// Position after the step (before arena containment)
    pub position: Vec2,
}

/// Heading-relative force from a vehicle's throttle.
pub fn control_force(object: &DynamicObject, profile: &KinematicsProfile) -> Vec2 {
    match &object.kind {
        ObjectKind::Vehicle(v) => object.heading().scale(v.throttle * profile.engine_force),
        _ => Vec2::ZERO,
    }
}

/// Orientation after applying steering for one tick.
///
/// Turning authority scales with speed, so a parked vehicle cannot spin.
pub fn steer(object: &DynamicObject, profile: &KinematicsProfile, dt: f64) -> f64 {
    match &object.kind {
        ObjectKind::Vehicle(v) if v.steering != 0.0 => {
            let authority = (object.speed() / profile.max_speed).min(1.0);
            let direction = if object.velocity.dot(object.heading()) < 0.0 { -1.0 } else { 1.0 };
            object.orientation + v.steering * profile.turn_rate * authority * direction * dt
        }
        _ => object.orientation,
    }
}

/// Rotate `velocity` toward the facing axis by `traction` of the angle.
///
/// Magnitude is preserved. A vehicle rolling backwards aligns with the
/// reversed heading instead of flipping around.
pub fn apply_traction(velocity: Vec2, heading: Vec2, traction: f64) -> Vec2 {
    if traction <= 0.0 || velocity.length_squared() == 0.0 {
        return velocity;
    }
    let axis = if velocity.dot(heading) < 0.0 { -heading } else { heading };
    let misalignment = velocity.cross(axis).atan2(velocity.dot(axis));
    velocity.rotate(misalignment * traction.min(1.0))
}

/// Rescale `velocity` so its magnitude does not exceed `max_speed`.
#[inline]
pub fn clamp_speed(velocity: Vec2, max_speed: f64) -> Vec2 {
    velocity.clamp_length(max_speed)
}

/// Advance one object by one tick, without touching it.
pub fn integrate(
    object: &DynamicObject,
    profile: &KinematicsProfile,
    applied_force: Vec2,
    dt: f64,
    tick_rate: u32,
) -> Integration {
    // 1. Acceleration from the applied force
    let mut velocity = object.velocity + applied_force.scale(dt / profile.mass);

    // 2. Friction (per tick) and drag (frame-rate independent)
    velocity = velocity.scale(profile.friction);
    velocity = velocity.scale(profile.drag.powf(dt * tick_rate as f64));

    // 3. Traction toward the facing direction
    velocity = apply_traction(velocity, object.heading(), profile.traction);

    // 4. Hard speed clamp
    velocity = clamp_speed(velocity, profile.max_speed);

    // 5. Explicit Euler
    let position = object.position + velocity.scale(dt);

    Integration { velocity, position }
}

/// Clamp a circle into the arena with zero bounce.
///
/// Velocity components pushing into a wall are zeroed. Returns `true` when
/// the object touched a wall.
pub fn contain(position: &mut Vec2, velocity: &mut Vec2, radius: f64, arena: &ArenaBounds) -> bool {
    let max_x = (arena.half_width - radius).max(0.0);
    let max_y = (arena.half_height - radius).max(0.0);
    let mut touched = false;

    if position.x > max_x || position.x < -max_x {
        position.x = position.x.clamp(-max_x, max_x);
        if velocity.x * position.x > 0.0 {
            velocity.x = 0.0;
        }
        touched = true;
    }
    if position.y > max_y || position.y < -max_y {
        position.y = position.y.clamp(-max_y, max_y);
        if velocity.y * position.y > 0.0 {
            velocity.y = 0.0;
        }
        touched = true;
    }

    touched
}

/// Steer, integrate and contain one object in place.
pub fn step_object(
    object: &mut DynamicObject,
    profile: &KinematicsProfile,
    arena: &ArenaBounds,
    dt: f64,
    tick_rate: u32,
) {
    object.orientation = steer(object, profile, dt);
    let force = control_force(object, profile);
    let step = integrate(object, profile, force, dt, tick_rate);

    object.velocity = step.velocity;
    object.position = step.position;
    contain(&mut object.position, &mut object.velocity, object.radius, arena);
}

// =============================================================================
// TESTS
// =============================================================================
