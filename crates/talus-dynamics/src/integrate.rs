//! Integration systems: gravity, velocity integration, derived state.

use nalgebra::Quaternion;
use talus_registry::Registry;
use talus_types::{
    Aabb, AngVel, BodyKind, InvInertia, LinAcc, LinVel, Orientation, Position,
    PresentOrientation, PresentPosition, Shape, Sleeping, WorldInvInertia,
};

/// Add each dynamic body's linear acceleration (gravity included) to its
/// linear velocity.
pub fn apply_gravity(registry: &mut Registry, dt: f64) {
    for entity in registry.entities_with2::<LinAcc, LinVel>() {
        if !matches!(registry.get::<BodyKind>(entity), BodyKind::Dynamic) {
            continue;
        }
        if registry.has::<Sleeping>(entity) {
            continue;
        }
        let acc = registry.get::<LinAcc>(entity).0;
        registry.get_mut::<LinVel>(entity).0 += acc * dt;
    }
}

/// Integrate velocities into new transforms for procedural bodies.
///
/// Orientations are renormalized every step.
pub fn integrate_velocities(registry: &mut Registry, dt: f64) {
    for entity in registry.entities_with2::<Position, LinVel>() {
        if !registry.get::<BodyKind>(entity).is_procedural() {
            continue;
        }
        if registry.has::<Sleeping>(entity) {
            continue;
        }

        let linvel = registry.get::<LinVel>(entity).0;
        registry.get_mut::<Position>(entity).0 += linvel * dt;

        if let Some(&AngVel(angvel)) = registry.try_get::<AngVel>(entity) {
            let orn = registry.get_mut::<Orientation>(entity);
            let q = orn.0.into_inner();
            let spin = Quaternion::new(0.0, angvel.x, angvel.y, angvel.z) * q * 0.5 * dt;
            orn.0 = nalgebra::UnitQuaternion::new_normalize(q + spin);
        }
    }
}

/// Refresh world-frame inverse inertia tensors after orientations changed.
pub fn update_world_inertia(registry: &mut Registry) {
    for entity in registry.entities_with2::<InvInertia, WorldInvInertia>() {
        if !matches!(registry.get::<BodyKind>(entity), BodyKind::Dynamic) {
            continue;
        }
        let inv_inertia = *registry.get::<InvInertia>(entity);
        let orientation = registry.get::<Orientation>(entity).0;
        registry.replace(
            entity,
            WorldInvInertia::from_local(&inv_inertia, &orientation),
        );
    }
}

/// Recompute world AABBs of procedural bodies from shape and transform.
pub fn update_aabbs(registry: &mut Registry) {
    for entity in registry.entities_with2::<Shape, Aabb>() {
        if !registry.get::<BodyKind>(entity).is_procedural() {
            continue;
        }
        let shape = *registry.get::<Shape>(entity);
        let position = registry.get::<Position>(entity).0;
        let orientation = registry.get::<Orientation>(entity).0;
        registry.replace(entity, shape.aabb(&position, &orientation));
    }
}

/// Advance smoothed present transforms towards the simulated ones.
///
/// `alpha` in `(0, 1]` is the fraction of the remaining gap closed per call;
/// 1 snaps.
pub fn update_presentation(registry: &mut Registry, alpha: f64) {
    let alpha = alpha.clamp(0.0, 1.0);
    for entity in registry.entities_with2::<PresentPosition, Position>() {
        let target = registry.get::<Position>(entity).0;
        let present = registry.get_mut::<PresentPosition>(entity);
        present.0 += (target - present.0) * alpha;
    }
    for entity in registry.entities_with2::<PresentOrientation, Orientation>() {
        let target = registry.get::<Orientation>(entity).0;
        let present = registry.get_mut::<PresentOrientation>(entity);
        present.0 = present.0.slerp(&target, alpha);
    }
}
