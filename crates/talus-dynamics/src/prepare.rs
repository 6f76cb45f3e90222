//! Per-constraint-type row preparation.

use hashbrown::HashMap;
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
use talus_registry::Registry;
use talus_types::{
    AngVel, Constraint, ConstraintImpulse, ConstraintKind, ContactManifold, Entity, InvMass,
    LinVel, Material, Orientation, Position, WorldInvInertia,
};

use crate::row::{warm_start, ConstraintRow, DeltaVelocities, RowCache, RowOptions};

const EPSILON: f64 = 1e-10;

/// Snapshot of one body's state for the duration of a solve.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BodySlot {
    pub entity: Entity,
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub linvel: Vector3<f64>,
    pub angvel: Vector3<f64>,
    pub inv_mass: f64,
    pub inv_inertia: Matrix3<f64>,
}

/// Lazily-built table of body snapshots and their delta-velocity slots.
#[derive(Debug, Default)]
pub(crate) struct SolverSlots {
    map: HashMap<Entity, usize>,
    pub bodies: Vec<BodySlot>,
}

impl SolverSlots {
    pub fn clear(&mut self) {
        self.map.clear();
        self.bodies.clear();
    }

    /// The slot for `entity`, snapshotting its state on first sight.
    pub fn slot_of(
        &mut self,
        registry: &Registry,
        deltas: &mut DeltaVelocities,
        entity: Entity,
    ) -> usize {
        if let Some(&slot) = self.map.get(&entity) {
            return slot;
        }
        let slot = deltas.push();
        debug_assert_eq!(slot, self.bodies.len());
        self.bodies.push(BodySlot {
            entity,
            position: registry.get::<Position>(entity).0,
            orientation: registry.get::<Orientation>(entity).0,
            linvel: registry.get::<LinVel>(entity).0,
            angvel: registry.get::<AngVel>(entity).0,
            inv_mass: registry.get::<InvMass>(entity).0,
            inv_inertia: registry.get::<WorldInvInertia>(entity).0,
        });
        self.map.insert(entity, slot);
        slot
    }
}

/// A contact friction row paired with its normal row; limits are refreshed
/// from the normal impulse every iteration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrictionPair {
    pub normal_row: usize,
    pub friction_row: usize,
    pub friction: f64,
}

/// What to write accumulated impulses back into after the iterations.
#[derive(Debug, Default)]
pub(crate) struct Writeback {
    /// Manifold entities with their prepared point counts, in emission
    /// order; each point emitted a normal row then a friction row.
    pub manifolds: Vec<(Entity, usize)>,
    /// Joint constraint entities in emission order.
    pub constraints: Vec<Entity>,
}

/// Emit rows for every contact point and joint constraint.
///
/// Emission order is fixed: contact manifolds first (normal row before
/// friction row within each point), then distance, soft-distance, point,
/// hinge and generic constraints, each group in entity order.
pub(crate) fn prepare_constraints(
    registry: &Registry,
    cache: &mut RowCache,
    deltas: &mut DeltaVelocities,
    slots: &mut SolverSlots,
    friction_pairs: &mut Vec<FrictionPair>,
    dt: f64,
) -> Writeback {
    let mut writeback = Writeback::default();

    prepare_contacts(registry, cache, deltas, slots, friction_pairs, dt, &mut writeback);

    let constraint_entities = registry.entities_with2::<Constraint, ConstraintImpulse>();
    let in_order = [
        kind_order(&constraint_entities, registry, 0),
        kind_order(&constraint_entities, registry, 1),
        kind_order(&constraint_entities, registry, 2),
        kind_order(&constraint_entities, registry, 3),
        kind_order(&constraint_entities, registry, 4),
    ];
    for group in in_order {
        for entity in group {
            prepare_joint(registry, cache, deltas, slots, entity, dt);
            writeback.constraints.push(entity);
        }
    }

    writeback
}

fn kind_rank(kind: &ConstraintKind) -> usize {
    match kind {
        ConstraintKind::Distance { .. } => 0,
        ConstraintKind::SoftDistance { .. } => 1,
        ConstraintKind::Point { .. } => 2,
        ConstraintKind::Hinge { .. } => 3,
        ConstraintKind::Generic { .. } => 4,
    }
}

fn kind_order(entities: &[Entity], registry: &Registry, rank: usize) -> Vec<Entity> {
    entities
        .iter()
        .copied()
        .filter(|e| kind_rank(&registry.get::<Constraint>(*e).kind) == rank)
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn prepare_contacts(
    registry: &Registry,
    cache: &mut RowCache,
    deltas: &mut DeltaVelocities,
    slots: &mut SolverSlots,
    friction_pairs: &mut Vec<FrictionPair>,
    dt: f64,
    writeback: &mut Writeback,
) {
    for manifold_entity in registry.entities_with::<ContactManifold>() {
        let manifold = registry.get::<ContactManifold>(manifold_entity);
        if manifold.points.is_empty() {
            writeback.manifolds.push((manifold_entity, 0));
            continue;
        }

        let [body_a, body_b] = manifold.body;
        let slot_a = slots.slot_of(registry, deltas, body_a);
        let slot_b = slots.slot_of(registry, deltas, body_b);
        let a = slots.bodies[slot_a];
        let b = slots.bodies[slot_b];

        let material = mixed_material(registry, body_a, body_b);

        for point in &manifold.points {
            let normal = b.orientation * point.local_normal;
            let r_a = a.orientation * point.pivot_a;
            let r_b = b.orientation * point.pivot_b;
            let vel_a = a.linvel + a.angvel.cross(&r_a);
            let vel_b = b.linvel + b.angvel.cross(&r_b);
            let relvel = vel_a - vel_b;
            let normal_relvel = relvel.dot(&normal);

            // Normal row.
            let mut normal_row = ConstraintRow::new(
                [normal, r_a.cross(&normal), -normal, -(r_b.cross(&normal))],
                (slot_a, a.inv_mass, a.inv_inertia),
                (slot_b, b.inv_mass, b.inv_inertia),
            );
            normal_row.impulse = point.normal_impulse;
            normal_row.lower_limit = 0.0;
            normal_row.upper_limit = if material.is_soft() {
                let spring_force = point.distance * material.stiffness;
                let damper_force = normal_relvel * material.damping;
                (spring_force + damper_force).abs() * dt
            } else {
                f64::INFINITY
            };

            let penetration = (a.position + r_a - b.position - r_b).dot(&normal);
            let pvel = penetration / dt;
            // Separating with a bounce weaker than the approach velocity:
            // meter out just enough impulse to avoid penetrating next step.
            // Otherwise push penetration out.
            let error = if penetration > 0.0 && pvel > -point.restitution * normal_relvel {
                pvel.max(0.0)
            } else {
                pvel.min(0.0)
            };

            normal_row.prepare(
                &RowOptions {
                    error,
                    restitution: point.restitution,
                },
                &a.linvel,
                &a.angvel,
                &b.linvel,
                &b.angvel,
            );
            warm_start(&normal_row, deltas);
            let normal_index = cache.rows.len();
            cache.rows.push(normal_row);

            // Friction row along the tangential relative velocity; a stable
            // basis vector stands in when there is none.
            let tangent_relvel = relvel - normal * normal_relvel;
            let tangent_speed = tangent_relvel.norm();
            let tangent = if tangent_speed > EPSILON {
                tangent_relvel / tangent_speed
            } else {
                plane_space(&normal).0
            };

            let mut friction_row = ConstraintRow::new(
                [tangent, r_a.cross(&tangent), -tangent, -(r_b.cross(&tangent))],
                (slot_a, a.inv_mass, a.inv_inertia),
                (slot_b, b.inv_mass, b.inv_inertia),
            );
            friction_row.impulse = point.friction_impulse;
            friction_row.lower_limit = 0.0;
            friction_row.upper_limit = 0.0;
            friction_row.prepare(
                &RowOptions::default(),
                &a.linvel,
                &a.angvel,
                &b.linvel,
                &b.angvel,
            );
            warm_start(&friction_row, deltas);
            let friction_index = cache.rows.len();
            cache.rows.push(friction_row);

            friction_pairs.push(FrictionPair {
                normal_row: normal_index,
                friction_row: friction_index,
                friction: point.friction,
            });
            cache.con_num_rows.push(2);
        }

        writeback
            .manifolds
            .push((manifold_entity, manifold.points.len()));
    }
}

fn prepare_joint(
    registry: &Registry,
    cache: &mut RowCache,
    deltas: &mut DeltaVelocities,
    slots: &mut SolverSlots,
    entity: Entity,
    dt: f64,
) {
    let constraint = *registry.get::<Constraint>(entity);
    let impulse = *registry.get::<ConstraintImpulse>(entity);
    let [body_a, body_b] = constraint.body;
    let slot_a = slots.slot_of(registry, deltas, body_a);
    let slot_b = slots.slot_of(registry, deltas, body_b);
    let a = slots.bodies[slot_a];
    let b = slots.bodies[slot_b];

    let mut emitted = 0usize;
    let mut emit = |row: &mut ConstraintRow,
                    options: &RowOptions,
                    cache: &mut RowCache,
                    deltas: &mut DeltaVelocities| {
        row.impulse = impulse.values[emitted];
        row.prepare(options, &a.linvel, &a.angvel, &b.linvel, &b.angvel);
        warm_start(row, deltas);
        cache.rows.push(row.clone());
        emitted += 1;
    };

    match constraint.kind {
        ConstraintKind::Distance { pivot, distance } => {
            let (mut row, options) =
                distance_row(&a, &b, slot_a, slot_b, pivot, distance, dt);
            emit(&mut row, &options, cache, deltas);
        }
        ConstraintKind::SoftDistance {
            pivot,
            distance,
            stiffness,
            damping,
        } => {
            let (mut row, options) = distance_row(&a, &b, slot_a, slot_b, pivot, distance, dt);
            // Spring-damper force bounds the impulse on both sides.
            let r_a = a.orientation * pivot[0];
            let r_b = b.orientation * pivot[1];
            let d = a.position + r_a - b.position - r_b;
            let length = d.norm().max(EPSILON);
            let dn = d / length;
            let relvel = (a.linvel + a.angvel.cross(&r_a) - b.linvel - b.angvel.cross(&r_b))
                .dot(&dn);
            let force = stiffness * (length - distance).abs() + damping * relvel.abs();
            let max_impulse = force * dt;
            row.lower_limit = -max_impulse;
            row.upper_limit = max_impulse;
            emit(&mut row, &options, cache, deltas);
        }
        ConstraintKind::Point { pivot } => {
            for (mut row, options) in point_rows(&a, &b, slot_a, slot_b, pivot, dt) {
                emit(&mut row, &options, cache, deltas);
            }
        }
        ConstraintKind::Hinge { pivot, axis } => {
            for (mut row, options) in point_rows(&a, &b, slot_a, slot_b, pivot, dt) {
                emit(&mut row, &options, cache, deltas);
            }

            let axis_a = a.orientation * axis[0];
            let axis_b = b.orientation * axis[1];
            let (p, q) = plane_space(&axis_a);
            for dir in [p, q] {
                let mut row = ConstraintRow::new(
                    [Vector3::zeros(), dir, Vector3::zeros(), -dir],
                    (slot_a, a.inv_mass, a.inv_inertia),
                    (slot_b, b.inv_mass, b.inv_inertia),
                );
                let options = RowOptions {
                    error: axis_b.cross(&axis_a).dot(&dir) / dt,
                    restitution: 0.0,
                };
                emit(&mut row, &options, cache, deltas);
            }
        }
        ConstraintKind::Generic {
            pivot,
            rest_orientation,
        } => {
            for (mut row, options) in point_rows(&a, &b, slot_a, slot_b, pivot, dt) {
                emit(&mut row, &options, cache, deltas);
            }

            // Angular error of B relative to A beyond the rest orientation,
            // as a world-frame small-angle vector.
            let relative = a.orientation.inverse() * b.orientation;
            let err = relative * rest_orientation.inverse();
            let err_world = a.orientation * (err.vector() * 2.0);
            for i in 0..3 {
                let mut dir = Vector3::zeros();
                dir[i] = 1.0;
                let mut row = ConstraintRow::new(
                    [Vector3::zeros(), dir, Vector3::zeros(), -dir],
                    (slot_a, a.inv_mass, a.inv_inertia),
                    (slot_b, b.inv_mass, b.inv_inertia),
                );
                let options = RowOptions {
                    error: -err_world[i] / dt,
                    restitution: 0.0,
                };
                emit(&mut row, &options, cache, deltas);
            }
        }
    }

    cache.con_num_rows.push(emitted);
}

/// The single row shared by the rigid and soft distance constraints.
fn distance_row(
    a: &BodySlot,
    b: &BodySlot,
    slot_a: usize,
    slot_b: usize,
    pivot: [Vector3<f64>; 2],
    distance: f64,
    dt: f64,
) -> (ConstraintRow, RowOptions) {
    let r_a = a.orientation * pivot[0];
    let r_b = b.orientation * pivot[1];
    let d = a.position + r_a - b.position - r_b;
    let length_sq = d.norm_squared().max(EPSILON);

    let row = ConstraintRow::new(
        [d, r_a.cross(&d), -d, -(r_b.cross(&d))],
        (slot_a, a.inv_mass, a.inv_inertia),
        (slot_b, b.inv_mass, b.inv_inertia),
    );
    let options = RowOptions {
        error: 0.5 * (length_sq - distance * distance) / dt,
        restitution: 0.0,
    };
    (row, options)
}

/// The three rows pinning a local point of A to a local point of B.
fn point_rows(
    a: &BodySlot,
    b: &BodySlot,
    slot_a: usize,
    slot_b: usize,
    pivot: [Vector3<f64>; 2],
    dt: f64,
) -> Vec<(ConstraintRow, RowOptions)> {
    let r_a = a.orientation * pivot[0];
    let r_b = b.orientation * pivot[1];
    let error = a.position + r_a - b.position - r_b;
    let skew_a = skew(&r_a);
    let skew_b = skew(&r_b);

    (0..3)
        .map(|i| {
            let mut basis = Vector3::zeros();
            basis[i] = 1.0;
            let row = ConstraintRow::new(
                [
                    basis,
                    -Vector3::new(skew_a[(i, 0)], skew_a[(i, 1)], skew_a[(i, 2)]),
                    -basis,
                    Vector3::new(skew_b[(i, 0)], skew_b[(i, 1)], skew_b[(i, 2)]),
                ],
                (slot_a, a.inv_mass, a.inv_inertia),
                (slot_b, b.inv_mass, b.inv_inertia),
            );
            let options = RowOptions {
                error: error[i] / dt,
                restitution: 0.0,
            };
            (row, options)
        })
        .collect()
}

fn mixed_material(registry: &Registry, body_a: Entity, body_b: Entity) -> Material {
    let a = registry
        .try_get::<Material>(body_a)
        .copied()
        .unwrap_or_default();
    let b = registry
        .try_get::<Material>(body_b)
        .copied()
        .unwrap_or_default();
    a.mix(&b)
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Two orthonormal vectors spanning the plane orthogonal to unit `n`.
pub(crate) fn plane_space(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let reference = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let p = n.cross(&reference).normalize();
    let q = n.cross(&p);
    (p, q)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_space_is_orthonormal() {
        for n in [
            Vector3::x(),
            Vector3::y(),
            Vector3::new(1.0, 2.0, -0.5).normalize(),
        ] {
            let (p, q) = plane_space(&n);
            assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(p.dot(&n), 0.0, epsilon = 1e-12);
            assert_relative_eq!(q.dot(&n), 0.0, epsilon = 1e-12);
            assert_relative_eq!(p.dot(&q), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_skew_matches_cross_product() {
        let v = Vector3::new(1.0, -2.0, 3.0);
        let w = Vector3::new(0.5, 0.25, -1.0);
        assert_relative_eq!(skew(&v) * w, v.cross(&w), epsilon = 1e-12);
    }
}
