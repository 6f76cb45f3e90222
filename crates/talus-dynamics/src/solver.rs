//! The simulation solver: prepare, iterate, fold in, integrate.

use talus_registry::Registry;
use talus_types::{AngVel, BodyKind, ConstraintImpulse, ContactManifold, LinVel};
use tracing::trace;

use crate::integrate::{apply_gravity, integrate_velocities, update_aabbs, update_world_inertia};
use crate::prepare::{prepare_constraints, FrictionPair, SolverSlots, Writeback};
use crate::row::{apply_impulse, solve_row, DeltaVelocities, RowCache};

/// Projected Gauss-Seidel sequential-impulse solver.
///
/// Owns the row cache and scratch state reused across steps. One call to
/// [`update`](Self::update) performs a full dynamics step for the registry
/// it is given: gravity, row preparation with warm-starting, the iteration
/// loop, velocity fold-in, impulse write-back and integration of the
/// resulting velocities into new transforms.
#[derive(Debug)]
pub struct Solver {
    iterations: u32,
    cache: RowCache,
    deltas: DeltaVelocities,
    slots: SolverSlots,
    friction_pairs: Vec<FrictionPair>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Solver {
    /// Create a solver running the given number of iterations per step.
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
            cache: RowCache::default(),
            deltas: DeltaVelocities::default(),
            slots: SolverSlots::default(),
            friction_pairs: Vec::new(),
        }
    }

    /// Number of rows prepared in the last step.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.cache.rows.len()
    }

    /// Advance dynamics by `dt`.
    pub fn update(&mut self, registry: &mut Registry, dt: f64) {
        self.cache.clear();
        self.deltas.slots.clear();
        self.slots.clear();
        self.friction_pairs.clear();

        // Forces and acceleration.
        apply_gravity(registry, dt);

        // Set up rows from body state, warm-starting from last step's
        // impulses.
        let writeback = prepare_constraints(
            registry,
            &mut self.cache,
            &mut self.deltas,
            &mut self.slots,
            &mut self.friction_pairs,
            dt,
        );
        trace!(rows = self.cache.rows.len(), "prepared rows");

        // Iterate: refresh per-iteration limits, then solve rows in
        // emission order.
        for _ in 0..self.iterations {
            for pair in &self.friction_pairs {
                let normal_impulse = self.cache.rows[pair.normal_row].impulse;
                let limit = (normal_impulse * pair.friction).abs();
                let row = &mut self.cache.rows[pair.friction_row];
                row.lower_limit = -limit;
                row.upper_limit = limit;
            }

            for row in &mut self.cache.rows {
                let delta_impulse = solve_row(row, &self.deltas);
                apply_impulse(delta_impulse, row, &mut self.deltas);
            }
        }

        // Fold accumulated delta velocities into dynamic bodies.
        for (slot, body) in self.slots.bodies.iter().enumerate() {
            if !matches!(registry.get::<BodyKind>(body.entity), BodyKind::Dynamic) {
                continue;
            }
            let (dv, dw) = self.deltas.slots[slot];
            registry.get_mut::<LinVel>(body.entity).0 += dv;
            registry.get_mut::<AngVel>(body.entity).0 += dw;
        }

        // Hand accumulated impulses back for next step's warm start.
        self.write_back_impulses(registry, &writeback);

        // Integrate velocities to new transforms and refresh derived state.
        integrate_velocities(registry, dt);
        update_aabbs(registry);
        update_world_inertia(registry);
    }

    fn write_back_impulses(&self, registry: &mut Registry, writeback: &Writeback) {
        let mut row = 0usize;

        for &(manifold_entity, num_points) in &writeback.manifolds {
            if num_points == 0 {
                continue;
            }
            let manifold = registry.get_mut::<ContactManifold>(manifold_entity);
            for point in manifold.points.iter_mut().take(num_points) {
                point.normal_impulse = self.cache.rows[row].impulse;
                point.friction_impulse = self.cache.rows[row + 1].impulse;
                row += 2;
            }
        }

        let mut constraint_index = writeback.manifolds.iter().map(|(_, n)| *n).sum::<usize>();
        for &entity in &writeback.constraints {
            let num_rows = self.cache.con_num_rows[constraint_index];
            let impulse = registry.get_mut::<ConstraintImpulse>(entity);
            for i in 0..num_rows {
                impulse.values[i] = self.cache.rows[row + i].impulse;
            }
            row += num_rows;
            constraint_index += 1;
        }
    }

    /// Check the row-limit invariant; used by tests.
    #[must_use]
    pub fn impulses_within_limits(&self) -> bool {
        self.cache.rows.iter().all(|row| {
            row.impulse >= row.lower_limit - 1e-9 && row.impulse <= row.upper_limit + 1e-9
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, UnitQuaternion, Vector3};
    use talus_types::{
        Constraint, ConstraintKind, Entity, InvInertia, InvMass, LinAcc, Mass, Material,
        Orientation, Position, Shape, WorldInvInertia,
    };

    const DT: f64 = 1.0 / 60.0;

    fn spawn_dynamic(
        registry: &mut Registry,
        position: Point3<f64>,
        mass: f64,
        shape: Shape,
    ) -> Entity {
        let entity = registry.create();
        let inertia = shape.inertia_diagonal(mass);
        registry.emplace(entity, BodyKind::Dynamic);
        registry.emplace(entity, Position(position));
        registry.emplace(entity, Orientation::default());
        registry.emplace(entity, LinVel::default());
        registry.emplace(entity, AngVel::default());
        registry.emplace(entity, LinAcc(Vector3::new(0.0, -9.8, 0.0)));
        registry.emplace(entity, Mass(mass));
        registry.emplace(entity, InvMass(1.0 / mass));
        registry.emplace(
            entity,
            InvInertia(Vector3::new(1.0 / inertia.x, 1.0 / inertia.y, 1.0 / inertia.z)),
        );
        registry.emplace(
            entity,
            WorldInvInertia::from_local(
                &InvInertia(Vector3::new(
                    1.0 / inertia.x,
                    1.0 / inertia.y,
                    1.0 / inertia.z,
                )),
                &UnitQuaternion::identity(),
            ),
        );
        registry.emplace(entity, shape.aabb(&position, &UnitQuaternion::identity()));
        registry.emplace(entity, shape);
        registry.emplace(entity, Material::default());
        entity
    }

    fn spawn_static(registry: &mut Registry, position: Point3<f64>, shape: Shape) -> Entity {
        let entity = registry.create();
        registry.emplace(entity, BodyKind::Static);
        registry.emplace(entity, Position(position));
        registry.emplace(entity, Orientation::default());
        registry.emplace(entity, LinVel::default());
        registry.emplace(entity, AngVel::default());
        registry.emplace(entity, InvMass(0.0));
        registry.emplace(entity, WorldInvInertia::default());
        registry.emplace(entity, shape.aabb(&position, &UnitQuaternion::identity()));
        registry.emplace(entity, shape);
        registry.emplace(entity, Material::default());
        entity
    }

    #[test]
    fn test_free_fall_matches_closed_form() {
        let mut registry = Registry::new();
        let body = spawn_dynamic(
            &mut registry,
            Point3::new(0.0, 3.0, 0.0),
            1.0,
            Shape::sphere(0.5),
        );

        let mut solver = Solver::new(10);
        for _ in 0..60 {
            solver.update(&mut registry, DT);
        }

        // Semi-implicit Euler over 60 steps of 1/60 s.
        let position = registry.get::<Position>(body).0;
        assert_relative_eq!(position.y, 3.0 - 0.5 * 9.8 * 1.0, epsilon = 0.1);
        assert_relative_eq!(registry.get::<LinVel>(body).0.y, -9.8, epsilon = 0.01);
        assert_relative_eq!(
            registry.get::<Orientation>(body).0.norm(),
            1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_contact_stops_resting_box() {
        let mut registry = Registry::new();
        let cube = spawn_dynamic(
            &mut registry,
            Point3::new(0.0, 0.999, 0.0),
            1.0,
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
        );
        let ground = spawn_static(
            &mut registry,
            Point3::origin(),
            Shape::box_shape(Vector3::new(10.0, 0.5, 10.0)),
        );
        talus_collision_test_support::seed_manifold(&mut registry, cube, ground);

        let mut solver = Solver::new(10);
        for _ in 0..120 {
            // Keep the contact fresh the way the narrowphase would.
            talus_collision_test_support::refresh(&mut registry);
            solver.update(&mut registry, DT);
            assert!(solver.impulses_within_limits());
        }

        let velocity = registry.get::<LinVel>(cube).0;
        assert!(velocity.norm() < 1e-3, "residual velocity {velocity:?}");

        let position = registry.get::<Position>(cube).0;
        assert!((position.y - 1.0).abs() < 1e-2, "rest height {}", position.y);
    }

    #[test]
    fn test_restitution_swaps_sphere_velocities() {
        let mut registry = Registry::new();
        let left = spawn_dynamic(
            &mut registry,
            Point3::new(-1.001, 0.0, 0.0),
            1.0,
            Shape::sphere(1.0),
        );
        let right = spawn_dynamic(
            &mut registry,
            Point3::new(1.001, 0.0, 0.0),
            1.0,
            Shape::sphere(1.0),
        );
        registry.replace(left, LinAcc(Vector3::zeros()));
        registry.replace(right, LinAcc(Vector3::zeros()));
        registry.replace(left, LinVel(Vector3::new(1.0, 0.0, 0.0)));
        registry.replace(right, LinVel(Vector3::new(-1.0, 0.0, 0.0)));
        registry.replace(left, Material::new(1.0, 0.0));
        registry.replace(right, Material::new(1.0, 0.0));
        talus_collision_test_support::seed_manifold(&mut registry, left, right);

        let mut solver = Solver::new(10);
        for _ in 0..3 {
            talus_collision_test_support::refresh(&mut registry);
            solver.update(&mut registry, DT);
        }

        let v_left = registry.get::<LinVel>(left).0;
        let v_right = registry.get::<LinVel>(right).0;
        assert!(
            (v_left.x + 1.0).abs() < 0.01,
            "left velocity {v_left:?} should reverse"
        );
        assert!(
            (v_right.x - 1.0).abs() < 0.01,
            "right velocity {v_right:?} should reverse"
        );
    }

    #[test]
    fn test_distance_constraint_holds_length() {
        let mut registry = Registry::new();
        let anchor = spawn_static(&mut registry, Point3::origin(), Shape::sphere(0.1));
        let bob = spawn_dynamic(
            &mut registry,
            Point3::new(0.0, -1.0, 0.0),
            1.0,
            Shape::sphere(0.1),
        );

        let constraint_entity = registry.create();
        registry.emplace(
            constraint_entity,
            Constraint::new(
                anchor,
                bob,
                ConstraintKind::Distance {
                    pivot: [Vector3::zeros(), Vector3::zeros()],
                    distance: 1.0,
                },
            ),
        );
        registry.emplace(constraint_entity, ConstraintImpulse::default());

        let mut solver = Solver::new(10);
        for _ in 0..240 {
            solver.update(&mut registry, DT);
        }

        let position = registry.get::<Position>(bob).0;
        let length = position.coords.norm();
        assert!(
            (length - 1.0).abs() < 0.05,
            "pendulum length drifted to {length}"
        );
    }

    #[test]
    fn test_point_constraint_pins_bodies_together() {
        let mut registry = Registry::new();
        let anchor = spawn_static(&mut registry, Point3::origin(), Shape::sphere(0.1));
        let body = spawn_dynamic(
            &mut registry,
            Point3::new(0.0, -0.001, 0.0),
            1.0,
            Shape::sphere(0.5),
        );

        let constraint_entity = registry.create();
        registry.emplace(
            constraint_entity,
            Constraint::new(
                anchor,
                body,
                ConstraintKind::Point {
                    pivot: [Vector3::zeros(), Vector3::zeros()],
                },
            ),
        );
        registry.emplace(constraint_entity, ConstraintImpulse::default());

        let mut solver = Solver::new(10);
        for _ in 0..120 {
            solver.update(&mut registry, DT);
        }

        let position = registry.get::<Position>(body).0;
        assert!(
            position.coords.norm() < 0.02,
            "pinned body drifted to {position:?}"
        );
    }

    /// Minimal stand-ins for the narrowphase so the solver tests stay
    /// self-contained: seeds a manifold entity for a pair and refreshes its
    /// points from the current transforms.
    mod talus_collision_test_support {
        use super::*;
        use talus_types::ContactPoint;

        pub fn seed_manifold(registry: &mut Registry, a: Entity, b: Entity) {
            let entity = registry.create();
            registry.emplace(entity, ContactManifold::new(a, b, 0.08));
            refresh(registry);
        }

        pub fn refresh(registry: &mut Registry) {
            for entity in registry.entities_with::<ContactManifold>() {
                let (a, b) = {
                    let m = registry.get::<ContactManifold>(entity);
                    (m.body[0], m.body[1])
                };
                let pos_a = registry.get::<Position>(a).0;
                let orn_a = registry.get::<Orientation>(a).0;
                let pos_b = registry.get::<Position>(b).0;
                let orn_b = registry.get::<Orientation>(b).0;
                let shape_a = *registry.get::<Shape>(a);
                let shape_b = *registry.get::<Shape>(b);
                let mat_a = *registry.get::<Material>(a);
                let mat_b = *registry.get::<Material>(b);
                let mixed = mat_a.mix(&mat_b);

                let result = talus_collision::collide(
                    &shape_a, pos_a, orn_a, &shape_b, pos_b, orn_b, 0.04,
                );

                let manifold = registry.get_mut::<ContactManifold>(entity);
                // Preserve warm-start impulses by matching on pivot
                // proximity, mirroring the narrowphase merge rule.
                let old_points = manifold.points.clone();
                manifold.points.clear();
                for candidate in &result.points {
                    let mut point = ContactPoint {
                        pivot_a: candidate.pivot_a,
                        pivot_b: candidate.pivot_b,
                        normal: candidate.normal,
                        local_normal: orn_b.inverse() * candidate.normal,
                        distance: candidate.distance,
                        restitution: mixed.restitution,
                        friction: mixed.friction,
                        lifetime: 0,
                        normal_impulse: 0.0,
                        friction_impulse: 0.0,
                    };
                    for old in &old_points {
                        if (old.pivot_a - point.pivot_a).norm_squared() < 0.04 * 0.04 {
                            point.normal_impulse = old.normal_impulse;
                            point.friction_impulse = old.friction_impulse;
                            point.lifetime = old.lifetime + 1;
                            break;
                        }
                    }
                    manifold.points.push(point);
                }
            }
        }
    }
}
