//! Narrowphase driver: per-manifold kernel dispatch and point maintenance.

use nalgebra::{Point3, UnitQuaternion};
use talus_registry::Registry;
use talus_types::{
    Aabb, ContactManifold, Entity, Material, Orientation, Position, Shape,
};
use tracing::debug;

use crate::kernels::{collide, CollisionResult};
use crate::manifold::{merge_result_into_manifold, prune_manifold, PointEvents};

/// Everything a collision kernel needs for one manifold, detached from the
/// registry so pair evaluation can run on worker subtasks.
#[derive(Debug, Clone)]
pub struct ManifoldWork {
    /// The manifold entity the result belongs to.
    pub entity: Entity,
    shape_a: Shape,
    pos_a: Point3<f64>,
    orn_a: UnitQuaternion<f64>,
    aabb_a: Aabb,
    shape_b: Shape,
    pos_b: Point3<f64>,
    orn_b: UnitQuaternion<f64>,
    aabb_b: Aabb,
    separation_threshold: f64,
    detection_threshold: f64,
}

impl ManifoldWork {
    /// Run the collision kernel for this pair.
    ///
    /// Pure function of the captured state; safe to run on any thread. The
    /// kernel is skipped when the AABBs, inset by the separation threshold,
    /// no longer intersect (the manifold itself may outlive the overlap).
    #[must_use]
    pub fn detect(&self) -> CollisionResult {
        if !self
            .aabb_a
            .inset(-self.separation_threshold)
            .intersects(&self.aabb_b)
        {
            return CollisionResult::none();
        }

        collide(
            &self.shape_a,
            self.pos_a,
            self.orn_a,
            &self.shape_b,
            self.pos_b,
            self.orn_b,
            self.detection_threshold,
        )
    }
}

/// The narrowphase driver.
///
/// Splits each step into a read-only detection pass (parallelizable across
/// manifolds) and a mutation pass applying persistence rules.
#[derive(Debug, Clone)]
pub struct Narrowphase {
    caching_distance: f64,
    breaking_distance: f64,
    parallel_threshold: usize,
}

impl Narrowphase {
    /// Create a narrowphase with the given persistence distances.
    #[must_use]
    pub fn new(caching_distance: f64, breaking_distance: f64, parallel_threshold: usize) -> Self {
        Self {
            caching_distance,
            breaking_distance,
            parallel_threshold,
        }
    }

    /// Whether this step's pair evaluation is worth forking subtasks.
    #[must_use]
    pub fn parallelizable(&self, registry: &Registry) -> bool {
        registry.count::<ContactManifold>() > self.parallel_threshold
    }

    /// Snapshot kernel inputs for every manifold.
    #[must_use]
    pub fn collect_work(&self, registry: &Registry) -> Vec<ManifoldWork> {
        let entities = registry.entities_with::<ContactManifold>();
        self.collect_work_for(registry, &entities)
    }

    /// Snapshot kernel inputs for the given manifold entities.
    ///
    /// Manifolds whose bodies lack a shape or transform are skipped.
    #[must_use]
    pub fn collect_work_for(&self, registry: &Registry, entities: &[Entity]) -> Vec<ManifoldWork> {
        let mut work = Vec::with_capacity(entities.len());
        for &entity in entities {
            let Some(manifold) = registry.try_get::<ContactManifold>(entity) else {
                continue;
            };
            let [body_a, body_b] = manifold.body;
            let Some(input) = self.work_for_pair(registry, entity, body_a, body_b, manifold) else {
                continue;
            };
            work.push(input);
        }
        work
    }

    fn work_for_pair(
        &self,
        registry: &Registry,
        entity: Entity,
        body_a: Entity,
        body_b: Entity,
        manifold: &ContactManifold,
    ) -> Option<ManifoldWork> {
        Some(ManifoldWork {
            entity,
            shape_a: *registry.try_get::<Shape>(body_a)?,
            pos_a: registry.try_get::<Position>(body_a)?.0,
            orn_a: registry.try_get::<Orientation>(body_a)?.0,
            aabb_a: *registry.try_get::<Aabb>(body_a)?,
            shape_b: *registry.try_get::<Shape>(body_b)?,
            pos_b: registry.try_get::<Position>(body_b)?.0,
            orn_b: registry.try_get::<Orientation>(body_b)?.0,
            aabb_b: *registry.try_get::<Aabb>(body_b)?,
            separation_threshold: manifold.separation_threshold,
            detection_threshold: self.breaking_distance,
        })
    }

    /// Apply detection results: refresh and prune existing points, then fold
    /// the candidates in.
    pub fn apply(
        &self,
        registry: &mut Registry,
        results: Vec<(Entity, CollisionResult)>,
    ) -> PointEvents {
        let mut total = PointEvents::default();

        for (entity, result) in results {
            if !registry.is_alive(entity) || !registry.has::<ContactManifold>(entity) {
                continue; // Destroyed since detection was queued.
            }

            let (body_a, body_b) = {
                let manifold = registry.get::<ContactManifold>(entity);
                (manifold.body[0], manifold.body[1])
            };
            let pos_a = registry.get::<Position>(body_a).0;
            let orn_a = registry.get::<Orientation>(body_a).0;
            let pos_b = registry.get::<Position>(body_b).0;
            let orn_b = registry.get::<Orientation>(body_b).0;
            let material = self.mixed_material(registry, body_a, body_b);

            let manifold = registry.get_mut::<ContactManifold>(entity);
            let pruned = prune_manifold(
                manifold,
                &pos_a,
                &orn_a,
                &pos_b,
                &orn_b,
                self.breaking_distance,
            );
            let merged = merge_result_into_manifold(
                manifold,
                &result,
                &orn_b,
                &material,
                self.caching_distance,
            );

            total.created += merged.created;
            total.merged += merged.merged;
            total.replaced += merged.replaced;
            total.destroyed += pruned.destroyed;
        }

        if total.created > 0 || total.destroyed > 0 {
            debug!(
                created = total.created,
                merged = total.merged,
                destroyed = total.destroyed,
                "narrowphase points"
            );
        }
        total
    }

    /// Sequential narrowphase pass over every manifold.
    pub fn update(&self, registry: &mut Registry) -> PointEvents {
        let work = self.collect_work(registry);
        let results = work
            .iter()
            .map(|w| (w.entity, w.detect()))
            .collect::<Vec<_>>();
        self.apply(registry, results)
    }

    /// Seed contact points for specific manifolds (used for manifolds that
    /// were just imported into an island).
    pub fn update_manifolds(&self, registry: &mut Registry, entities: &[Entity]) -> PointEvents {
        let work = self.collect_work_for(registry, entities);
        let results = work
            .iter()
            .map(|w| (w.entity, w.detect()))
            .collect::<Vec<_>>();
        self.apply(registry, results)
    }

    fn mixed_material(&self, registry: &Registry, body_a: Entity, body_b: Entity) -> Material {
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
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use talus_types::{BodyKind, ContactManifold};

    fn spawn_body(
        registry: &mut Registry,
        position: Point3<f64>,
        shape: Shape,
        kind: BodyKind,
    ) -> Entity {
        let entity = registry.create();
        registry.emplace(entity, Position(position));
        registry.emplace(entity, Orientation::default());
        registry.emplace(entity, kind);
        registry.emplace(
            entity,
            shape.aabb(&position, &nalgebra::UnitQuaternion::identity()),
        );
        registry.emplace(entity, shape);
        registry.emplace(entity, Material::default());
        entity
    }

    fn narrowphase() -> Narrowphase {
        Narrowphase::new(0.04, 0.04, 8)
    }

    #[test]
    fn test_update_seeds_contact_points() {
        let mut registry = Registry::new();
        let upper = spawn_body(
            &mut registry,
            Point3::new(0.0, 0.99, 0.0),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Dynamic,
        );
        let lower = spawn_body(
            &mut registry,
            Point3::origin(),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Static,
        );

        let manifold_entity = registry.create();
        registry.emplace(manifold_entity, ContactManifold::new(upper, lower, 0.08));

        let events = narrowphase().update(&mut registry);
        assert_eq!(events.created, 4);

        let manifold = registry.get::<ContactManifold>(manifold_entity);
        assert_eq!(manifold.num_points(), 4);
        for p in &manifold.points {
            assert_relative_eq!(p.normal.norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(p.distance, -0.01, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_repeated_updates_persist_points() {
        let mut registry = Registry::new();
        let upper = spawn_body(
            &mut registry,
            Point3::new(0.0, 0.99, 0.0),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Dynamic,
        );
        let lower = spawn_body(
            &mut registry,
            Point3::origin(),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Static,
        );
        let manifold_entity = registry.create();
        registry.emplace(manifold_entity, ContactManifold::new(upper, lower, 0.08));

        let np = narrowphase();
        np.update(&mut registry);
        let second = np.update(&mut registry);

        // Second pass merges all four points instead of recreating them.
        assert_eq!(second.created, 0);
        assert_eq!(second.merged, 4);

        let manifold = registry.get::<ContactManifold>(manifold_entity);
        assert_eq!(manifold.num_points(), 4);
        assert!(manifold.points.iter().all(|p| p.lifetime == 1));
    }

    #[test]
    fn test_separated_bodies_lose_points() {
        let mut registry = Registry::new();
        let upper = spawn_body(
            &mut registry,
            Point3::new(0.0, 0.99, 0.0),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Dynamic,
        );
        let lower = spawn_body(
            &mut registry,
            Point3::origin(),
            Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)),
            BodyKind::Static,
        );
        let manifold_entity = registry.create();
        registry.emplace(manifold_entity, ContactManifold::new(upper, lower, 0.08));

        let np = narrowphase();
        np.update(&mut registry);

        // Lift the upper body clear of the contact.
        registry.replace(upper, Position(Point3::new(0.0, 1.2, 0.0)));
        np.update(&mut registry);

        let manifold = registry.get::<ContactManifold>(manifold_entity);
        assert_eq!(manifold.num_points(), 0);
    }
}
