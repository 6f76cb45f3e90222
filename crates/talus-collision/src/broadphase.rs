//! Broadphase driver: AABB maintenance, pair generation and manifold
//! lifecycle.

use hashbrown::HashMap;
use talus_registry::Registry;
use talus_spatial::{DynamicTree, TreeNodeId, TreeView};
use talus_types::{
    Aabb, BodyKind, CollisionFilter, ContactManifold, Entity,
};
use tracing::debug;

/// A filtered AABB overlap that has no manifold yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePair(pub Entity, pub Entity);

/// Manifold lifecycle events from one broadphase pass, for the caller to
/// mirror into the constraint graph and outbound delta.
#[derive(Debug, Default)]
pub struct BroadphaseEvents {
    /// Manifold entities created this pass.
    pub created_manifolds: Vec<Entity>,
    /// Manifold entities destroyed this pass, with their last value.
    pub destroyed_manifolds: Vec<(Entity, ContactManifold)>,
}

/// Read-only snapshot of the pair-generation inputs, shareable with worker
/// subtasks.
#[derive(Debug)]
pub struct PairScan {
    procedural_view: TreeView,
    static_view: TreeView,
    /// Procedural bodies to query for, with their inset AABBs.
    items: Vec<(Entity, Aabb)>,
    /// Tight AABBs of every collidable body, for the precise overlap check
    /// after the (fat-leaf) tree query.
    aabbs: HashMap<Entity, Aabb>,
    filters: HashMap<Entity, CollisionFilter>,
    kinds: HashMap<Entity, BodyKind>,
}

impl PairScan {
    /// Number of query items; subtask partitioning granularity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there is nothing to scan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Scan a contiguous range of query items, returning filtered candidate
    /// pairs. Ranges may be evaluated concurrently and merged.
    #[must_use]
    pub fn scan_range(&self, start: usize, end: usize) -> Vec<CandidatePair> {
        let mut pairs = Vec::new();
        for &(entity, query_aabb) in &self.items[start..end.min(self.items.len())] {
            let mut visit = |other: Entity| {
                // Tree leaves are fat; confirm against the tight AABB.
                let tight = self.aabbs.get(&other);
                if self.should_collide(entity, other)
                    && tight.is_some_and(|t| query_aabb.intersects(t))
                {
                    pairs.push(CandidatePair(entity, other));
                }
            };
            self.procedural_view.query(&query_aabb, &mut visit);
            self.static_view.query(&query_aabb, &mut visit);
        }
        pairs
    }

    fn should_collide(&self, a: Entity, b: Entity) -> bool {
        if a == b {
            return false;
        }
        // Between two procedural bodies, only the lower id queries the pair
        // in; otherwise every overlap would be reported twice.
        let kind_a = self.kinds.get(&a).copied().unwrap_or_default();
        let kind_b = self.kinds.get(&b).copied().unwrap_or_default();
        if kind_a.is_procedural() && kind_b.is_procedural() && a > b {
            return false;
        }
        // At least one body must be dynamic for contact to matter.
        if kind_a.is_fixed_mass() && kind_b.is_fixed_mass() {
            return false;
        }
        let filter_a = self.filters.get(&a).copied().unwrap_or_default();
        let filter_b = self.filters.get(&b).copied().unwrap_or_default();
        filter_a.allows(&filter_b)
    }
}

/// The broadphase driver.
///
/// Keeps two AABB trees: the procedural tree holds dynamic and kinematic
/// bodies and is refit every step; the static tree holds everything else.
#[derive(Debug)]
pub struct Broadphase {
    tree: DynamicTree,
    static_tree: DynamicTree,
    node_ids: HashMap<Entity, (TreeNodeId, bool)>,
    manifold_index: HashMap<(Entity, Entity), Entity>,
    separation_threshold: f64,
    query_offset: f64,
}

impl Broadphase {
    /// Create a broadphase.
    ///
    /// `fat_margin` fattens tree leaves, `query_offset` insets pair queries
    /// so exactly-touching AABBs do not pair, and `separation_threshold` is
    /// stamped onto created manifolds.
    #[must_use]
    pub fn new(fat_margin: f64, query_offset: f64, separation_threshold: f64) -> Self {
        Self {
            tree: DynamicTree::with_margin(fat_margin),
            static_tree: DynamicTree::with_margin(fat_margin),
            node_ids: HashMap::new(),
            manifold_index: HashMap::new(),
            separation_threshold,
            query_offset,
        }
    }

    /// Whether pair generation is worth forking subtasks.
    #[must_use]
    pub fn parallelizable(&self, registry: &Registry) -> bool {
        registry
            .entities_with2::<Aabb, BodyKind>()
            .iter()
            .filter(|e| registry.get::<BodyKind>(**e).is_procedural())
            .count()
            > 1
    }

    /// A read-only view of the procedural tree for export to the
    /// coordinator.
    #[must_use]
    pub fn view(&self) -> TreeView {
        TreeView::of(&self.tree)
    }

    /// Whether a manifold already connects the pair.
    #[must_use]
    pub fn has_manifold(&self, a: Entity, b: Entity) -> bool {
        self.manifold_index.contains_key(&ordered(a, b))
    }

    /// Forget a body: removes its tree leaf. The caller destroys the
    /// registry entity; manifolds touching the body fall out on the next
    /// pass.
    pub fn on_body_destroyed(&mut self, entity: Entity) {
        if let Some((node, procedural)) = self.node_ids.remove(&entity) {
            if procedural {
                self.tree.destroy(node);
            } else {
                self.static_tree.destroy(node);
            }
        }
    }

    /// Forget a manifold destroyed outside the broadphase (body removal,
    /// island transfer).
    pub fn on_manifold_destroyed(&mut self, manifold: &ContactManifold) {
        self.manifold_index
            .remove(&ordered(manifold.body[0], manifold.body[1]));
    }

    /// Register a manifold imported from another registry.
    pub fn on_manifold_imported(&mut self, entity: Entity, manifold: &ContactManifold) {
        self.manifold_index
            .insert(ordered(manifold.body[0], manifold.body[1]), entity);
    }

    /// Shared per-step maintenance: seed new leaves, drop separated
    /// manifolds, refit procedural leaves.
    pub fn common_update(&mut self, registry: &mut Registry) -> BroadphaseEvents {
        let mut events = BroadphaseEvents::default();
        self.init_new_aabb_entities(registry);
        self.destroy_separated_manifolds(registry, &mut events);
        self.refit_moved_leaves(registry);
        events
    }

    /// Full sequential broadphase pass.
    pub fn update(&mut self, registry: &mut Registry) -> BroadphaseEvents {
        let mut events = self.common_update(registry);
        let scan = self.pair_scan(registry);
        let pairs = scan.scan_range(0, scan.len());
        self.apply_pairs(registry, &pairs, &mut events);
        events
    }

    /// Build the shareable pair-scan snapshot (parallel path). Call after
    /// [`common_update`](Self::common_update); merge the ranges' results
    /// with [`apply_pairs`](Self::apply_pairs).
    #[must_use]
    pub fn pair_scan(&self, registry: &Registry) -> PairScan {
        let mut items = Vec::new();
        let mut filters = HashMap::new();
        let mut kinds = HashMap::new();

        let mut aabbs = HashMap::new();
        for entity in registry.entities_with2::<Aabb, BodyKind>() {
            let kind = *registry.get::<BodyKind>(entity);
            let aabb = *registry.get::<Aabb>(entity);
            kinds.insert(entity, kind);
            aabbs.insert(entity, aabb);
            if let Some(filter) = registry.try_get::<CollisionFilter>(entity) {
                filters.insert(entity, *filter);
            }
            if kind.is_procedural() {
                items.push((entity, aabb.inset(self.query_offset)));
            }
        }

        PairScan {
            procedural_view: TreeView::of(&self.tree),
            static_view: TreeView::of(&self.static_tree),
            items,
            aabbs,
            filters,
            kinds,
        }
    }

    /// Create manifolds for candidate pairs that do not have one yet.
    pub fn apply_pairs(
        &mut self,
        registry: &mut Registry,
        pairs: &[CandidatePair],
        events: &mut BroadphaseEvents,
    ) {
        for &CandidatePair(a, b) in pairs {
            let key = ordered(a, b);
            if self.manifold_index.contains_key(&key) {
                continue;
            }
            if !registry.is_alive(a) || !registry.is_alive(b) {
                continue;
            }

            let entity = registry.create();
            registry.emplace(entity, ContactManifold::new(a, b, self.separation_threshold));
            self.manifold_index.insert(key, entity);
            events.created_manifolds.push(entity);
        }

        if !events.created_manifolds.is_empty() {
            debug!(count = events.created_manifolds.len(), "manifolds created");
        }
    }

    fn init_new_aabb_entities(&mut self, registry: &Registry) {
        for entity in registry.entities_with2::<Aabb, BodyKind>() {
            if self.node_ids.contains_key(&entity) {
                continue;
            }
            let aabb = *registry.get::<Aabb>(entity);
            let procedural = registry.get::<BodyKind>(entity).is_procedural();
            let node = if procedural {
                self.tree.create(aabb, entity)
            } else {
                self.static_tree.create(aabb, entity)
            };
            self.node_ids.insert(entity, (node, procedural));
        }
    }

    fn destroy_separated_manifolds(
        &mut self,
        registry: &mut Registry,
        events: &mut BroadphaseEvents,
    ) {
        let mut separated = Vec::new();
        for entity in registry.entities_with::<ContactManifold>() {
            let manifold = registry.get::<ContactManifold>(entity);
            let (Some(aabb_a), Some(aabb_b)) = (
                registry.try_get::<Aabb>(manifold.body[0]),
                registry.try_get::<Aabb>(manifold.body[1]),
            ) else {
                separated.push(entity);
                continue;
            };

            if !aabb_a
                .inset(-manifold.separation_threshold)
                .intersects(aabb_b)
            {
                separated.push(entity);
            }
        }

        for entity in separated {
            let manifold = registry.get::<ContactManifold>(entity).clone();
            self.manifold_index
                .remove(&ordered(manifold.body[0], manifold.body[1]));
            registry.destroy(entity);
            events.destroyed_manifolds.push((entity, manifold));
        }
    }

    fn refit_moved_leaves(&mut self, registry: &Registry) {
        for entity in registry.entities_with2::<Aabb, BodyKind>() {
            let Some(&(node, procedural)) = self.node_ids.get(&entity) else {
                continue;
            };
            if !procedural {
                continue;
            }
            let aabb = *registry.get::<Aabb>(entity);
            self.tree.move_leaf(node, aabb);
        }
    }
}

fn ordered(a: Entity, b: Entity) -> (Entity, Entity) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nalgebra::{Point3, UnitQuaternion, Vector3};
    use talus_types::{Orientation, Position, Shape};

    fn spawn(
        registry: &mut Registry,
        position: Point3<f64>,
        half: f64,
        kind: BodyKind,
    ) -> Entity {
        let entity = registry.create();
        let shape = Shape::box_shape(Vector3::new(half, half, half));
        registry.emplace(entity, Position(position));
        registry.emplace(entity, Orientation::default());
        registry.emplace(entity, kind);
        registry.emplace(entity, shape.aabb(&position, &UnitQuaternion::identity()));
        registry.emplace(entity, shape);
        registry.emplace(entity, CollisionFilter::default());
        entity
    }

    fn broadphase() -> Broadphase {
        Broadphase::new(0.1, 1e-3, 0.08)
    }

    #[test]
    fn test_overlapping_pair_creates_one_manifold() {
        let mut registry = Registry::new();
        let a = spawn(&mut registry, Point3::new(0.0, 0.99, 0.0), 0.5, BodyKind::Dynamic);
        let b = spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);

        let mut bp = broadphase();
        let events = bp.update(&mut registry);

        assert_eq!(events.created_manifolds.len(), 1);
        assert!(bp.has_manifold(a, b));
        assert_eq!(registry.count::<ContactManifold>(), 1);

        // Second pass must not duplicate the manifold.
        let events = bp.update(&mut registry);
        assert!(events.created_manifolds.is_empty());
        assert_eq!(registry.count::<ContactManifold>(), 1);
    }

    #[test]
    fn test_exactly_touching_aabbs_do_not_pair() {
        // AABBs share the y = 0.5 plane but do not overlap.
        let mut registry = Registry::new();
        spawn(&mut registry, Point3::new(0.0, 1.0, 0.0), 0.5, BodyKind::Dynamic);
        spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);

        let mut bp = broadphase();
        let events = bp.update(&mut registry);
        assert!(events.created_manifolds.is_empty());
    }

    #[test]
    fn test_far_pair_creates_nothing() {
        let mut registry = Registry::new();
        spawn(&mut registry, Point3::new(0.0, 10.0, 0.0), 0.5, BodyKind::Dynamic);
        spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);

        let mut bp = broadphase();
        let events = bp.update(&mut registry);
        assert!(events.created_manifolds.is_empty());
    }

    #[test]
    fn test_static_static_excluded() {
        let mut registry = Registry::new();
        spawn(&mut registry, Point3::new(0.0, 0.5, 0.0), 0.5, BodyKind::Static);
        spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);

        let mut bp = broadphase();
        let events = bp.update(&mut registry);
        assert!(events.created_manifolds.is_empty());
    }

    #[test]
    fn test_collision_filter_blocks_pair() {
        let mut registry = Registry::new();
        let a = spawn(&mut registry, Point3::new(0.0, 0.9, 0.0), 0.5, BodyKind::Dynamic);
        let b = spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);
        registry.replace(a, CollisionFilter::new(0b01, 0b01));
        registry.replace(b, CollisionFilter::new(0b10, 0b10));

        let mut bp = broadphase();
        let events = bp.update(&mut registry);
        assert!(events.created_manifolds.is_empty());
    }

    #[test]
    fn test_separation_destroys_manifold() {
        let mut registry = Registry::new();
        let a = spawn(&mut registry, Point3::new(0.0, 0.99, 0.0), 0.5, BodyKind::Dynamic);
        let _b = spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Static);

        let mut bp = broadphase();
        bp.update(&mut registry);
        assert_eq!(registry.count::<ContactManifold>(), 1);

        // Move the dynamic body far away and refresh its AABB.
        let new_pos = Point3::new(0.0, 10.0, 0.0);
        registry.replace(a, Position(new_pos));
        let shape = *registry.get::<Shape>(a);
        registry.replace(a, shape.aabb(&new_pos, &UnitQuaternion::identity()));

        let events = bp.update(&mut registry);
        assert_eq!(events.destroyed_manifolds.len(), 1);
        assert_eq!(registry.count::<ContactManifold>(), 0);
    }

    #[test]
    fn test_dynamic_pair_reported_once() {
        let mut registry = Registry::new();
        spawn(&mut registry, Point3::new(0.0, 0.9, 0.0), 0.5, BodyKind::Dynamic);
        spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Dynamic);

        let mut bp = broadphase();
        let events = bp.update(&mut registry);
        assert_eq!(events.created_manifolds.len(), 1);
    }

    #[test]
    fn test_body_destroyed_removes_leaf() {
        let mut registry = Registry::new();
        let a = spawn(&mut registry, Point3::origin(), 0.5, BodyKind::Dynamic);

        let mut bp = broadphase();
        bp.update(&mut registry);

        bp.on_body_destroyed(a);
        registry.destroy(a);
        assert_eq!(bp.view().len(), 0);
    }

    #[test]
    fn test_parallel_scan_matches_sequential() {
        let mut registry = Registry::new();
        for i in 0..6 {
            spawn(
                &mut registry,
                Point3::new(f64::from(i) * 0.8, 0.0, 0.0),
                0.5,
                BodyKind::Dynamic,
            );
        }

        let mut bp = broadphase();
        bp.common_update(&mut registry);

        let scan = bp.pair_scan(&registry);
        let all = scan.scan_range(0, scan.len());
        let mut chunked = Vec::new();
        for start in 0..scan.len() {
            chunked.extend(scan.scan_range(start, start + 1));
        }

        assert_eq!(all.len(), chunked.len());
        assert!(!all.is_empty());
    }
}
