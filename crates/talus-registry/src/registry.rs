//! The component registry and its fixed component set.

use hashbrown::HashMap;
use talus_types::{
    Aabb, AngVel, BodyKind, CollisionFilter, Constraint, ConstraintImpulse, ContactManifold,
    ContinuousContacts, DeltaAngVel, DeltaLinVel, Entity, Inertia, InvInertia, InvMass,
    IslandContainer, IslandTimestamp, LinAcc, LinVel, MapEntities, Mass, Material, Orientation,
    Position, PresentOrientation, PresentPosition, Shape, Sleeping, SleepingDisabled,
    WorldInvInertia,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::delta::PoolDelta;
use crate::EntityMap;

/// A component type storable in the [`Registry`].
///
/// Implemented for the fixed component set below; the associated `INDEX` is
/// the component type index used by the delta and snapshot wire formats.
/// The [`MapEntities`] bound lets importers rewrite entity references
/// carried inside component values.
pub trait Component: Clone + Send + Sync + MapEntities + 'static {
    /// Fixed component type index.
    const INDEX: u32;

    #[doc(hidden)]
    fn pool(registry: &Registry) -> &HashMap<Entity, Self>;
    #[doc(hidden)]
    fn pool_mut(registry: &mut Registry) -> &mut HashMap<Entity, Self>;
    #[doc(hidden)]
    fn delta_pool(delta: &Delta) -> &PoolDelta<Self>;
    #[doc(hidden)]
    fn delta_pool_mut(delta: &mut Delta) -> &mut PoolDelta<Self>;
    #[doc(hidden)]
    fn wrap(self) -> ComponentValue;
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
}

impl EntityAllocator {
    fn create(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            self.alive[index as usize] = true;
            Entity::new(index, self.generations[index as usize])
        } else {
            let index = u32::try_from(self.generations.len()).unwrap_or_else(|_| {
                panic!("entity index space exhausted");
            });
            self.generations.push(0);
            self.alive.push(true);
            Entity::new(index, 0)
        }
    }

    fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        index < self.generations.len()
            && self.alive[index]
            && self.generations[index] == entity.generation()
    }

    fn destroy(&mut self, entity: Entity) {
        let index = entity.index() as usize;
        assert!(self.is_alive(entity), "destroy of unknown entity {entity}");
        self.alive[index] = false;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(entity.index());
    }

    fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.generations
            .iter()
            .zip(self.alive.iter())
            .enumerate()
            .filter(|(_, (_, alive))| **alive)
            .map(|(i, (generation, _))| Entity::new(i as u32, *generation))
    }

    fn len(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }
}

macro_rules! registry_components {
    ($( $index:literal => $field:ident : $Ty:ident ),+ $(,)?) => {
        /// Sparse mapping from entities to per-component storage.
        ///
        /// The component set is fixed at compile time; every pool is a hash
        /// map keyed by [`Entity`]. Iteration helpers return entities sorted
        /// by identifier so that systems walking the registry behave
        /// deterministically regardless of hashing.
        #[derive(Debug, Clone, Default)]
        pub struct Registry {
            allocator: EntityAllocator,
            $( $field: HashMap<Entity, $Ty>, )+
        }

        $(
            impl Component for $Ty {
                const INDEX: u32 = $index;

                fn pool(registry: &Registry) -> &HashMap<Entity, Self> {
                    &registry.$field
                }
                fn pool_mut(registry: &mut Registry) -> &mut HashMap<Entity, Self> {
                    &mut registry.$field
                }
                fn delta_pool(delta: &Delta) -> &PoolDelta<Self> {
                    &delta.$field
                }
                fn delta_pool_mut(delta: &mut Delta) -> &mut PoolDelta<Self> {
                    &mut delta.$field
                }
                fn wrap(self) -> ComponentValue {
                    ComponentValue::$Ty(self)
                }
            }
        )+

        impl Registry {
            fn remove_all_components(&mut self, entity: Entity) {
                $( self.$field.remove(&entity); )+
            }

            /// Export the pools of the given entities as snapshots, one per
            /// component type with at least one entry.
            #[must_use]
            pub fn export_pools(&self, entities: &[Entity]) -> Vec<PoolSnapshot> {
                let mut pools = Vec::new();
                $(
                    {
                        let entries: Vec<(Entity, ComponentValue)> = entities
                            .iter()
                            .filter_map(|e| {
                                self.$field
                                    .get(e)
                                    .map(|v| (*e, v.clone().wrap()))
                            })
                            .collect();
                        if !entries.is_empty() {
                            pools.push(PoolSnapshot {
                                component_index: $index,
                                entries,
                            });
                        }
                    }
                )+
                pools
            }
        }

        /// A batch of registry mutations addressed to a peer registry.
        ///
        /// Identifiers are in the **sender's** entity space. Deltas are
        /// append-only while a step runs and dispatched atomically.
        #[derive(Debug, Clone, Default)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct Delta {
            /// `(sender-local, receiver-local)` identifier pairs letting the
            /// receiver link entities it already owns.
            pub mappings: Vec<(Entity, Entity)>,
            /// Entities created by the sender.
            pub created_entities: Vec<Entity>,
            /// Entities destroyed by the sender.
            pub destroyed_entities: Vec<Entity>,
            $(
                #[doc = concat!("Per-pool records for `", stringify!($Ty), "`.")]
                pub $field: PoolDelta<$Ty>,
            )+
        }

        impl Delta {
            /// Whether the delta carries no records at all.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.mappings.is_empty()
                    && self.created_entities.is_empty()
                    && self.destroyed_entities.is_empty()
                    $( && self.$field.is_empty() )+
            }

            /// Record every component `entity` carries in `registry` as a
            /// `created` record. Used when hydrating a fresh peer registry.
            pub fn record_components(&mut self, registry: &Registry, entity: Entity) {
                $(
                    if let Some(value) = registry.$field.get(&entity) {
                        self.$field.created.push((entity, value.clone()));
                    }
                )+
            }

            /// Apply the delta to `registry`, translating identifiers
            /// through `map`.
            ///
            /// Mapping pairs are learned first, then created entities are
            /// instantiated locally (and recorded in `map`), then pool
            /// records are applied, then destroyed entities are removed.
            /// Records about unknown identifiers are skipped silently.
            pub fn import(&self, registry: &mut Registry, map: &mut EntityMap) {
                for (remote, local) in &self.mappings {
                    if registry.is_alive(*local) {
                        map.insert(*remote, *local);
                    }
                }

                for remote in &self.created_entities {
                    if map.local_of(*remote).is_none() {
                        let local = registry.create();
                        map.insert(*remote, local);
                    }
                }

                $( self.$field.import(registry, map); )+

                for remote in &self.destroyed_entities {
                    if let Some(local) = map.local_of(*remote) {
                        if registry.is_alive(local) {
                            registry.destroy(local);
                        }
                        map.remove_remote(*remote);
                    }
                }
            }
        }

        /// A component value tagged with its type, the snapshot currency.
        #[derive(Debug, Clone, PartialEq)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[allow(missing_docs)]
        pub enum ComponentValue {
            $( $Ty($Ty), )+
        }

        impl ComponentValue {
            /// The component type index of the wrapped value.
            #[must_use]
            pub fn component_index(&self) -> u32 {
                match self {
                    $( Self::$Ty(_) => $index, )+
                }
            }

            fn emplace_into(&self, registry: &mut Registry, entity: Entity, map: &EntityMap) {
                match self {
                    $(
                        Self::$Ty(value) => {
                            let mut value = value.clone();
                            if value.map_entities(&mut |e| map.local_of(e)) {
                                registry.emplace(entity, value);
                            }
                        }
                    )+
                }
            }
        }
    };
}

registry_components! {
    0 => position: Position,
    1 => orientation: Orientation,
    2 => linvel: LinVel,
    3 => angvel: AngVel,
    4 => linacc: LinAcc,
    5 => mass: Mass,
    6 => inv_mass: InvMass,
    7 => inertia: Inertia,
    8 => inv_inertia: InvInertia,
    9 => world_inv_inertia: WorldInvInertia,
    10 => delta_linvel: DeltaLinVel,
    11 => delta_angvel: DeltaAngVel,
    12 => body_kind: BodyKind,
    13 => shape: Shape,
    14 => material: Material,
    15 => collision_filter: CollisionFilter,
    16 => aabb: Aabb,
    17 => present_position: PresentPosition,
    18 => present_orientation: PresentOrientation,
    19 => contact_manifold: ContactManifold,
    20 => constraint: Constraint,
    21 => constraint_impulse: ConstraintImpulse,
    22 => island_timestamp: IslandTimestamp,
    23 => island_container: IslandContainer,
    24 => sleeping: Sleeping,
    25 => sleeping_disabled: SleepingDisabled,
    26 => continuous_contacts: ContinuousContacts,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh entity.
    pub fn create(&mut self) -> Entity {
        self.allocator.create()
    }

    /// Destroy an entity and every component attached to it.
    ///
    /// Destroying an unknown or stale entity is a programmer error and
    /// aborts.
    pub fn destroy(&mut self, entity: Entity) {
        self.remove_all_components(entity);
        self.allocator.destroy(entity);
    }

    /// Whether the entity is alive in this registry.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allocator.len()
    }

    /// Whether the registry holds no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach (or overwrite) a component on an entity.
    pub fn emplace<C: Component>(&mut self, entity: Entity, component: C) {
        debug_assert!(self.is_alive(entity), "emplace on dead entity {entity}");
        C::pool_mut(self).insert(entity, component);
    }

    /// Replace an existing component; the entity must already carry one.
    pub fn replace<C: Component>(&mut self, entity: Entity, component: C) {
        let slot = match C::pool_mut(self).get_mut(&entity) {
            Some(slot) => slot,
            None => panic!("replace of missing component on {entity}"),
        };
        *slot = component;
    }

    /// Detach a component, returning it if present.
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Option<C> {
        C::pool_mut(self).remove(&entity)
    }

    /// Borrow a component; aborts when absent.
    #[must_use]
    pub fn get<C: Component>(&self, entity: Entity) -> &C {
        match C::pool(self).get(&entity) {
            Some(component) => component,
            None => panic!("entity {entity} lacks required component"),
        }
    }

    /// Mutably borrow a component; aborts when absent.
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> &mut C {
        match C::pool_mut(self).get_mut(&entity) {
            Some(component) => component,
            None => panic!("entity {entity} lacks required component"),
        }
    }

    /// Borrow a component if present.
    #[must_use]
    pub fn try_get<C: Component>(&self, entity: Entity) -> Option<&C> {
        C::pool(self).get(&entity)
    }

    /// Mutably borrow a component if present.
    pub fn try_get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        C::pool_mut(self).get_mut(&entity)
    }

    /// Whether the entity carries the component.
    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        C::pool(self).contains_key(&entity)
    }

    /// Entities carrying component `C`, sorted by identifier.
    #[must_use]
    pub fn entities_with<C: Component>(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = C::pool(self).keys().copied().collect();
        entities.sort_unstable();
        entities
    }

    /// Entities carrying both `A` and `B`, sorted by identifier.
    #[must_use]
    pub fn entities_with2<A: Component, B: Component>(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = A::pool(self)
            .keys()
            .filter(|e| B::pool(self).contains_key(*e))
            .copied()
            .collect();
        entities.sort_unstable();
        entities
    }

    /// Whether any entity carries component `C`.
    #[must_use]
    pub fn any_with<C: Component>(&self) -> bool {
        !C::pool(self).is_empty()
    }

    /// Number of entities carrying component `C`.
    #[must_use]
    pub fn count<C: Component>(&self) -> usize {
        C::pool(self).len()
    }

    /// All live entities, sorted by identifier.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.allocator.entities().collect();
        entities.sort_unstable();
        entities
    }
}

/// A per-component-type `(entity, value)` list for state replication.
///
/// Entity references are in the exporter's space and must be translated
/// through the importer's [`EntityMap`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolSnapshot {
    /// Fixed component type index of every entry.
    pub component_index: u32,
    /// The exported values.
    pub entries: Vec<(Entity, ComponentValue)>,
}

impl PoolSnapshot {
    /// Apply the snapshot to a registry, translating entities through `map`
    /// and skipping unresolvable references.
    pub fn import(&self, registry: &mut Registry, map: &EntityMap) {
        for (remote, value) in &self.entries {
            debug_assert_eq!(value.component_index(), self.component_index);
            if let Some(local) = map.local_of(*remote) {
                if registry.is_alive(local) {
                    value.emplace_into(registry, local, map);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_create_destroy_recycles_with_new_generation() {
        let mut registry = Registry::new();
        let a = registry.create();
        registry.destroy(a);
        let b = registry.create();

        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!registry.is_alive(a));
        assert!(registry.is_alive(b));
    }

    #[test]
    fn test_destroy_removes_components() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.emplace(e, Position(Point3::new(1.0, 2.0, 3.0)));
        registry.emplace(e, LinVel(Vector3::x()));
        registry.destroy(e);

        let e2 = registry.create();
        assert_eq!(e2.index(), e.index());
        assert!(!registry.has::<Position>(e2));
        assert!(!registry.has::<LinVel>(e2));
    }

    #[test]
    #[should_panic(expected = "destroy of unknown entity")]
    fn test_double_destroy_panics() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.destroy(e);
        registry.destroy(e);
    }

    #[test]
    fn test_get_and_try_get() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.emplace(e, Mass(2.0));

        assert_eq!(registry.get::<Mass>(e).0, 2.0);
        assert!(registry.try_get::<LinVel>(e).is_none());
        assert!(registry.has::<Mass>(e));
    }

    #[test]
    fn test_entities_with_is_sorted() {
        let mut registry = Registry::new();
        let entities: Vec<Entity> = (0..8).map(|_| registry.create()).collect();
        for e in entities.iter().rev() {
            registry.emplace(*e, Mass(1.0));
        }

        let listed = registry.entities_with::<Mass>();
        assert_eq!(listed, entities);
    }

    #[test]
    fn test_entities_with2_intersects() {
        let mut registry = Registry::new();
        let a = registry.create();
        let b = registry.create();
        registry.emplace(a, Mass(1.0));
        registry.emplace(a, LinVel::default());
        registry.emplace(b, Mass(1.0));

        assert_eq!(registry.entities_with2::<Mass, LinVel>(), vec![a]);
    }

    #[test]
    fn test_delta_import_creates_and_maps() {
        let mut sender = Registry::new();
        let remote = sender.create();
        sender.emplace(remote, Position(Point3::new(1.0, 0.0, 0.0)));

        let mut delta = Delta::default();
        delta.created_entities.push(remote);
        delta
            .position
            .created
            .push((remote, Position(Point3::new(1.0, 0.0, 0.0))));

        let mut receiver = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut receiver, &mut map);

        let local = map.local_of(remote).unwrap();
        assert!(receiver.is_alive(local));
        assert_eq!(receiver.get::<Position>(local).0.x, 1.0);
    }

    #[test]
    fn test_delta_import_skips_unknown_references() {
        let mut delta = Delta::default();
        // An update about an entity the receiver has never seen.
        delta
            .position
            .updated
            .push((Entity::new(99, 0), Position::default()));
        delta.destroyed_entities.push(Entity::new(98, 0));

        let mut receiver = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut receiver, &mut map);

        assert!(receiver.is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn test_delta_import_destroy() {
        let mut delta = Delta::default();
        let remote = Entity::new(3, 0);
        delta.created_entities.push(remote);

        let mut receiver = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut receiver, &mut map);
        assert_eq!(receiver.len(), 1);

        let mut delta2 = Delta::default();
        delta2.destroyed_entities.push(remote);
        delta2.import(&mut receiver, &mut map);

        assert!(receiver.is_empty());
        assert!(!map.has_remote(remote));
    }

    #[test]
    fn test_delta_translates_entity_references_inside_values() {
        use talus_types::ContactManifold;

        // Sender-side: two bodies and a manifold between them.
        let body_a = Entity::new(10, 0);
        let body_b = Entity::new(11, 0);
        let manifold_entity = Entity::new(12, 0);

        let mut delta = Delta::default();
        delta.created_entities.extend([body_a, body_b, manifold_entity]);
        delta
            .contact_manifold
            .created
            .push((manifold_entity, ContactManifold::new(body_a, body_b, 0.08)));

        let mut receiver = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut receiver, &mut map);

        let local_manifold = map.local_of(manifold_entity).unwrap();
        let manifold = receiver.get::<ContactManifold>(local_manifold);
        assert_eq!(manifold.body[0], map.local_of(body_a).unwrap());
        assert_eq!(manifold.body[1], map.local_of(body_b).unwrap());
    }

    #[test]
    fn test_record_with_unresolved_references_is_dropped() {
        use talus_types::ContactManifold;

        // The manifold references a body the receiver never heard about.
        let manifold_entity = Entity::new(12, 0);
        let mut delta = Delta::default();
        delta.created_entities.push(manifold_entity);
        delta.contact_manifold.created.push((
            manifold_entity,
            ContactManifold::new(Entity::new(50, 0), Entity::new(51, 0), 0.08),
        ));

        let mut receiver = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut receiver, &mut map);

        let local = map.local_of(manifold_entity).unwrap();
        assert!(!receiver.has::<ContactManifold>(local));
    }

    #[test]
    fn test_pool_snapshot_round_trip() {
        let mut source = Registry::new();
        let e = source.create();
        source.emplace(e, Mass(3.0));
        source.emplace(e, Position(Point3::new(0.0, 2.0, 0.0)));

        let pools = source.export_pools(&[e]);
        assert_eq!(pools.len(), 2);

        let mut target = Registry::new();
        let local = target.create();
        let mut map = EntityMap::new();
        map.insert(e, local);

        for pool in &pools {
            pool.import(&mut target, &map);
        }

        assert_eq!(target.get::<Mass>(local).0, 3.0);
        assert_eq!(target.get::<Position>(local).0.y, 2.0);
    }
}
