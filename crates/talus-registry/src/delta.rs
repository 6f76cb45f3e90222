//! Delta pools and the builder that accumulates them.

use talus_types::Entity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::registry::{Component, Delta, Registry};
use crate::EntityMap;

/// Created/updated/destroyed records for one component type.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolDelta<T> {
    /// Components attached since the last delta.
    pub created: Vec<(Entity, T)>,
    /// Components whose value changed.
    pub updated: Vec<(Entity, T)>,
    /// Components detached.
    pub destroyed: Vec<Entity>,
}

impl<T> Default for PoolDelta<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            destroyed: Vec::new(),
        }
    }
}

impl<T> PoolDelta<T> {
    /// Whether the pool delta carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }
}

impl<T: Component> PoolDelta<T> {
    pub(crate) fn import(&self, registry: &mut Registry, map: &EntityMap) {
        for (remote, value) in self.created.iter().chain(self.updated.iter()) {
            if let Some(local) = map.local_of(*remote) {
                if registry.is_alive(local) {
                    // Entity references inside the value translate too; a
                    // record with unresolved references is dropped whole.
                    let mut value = value.clone();
                    if value.map_entities(&mut |e| map.local_of(e)) {
                        registry.emplace(local, value);
                    }
                }
            }
        }

        for remote in &self.destroyed {
            if let Some(local) = map.local_of(*remote) {
                registry.remove::<T>(local);
            }
        }
    }
}

/// Accumulates registry mutations into a [`Delta`] over the course of a step.
///
/// Records are appended in sender-local identifier space; `finish` hands the
/// delta off for atomic dispatch and resets the builder.
#[derive(Debug, Default)]
pub struct DeltaBuilder {
    delta: Delta,
}

impl DeltaBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identifier pair so the receiver can link `local` to its own
    /// `remote` entity.
    pub fn insert_mapping(&mut self, local: Entity, remote: Entity) {
        self.delta.mappings.push((local, remote));
    }

    /// Record a newly created entity.
    pub fn created_entity(&mut self, entity: Entity) {
        self.delta.created_entities.push(entity);
    }

    /// Record a destroyed entity.
    pub fn destroyed_entity(&mut self, entity: Entity) {
        self.delta.destroyed_entities.push(entity);
    }

    /// Record a component attached to an entity.
    pub fn created<C: Component>(&mut self, entity: Entity, value: C) {
        C::delta_pool_mut(&mut self.delta).created.push((entity, value));
    }

    /// Record a component value change.
    pub fn updated<C: Component>(&mut self, entity: Entity, value: C) {
        C::delta_pool_mut(&mut self.delta).updated.push((entity, value));
    }

    /// Record a component detached from an entity.
    pub fn destroyed<C: Component>(&mut self, entity: Entity) {
        C::delta_pool_mut(&mut self.delta).destroyed.push(entity);
    }

    /// Record an entity as created together with every component it
    /// currently carries.
    pub fn created_with_components(&mut self, registry: &Registry, entity: Entity) {
        self.delta.created_entities.push(entity);
        self.delta.record_components(registry, entity);
    }

    /// Whether nothing has been recorded since the last `finish`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Take the accumulated delta, leaving the builder empty.
    pub fn finish(&mut self) -> Delta {
        std::mem::take(&mut self.delta)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use talus_types::{LinVel, Position};

    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_builder_accumulates_and_resets() {
        let mut builder = DeltaBuilder::new();
        assert!(builder.is_empty());

        let e = Entity::new(0, 0);
        builder.created_entity(e);
        builder.created(e, Position(Point3::new(1.0, 0.0, 0.0)));
        builder.updated(e, LinVel(Vector3::y()));
        assert!(!builder.is_empty());

        let delta = builder.finish();
        assert!(builder.is_empty());
        assert_eq!(delta.created_entities, vec![e]);
        assert_eq!(delta.position.created.len(), 1);
        assert_eq!(delta.linvel.updated.len(), 1);
    }

    #[test]
    fn test_round_trip_through_registry() {
        // Build a delta, apply it to an empty registry, re-export, and
        // compare the pool contents.
        let mut builder = DeltaBuilder::new();
        let remote = Entity::new(7, 0);
        builder.created_entity(remote);
        builder.created(remote, Position(Point3::new(0.5, 1.5, 2.5)));
        let delta = builder.finish();

        let mut registry = Registry::new();
        let mut map = EntityMap::new();
        delta.import(&mut registry, &mut map);

        let local = map.local_of(remote).unwrap();
        let pools = registry.export_pools(&[local]);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].component_index, 0);
        assert_eq!(pools[0].entries.len(), 1);
    }
}
