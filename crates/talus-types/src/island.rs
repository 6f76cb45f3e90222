//! Island bookkeeping components.

use smallvec::SmallVec;

use crate::Entity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Simulation time of an island's last completed step (s).
///
/// Carried by the island entity itself; workers advance it by `fixed_dt`
/// each step and the coordinator reads it to decide which workers lag.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IslandTimestamp(pub f64);

/// The island entities a body belongs to.
///
/// Dynamic bodies belong to exactly one island; static and kinematic bodies
/// may touch several.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IslandContainer {
    /// Islands this entity is a member of.
    pub islands: SmallVec<[Entity; 2]>,
}

impl IslandContainer {
    /// A container holding a single island.
    #[must_use]
    pub fn single(island: Entity) -> Self {
        let mut islands = SmallVec::new();
        islands.push(island);
        Self { islands }
    }

    /// Add an island if not already present.
    pub fn insert(&mut self, island: Entity) {
        if !self.islands.contains(&island) {
            self.islands.push(island);
        }
    }

    /// Remove an island if present.
    pub fn remove(&mut self, island: Entity) {
        self.islands.retain(|e| *e != island);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let island = Entity::new(9, 0);
        let mut c = IslandContainer::default();
        c.insert(island);
        c.insert(island);
        assert_eq!(c.islands.len(), 1);
    }

    #[test]
    fn test_remove() {
        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        let mut c = IslandContainer::single(a);
        c.insert(b);
        c.remove(a);
        assert_eq!(c.islands.as_slice(), &[b]);
    }
}
