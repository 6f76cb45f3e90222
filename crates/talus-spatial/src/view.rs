//! Read-only tree snapshots.

use talus_types::{Aabb, Entity};

use crate::DynamicTree;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A flattened, read-only snapshot of a [`DynamicTree`]'s leaves.
///
/// Workers export a view of their broadphase tree every step; the
/// coordinator queries views without touching live worker state. Views are
/// plain leaf lists: island trees are small and a linear scan beats
/// rebuilding hierarchy on every export.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeView {
    leaves: Vec<(Entity, Aabb)>,
}

impl TreeView {
    /// Snapshot the leaves of a tree.
    #[must_use]
    pub fn of(tree: &DynamicTree) -> Self {
        let mut leaves = Vec::with_capacity(tree.leaf_count());
        tree.each_leaf(|_, entity, aabb| leaves.push((entity, *aabb)));
        Self { leaves }
    }

    /// Visit every leaf intersecting `aabb`.
    pub fn query<F: FnMut(Entity)>(&self, aabb: &Aabb, mut visitor: F) {
        for (entity, leaf) in &self.leaves {
            if leaf.intersects(aabb) {
                visitor(*entity);
            }
        }
    }

    /// The union of all leaf AABBs, if the view is non-empty.
    #[must_use]
    pub fn root_aabb(&self) -> Option<Aabb> {
        let mut leaves = self.leaves.iter();
        let first = leaves.next()?.1;
        Some(leaves.fold(first, |acc, (_, aabb)| acc.union(aabb)))
    }

    /// Number of leaves in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the view has no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
