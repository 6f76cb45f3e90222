//! Remote/local entity identifier translation.

use hashbrown::HashMap;
use talus_types::Entity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A bijection between a peer registry's entity identifiers ("remote") and
/// this registry's identifiers ("local").
///
/// Each side of a delta exchange owns one map per peer. Deltas carry
/// identifiers in the sender's space; the receiver resolves them here.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityMap {
    remote_to_local: HashMap<Entity, Entity>,
    local_to_remote: HashMap<Entity, Entity>,
}

impl EntityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote/local pair, replacing any previous association of
    /// either identifier.
    pub fn insert(&mut self, remote: Entity, local: Entity) {
        if let Some(old_local) = self.remote_to_local.insert(remote, local) {
            self.local_to_remote.remove(&old_local);
        }
        if let Some(old_remote) = self.local_to_remote.insert(local, remote) {
            self.remote_to_local.remove(&old_remote);
        }
        self.remote_to_local.insert(remote, local);
        self.local_to_remote.insert(local, remote);
    }

    /// Resolve a remote identifier.
    #[must_use]
    pub fn local_of(&self, remote: Entity) -> Option<Entity> {
        self.remote_to_local.get(&remote).copied()
    }

    /// Reverse-resolve a local identifier.
    #[must_use]
    pub fn remote_of(&self, local: Entity) -> Option<Entity> {
        self.local_to_remote.get(&local).copied()
    }

    /// Whether a remote identifier is known.
    #[must_use]
    pub fn has_remote(&self, remote: Entity) -> bool {
        self.remote_to_local.contains_key(&remote)
    }

    /// Whether a local identifier is known.
    #[must_use]
    pub fn has_local(&self, local: Entity) -> bool {
        self.local_to_remote.contains_key(&local)
    }

    /// Drop the pair associated with a remote identifier.
    pub fn remove_remote(&mut self, remote: Entity) {
        if let Some(local) = self.remote_to_local.remove(&remote) {
            self.local_to_remote.remove(&local);
        }
    }

    /// Drop the pair associated with a local identifier.
    pub fn remove_local(&mut self, local: Entity) {
        if let Some(remote) = self.local_to_remote.remove(&local) {
            self.remote_to_local.remove(&remote);
        }
    }

    /// Number of known pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }

    /// Iterate over `(remote, local)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.remote_to_local.iter().map(|(r, l)| (*r, *l))
    }
}
