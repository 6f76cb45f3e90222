//! Opaque entity identifiers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier for a simulated object in a registry.
///
/// An entity packs a 32-bit slot index and a 32-bit generation. The
/// generation disambiguates recycled slots so that a stale identifier held
/// after destruction never aliases a newly created object.
///
/// Entities are only meaningful relative to the registry that issued them.
/// Workers and the coordinator each issue their own and translate through an
/// entity map when exchanging deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity(u64);

impl Entity {
    /// Build an entity from a slot index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// The slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    /// The generation of the slot at the time this entity was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The packed 64-bit representation.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuild an entity from its packed representation.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}
