//! Collision filtering.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Group/mask collision filter.
///
/// Two bodies may collide when each body's group intersects the other's
/// mask: `(a.group & b.mask) != 0 && (b.group & a.mask) != 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionFilter {
    /// Membership bits.
    pub group: u64,
    /// Bits of groups this body collides with.
    pub mask: u64,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: u64::MAX,
            mask: u64::MAX,
        }
    }
}

impl CollisionFilter {
    /// Create a filter from group and mask bits.
    #[must_use]
    pub const fn new(group: u64, mask: u64) -> Self {
        Self { group, mask }
    }

    /// Whether two filters permit collision.
    #[must_use]
    pub const fn allows(&self, other: &Self) -> bool {
        (self.group & other.mask) != 0 && (other.group & self.mask) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_collides_with_everything() {
        let a = CollisionFilter::default();
        let b = CollisionFilter::default();
        assert!(a.allows(&b));
    }

    #[test]
    fn test_disjoint_groups_do_not_collide() {
        let a = CollisionFilter::new(0b01, 0b01);
        let b = CollisionFilter::new(0b10, 0b10);
        assert!(!a.allows(&b));
    }

    #[test]
    fn test_filtering_is_mutual() {
        // a can see b, but b cannot see a: no collision.
        let a = CollisionFilter::new(0b01, 0b10);
        let b = CollisionFilter::new(0b10, 0b00);
        assert!(!a.allows(&b));
        assert!(!b.allows(&a));
    }
}
