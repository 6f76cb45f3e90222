//! Persistent contact manifolds and contact points.

use nalgebra::Vector3;
use smallvec::SmallVec;

use crate::Entity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of contact points a manifold retains.
pub const MAX_CONTACT_POINTS: usize = 4;

/// A single contact point inside a manifold.
///
/// Pivots are stored in each body's local frame so the point survives body
/// motion; world-space quantities are recomputed from the pivots every step.
/// The normal is attached to the second body's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactPoint {
    /// Contact pivot in body A's local frame.
    pub pivot_a: Vector3<f64>,
    /// Contact pivot in body B's local frame.
    pub pivot_b: Vector3<f64>,
    /// Contact normal in world space, pointing from B towards A.
    pub normal: Vector3<f64>,
    /// Contact normal in body B's local frame.
    pub local_normal: Vector3<f64>,
    /// Signed distance along the normal; negative means penetrating.
    pub distance: f64,
    /// Mixed restitution for this point.
    pub restitution: f64,
    /// Mixed friction for this point.
    pub friction: f64,
    /// Number of steps this point has persisted.
    pub lifetime: u32,
    /// Accumulated normal impulse, kept for warm-starting.
    pub normal_impulse: f64,
    /// Accumulated friction impulse, kept for warm-starting.
    pub friction_impulse: f64,
}

/// A persistent collision record between two bodies.
///
/// Created when the bodies' AABBs first overlap and destroyed when they
/// separate by more than [`separation_threshold`](Self::separation_threshold).
/// `body[0]` and `body[1]` are stable for the manifold's lifetime.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactManifold {
    /// The two bodies, in creation order.
    pub body: [Entity; 2],
    /// AABB separation beyond which the manifold is destroyed.
    pub separation_threshold: f64,
    /// Up to [`MAX_CONTACT_POINTS`] persistent points.
    pub points: SmallVec<[ContactPoint; MAX_CONTACT_POINTS]>,
}

impl ContactManifold {
    /// Create an empty manifold between two bodies.
    #[must_use]
    pub fn new(body_a: Entity, body_b: Entity, separation_threshold: f64) -> Self {
        Self {
            body: [body_a, body_b],
            separation_threshold,
            points: SmallVec::new(),
        }
    }

    /// Number of live contact points.
    #[must_use]
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Whether the manifold holds the maximum number of points.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.points.len() >= MAX_CONTACT_POINTS
    }

    /// Whether the manifold connects the given unordered pair.
    #[must_use]
    pub fn connects(&self, a: Entity, b: Entity) -> bool {
        (self.body[0] == a && self.body[1] == b) || (self.body[0] == b && self.body[1] == a)
    }

    /// The deepest penetration among the points, if any point penetrates.
    #[must_use]
    pub fn deepest_distance(&self) -> Option<f64> {
        self.points
            .iter()
            .map(|p| p.distance)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_at(distance: f64) -> ContactPoint {
        ContactPoint {
            pivot_a: Vector3::zeros(),
            pivot_b: Vector3::zeros(),
            normal: Vector3::y(),
            local_normal: Vector3::y(),
            distance,
            restitution: 0.0,
            friction: 0.5,
            lifetime: 0,
            normal_impulse: 0.0,
            friction_impulse: 0.0,
        }
    }

    #[test]
    fn test_connects_is_order_independent() {
        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        let m = ContactManifold::new(a, b, 0.04);

        assert!(m.connects(a, b));
        assert!(m.connects(b, a));
        assert!(!m.connects(a, Entity::new(3, 0)));
    }

    #[test]
    fn test_deepest_distance() {
        let mut m = ContactManifold::new(Entity::new(1, 0), Entity::new(2, 0), 0.04);
        assert!(m.deepest_distance().is_none());

        m.points.push(point_at(-0.01));
        m.points.push(point_at(-0.03));
        m.points.push(point_at(0.005));
        assert_eq!(m.deepest_distance(), Some(-0.03));
    }

    #[test]
    fn test_is_full() {
        let mut m = ContactManifold::new(Entity::new(1, 0), Entity::new(2, 0), 0.04);
        for _ in 0..MAX_CONTACT_POINTS {
            assert!(!m.is_full());
            m.points.push(point_at(0.0));
        }
        assert!(m.is_full());
    }
}
