//! Joint constraints between body pairs.
//!
//! Constraints are tagged variants; each variant owns the parameters its row
//! preparation needs. Contact constraints are not represented here: contacts
//! flow through [`ContactManifold`](crate::ContactManifold), which acts as
//! the graph edge for colliding pairs.

use nalgebra::{UnitQuaternion, Vector3};

use crate::Entity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum solver rows any single constraint emits.
pub const MAX_CONSTRAINT_ROWS: usize = 6;

/// A constraint between two bodies.
///
/// Body order is significant: rows are written with `body[0]` as "A" and
/// `body[1]` as "B".
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Constraint {
    /// The constrained bodies.
    pub body: [Entity; 2],
    /// The constraint behavior and parameters.
    pub kind: ConstraintKind,
}

/// Constraint behavior variants.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintKind {
    /// Pin a point of A to a point of B (ball joint); three rows.
    Point {
        /// Pivot in each body's local frame.
        pivot: [Vector3<f64>; 2],
    },
    /// Keep two local points at a fixed distance; one row.
    Distance {
        /// Pivot in each body's local frame.
        pivot: [Vector3<f64>; 2],
        /// Rest distance (m).
        distance: f64,
    },
    /// Spring-damper distance constraint; one row with force-derived limits.
    SoftDistance {
        /// Pivot in each body's local frame.
        pivot: [Vector3<f64>; 2],
        /// Rest distance (m).
        distance: f64,
        /// Spring stiffness (N/m).
        stiffness: f64,
        /// Damping (N·s/m).
        damping: f64,
    },
    /// Point constraint plus alignment of a local axis pair; five rows.
    Hinge {
        /// Pivot in each body's local frame.
        pivot: [Vector3<f64>; 2],
        /// Hinge axis in each body's local frame (unit length).
        axis: [Vector3<f64>; 2],
    },
    /// Lock all six relative degrees of freedom; six rows.
    Generic {
        /// Pivot in each body's local frame.
        pivot: [Vector3<f64>; 2],
        /// Relative orientation `ornA⁻¹ · ornB` to hold, captured at
        /// creation.
        rest_orientation: UnitQuaternion<f64>,
    },
}

impl Constraint {
    /// Create a constraint between two bodies.
    #[must_use]
    pub const fn new(body_a: Entity, body_b: Entity, kind: ConstraintKind) -> Self {
        Self {
            body: [body_a, body_b],
            kind,
        }
    }

    /// Number of solver rows this constraint emits.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self.kind {
            ConstraintKind::Distance { .. } | ConstraintKind::SoftDistance { .. } => 1,
            ConstraintKind::Point { .. } => 3,
            ConstraintKind::Hinge { .. } => 5,
            ConstraintKind::Generic { .. } => 6,
        }
    }
}

/// Accumulated impulses of a constraint's rows, kept across steps for
/// warm-starting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintImpulse {
    /// One accumulated impulse per emitted row, in emission order.
    pub values: [f64; MAX_CONSTRAINT_ROWS],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_counts() {
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        let pivot = [Vector3::zeros(), Vector3::zeros()];

        assert_eq!(
            Constraint::new(a, b, ConstraintKind::Point { pivot }).num_rows(),
            3
        );
        assert_eq!(
            Constraint::new(
                a,
                b,
                ConstraintKind::Distance {
                    pivot,
                    distance: 1.0
                }
            )
            .num_rows(),
            1
        );
        assert_eq!(
            Constraint::new(
                a,
                b,
                ConstraintKind::Hinge {
                    pivot,
                    axis: [Vector3::y(), Vector3::y()]
                }
            )
            .num_rows(),
            5
        );
        assert_eq!(
            Constraint::new(
                a,
                b,
                ConstraintKind::Generic {
                    pivot,
                    rest_orientation: UnitQuaternion::identity()
                }
            )
            .num_rows(),
            6
        );
    }

    #[test]
    fn test_max_rows_covers_all_kinds() {
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        let pivot = [Vector3::zeros(), Vector3::zeros()];
        let all = [
            Constraint::new(a, b, ConstraintKind::Point { pivot }),
            Constraint::new(
                a,
                b,
                ConstraintKind::SoftDistance {
                    pivot,
                    distance: 1.0,
                    stiffness: 100.0,
                    damping: 1.0,
                },
            ),
            Constraint::new(
                a,
                b,
                ConstraintKind::Generic {
                    pivot,
                    rest_orientation: UnitQuaternion::identity(),
                },
            ),
        ];
        for c in all {
            assert!(c.num_rows() <= MAX_CONSTRAINT_ROWS);
        }
    }
}
