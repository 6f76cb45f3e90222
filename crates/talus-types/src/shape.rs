//! Collision shapes.
//!
//! Shapes are a tagged variant rather than a trait object; the collision
//! pipeline dispatches on the `(Shape, Shape)` tag pair through an explicit
//! match, with swap-symmetric pairs routed through a canonical ordering.

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::Aabb;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A collision shape attached to a rigid body.
///
/// All shapes are defined in the body's local frame, centered at the body
/// origin. Capsules are aligned with the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// A sphere of the given radius.
    Sphere {
        /// Radius (m).
        radius: f64,
    },
    /// A box with the given half-extents.
    Box {
        /// Half-extents along the local axes (m).
        half_extents: Vector3<f64>,
    },
    /// A capsule aligned with the local Y axis.
    Capsule {
        /// Half the distance between the cap centers (m).
        half_length: f64,
        /// Cap radius (m).
        radius: f64,
    },
}

impl Shape {
    /// Create a sphere.
    #[must_use]
    pub const fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Create a box from half-extents.
    #[must_use]
    pub const fn box_shape(half_extents: Vector3<f64>) -> Self {
        Self::Box { half_extents }
    }

    /// Create a capsule aligned with the local Y axis.
    #[must_use]
    pub const fn capsule(half_length: f64, radius: f64) -> Self {
        Self::Capsule {
            half_length,
            radius,
        }
    }

    /// Compute the world-space AABB of the shape at the given transform.
    #[must_use]
    pub fn aabb(&self, position: &Point3<f64>, orientation: &UnitQuaternion<f64>) -> Aabb {
        match self {
            Self::Sphere { radius } => {
                let half = Vector3::new(*radius, *radius, *radius);
                Aabb::from_center(*position, half)
            }
            Self::Box { half_extents } => {
                // Extent of a rotated box along axis i is Σ_j |R_ij| · e_j.
                let r = orientation.to_rotation_matrix();
                let m = r.matrix().abs();
                let extents = m * half_extents;
                Aabb::from_center(*position, extents)
            }
            Self::Capsule {
                half_length,
                radius,
            } => {
                let axis = orientation * Vector3::new(0.0, *half_length, 0.0);
                let a = position + axis;
                let b = position - axis;
                let seg = Aabb::new(
                    Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
                    Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
                );
                seg.inflated(*radius)
            }
        }
    }

    /// Body-frame inertia tensor diagonal for the shape at the given mass.
    ///
    /// Solid, uniform-density formulas. Capsule inertia composes the
    /// cylinder body with the two hemispherical caps.
    #[must_use]
    pub fn inertia_diagonal(&self, mass: f64) -> Vector3<f64> {
        match self {
            Self::Sphere { radius } => {
                let i = 0.4 * mass * radius * radius;
                Vector3::new(i, i, i)
            }
            Self::Box { half_extents } => {
                let x2 = 4.0 * half_extents.x * half_extents.x;
                let y2 = 4.0 * half_extents.y * half_extents.y;
                let z2 = 4.0 * half_extents.z * half_extents.z;
                Vector3::new(
                    mass * (y2 + z2) / 12.0,
                    mass * (x2 + z2) / 12.0,
                    mass * (x2 + y2) / 12.0,
                )
            }
            Self::Capsule {
                half_length,
                radius,
            } => {
                let h = 2.0 * half_length;
                let r = *radius;
                let r2 = r * r;
                // Split mass between cylinder and caps by volume.
                let cyl_vol = std::f64::consts::PI * r2 * h;
                let cap_vol = 4.0 / 3.0 * std::f64::consts::PI * r2 * r;
                let total = cyl_vol + cap_vol;
                let m_cyl = mass * cyl_vol / total;
                let m_cap = mass * cap_vol / total;

                let axial = 0.5 * m_cyl * r2 + 0.4 * m_cap * r2;
                let radial = m_cyl * (3.0 * r2 + h * h) / 12.0
                    + m_cap * (0.4 * r2 + 0.5 * h * h + 3.0 / 8.0 * h * r);
                Vector3::new(radial, axial, radial)
            }
        }
    }
}
