//! Rigid-body components.
//!
//! Each rigid body is an entity carrying a subset of these components. The
//! components are deliberately small newtypes so that deltas can ship them
//! independently and the solver can borrow exactly what it touches.

use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Discriminator for how a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyKind {
    /// Full dynamics: integrates forces, receives solver impulses.
    #[default]
    Dynamic,
    /// Infinite mass, zero velocity forever.
    Static,
    /// Infinite mass, velocity controlled by the host.
    Kinematic,
}

impl BodyKind {
    /// Whether the body moves under simulation or host control.
    ///
    /// Procedural bodies (dynamic and kinematic) live in the broadphase tree
    /// that is refit every step; static bodies live in the other.
    #[must_use]
    pub fn is_procedural(self) -> bool {
        matches!(self, Self::Dynamic | Self::Kinematic)
    }

    /// Whether the body has infinite mass.
    #[must_use]
    pub fn is_fixed_mass(self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

/// World-space position of the body origin.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position(pub Point3<f64>);

impl Default for Position {
    fn default() -> Self {
        Self(Point3::origin())
    }
}

/// World-space orientation as a unit quaternion.
///
/// Renormalized after every integration step; consumers may assume
/// `|q| = 1 ± 1e-6`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Orientation(pub UnitQuaternion<f64>);

impl Default for Orientation {
    fn default() -> Self {
        Self(UnitQuaternion::identity())
    }
}

/// Linear velocity (m/s).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinVel(pub Vector3<f64>);

impl Default for LinVel {
    fn default() -> Self {
        Self(Vector3::zeros())
    }
}

/// Angular velocity (rad/s).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AngVel(pub Vector3<f64>);

impl Default for AngVel {
    fn default() -> Self {
        Self(Vector3::zeros())
    }
}

/// Linear acceleration (m/s²), typically gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinAcc(pub Vector3<f64>);

impl Default for LinAcc {
    fn default() -> Self {
        Self(Vector3::zeros())
    }
}

/// Mass (kg). Infinite for static and kinematic bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mass(pub f64);

/// Inverse mass (1/kg). Zero for infinite mass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InvMass(pub f64);

/// Body-frame inertia tensor diagonal (kg·m²).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Inertia(pub Vector3<f64>);

/// Inverse of the body-frame inertia diagonal. Zero for infinite inertia.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InvInertia(pub Vector3<f64>);

/// World-frame inverse inertia tensor, `R · diag(I⁻¹) · Rᵀ`.
///
/// Recomputed after orientations change so the solver reads it directly.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldInvInertia(pub Matrix3<f64>);

impl WorldInvInertia {
    /// Rotate a body-frame inverse inertia diagonal into world frame.
    #[must_use]
    pub fn from_local(inv_inertia: &InvInertia, orientation: &UnitQuaternion<f64>) -> Self {
        let basis = orientation.to_rotation_matrix();
        let local = Matrix3::from_diagonal(&inv_inertia.0);
        Self(basis * local * basis.transpose())
    }
}

impl Default for WorldInvInertia {
    fn default() -> Self {
        Self(Matrix3::zeros())
    }
}

/// Velocity change accumulated by the solver during iterations.
///
/// Only dynamic bodies carry delta-velocity slots. Folded into [`LinVel`]
/// after the iteration loop and zeroed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeltaLinVel(pub Vector3<f64>);

impl Default for DeltaLinVel {
    fn default() -> Self {
        Self(Vector3::zeros())
    }
}

/// Angular counterpart of [`DeltaLinVel`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeltaAngVel(pub Vector3<f64>);

impl Default for DeltaAngVel {
    fn default() -> Self {
        Self(Vector3::zeros())
    }
}

/// Smoothed position for interpolated rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresentPosition(pub Point3<f64>);

/// Smoothed orientation for interpolated rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresentOrientation(pub UnitQuaternion<f64>);

/// Tag on entities belonging to a sleeping island.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sleeping;

/// Tag preventing the containing island from ever sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepingDisabled;

/// Tag requesting contact points be exported in every delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContinuousContacts;
