//! Rigid body definitions.

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::{BodyKind, CollisionFilter, Material, Shape, TalusError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything needed to create a rigid body.
///
/// # Example
///
/// ```
/// use talus_types::{RigidBodyDef, BodyKind, Shape};
/// use nalgebra::{Point3, Vector3};
///
/// let def = RigidBodyDef::dynamic()
///     .with_position(Point3::new(0.0, 3.0, 0.0))
///     .with_mass(1.0)
///     .with_shape(Shape::box_shape(Vector3::new(0.5, 0.5, 0.5)));
/// assert!(def.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RigidBodyDef {
    /// How the body participates in the simulation.
    pub kind: BodyKind,
    /// Initial position.
    pub position: Point3<f64>,
    /// Initial orientation; must be close to unit length.
    pub orientation: UnitQuaternion<f64>,
    /// Initial linear velocity.
    pub linvel: Vector3<f64>,
    /// Initial angular velocity.
    pub angvel: Vector3<f64>,
    /// Mass (kg); ignored for static and kinematic bodies.
    pub mass: f64,
    /// Body-frame inertia diagonal; computed from the shape when `None`.
    pub inertia: Option<Vector3<f64>>,
    /// Collision shape, if the body collides.
    pub shape: Option<Shape>,
    /// Surface material; required for contact response.
    pub material: Option<Material>,
    /// Collision filter; defaults to collide-with-everything.
    pub filter: CollisionFilter,
    /// Whether world gravity applies.
    pub gravity_sensitive: bool,
    /// Whether to maintain smoothed present transforms for rendering.
    pub presentation: bool,
    /// Whether contact points should be exported in every delta.
    pub continuous_contacts: bool,
    /// Whether the containing island may never sleep.
    pub sleeping_disabled: bool,
}

impl Default for RigidBodyDef {
    fn default() -> Self {
        Self {
            kind: BodyKind::Dynamic,
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
            linvel: Vector3::zeros(),
            angvel: Vector3::zeros(),
            mass: 1.0,
            inertia: None,
            shape: None,
            material: Some(Material::default()),
            filter: CollisionFilter::default(),
            gravity_sensitive: true,
            presentation: false,
            continuous_contacts: false,
            sleeping_disabled: false,
        }
    }
}

impl RigidBodyDef {
    /// A dynamic body definition with defaults.
    #[must_use]
    pub fn dynamic() -> Self {
        Self::default()
    }

    /// A static body definition.
    #[must_use]
    pub fn fixed() -> Self {
        Self {
            kind: BodyKind::Static,
            gravity_sensitive: false,
            ..Default::default()
        }
    }

    /// A kinematic body definition.
    #[must_use]
    pub fn kinematic() -> Self {
        Self {
            kind: BodyKind::Kinematic,
            gravity_sensitive: false,
            ..Default::default()
        }
    }

    /// Set the initial position.
    #[must_use]
    pub fn with_position(mut self, position: Point3<f64>) -> Self {
        self.position = position;
        self
    }

    /// Set the initial orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn with_linvel(mut self, linvel: Vector3<f64>) -> Self {
        self.linvel = linvel;
        self
    }

    /// Set the initial angular velocity.
    #[must_use]
    pub fn with_angvel(mut self, angvel: Vector3<f64>) -> Self {
        self.angvel = angvel;
        self
    }

    /// Set the mass.
    #[must_use]
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// Set the collision shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Set the surface material.
    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    /// Set the collision filter.
    #[must_use]
    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Enable smoothed present transforms.
    #[must_use]
    pub fn with_presentation(mut self, enabled: bool) -> Self {
        self.presentation = enabled;
        self
    }

    /// Forbid sleeping for the island containing this body.
    #[must_use]
    pub fn with_sleeping_disabled(mut self, disabled: bool) -> Self {
        self.sleeping_disabled = disabled;
        self
    }

    /// The inertia diagonal to use, deriving it from the shape if needed.
    ///
    /// Dynamic bodies without shape or explicit inertia fall back to a unit
    /// sphere of the given mass.
    #[must_use]
    pub fn effective_inertia(&self) -> Vector3<f64> {
        if let Some(inertia) = self.inertia {
            return inertia;
        }
        match &self.shape {
            Some(shape) => shape.inertia_diagonal(self.mass),
            None => Shape::sphere(1.0).inertia_diagonal(self.mass),
        }
    }

    /// Validate the definition.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kind == BodyKind::Dynamic {
            if !(self.mass.is_finite() && self.mass > 0.0) {
                return Err(TalusError::malformed(
                    "dynamic body requires positive finite mass",
                ));
            }
            let inertia = self.effective_inertia();
            if inertia.iter().any(|i| !i.is_finite() || *i <= 0.0) {
                return Err(TalusError::malformed(
                    "dynamic body requires positive finite inertia",
                ));
            }
        }

        if (self.orientation.norm() - 1.0).abs() > 1e-6 {
            return Err(TalusError::malformed("orientation must be unit length"));
        }

        if self.kind == BodyKind::Static && (self.linvel != Vector3::zeros() || self.angvel != Vector3::zeros()) {
            return Err(TalusError::malformed("static body cannot have velocity"));
        }

        Ok(())
    }
}
