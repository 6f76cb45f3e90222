//! Surface materials and mixing rules.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stiffness value treated as rigid; contacts between bodies whose mixed
/// stiffness reaches this value get an unbounded normal impulse.
pub const RIGID_STIFFNESS: f64 = 1e20;

/// Surface response parameters of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Coefficient of restitution in `[0, 1]`.
    pub restitution: f64,
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Contact spring stiffness (N/m). [`RIGID_STIFFNESS`] means rigid.
    pub stiffness: f64,
    /// Contact damping (N·s/m). Only meaningful for soft contacts.
    pub damping: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.0,
            friction: 0.5,
            stiffness: RIGID_STIFFNESS,
            damping: 0.0,
        }
    }
}

impl Material {
    /// Create a rigid material with the given restitution and friction.
    #[must_use]
    pub fn new(restitution: f64, friction: f64) -> Self {
        Self {
            restitution,
            friction,
            ..Default::default()
        }
    }

    /// Create a soft material with explicit stiffness and damping.
    #[must_use]
    pub fn soft(restitution: f64, friction: f64, stiffness: f64, damping: f64) -> Self {
        Self {
            restitution,
            friction,
            stiffness,
            damping,
        }
    }

    /// Whether contacts against this material are compliant.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        self.stiffness < RIGID_STIFFNESS
    }

    /// Combine the materials of two touching bodies into per-contact values.
    ///
    /// Restitution takes the maximum of the pair, friction the geometric
    /// mean. When either side is soft, stiffness mixes in series
    /// (`1/k = 1/kA + 1/kB`) and damping likewise, modeling the two contact
    /// springs end to end.
    #[must_use]
    pub fn mix(&self, other: &Self) -> Self {
        let soft = self.is_soft() || other.is_soft();
        let (stiffness, damping) = if soft {
            (
                series(self.stiffness, other.stiffness),
                series(self.damping, other.damping),
            )
        } else {
            (RIGID_STIFFNESS, 0.0)
        };

        Self {
            restitution: self.restitution.max(other.restitution),
            friction: (self.friction * other.friction).sqrt(),
            stiffness,
            damping,
        }
    }
}

fn series(a: f64, b: f64) -> f64 {
    if a <= 0.0 || b <= 0.0 {
        0.0
    } else {
        a * b / (a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_rigid() {
        let m = Material::default();
        assert!(!m.is_soft());
    }

    #[test]
    fn test_mix_rigid_pair_stays_rigid() {
        let a = Material::new(0.3, 0.8);
        let b = Material::new(0.7, 0.2);
        let mixed = a.mix(&b);

        assert!(!mixed.is_soft());
        assert_relative_eq!(mixed.restitution, 0.7, epsilon = 1e-12);
        assert_relative_eq!(mixed.friction, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_mix_soft_uses_series_stiffness() {
        let a = Material::soft(0.0, 0.5, 1000.0, 10.0);
        let b = Material::soft(0.0, 0.5, 1000.0, 10.0);
        let mixed = a.mix(&b);

        assert!(mixed.is_soft());
        assert_relative_eq!(mixed.stiffness, 500.0, epsilon = 1e-12);
        assert_relative_eq!(mixed.damping, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mix_soft_against_rigid() {
        let soft = Material::soft(0.0, 0.5, 1000.0, 0.0);
        let rigid = Material::default();
        let mixed = soft.mix(&rigid);

        assert!(mixed.is_soft());
        // Series with a near-infinite spring is dominated by the soft one.
        assert_relative_eq!(mixed.stiffness, 1000.0, epsilon = 1e-3);
    }
}
