//! Entity-reference rewriting for components crossing registry boundaries.

use crate::{
    Aabb, AngVel, BodyKind, CollisionFilter, Constraint, ConstraintImpulse, ContactManifold,
    ContinuousContacts, DeltaAngVel, DeltaLinVel, Entity, Inertia, InvInertia, InvMass,
    IslandContainer, IslandTimestamp, LinAcc, LinVel, Mass, Material, Orientation, Position,
    PresentOrientation, PresentPosition, Shape, Sleeping, SleepingDisabled, WorldInvInertia,
};

/// Rewrites the entity references a component value carries.
///
/// Deltas and snapshots ship component values between registries with
/// different identifier spaces. The importer translates the keying entity
/// through its entity map, and this trait translates references *inside*
/// the value (a manifold's body pair, a constraint's endpoints). Most
/// components carry none and use the default no-op.
pub trait MapEntities {
    /// Rewrite every entity reference through `f`.
    ///
    /// Returns false when any reference failed to resolve, in which case
    /// the importer drops the record (the sender re-sends on
    /// reconciliation).
    fn map_entities(&mut self, f: &mut dyn FnMut(Entity) -> Option<Entity>) -> bool {
        let _ = f;
        true
    }
}

impl MapEntities for ContactManifold {
    fn map_entities(&mut self, f: &mut dyn FnMut(Entity) -> Option<Entity>) -> bool {
        for body in &mut self.body {
            match f(*body) {
                Some(local) => *body = local,
                None => return false,
            }
        }
        true
    }
}

impl MapEntities for Constraint {
    fn map_entities(&mut self, f: &mut dyn FnMut(Entity) -> Option<Entity>) -> bool {
        for body in &mut self.body {
            match f(*body) {
                Some(local) => *body = local,
                None => return false,
            }
        }
        true
    }
}

impl MapEntities for IslandContainer {
    fn map_entities(&mut self, f: &mut dyn FnMut(Entity) -> Option<Entity>) -> bool {
        for island in &mut self.islands {
            match f(*island) {
                Some(local) => *island = local,
                None => return false,
            }
        }
        true
    }
}

macro_rules! no_entity_refs {
    ($($Ty:ty),+ $(,)?) => {
        $( impl MapEntities for $Ty {} )+
    };
}

no_entity_refs!(
    Position,
    Orientation,
    LinVel,
    AngVel,
    LinAcc,
    Mass,
    InvMass,
    Inertia,
    InvInertia,
    WorldInvInertia,
    DeltaLinVel,
    DeltaAngVel,
    BodyKind,
    Shape,
    Material,
    CollisionFilter,
    Aabb,
    PresentPosition,
    PresentOrientation,
    ConstraintImpulse,
    IslandTimestamp,
    Sleeping,
    SleepingDisabled,
    ContinuousContacts,
);

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_manifold_bodies_are_rewritten() {
        let mut manifold = ContactManifold::new(Entity::new(7, 0), Entity::new(9, 0), 0.08);
        let ok = manifold.map_entities(&mut |e| Some(Entity::new(e.index() + 100, 0)));
        assert!(ok);
        assert_eq!(manifold.body[0], Entity::new(107, 0));
        assert_eq!(manifold.body[1], Entity::new(109, 0));
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let mut manifold = ContactManifold::new(Entity::new(7, 0), Entity::new(9, 0), 0.08);
        let ok = manifold.map_entities(&mut |_| None);
        assert!(!ok);
    }

    #[test]
    fn test_plain_components_are_untouched() {
        let mut velocity = LinVel(Vector3::x());
        assert!(velocity.map_entities(&mut |_| None));
        assert_eq!(velocity.0, Vector3::x());
    }
}
