//! Core data types for the talus rigid-body physics engine.
//!
//! This crate provides the foundational types shared by every other talus
//! crate:
//!
//! - [`Entity`] - Opaque identifier for a simulated object
//! - Body components ([`Position`], [`Orientation`], [`LinVel`], [`AngVel`], ...)
//! - [`Shape`] - Tagged collision-shape variant
//! - [`Material`] - Surface response parameters and their mixing rules
//! - [`ContactManifold`] / [`ContactPoint`] - Persistent collision records
//! - [`Constraint`] - Tagged constraint variant
//! - [`SimConfig`] - Timestep, solver, sleeping and broadphase settings
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They carry no stepping logic, no collision
//! detection, no solver state machinery. They are the common language between
//! the registry, the collision pipeline, the constraint solver, and the
//! island/coordinator layer built on top.
//!
//! # Coordinate System
//!
//! Right-handed, Y up, world units in meters, `f64` scalars throughout.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

mod aabb;
mod body;
mod body_def;
mod config;
mod constraint;
mod contact;
mod entity;
mod error;
mod filter;
mod island;
mod map_entities;
mod material;
mod shape;

pub use aabb::Aabb;
pub use body::{
    AngVel, BodyKind, DeltaAngVel, DeltaLinVel, ContinuousContacts, Inertia, InvInertia, InvMass,
    LinAcc, LinVel, Mass, Orientation, Position, PresentOrientation, PresentPosition, Sleeping,
    SleepingDisabled, WorldInvInertia,
};
pub use body_def::RigidBodyDef;
pub use config::SimConfig;
pub use constraint::{Constraint, ConstraintImpulse, ConstraintKind, MAX_CONSTRAINT_ROWS};
pub use contact::{ContactManifold, ContactPoint, MAX_CONTACT_POINTS};
pub use entity::Entity;
pub use error::TalusError;
pub use filter::CollisionFilter;
pub use island::{IslandContainer, IslandTimestamp};
pub use map_entities::MapEntities;
pub use material::{Material, RIGID_STIFFNESS};
pub use shape::Shape;

// Re-export math types for convenience.
pub use nalgebra::{Matrix3, Point3, Quaternion, UnitQuaternion, Vector3};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, TalusError>;
