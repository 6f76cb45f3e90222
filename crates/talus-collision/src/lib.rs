//! Collision pipeline: shape-pair kernels, persistent contact manifolds,
//! broadphase and narrowphase drivers.
//!
//! # Pipeline
//!
//! 1. The [`Broadphase`] keeps two dynamic AABB trees (one for procedural
//!    bodies, one for static bodies), refits them every step, destroys
//!    manifolds whose bodies separated, and creates a manifold for every new
//!    filtered AABB overlap.
//! 2. The [`Narrowphase`] runs the shape-pair kernel for every manifold and
//!    feeds candidate points through the persistence rules: merge near an
//!    existing pivot, insert while below capacity, otherwise replace to
//!    maximize contact area; prune separated or laterally drifted points.
//! 3. The solver consumes the surviving points as contact rows.
//!
//! Kernels are pure functions from two `(Shape, pose)` pairs to a
//! [`CollisionResult`]; dispatch is an explicit match on the tag pair with a
//! swap wrapper for the symmetric orderings.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::similar_names,
    clippy::many_single_char_names
)]

mod broadphase;
mod kernels;
mod manifold;
mod narrowphase;

pub use broadphase::{Broadphase, BroadphaseEvents, CandidatePair, PairScan};
pub use kernels::{collide, CandidatePoint, CollisionResult};
pub use manifold::{merge_result_into_manifold, prune_manifold, PointEvents};
pub use narrowphase::{ManifoldWork, Narrowphase};
