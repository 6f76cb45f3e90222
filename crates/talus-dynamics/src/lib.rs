//! Constraint solver and integration.
//!
//! Each step, preparation code walks contact manifolds and joint constraints
//! in a fixed order and emits scalar constraint rows into a flat
//! [`RowCache`]. The solver then runs a fixed number of projected
//! Gauss-Seidel iterations over the rows in emission order, accumulating
//! clamped impulses into per-body delta velocities, folds the deltas into
//! the body velocities, and integrates velocities to new transforms.
//!
//! Emission order is part of the solver's convergence behavior: contacts
//! come first (normal row before friction row within each point), then
//! distance, soft-distance, point, hinge and generic constraints. Accumulated
//! impulses are written back to their owning contact points and constraints
//! for warm-starting the next step.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::similar_names,
    clippy::many_single_char_names
)]

mod integrate;
mod prepare;
mod row;
mod solver;

pub use integrate::{
    apply_gravity, integrate_velocities, update_aabbs, update_presentation, update_world_inertia,
};
pub use row::{ConstraintRow, RowCache, RowOptions};
pub use solver::Solver;
