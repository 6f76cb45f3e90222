//! Dynamic AABB tree spatial index.
//!
//! A self-balancing binary tree of axis-aligned bounding boxes used by the
//! broadphase. Leaves carry an entity payload; internal nodes bound their
//! children. Supports O(log n) insert, remove and move:
//!
//! - **Fat AABBs**: leaves store boxes enlarged by a margin so small motions
//!   refit in place instead of re-inserting
//! - **SAH descent**: insertion picks the sibling minimizing surface-area
//!   growth
//! - **Rotations**: AVL-style balancing along the ancestor chain keeps
//!   queries O(log n)
//!
//! [`TreeView`] is a flat read-only snapshot of the leaves for export to
//! other threads.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod tree;
mod view;

pub use tree::{DynamicTree, TreeNodeId};
pub use view::TreeView;
