//! Entity-component registry for the talus engine.
//!
//! This crate provides the storage primitive every other part of the engine
//! is built on:
//!
//! - [`Registry`] - sparse mapping from [`Entity`] identifiers to per-component
//!   pools, with a fixed, compile-time component set
//! - [`EntityMap`] - bijection between a peer's entity identifiers and local
//!   ones, maintained by each side of a delta exchange
//! - [`Delta`] / [`DeltaBuilder`] - batches of registry mutations exchanged
//!   between the coordinator and island workers
//! - [`PoolSnapshot`] - per-component-type `(entity, value)` lists, the
//!   logical unit of state replication
//!
//! # Identifier spaces
//!
//! Every registry issues its own entities. Deltas always carry identifiers in
//! the **sender's** space; the receiver translates through its [`EntityMap`]
//! on import, creating local entities for identifiers it has never seen and
//! silently skipping records about identifiers it cannot resolve (the sender
//! re-sends on reconciliation).
//!
//! # Component indices
//!
//! Component type indices are fixed here at compile time and shared by the
//! delta and snapshot formats; reordering them is a wire-format break.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::missing_errors_doc)]

mod delta;
mod entity_map;
mod registry;

pub use delta::{DeltaBuilder, PoolDelta};
pub use entity_map::EntityMap;
pub use registry::{Component, ComponentValue, Delta, PoolSnapshot, Registry};

pub use talus_types::Entity;
