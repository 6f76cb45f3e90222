//! Island workers, coordinator and the host-facing [`Simulation`] API.
//!
//! The engine partitions the body/constraint graph into connected components
//! ("islands"). Each island is simulated by a worker owning a private
//! registry, scheduled as run-to-completion jobs on a shared dispatcher. The
//! coordinator owns the master registry, routes registry deltas between the
//! host and the workers, and handles island splits and merges as the graph
//! changes.
//!
//! ```no_run
//! use talus_engine::Simulation;
//! use talus_types::{RigidBodyDef, Shape, SimConfig};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut sim = Simulation::new(SimConfig::default()).unwrap();
//! let body = sim
//!     .create_body(
//!         RigidBodyDef::dynamic()
//!             .with_position(Point3::new(0.0, 3.0, 0.0))
//!             .with_shape(Shape::sphere(0.5)),
//!     )
//!     .unwrap();
//!
//! loop {
//!     sim.step(1.0 / 60.0);
//!     let position = sim.body_position(body).unwrap();
//!     if position.y < 0.0 {
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::significant_drop_tightening)]

mod coordinator;
mod dispatcher;
mod hooks;
mod message;
mod worker;

pub use coordinator::Simulation;
pub use dispatcher::JobDispatcher;
pub use hooks::ExternalHooks;
pub use message::{CoordinatorMessage, WorkerMessage};
