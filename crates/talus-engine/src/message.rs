//! Typed messages between the coordinator and island workers.
//!
//! Each worker owns the receiving end of a multi-producer single-consumer
//! queue and drains it on its own thread at the top of every update. All
//! worker-to-coordinator traffic funnels into one queue the coordinator
//! drains from the host thread.

use talus_registry::Delta;
use talus_types::Entity;

/// Messages a worker consumes.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Registry mutations from the coordinator, in coordinator identifier
    /// space.
    Delta(Delta),
    /// Pause or resume stepping.
    SetPaused(bool),
    /// Force a single step, even while paused.
    StepSimulation,
    /// Wake a sleeping island.
    WakeUp,
    /// Release the registry and stop; the worker object is dropped
    /// afterwards.
    Terminate,
}

/// Messages the coordinator consumes.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Registry mutations from a worker, in that worker's identifier space.
    Delta {
        /// The island (coordinator space) the delta came from.
        island: Entity,
        /// The mutations.
        delta: Delta,
    },
    /// The worker's graph fell apart into multiple connected components.
    SplitIsland {
        /// The island (coordinator space) requesting the split.
        island: Entity,
        /// Body entities per component, in coordinator space. Bodies whose
        /// coordinator identifier is not known yet are omitted.
        components: Vec<Vec<Entity>>,
    },
    /// The worker finished terminating.
    Terminated {
        /// The island (coordinator space) whose worker stopped.
        island: Entity,
    },
}
