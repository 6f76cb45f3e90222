//! The island worker: a private registry stepped by a run-to-completion
//! state machine.
//!
//! A worker never blocks a pool thread: each state handler does bounded work
//! and either continues inline, reschedules itself through the dispatcher,
//! or forks subtasks and suspends until the last subtask reposts it.
//!
//! ```text
//! Init → Step → BeginStep → Solve → Broadphase[Async]
//!                  ↑                      ↓
//!               FinishStep ← Narrowphase[Async]
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use talus_collision::{Broadphase, BroadphaseEvents, CandidatePair, CollisionResult, Narrowphase};
use talus_dynamics::{update_presentation, Solver};
use talus_graph::{ConstraintGraph, EdgeIndex, NodeIndex};
use talus_registry::{Delta, DeltaBuilder, EntityMap, Registry};
use talus_types::{
    Aabb, AngVel, BodyKind, Constraint, ContactManifold, ContinuousContacts, Entity,
    IslandTimestamp, LinVel, Orientation, Position, PresentOrientation, PresentPosition,
    SimConfig, Sleeping, SleepingDisabled,
};
use tracing::{debug, trace, warn};

use crate::dispatcher::JobDispatcher;
use crate::hooks::ExternalHooks;
use crate::message::{CoordinatorMessage, WorkerMessage};

/// Presentation transforms close half the remaining gap per step.
const PRESENTATION_ALPHA: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Init,
    Step,
    BeginStep,
    Solve,
    Broadphase,
    BroadphaseAsync,
    Narrowphase,
    NarrowphaseAsync,
    FinishStep,
    Terminated,
}

struct PendingPairs {
    results: Arc<Mutex<Vec<CandidatePair>>>,
    events: BroadphaseEvents,
}

struct PendingNarrow {
    results: Arc<Mutex<Vec<(Entity, CollisionResult)>>>,
}

/// Shared handle the dispatcher jobs and the coordinator use to drive one
/// worker.
pub(crate) struct WorkerHost {
    worker: Mutex<IslandWorker>,
    /// Pending reschedule requests; coalesces internal reschedules and
    /// makes external wake-ups force an immediate run.
    counter: AtomicU32,
    /// Set once the worker released its registry.
    pub terminated: AtomicBool,
    dispatcher: Arc<JobDispatcher>,
}

pub(crate) type WorkerRef = Arc<WorkerHost>;

/// Launch a worker: ownership transfers to the dispatcher until it
/// terminates.
pub(crate) fn spawn_worker(worker: IslandWorker, dispatcher: Arc<JobDispatcher>) -> WorkerRef {
    let host = Arc::new(WorkerHost {
        worker: Mutex::new(worker),
        counter: AtomicU32::new(0),
        terminated: AtomicBool::new(false),
        dispatcher,
    });
    schedule_now(&host);
    host
}

/// Request an immediate run (external wake-up); coalesced with any pending
/// request.
pub(crate) fn schedule_now(host: &WorkerRef) {
    if host.counter.fetch_add(1, Ordering::AcqRel) == 0 {
        let h = Arc::clone(host);
        host.dispatcher.dispatch(move || run(&h));
    }
}

fn schedule_after(host: &WorkerRef, delay: Duration) {
    if host.counter.fetch_add(1, Ordering::AcqRel) == 0 {
        let h = Arc::clone(host);
        host.dispatcher.dispatch_after(delay, move || run(&h));
    }
}

/// Mid-chain continuation: repost without touching the request counter, so
/// requests arriving during the step are picked up at the end of it.
fn continue_now(host: &WorkerRef) {
    let h = Arc::clone(host);
    host.dispatcher.dispatch(move || run(&h));
}

fn run(host: &WorkerRef) {
    let mut worker = match host.worker.lock() {
        Ok(worker) => worker,
        Err(poisoned) => poisoned.into_inner(),
    };
    worker.update(host);
}

/// An island's simulation state and step machinery.
pub(crate) struct IslandWorker {
    registry: Registry,
    entity_map: EntityMap,
    builder: DeltaBuilder,
    graph: ConstraintGraph,
    node_index: HashMap<Entity, NodeIndex>,
    edge_index: HashMap<Entity, EdgeIndex>,
    broadphase: Broadphase,
    narrowphase: Narrowphase,
    solver: Solver,
    config: SimConfig,
    hooks: Arc<ExternalHooks>,

    state: WorkerState,
    paused: bool,
    /// The island entity in coordinator space.
    island_remote: Entity,
    /// Manifolds imported since the last step, awaiting point seeding.
    new_manifolds: Vec<Entity>,
    topology_changed: bool,
    pending_split_at: Option<f64>,
    sleep_since: Option<f64>,
    step_start: f64,
    epoch: Instant,

    pending_pairs: Option<PendingPairs>,
    pending_narrow: Option<PendingNarrow>,

    inbox: Receiver<WorkerMessage>,
    outbox: Sender<CoordinatorMessage>,
}

impl IslandWorker {
    pub(crate) fn new(
        config: SimConfig,
        island_remote: Entity,
        epoch: Instant,
        hooks: Arc<ExternalHooks>,
        inbox: Receiver<WorkerMessage>,
        outbox: Sender<CoordinatorMessage>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            entity_map: EntityMap::new(),
            builder: DeltaBuilder::new(),
            graph: ConstraintGraph::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
            broadphase: Broadphase::new(
                config.aabb_fat_margin,
                config.aabb_query_offset,
                config.manifold_separation_threshold,
            ),
            narrowphase: Narrowphase::new(
                config.contact_caching_distance,
                config.contact_breaking_distance,
                config.narrowphase_parallel_threshold,
            ),
            solver: Solver::new(config.solver_iterations),
            hooks,
            state: WorkerState::Init,
            paused: false,
            island_remote,
            new_manifolds: Vec::new(),
            topology_changed: false,
            pending_split_at: None,
            sleep_since: None,
            step_start: 0.0,
            epoch,
            pending_pairs: None,
            pending_narrow: None,
            inbox,
            outbox,
            config,
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn island_local(&self) -> Option<Entity> {
        self.entity_map.local_of(self.island_remote)
    }

    fn is_sleeping(&self) -> bool {
        self.island_local()
            .is_some_and(|island| self.registry.has::<Sleeping>(island))
    }

    fn update(&mut self, host: &WorkerRef) {
        match self.state {
            WorkerState::Init => {
                if self.init(host) {
                    self.maybe_reschedule(host);
                }
            }
            WorkerState::Step => {
                if !self.process_messages(host) {
                    return;
                }
                if self.should_step() {
                    self.begin_step();
                    self.run_solver();
                    if self.run_broadphase(host) && self.run_narrowphase(host) {
                        self.finish_step();
                        self.maybe_reschedule(host);
                    }
                } else {
                    self.maybe_reschedule(host);
                }
            }
            WorkerState::BeginStep => {
                self.begin_step();
                continue_now(host);
            }
            WorkerState::Solve => {
                self.run_solver();
                continue_now(host);
            }
            WorkerState::Broadphase => {
                if self.run_broadphase(host) {
                    continue_now(host);
                }
            }
            WorkerState::BroadphaseAsync => {
                self.finish_broadphase();
                if self.run_narrowphase(host) {
                    self.finish_step();
                    self.maybe_reschedule(host);
                }
            }
            WorkerState::Narrowphase => {
                if self.run_narrowphase(host) {
                    self.finish_step();
                    self.maybe_reschedule(host);
                }
            }
            WorkerState::NarrowphaseAsync => {
                self.finish_narrowphase();
                self.finish_step();
                self.maybe_reschedule(host);
            }
            WorkerState::FinishStep => {
                self.finish_step();
                self.maybe_reschedule(host);
            }
            WorkerState::Terminated => {}
        }
    }

    /// Returns false when a queued terminate aborted initialization.
    fn init(&mut self, host: &WorkerRef) -> bool {
        // Apply whatever the coordinator queued before launch (the
        // hydration delta at minimum).
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                WorkerMessage::Delta(delta) => self.on_delta(&delta),
                WorkerMessage::SetPaused(paused) => self.paused = paused,
                WorkerMessage::Terminate => {
                    self.do_terminate(host);
                    return false;
                }
                other => trace!(?other, "message ignored during init"),
            }
        }

        if let Some(hook) = &self.hooks.init {
            hook(&mut self.registry);
        }

        // Seed the broadphase trees and the freshly imported manifolds.
        let events = self.broadphase.common_update(&mut self.registry);
        self.apply_broadphase_events(events);
        let seeds = std::mem::take(&mut self.new_manifolds);
        self.narrowphase.update_manifolds(&mut self.registry, &seeds);

        if let Some(island) = self.island_local() {
            let aabb = self.broadphase.view().root_aabb().unwrap_or_default();
            self.registry.emplace(island, aabb);
            self.builder.updated(island, aabb);
        }

        self.sync();
        debug!(island = %self.island_remote, bodies = self.registry.len(), "worker initialized");
        self.state = WorkerState::Step;
        true
    }

    /// Drain the inbox; returns false when the worker terminated.
    fn process_messages(&mut self, host: &WorkerRef) -> bool {
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                WorkerMessage::Delta(delta) => self.on_delta(&delta),
                WorkerMessage::SetPaused(paused) => {
                    self.paused = paused;
                    if let Some(island) = self.island_local() {
                        let now = self.now();
                        self.registry.replace(island, IslandTimestamp(now));
                    }
                }
                WorkerMessage::StepSimulation => {
                    if !self.is_sleeping() {
                        self.state = WorkerState::BeginStep;
                    }
                }
                WorkerMessage::WakeUp => self.wake_up(),
                WorkerMessage::Terminate => {
                    self.do_terminate(host);
                    return false;
                }
            }
        }
        true
    }

    fn do_terminate(&mut self, host: &WorkerRef) {
        self.state = WorkerState::Terminated;
        self.registry = Registry::new();
        self.graph = ConstraintGraph::new();
        let _ = self.outbox.send(CoordinatorMessage::Terminated {
            island: self.island_remote,
        });
        host.terminated.store(true, Ordering::Release);
        debug!(island = %self.island_remote, "worker terminated");
    }

    fn should_step(&mut self) -> bool {
        let time = self.now();

        if self.state == WorkerState::BeginStep {
            self.step_start = time;
            return true;
        }
        if self.paused || self.is_sleeping() {
            return false;
        }
        let Some(island) = self.island_local() else {
            return false;
        };
        let timestamp = self.registry.get::<IslandTimestamp>(island).0;
        if time - timestamp < self.config.fixed_dt {
            return false;
        }

        self.step_start = time;
        self.state = WorkerState::BeginStep;
        true
    }

    fn begin_step(&mut self) {
        if let Some(hook) = &self.hooks.pre_step {
            hook(&mut self.registry);
        }

        // Find contact points for manifolds imported from the coordinator.
        let seeds = std::mem::take(&mut self.new_manifolds);
        if !seeds.is_empty() {
            self.narrowphase.update_manifolds(&mut self.registry, &seeds);
        }

        self.state = WorkerState::Solve;
    }

    fn run_solver(&mut self) {
        self.solver.update(&mut self.registry, self.config.fixed_dt);
        self.state = WorkerState::Broadphase;
    }

    /// Returns false when pair generation forked and the worker suspended.
    fn run_broadphase(&mut self, host: &WorkerRef) -> bool {
        if self.broadphase.parallelizable(&self.registry) {
            let events = self.broadphase.common_update(&mut self.registry);
            let scan = Arc::new(self.broadphase.pair_scan(&self.registry));
            if scan.is_empty() {
                self.apply_broadphase_events(events);
                self.state = WorkerState::Narrowphase;
                return true;
            }
            let results = Arc::new(Mutex::new(Vec::new()));

            let chunk = (scan.len() / host.dispatcher.thread_count().max(1)).max(1);
            let num_chunks = scan.len().div_ceil(chunk);
            let remaining = Arc::new(AtomicUsize::new(num_chunks));

            self.pending_pairs = Some(PendingPairs {
                results: Arc::clone(&results),
                events,
            });
            self.state = WorkerState::BroadphaseAsync;

            for index in 0..num_chunks {
                let scan = Arc::clone(&scan);
                let results = Arc::clone(&results);
                let remaining = Arc::clone(&remaining);
                let h = Arc::clone(host);
                host.dispatcher.dispatch(move || {
                    let pairs = scan.scan_range(index * chunk, (index + 1) * chunk);
                    if let Ok(mut merged) = results.lock() {
                        merged.extend(pairs);
                    }
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        continue_now(&h);
                    }
                });
            }
            false
        } else {
            let events = self.broadphase.update(&mut self.registry);
            self.apply_broadphase_events(events);
            self.state = WorkerState::Narrowphase;
            true
        }
    }

    fn finish_broadphase(&mut self) {
        let Some(pending) = self.pending_pairs.take() else {
            warn!("broadphase continuation without pending state");
            self.state = WorkerState::Narrowphase;
            return;
        };
        let pairs = match pending.results.lock() {
            Ok(mut results) => std::mem::take(&mut *results),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let mut events = pending.events;
        self.broadphase
            .apply_pairs(&mut self.registry, &pairs, &mut events);
        self.apply_broadphase_events(events);
        self.state = WorkerState::Narrowphase;
    }

    /// Returns false when pair evaluation forked and the worker suspended.
    fn run_narrowphase(&mut self, host: &WorkerRef) -> bool {
        if self.narrowphase.parallelizable(&self.registry) {
            let work = self.narrowphase.collect_work(&self.registry);
            if work.is_empty() {
                self.state = WorkerState::FinishStep;
                return true;
            }
            let results = Arc::new(Mutex::new(Vec::new()));

            let chunk = (work.len() / host.dispatcher.thread_count().max(1)).max(1);
            let chunks: Vec<_> = work.chunks(chunk).map(<[_]>::to_vec).collect();
            let remaining = Arc::new(AtomicUsize::new(chunks.len()));

            self.pending_narrow = Some(PendingNarrow {
                results: Arc::clone(&results),
            });
            self.state = WorkerState::NarrowphaseAsync;

            for batch in chunks {
                let results = Arc::clone(&results);
                let remaining = Arc::clone(&remaining);
                let h = Arc::clone(host);
                host.dispatcher.dispatch(move || {
                    let evaluated: Vec<_> =
                        batch.iter().map(|w| (w.entity, w.detect())).collect();
                    if let Ok(mut merged) = results.lock() {
                        merged.extend(evaluated);
                    }
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        continue_now(&h);
                    }
                });
            }
            false
        } else {
            self.narrowphase.update(&mut self.registry);
            self.state = WorkerState::FinishStep;
            true
        }
    }

    fn finish_narrowphase(&mut self) {
        let Some(pending) = self.pending_narrow.take() else {
            warn!("narrowphase continuation without pending state");
            self.state = WorkerState::FinishStep;
            return;
        };
        let results = match pending.results.lock() {
            Ok(mut results) => std::mem::take(&mut *results),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        self.narrowphase.apply(&mut self.registry, results);
        self.state = WorkerState::FinishStep;
    }

    fn finish_step(&mut self) {
        let Some(island) = self.island_local() else {
            self.state = WorkerState::Step;
            return;
        };

        // Advance the island clock, capping how far behind real time the
        // worker may fall: excess time is dropped, not caught up.
        let mut timestamp = self.registry.get::<IslandTimestamp>(island).0;
        let lag = self.step_start - timestamp;
        let num_steps = (lag / self.config.fixed_dt).floor();
        if num_steps > f64::from(self.config.max_lagging_steps) {
            let remainder = lag - num_steps * self.config.fixed_dt;
            timestamp = self.step_start
                - (remainder + f64::from(self.config.max_lagging_steps) * self.config.fixed_dt);
        } else {
            timestamp += self.config.fixed_dt;
        }
        self.registry.replace(island, IslandTimestamp(timestamp));
        self.builder.updated(island, IslandTimestamp(timestamp));

        update_presentation(&mut self.registry, PRESENTATION_ALPHA);

        // Refresh the exported island bounds.
        let aabb = self.broadphase.view().root_aabb().unwrap_or_default();
        self.registry.emplace(island, aabb);
        self.builder.updated(island, aabb);

        self.maybe_go_to_sleep(island, timestamp);

        if self.topology_changed {
            let time = self.now();
            match self.pending_split_at {
                Some(since) if time - since > self.config.split_calculation_delay => {
                    self.pending_split_at = None;
                    self.topology_changed = false;
                    if !self.graph.is_single_connected_component() {
                        self.send_split();
                    }
                }
                Some(_) => {}
                None => self.pending_split_at = Some(time),
            }
        }

        if let Some(hook) = &self.hooks.post_step {
            hook(&mut self.registry);
        }

        self.sync();
        self.state = WorkerState::Step;
    }

    fn send_split(&mut self) {
        let mut components = Vec::new();
        let graph = &self.graph;
        let map = &self.entity_map;
        graph.connected_components(|nodes, _| {
            let bodies: Vec<Entity> = nodes
                .iter()
                .filter_map(|n| map.remote_of(graph.node_entity(*n)))
                .collect();
            if !bodies.is_empty() {
                components.push(bodies);
            }
        });

        if components.len() > 1 {
            debug!(island = %self.island_remote, parts = components.len(), "island split");
            let _ = self.outbox.send(CoordinatorMessage::SplitIsland {
                island: self.island_remote,
                components,
            });
        }
    }

    fn maybe_go_to_sleep(&mut self, island: Entity, timestamp: f64) {
        if self.could_go_to_sleep() {
            match self.sleep_since {
                None => self.sleep_since = Some(timestamp),
                Some(since) if timestamp - since > self.config.time_to_sleep => {
                    self.go_to_sleep(island);
                    self.sleep_since = None;
                }
                Some(_) => {}
            }
        } else {
            self.sleep_since = None;
        }
    }

    fn could_go_to_sleep(&self) -> bool {
        if self.registry.any_with::<SleepingDisabled>() {
            return false;
        }

        let linear_sq = self.config.linear_sleep_threshold * self.config.linear_sleep_threshold;
        let angular_sq = self.config.angular_sleep_threshold * self.config.angular_sleep_threshold;

        for entity in self.registry.entities_with2::<LinVel, BodyKind>() {
            if !self.registry.get::<BodyKind>(entity).is_procedural() {
                continue;
            }
            if self.registry.get::<LinVel>(entity).0.norm_squared() > linear_sq {
                return false;
            }
            if self
                .registry
                .try_get::<AngVel>(entity)
                .is_some_and(|w| w.0.norm_squared() > angular_sq)
            {
                return false;
            }
        }
        true
    }

    fn go_to_sleep(&mut self, island: Entity) {
        debug!(island = %self.island_remote, "island sleeping");
        self.registry.emplace(island, Sleeping);
        self.builder.created(island, Sleeping);

        for entity in self.registry.entities_with::<BodyKind>() {
            if !self.registry.get::<BodyKind>(entity).is_procedural() {
                continue;
            }
            if let Some(v) = self.registry.try_get_mut::<LinVel>(entity) {
                v.0 = nalgebra::Vector3::zeros();
                let value = *v;
                self.builder.updated(entity, value);
            }
            if let Some(w) = self.registry.try_get_mut::<AngVel>(entity) {
                w.0 = nalgebra::Vector3::zeros();
                let value = *w;
                self.builder.updated(entity, value);
            }
            self.registry.emplace(entity, Sleeping);
            self.builder.created(entity, Sleeping);
        }
    }

    fn wake_up(&mut self) {
        let Some(island) = self.island_local() else {
            return;
        };
        if !self.registry.has::<Sleeping>(island) {
            return;
        }
        debug!(island = %self.island_remote, "island woken");

        let now = self.now();
        self.registry.replace(island, IslandTimestamp(now));
        self.builder.updated(island, IslandTimestamp(now));

        for entity in self.registry.entities_with::<Sleeping>() {
            self.registry.remove::<Sleeping>(entity);
            self.builder.destroyed::<Sleeping>(entity);
        }
        self.sleep_since = None;
    }

    fn on_delta(&mut self, delta: &Delta) {
        // Clean side tables for entities the delta is about to destroy.
        for remote in &delta.destroyed_entities {
            let Some(local) = self.entity_map.local_of(*remote) else {
                continue;
            };
            self.forget_entity(local);
        }

        delta.import(&mut self.registry, &mut self.entity_map);

        // Echo identifier pairs for entities the coordinator just created.
        for remote in &delta.created_entities {
            if let Some(local) = self.entity_map.local_of(*remote) {
                self.builder.insert_mapping(local, *remote);
            }
        }

        // Mirror imported bodies, manifolds and constraints into the graph.
        for remote in &delta.created_entities {
            let Some(local) = self.entity_map.local_of(*remote) else {
                continue;
            };
            if let Some(kind) = self.registry.try_get::<BodyKind>(local) {
                let connecting = matches!(kind, BodyKind::Dynamic);
                let node = self.graph.insert_node_with(local, connecting);
                self.node_index.insert(local, node);
            }
        }
        for remote in &delta.created_entities {
            let Some(local) = self.entity_map.local_of(*remote) else {
                continue;
            };
            if let Some(manifold) = self.registry.try_get::<ContactManifold>(local) {
                let manifold = manifold.clone();
                self.insert_edge_for(local, manifold.body);
                self.broadphase.on_manifold_imported(local, &manifold);
                self.new_manifolds.push(local);
            } else if let Some(constraint) = self.registry.try_get::<Constraint>(local) {
                let body = constraint.body;
                self.insert_edge_for(local, body);
            }
        }
    }

    fn insert_edge_for(&mut self, entity: Entity, body: [Entity; 2]) {
        let (Some(&a), Some(&b)) = (self.node_index.get(&body[0]), self.node_index.get(&body[1]))
        else {
            warn!(%entity, "edge endpoints missing from graph");
            return;
        };
        let edge = self.graph.insert_edge(entity, a, b);
        self.edge_index.insert(entity, edge);
    }

    /// Remove an entity from every side table before it is destroyed.
    fn forget_entity(&mut self, local: Entity) {
        if let Some(edge) = self.edge_index.remove(&local) {
            if self.graph.edge_alive(edge) {
                self.graph.remove_edge(edge);
            }
            self.topology_changed = true;
            if let Some(manifold) = self.registry.try_get::<ContactManifold>(local) {
                self.broadphase.on_manifold_destroyed(manifold);
            }
        }
        if let Some(node) = self.node_index.remove(&local) {
            // Incident edges wrap manifold/constraint entities that stay in
            // the registry until their own destruction; detach them now.
            let incident: Vec<EdgeIndex> = self.graph.incident_edges(node).to_vec();
            for edge in incident {
                let edge_entity = self.graph.edge_entity(edge);
                self.edge_index.remove(&edge_entity);
            }
            self.graph.remove_node(node);
            self.topology_changed = true;
            self.broadphase.on_body_destroyed(local);
        }
    }

    fn apply_broadphase_events(&mut self, events: BroadphaseEvents) {
        for (entity, _manifold) in &events.destroyed_manifolds {
            if let Some(edge) = self.edge_index.remove(entity) {
                if self.graph.edge_alive(edge) {
                    self.graph.remove_edge(edge);
                }
            }
            self.topology_changed = true;
            self.builder.destroyed_entity(*entity);
        }

        for entity in &events.created_manifolds {
            let manifold = self.registry.get::<ContactManifold>(*entity).clone();
            self.insert_edge_for(*entity, manifold.body);
            self.builder.created_entity(*entity);
            self.builder.created(*entity, manifold);
        }
    }

    /// Export this step's state changes and dispatch them atomically.
    fn sync(&mut self) {
        for entity in self.registry.entities_with::<Aabb>() {
            if self
                .registry
                .try_get::<BodyKind>(entity)
                .is_some_and(|k| k.is_procedural())
            {
                self.builder.updated(entity, *self.registry.get::<Aabb>(entity));
            }
        }

        for entity in self.registry.entities_with::<BodyKind>() {
            if !self.registry.get::<BodyKind>(entity).is_procedural() {
                continue;
            }
            self.builder
                .updated(entity, *self.registry.get::<Position>(entity));
            self.builder
                .updated(entity, *self.registry.get::<Orientation>(entity));
            self.builder
                .updated(entity, *self.registry.get::<LinVel>(entity));
            self.builder
                .updated(entity, *self.registry.get::<AngVel>(entity));

            if let Some(present) = self.registry.try_get::<PresentPosition>(entity) {
                self.builder.updated(entity, *present);
            }
            if let Some(present) = self.registry.try_get::<PresentOrientation>(entity) {
                self.builder.updated(entity, *present);
            }
        }

        // Contact points ride along only where requested.
        for entity in self.registry.entities_with::<ContactManifold>() {
            let manifold = self.registry.get::<ContactManifold>(entity);
            let wanted = manifold.body.iter().any(|b| {
                self.registry.has::<ContinuousContacts>(*b)
            });
            if wanted {
                self.builder.updated(entity, manifold.clone());
            }
        }

        if !self.builder.is_empty() {
            let delta = self.builder.finish();
            let _ = self.outbox.send(CoordinatorMessage::Delta {
                island: self.island_remote,
                delta,
            });
        }
    }

    fn maybe_reschedule(&mut self, host: &WorkerRef) {
        let sleeping = self.is_sleeping();
        let requests = host.counter.swap(0, Ordering::AcqRel);
        debug_assert!(requests != 0);

        if requests == 1 {
            // Only the internal reschedule: pace against the island clock.
            if !self.paused && !sleeping {
                self.reschedule_later(host);
            }
        } else {
            // External requests arrived during the run: rerun immediately.
            schedule_now(host);
        }
    }

    fn reschedule_later(&self, host: &WorkerRef) {
        let delay = self
            .island_local()
            .map(|island| {
                self.registry.get::<IslandTimestamp>(island).0 + self.config.fixed_dt - self.now()
            })
            .unwrap_or(self.config.fixed_dt);

        if delay > 0.0 {
            schedule_after(host, Duration::from_secs_f64(delay));
        } else {
            schedule_now(host);
        }
    }
}

impl std::fmt::Debug for IslandWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IslandWorker")
            .field("island", &self.island_remote)
            .field("state", &self.state)
            .field("bodies", &self.registry.len())
            .finish_non_exhaustive()
    }
}
