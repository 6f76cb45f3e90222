//! The coordinator: master registry, delta routing, island lifecycle.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use talus_registry::{Delta, DeltaBuilder, EntityMap, Registry};
use talus_spatial::{DynamicTree, TreeNodeId};
use talus_types::{
    Aabb, AngVel, BodyKind, CollisionFilter, Constraint, ConstraintImpulse, ConstraintKind,
    ContactManifold, ContinuousContacts, DeltaAngVel, DeltaLinVel, Entity, Inertia,
    InvInertia, InvMass, IslandContainer, IslandTimestamp, LinAcc, LinVel, Mass, Orientation,
    Position, PresentOrientation, PresentPosition, RigidBodyDef, Result, SimConfig, Sleeping,
    SleepingDisabled, TalusError, WorldInvInertia,
};
use tracing::{debug, info};

use crate::dispatcher::JobDispatcher;
use crate::hooks::ExternalHooks;
use crate::message::{CoordinatorMessage, WorkerMessage};
use crate::worker::{schedule_now, spawn_worker, IslandWorker, WorkerRef};

/// Margin for the body-level overlap check that confirms an island merge.
/// Wide enough that manifolds exist before shapes actually touch.
const MERGE_MARGIN: f64 = 0.04;

struct IslandHandle {
    worker: WorkerRef,
    sender: Sender<WorkerMessage>,
    /// Worker-entity → master-entity translation, coordinator side.
    map: EntityMap,
    /// Outbound records accumulated since the last flush.
    builder: DeltaBuilder,
}

/// The host-facing simulation: master registry plus island coordination.
///
/// All methods run on the host thread. Workers communicate exclusively
/// through message queues; [`step`](Self::step) drains them, applies worker
/// deltas to the master registry, handles island splits and merges, and
/// flushes queued host mutations out to the workers.
pub struct Simulation {
    registry: Registry,
    config: SimConfig,
    hooks: Arc<ExternalHooks>,
    dispatcher: Arc<JobDispatcher>,
    islands: HashMap<Entity, IslandHandle>,
    island_tree: DynamicTree,
    island_nodes: HashMap<Entity, TreeNodeId>,
    from_workers: Receiver<CoordinatorMessage>,
    to_coordinator: Sender<CoordinatorMessage>,
    epoch: Instant,
    paused: bool,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("bodies", &self.registry.count::<BodyKind>())
            .field("islands", &self.islands.len())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Create a simulation with no hooks.
    pub fn new(config: SimConfig) -> Result<Self> {
        Self::with_hooks(config, ExternalHooks::none())
    }

    /// Create a simulation with user hooks.
    ///
    /// Hooks are fixed for the lifetime of the simulation; they are shared
    /// by every worker ever spawned.
    pub fn with_hooks(config: SimConfig, hooks: ExternalHooks) -> Result<Self> {
        config.validate()?;
        let dispatcher =
            JobDispatcher::new(config.worker_threads).map_err(|e| TalusError::InvalidConfig {
                reason: format!("failed to start dispatcher: {e}"),
            })?;
        let (to_coordinator, from_workers) = mpsc::channel();

        Ok(Self {
            registry: Registry::new(),
            config,
            hooks: Arc::new(hooks),
            dispatcher,
            islands: HashMap::new(),
            island_tree: DynamicTree::new(),
            island_nodes: HashMap::new(),
            from_workers,
            to_coordinator,
            epoch: Instant::now(),
            paused: false,
        })
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Create a rigid body from a definition.
    ///
    /// Dynamic bodies join (or found) an island immediately; static and
    /// kinematic bodies are replicated into every island.
    pub fn create_body(&mut self, def: RigidBodyDef) -> Result<Entity> {
        def.validate()?;

        let entity = self.registry.create();
        self.emplace_body_components(entity, &def);

        match def.kind {
            BodyKind::Dynamic => {
                let overlapping = self.overlapping_islands(entity);
                if overlapping.is_empty() {
                    let mut bodies = self.non_dynamic_bodies();
                    bodies.push(entity);
                    self.spawn_island(&bodies);
                } else {
                    // Join the overlapping island, merging first if the new
                    // body bridges several.
                    let island = if overlapping.len() == 1 {
                        overlapping[0]
                    } else {
                        self.merge_islands(&overlapping)
                    };
                    self.registry
                        .emplace(entity, IslandContainer::single(island));
                    if let Some(handle) = self.islands.get_mut(&island) {
                        handle
                            .builder
                            .created_with_components(&self.registry, entity);
                    }
                    self.wake_island(island);
                }
            }
            BodyKind::Static | BodyKind::Kinematic => {
                let mut container = IslandContainer::default();
                let islands: Vec<Entity> = self.islands.keys().copied().collect();
                for island in islands {
                    container.insert(island);
                }
                self.registry.emplace(entity, container);
                for handle in self.islands.values_mut() {
                    handle
                        .builder
                        .created_with_components(&self.registry, entity);
                }
            }
        }

        Ok(entity)
    }

    /// Destroy a body, cascading to constraints and manifolds touching it.
    pub fn destroy_body(&mut self, entity: Entity) -> Result<()> {
        if !self.registry.is_alive(entity) || !self.registry.has::<BodyKind>(entity) {
            return Err(TalusError::UnknownEntity(entity.to_bits()));
        }

        // Constraints and manifolds referencing the body go first.
        let mut attached = Vec::new();
        for e in self.registry.entities_with::<Constraint>() {
            if self.registry.get::<Constraint>(e).body.contains(&entity) {
                attached.push(e);
            }
        }
        for e in self.registry.entities_with::<ContactManifold>() {
            if self.registry.get::<ContactManifold>(e).body.contains(&entity) {
                attached.push(e);
            }
        }
        for e in attached {
            self.route_destroy(e);
            self.registry.destroy(e);
        }

        self.route_destroy(entity);
        self.registry.destroy(entity);
        Ok(())
    }

    /// Create a constraint between two bodies.
    ///
    /// At least one endpoint must be dynamic. If the endpoints live in
    /// different islands, the islands merge.
    pub fn create_constraint(
        &mut self,
        kind: ConstraintKind,
        body_a: Entity,
        body_b: Entity,
    ) -> Result<Entity> {
        for body in [body_a, body_b] {
            if !self.registry.is_alive(body) || !self.registry.has::<BodyKind>(body) {
                return Err(TalusError::MissingConstraintBody(body.to_bits()));
            }
        }
        let dynamic: Vec<Entity> = [body_a, body_b]
            .into_iter()
            .filter(|b| matches!(self.registry.get::<BodyKind>(*b), BodyKind::Dynamic))
            .collect();
        if dynamic.is_empty() {
            return Err(TalusError::malformed(
                "constraint requires at least one dynamic body",
            ));
        }

        let entity = self.registry.create();
        self.registry
            .emplace(entity, Constraint::new(body_a, body_b, kind));
        self.registry.emplace(entity, ConstraintImpulse::default());

        let mut islands: Vec<Entity> = dynamic
            .iter()
            .flat_map(|b| self.islands_of(*b))
            .collect();
        islands.sort_unstable();
        islands.dedup();

        let target = match islands.len() {
            0 => return Err(TalusError::malformed("constraint endpoints have no island")),
            1 => {
                let island = islands[0];
                if let Some(handle) = self.islands.get_mut(&island) {
                    handle
                        .builder
                        .created_with_components(&self.registry, entity);
                }
                island
            }
            // Merging re-hydrates the workers from the master registry, so
            // the new constraint ships with the hydration delta.
            _ => self.merge_islands(&islands),
        };
        self.wake_island(target);

        Ok(entity)
    }

    /// Destroy a constraint.
    pub fn destroy_constraint(&mut self, entity: Entity) -> Result<()> {
        if !self.registry.is_alive(entity) || !self.registry.has::<Constraint>(entity) {
            return Err(TalusError::UnknownEntity(entity.to_bits()));
        }
        self.route_destroy(entity);
        self.registry.destroy(entity);
        Ok(())
    }

    /// Pause or resume all islands.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        for handle in self.islands.values() {
            let _ = handle.sender.send(WorkerMessage::SetPaused(paused));
            schedule_now(&handle.worker);
        }
    }

    /// Force every island to run exactly one step, even while paused.
    pub fn step_once(&mut self) {
        for handle in self.islands.values() {
            let _ = handle.sender.send(WorkerMessage::StepSimulation);
            schedule_now(&handle.worker);
        }
    }

    /// Set a body's linear velocity, waking its islands.
    pub fn set_linear_velocity(&mut self, entity: Entity, velocity: Vector3<f64>) -> Result<()> {
        if !self.registry.is_alive(entity) || !self.registry.has::<LinVel>(entity) {
            return Err(TalusError::UnknownEntity(entity.to_bits()));
        }
        self.registry.replace(entity, LinVel(velocity));
        self.registry.remove::<Sleeping>(entity);

        for island in self.islands_of(entity) {
            if let Some(handle) = self.islands.get_mut(&island) {
                handle.builder.updated(entity, LinVel(velocity));
            }
            self.wake_island(island);
        }
        Ok(())
    }

    /// Apply an impulse to a dynamic body's center of mass.
    pub fn apply_impulse(&mut self, entity: Entity, impulse: Vector3<f64>) -> Result<()> {
        let inv_mass = self
            .registry
            .try_get::<InvMass>(entity)
            .copied()
            .ok_or(TalusError::UnknownEntity(entity.to_bits()))?;
        let velocity = self.registry.get::<LinVel>(entity).0 + impulse * inv_mass.0;
        self.set_linear_velocity(entity, velocity)
    }

    /// Advance the coordinator: drain worker deltas, check merges, nudge
    /// lagging workers, flush queued host mutations.
    ///
    /// `_real_dt` is the host's frame time; workers pace themselves against
    /// the wall clock, so this is a pump rather than an integrator.
    pub fn step(&mut self, _real_dt: f64) {
        self.process_worker_messages();
        self.check_merges();
        self.nudge_lagging_workers();
        self.flush_builders();
    }

    // Accessors ---------------------------------------------------------

    /// A body's position in the master registry.
    #[must_use]
    pub fn body_position(&self, entity: Entity) -> Option<Point3<f64>> {
        self.registry.try_get::<Position>(entity).map(|p| p.0)
    }

    /// A body's orientation.
    #[must_use]
    pub fn body_orientation(&self, entity: Entity) -> Option<UnitQuaternion<f64>> {
        self.registry.try_get::<Orientation>(entity).map(|o| o.0)
    }

    /// A body's linear velocity.
    #[must_use]
    pub fn body_linear_velocity(&self, entity: Entity) -> Option<Vector3<f64>> {
        self.registry.try_get::<LinVel>(entity).map(|v| v.0)
    }

    /// A body's angular velocity.
    #[must_use]
    pub fn body_angular_velocity(&self, entity: Entity) -> Option<Vector3<f64>> {
        self.registry.try_get::<AngVel>(entity).map(|v| v.0)
    }

    /// Whether the body is tagged sleeping.
    #[must_use]
    pub fn is_body_sleeping(&self, entity: Entity) -> bool {
        self.registry.has::<Sleeping>(entity)
    }

    /// Whether an island is sleeping.
    #[must_use]
    pub fn is_island_sleeping(&self, island: Entity) -> bool {
        self.registry.has::<Sleeping>(island)
    }

    /// The islands a body belongs to.
    #[must_use]
    pub fn islands_of(&self, entity: Entity) -> Vec<Entity> {
        self.registry
            .try_get::<IslandContainer>(entity)
            .map(|c| c.islands.to_vec())
            .unwrap_or_default()
    }

    /// Number of live island workers.
    #[must_use]
    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    /// The live island entities.
    #[must_use]
    pub fn islands(&self) -> Vec<Entity> {
        let mut islands: Vec<Entity> = self.islands.keys().copied().collect();
        islands.sort_unstable();
        islands
    }

    /// Contact manifolds currently mirrored in the master registry.
    #[must_use]
    pub fn manifolds(&self) -> Vec<ContactManifold> {
        self.registry
            .entities_with::<ContactManifold>()
            .into_iter()
            .map(|e| self.registry.get::<ContactManifold>(e).clone())
            .collect()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    // Internals ---------------------------------------------------------

    fn emplace_body_components(&mut self, entity: Entity, def: &RigidBodyDef) {
        let registry = &mut self.registry;
        registry.emplace(entity, def.kind);
        registry.emplace(entity, Position(def.position));
        registry.emplace(entity, Orientation(def.orientation));
        registry.emplace(entity, LinVel(def.linvel));
        registry.emplace(entity, AngVel(def.angvel));

        match def.kind {
            BodyKind::Dynamic => {
                let inertia = def.effective_inertia();
                let inv_inertia = InvInertia(Vector3::new(
                    1.0 / inertia.x,
                    1.0 / inertia.y,
                    1.0 / inertia.z,
                ));
                registry.emplace(entity, Mass(def.mass));
                registry.emplace(entity, InvMass(1.0 / def.mass));
                registry.emplace(entity, Inertia(inertia));
                registry.emplace(entity, inv_inertia);
                registry.emplace(
                    entity,
                    WorldInvInertia::from_local(&inv_inertia, &def.orientation),
                );
                registry.emplace(entity, DeltaLinVel::default());
                registry.emplace(entity, DeltaAngVel::default());
                let gravity = if def.gravity_sensitive {
                    self.config.gravity
                } else {
                    Vector3::zeros()
                };
                registry.emplace(entity, LinAcc(gravity));
            }
            BodyKind::Static | BodyKind::Kinematic => {
                registry.emplace(entity, Mass(f64::INFINITY));
                registry.emplace(entity, InvMass(0.0));
                registry.emplace(entity, WorldInvInertia::default());
            }
        }

        if let Some(shape) = def.shape {
            registry.emplace(entity, shape.aabb(&def.position, &def.orientation));
            registry.emplace(entity, shape);
        }
        if let Some(material) = def.material {
            registry.emplace(entity, material);
        }
        if def.filter != CollisionFilter::default() {
            registry.emplace(entity, def.filter);
        }
        if def.presentation {
            registry.emplace(entity, PresentPosition(def.position));
            registry.emplace(entity, PresentOrientation(def.orientation));
        }
        if def.continuous_contacts {
            registry.emplace(entity, ContinuousContacts);
        }
        if def.sleeping_disabled {
            registry.emplace(entity, SleepingDisabled);
        }
    }

    fn non_dynamic_bodies(&self) -> Vec<Entity> {
        self.registry
            .entities_with::<BodyKind>()
            .into_iter()
            .filter(|e| !matches!(self.registry.get::<BodyKind>(*e), BodyKind::Dynamic))
            .collect()
    }

    fn dynamic_bodies_of_island(&self, island: Entity) -> Vec<Entity> {
        self.registry
            .entities_with2::<BodyKind, IslandContainer>()
            .into_iter()
            .filter(|e| {
                matches!(self.registry.get::<BodyKind>(*e), BodyKind::Dynamic)
                    && self
                        .registry
                        .get::<IslandContainer>(*e)
                        .islands
                        .contains(&island)
            })
            .collect()
    }

    /// Islands whose exported bounds overlap the body's AABB.
    fn overlapping_islands(&self, entity: Entity) -> Vec<Entity> {
        let Some(aabb) = self.registry.try_get::<Aabb>(entity) else {
            return Vec::new();
        };
        let query = aabb.inflated(self.config.aabb_fat_margin);
        let mut found = Vec::new();
        self.island_tree.query(&query, |_, island| {
            if self.islands.contains_key(&island) {
                found.push(island);
            }
        });
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Launch a worker simulating `bodies` and return the island entity.
    fn spawn_island(&mut self, bodies: &[Entity]) -> Entity {
        let island = self.registry.create();
        let now = self.now();
        self.registry.emplace(island, IslandTimestamp(now));

        // Initial bounds: the union of the members' AABBs; workers refine
        // this every step.
        let mut aabb: Option<Aabb> = None;
        for body in bodies {
            if let Some(body_aabb) = self.registry.try_get::<Aabb>(*body) {
                aabb = Some(match aabb {
                    Some(union) => union.union(body_aabb),
                    None => *body_aabb,
                });
            }
        }
        let aabb = aabb.unwrap_or_default();
        self.registry.emplace(island, aabb);

        let members: HashSet<Entity> = bodies.iter().copied().collect();
        for body in bodies {
            // Fresh islands start awake.
            self.registry.remove::<Sleeping>(*body);
            match self.registry.get::<BodyKind>(*body) {
                BodyKind::Dynamic => {
                    self.registry
                        .emplace(*body, IslandContainer::single(island));
                }
                _ => {
                    let mut container = self
                        .registry
                        .try_get::<IslandContainer>(*body)
                        .cloned()
                        .unwrap_or_default();
                    container.insert(island);
                    self.registry.emplace(*body, container);
                }
            }
        }

        // Hydration delta: the island, its bodies, and every constraint and
        // manifold fully inside the member set.
        let mut builder = DeltaBuilder::new();
        builder.created_with_components(&self.registry, island);
        for body in bodies {
            builder.created_with_components(&self.registry, *body);
        }
        for entity in self.registry.entities_with::<Constraint>() {
            let body = self.registry.get::<Constraint>(entity).body;
            if members.contains(&body[0]) && members.contains(&body[1]) {
                builder.created_with_components(&self.registry, entity);
            }
        }
        for entity in self.registry.entities_with::<ContactManifold>() {
            let body = self.registry.get::<ContactManifold>(entity).body;
            if members.contains(&body[0]) && members.contains(&body[1]) {
                builder.created_with_components(&self.registry, entity);
            }
        }

        let (sender, inbox) = mpsc::channel();
        let _ = sender.send(WorkerMessage::Delta(builder.finish()));
        if self.paused {
            let _ = sender.send(WorkerMessage::SetPaused(true));
        }

        let worker = IslandWorker::new(
            self.config.clone(),
            island,
            self.epoch,
            Arc::clone(&self.hooks),
            inbox,
            self.to_coordinator.clone(),
        );
        let worker = spawn_worker(worker, Arc::clone(&self.dispatcher));

        let node = self.island_tree.create(aabb, island);
        self.island_nodes.insert(island, node);
        self.islands.insert(
            island,
            IslandHandle {
                worker,
                sender,
                map: EntityMap::new(),
                builder: DeltaBuilder::new(),
            },
        );

        info!(%island, bodies = bodies.len(), "island spawned");
        island
    }

    fn terminate_island(&mut self, island: Entity) {
        let Some(handle) = self.islands.remove(&island) else {
            return;
        };
        let _ = handle.sender.send(WorkerMessage::Terminate);
        schedule_now(&handle.worker);

        if let Some(node) = self.island_nodes.remove(&island) {
            self.island_tree.destroy(node);
        }

        // Strip membership from every body.
        for entity in self.registry.entities_with::<IslandContainer>() {
            let container = self.registry.get_mut::<IslandContainer>(entity);
            container.remove(island);
        }

        if self.registry.is_alive(island) {
            self.registry.destroy(island);
        }
        debug!(%island, "island terminated");
    }

    /// Merge islands into one: terminate their workers and spawn a worker
    /// hydrated from the union of their members.
    fn merge_islands(&mut self, islands: &[Entity]) -> Entity {
        let mut bodies: Vec<Entity> = Vec::new();
        for island in islands {
            bodies.extend(self.dynamic_bodies_of_island(*island));
        }
        bodies.sort_unstable();
        bodies.dedup();
        bodies.extend(self.non_dynamic_bodies());

        for island in islands {
            self.terminate_island(*island);
        }

        info!(count = islands.len(), "islands merged");
        self.spawn_island(&bodies)
    }

    fn process_worker_messages(&mut self) {
        while let Ok(message) = self.from_workers.try_recv() {
            match message {
                CoordinatorMessage::Delta { island, delta } => {
                    let Some(handle) = self.islands.get_mut(&island) else {
                        continue; // Terminated while the delta was in flight.
                    };
                    delta.import(&mut self.registry, &mut handle.map);

                    // Echo identifier pairs for worker-created entities.
                    for remote in &delta.created_entities {
                        if let Some(local) = handle.map.local_of(*remote) {
                            handle.builder.insert_mapping(local, *remote);
                        }
                    }

                    self.fan_out_kinematic_state(island, &delta);
                    self.refresh_island_bounds(island);
                }
                CoordinatorMessage::SplitIsland { island, components } => {
                    self.handle_split(island, components);
                }
                CoordinatorMessage::Terminated { island } => {
                    debug!(%island, "worker finished terminating");
                }
            }
        }
    }

    /// Forward transforms of kinematic bodies touched by `delta` to the
    /// other islands containing them.
    fn fan_out_kinematic_state(&mut self, source: Entity, delta: &Delta) {
        let Some(handle) = self.islands.get(&source) else {
            return;
        };

        let mut touched: Vec<Entity> = Vec::new();
        let remotes = delta
            .position
            .updated
            .iter()
            .map(|(e, _)| *e)
            .chain(delta.orientation.updated.iter().map(|(e, _)| *e));
        for remote in remotes {
            if let Some(local) = handle.map.local_of(remote) {
                if matches!(
                    self.registry.try_get::<BodyKind>(local),
                    Some(BodyKind::Kinematic)
                ) {
                    touched.push(local);
                }
            }
        }
        touched.sort_unstable();
        touched.dedup();

        for body in touched {
            let islands = self.islands_of(body);
            let position = *self.registry.get::<Position>(body);
            let orientation = *self.registry.get::<Orientation>(body);
            for island in islands {
                if island == source {
                    continue;
                }
                if let Some(other) = self.islands.get_mut(&island) {
                    other.builder.updated(body, position);
                    other.builder.updated(body, orientation);
                }
            }
        }
    }

    fn refresh_island_bounds(&mut self, island: Entity) {
        let Some(aabb) = self.registry.try_get::<Aabb>(island).copied() else {
            return;
        };
        if let Some(&node) = self.island_nodes.get(&island) {
            self.island_tree.move_leaf(node, aabb);
        }
    }

    /// Merge islands whose bounds overlap and whose procedural bodies
    /// actually touch.
    fn check_merges(&mut self) {
        let islands = self.islands();
        for (i, &a) in islands.iter().enumerate() {
            let Some(aabb_a) = self.registry.try_get::<Aabb>(a).copied() else {
                continue;
            };
            for &b in islands.iter().skip(i + 1) {
                let Some(aabb_b) = self.registry.try_get::<Aabb>(b).copied() else {
                    continue;
                };
                if !aabb_a.intersects(&aabb_b) {
                    continue;
                }
                if self.bodies_touch_across(a, b) {
                    self.merge_islands(&[a, b]);
                    // Island identities changed; retry next pump.
                    return;
                }
            }
        }
    }

    fn bodies_touch_across(&self, a: Entity, b: Entity) -> bool {
        let bodies_a = self.dynamic_bodies_of_island(a);
        let bodies_b = self.dynamic_bodies_of_island(b);
        for body_a in &bodies_a {
            let Some(aabb_a) = self.registry.try_get::<Aabb>(*body_a) else {
                continue;
            };
            let query = aabb_a.inflated(MERGE_MARGIN);
            for body_b in &bodies_b {
                if let Some(aabb_b) = self.registry.try_get::<Aabb>(*body_b) {
                    if query.intersects(aabb_b) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn handle_split(&mut self, island: Entity, components: Vec<Vec<Entity>>) {
        if !self.islands.contains_key(&island) || components.len() < 2 {
            return;
        }
        info!(%island, parts = components.len(), "splitting island");

        self.terminate_island(island);

        let statics = self.non_dynamic_bodies();
        for component in components {
            let mut bodies: Vec<Entity> = component
                .into_iter()
                .filter(|e| self.registry.is_alive(*e) && self.registry.has::<BodyKind>(*e))
                .collect();
            if bodies
                .iter()
                .all(|e| !matches!(self.registry.get::<BodyKind>(*e), BodyKind::Dynamic))
            {
                continue; // Purely static components need no worker.
            }
            bodies.extend(statics.iter().copied());
            bodies.sort_unstable();
            bodies.dedup();
            self.spawn_island(&bodies);
        }
    }

    fn nudge_lagging_workers(&mut self) {
        if self.paused {
            return;
        }
        let now = self.now();
        for (island, handle) in &self.islands {
            if self.registry.has::<Sleeping>(*island) {
                continue;
            }
            let Some(timestamp) = self.registry.try_get::<IslandTimestamp>(*island) else {
                continue;
            };
            if now - timestamp.0 > 2.0 * self.config.fixed_dt {
                schedule_now(&handle.worker);
            }
        }
    }

    fn flush_builders(&mut self) {
        for handle in self.islands.values_mut() {
            if !handle.builder.is_empty() {
                let delta = handle.builder.finish();
                let _ = handle.sender.send(WorkerMessage::Delta(delta));
                schedule_now(&handle.worker);
            }
        }
    }

    fn wake_island(&mut self, island: Entity) {
        let Some(handle) = self.islands.get(&island) else {
            return;
        };
        if self.registry.has::<Sleeping>(island) {
            let _ = handle.sender.send(WorkerMessage::WakeUp);
        }
        schedule_now(&handle.worker);
    }

    /// Queue an entity destruction to every island containing it and drop
    /// the coordinator-side mapping.
    fn route_destroy(&mut self, entity: Entity) {
        let islands: Vec<Entity> = if self.registry.has::<IslandContainer>(entity) {
            self.islands_of(entity)
        } else {
            // Constraints and manifolds have no container: route via their
            // endpoints.
            let endpoints = if let Some(c) = self.registry.try_get::<Constraint>(entity) {
                c.body.to_vec()
            } else if let Some(m) = self.registry.try_get::<ContactManifold>(entity) {
                m.body.to_vec()
            } else {
                Vec::new()
            };
            let mut islands: Vec<Entity> =
                endpoints.iter().flat_map(|b| self.islands_of(*b)).collect();
            islands.sort_unstable();
            islands.dedup();
            islands
        };

        for island in islands {
            if let Some(handle) = self.islands.get_mut(&island) {
                handle.builder.destroyed_entity(entity);
                handle.map.remove_local(entity);
            }
            self.wake_island(island);
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        let islands: Vec<Entity> = self.islands.keys().copied().collect();
        for island in islands {
            if let Some(handle) = self.islands.get(&island) {
                let _ = handle.sender.send(WorkerMessage::Terminate);
                schedule_now(&handle.worker);
            }
        }

        // Wait for workers to wind down so this thread holds the last
        // dispatcher handle when the pool is dropped.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let done = self.islands.values().all(|handle| {
                handle
                    .worker
                    .terminated
                    .load(std::sync::atomic::Ordering::Acquire)
                    && Arc::strong_count(&handle.worker) == 1
            });
            if done {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.islands.clear();
    }
}
