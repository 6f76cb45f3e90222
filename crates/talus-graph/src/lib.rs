//! Body/constraint multigraph.
//!
//! Nodes wrap body entities, edges wrap constraint (or contact manifold)
//! entities. The island machinery asks two questions of this graph: "is it
//! still one connected component?" after topology changes, and "what are the
//! components?" when an island splits.
//!
//! # Storage
//!
//! Nodes and edges live in slot arrays indexed by [`NodeIndex`] /
//! [`EdgeIndex`]. Indices are stable: removal tombstones the slot and pushes
//! it on a free list rather than compacting. Node↔edge references are
//! indices, never owning references, so the graph has no cyclic ownership.
//!
//! Removing a node removes all incident edges first.
//!
//! # Connecting and non-connecting nodes
//!
//! Nodes wrapping bodies the simulation moves (dynamic) are *connecting*:
//! traversal flows through them. Static and kinematic bodies are
//! *non-connecting*: they can be reached and belong to a component, but
//! paths do not continue through them, so two dynamic groups resting on the
//! same ground are still separate components and a non-connecting node may
//! belong to several components at once.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

use talus_types::Entity;

/// Stable index of a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// The raw slot index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Stable index of an edge slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeIndex(u32);

impl EdgeIndex {
    /// The raw slot index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct NodeSlot {
    entity: Entity,
    edges: Vec<EdgeIndex>,
    connecting: bool,
    alive: bool,
}

#[derive(Debug, Clone)]
struct EdgeSlot {
    entity: Entity,
    nodes: [NodeIndex; 2],
    alive: bool,
}

/// Undirected multigraph of bodies and the constraints connecting them.
///
/// # Example
///
/// ```
/// use talus_graph::ConstraintGraph;
/// use talus_types::Entity;
///
/// let mut graph = ConstraintGraph::new();
/// let a = graph.insert_node(Entity::new(0, 0));
/// let b = graph.insert_node(Entity::new(1, 0));
/// let edge = graph.insert_edge(Entity::new(2, 0), a, b);
///
/// assert!(graph.is_single_connected_component());
/// graph.remove_edge(edge);
/// assert!(!graph.is_single_connected_component());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConstraintGraph {
    nodes: Vec<NodeSlot>,
    edges: Vec<EdgeSlot>,
    free_nodes: Vec<u32>,
    free_edges: Vec<u32>,
}

impl ConstraintGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connecting node wrapping a body entity.
    pub fn insert_node(&mut self, entity: Entity) -> NodeIndex {
        self.insert_node_with(entity, true)
    }

    /// Insert a node, choosing whether traversal may flow through it.
    pub fn insert_node_with(&mut self, entity: Entity, connecting: bool) -> NodeIndex {
        let slot = NodeSlot {
            entity,
            edges: Vec::new(),
            connecting,
            alive: true,
        };
        if let Some(index) = self.free_nodes.pop() {
            self.nodes[index as usize] = slot;
            NodeIndex(index)
        } else {
            self.nodes.push(slot);
            NodeIndex((self.nodes.len() - 1) as u32)
        }
    }

    /// Insert an edge wrapping a constraint entity between two nodes.
    ///
    /// Parallel edges between the same node pair are allowed; each
    /// constraint is its own edge.
    pub fn insert_edge(&mut self, entity: Entity, a: NodeIndex, b: NodeIndex) -> EdgeIndex {
        assert!(self.node_alive(a), "edge endpoint {} is not a live node", a.0);
        assert!(self.node_alive(b), "edge endpoint {} is not a live node", b.0);

        let index = if let Some(index) = self.free_edges.pop() {
            self.edges[index as usize] = EdgeSlot {
                entity,
                nodes: [a, b],
                alive: true,
            };
            EdgeIndex(index)
        } else {
            self.edges.push(EdgeSlot {
                entity,
                nodes: [a, b],
                alive: true,
            });
            EdgeIndex((self.edges.len() - 1) as u32)
        };

        self.nodes[a.0 as usize].edges.push(index);
        if b != a {
            self.nodes[b.0 as usize].edges.push(index);
        }
        index
    }

    /// Remove an edge, detaching it from both endpoints.
    pub fn remove_edge(&mut self, index: EdgeIndex) {
        assert!(self.edge_alive(index), "remove of unknown edge {}", index.0);
        let [a, b] = self.edges[index.0 as usize].nodes;
        self.nodes[a.0 as usize].edges.retain(|e| *e != index);
        self.nodes[b.0 as usize].edges.retain(|e| *e != index);
        self.edges[index.0 as usize].alive = false;
        self.free_edges.push(index.0);
    }

    /// Remove a node; incident edges are removed first.
    pub fn remove_node(&mut self, index: NodeIndex) {
        assert!(self.node_alive(index), "remove of unknown node {}", index.0);
        let incident: Vec<EdgeIndex> = self.nodes[index.0 as usize].edges.clone();
        for edge in incident {
            if self.edge_alive(edge) {
                self.remove_edge(edge);
            }
        }
        self.nodes[index.0 as usize].alive = false;
        self.free_nodes.push(index.0);
    }

    /// The body entity a node wraps.
    #[must_use]
    pub fn node_entity(&self, index: NodeIndex) -> Entity {
        assert!(self.node_alive(index), "unknown node {}", index.0);
        self.nodes[index.0 as usize].entity
    }

    /// The constraint entity an edge wraps.
    #[must_use]
    pub fn edge_entity(&self, index: EdgeIndex) -> Entity {
        assert!(self.edge_alive(index), "unknown edge {}", index.0);
        self.edges[index.0 as usize].entity
    }

    /// The two endpoint nodes of an edge.
    #[must_use]
    pub fn edge_nodes(&self, index: EdgeIndex) -> [NodeIndex; 2] {
        assert!(self.edge_alive(index), "unknown edge {}", index.0);
        self.edges[index.0 as usize].nodes
    }

    /// Edges incident to a node.
    #[must_use]
    pub fn incident_edges(&self, index: NodeIndex) -> &[EdgeIndex] {
        assert!(self.node_alive(index), "unknown node {}", index.0);
        &self.nodes[index.0 as usize].edges
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    /// Number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.alive).count()
    }

    /// Whether a node index refers to a live slot.
    #[must_use]
    pub fn node_alive(&self, index: NodeIndex) -> bool {
        (index.0 as usize) < self.nodes.len() && self.nodes[index.0 as usize].alive
    }

    /// Whether an edge index refers to a live slot.
    #[must_use]
    pub fn edge_alive(&self, index: EdgeIndex) -> bool {
        (index.0 as usize) < self.edges.len() && self.edges[index.0 as usize].alive
    }

    /// Whether every connecting node is reachable from the first one.
    ///
    /// Traversal does not continue through non-connecting nodes. A graph
    /// with no connecting nodes counts as a single component.
    #[must_use]
    pub fn is_single_connected_component(&self) -> bool {
        let Some(start) = self.first_connecting_node() else {
            return true;
        };

        let mut visited = vec![false; self.nodes.len()];
        self.bfs(start, &mut visited);

        self.nodes
            .iter()
            .enumerate()
            .all(|(i, n)| !(n.alive && n.connecting) || visited[i])
    }

    /// Enumerate connected components, reporting each as sorted node and
    /// edge index sets.
    ///
    /// Every component is seeded from a connecting node; non-connecting
    /// nodes are reported as members of each component that touches them,
    /// and isolated non-connecting nodes form no component of their own.
    pub fn connected_components<F: FnMut(&[NodeIndex], &[EdgeIndex])>(&self, mut visitor: F) {
        let mut visited = vec![false; self.nodes.len()];

        for start in 0..self.nodes.len() as u32 {
            let start = NodeIndex(start);
            if !self.node_alive(start)
                || !self.nodes[start.0 as usize].connecting
                || visited[start.0 as usize]
            {
                continue;
            }

            let mut nodes = Vec::new();
            // Non-connecting members are tracked per component so they can
            // reappear in later components.
            let mut local: Vec<NodeIndex> = Vec::new();
            let mut queue = std::collections::VecDeque::new();
            visited[start.0 as usize] = true;
            queue.push_back(start);

            while let Some(node) = queue.pop_front() {
                nodes.push(node);
                if !self.nodes[node.0 as usize].connecting {
                    continue;
                }
                for &edge in &self.nodes[node.0 as usize].edges {
                    let [a, b] = self.edges[edge.0 as usize].nodes;
                    let other = if a == node { b } else { a };
                    let slot = &self.nodes[other.0 as usize];
                    if slot.connecting {
                        if !visited[other.0 as usize] {
                            visited[other.0 as usize] = true;
                            queue.push_back(other);
                        }
                    } else if !local.contains(&other) {
                        local.push(other);
                        queue.push_back(other);
                    }
                }
            }

            nodes.sort_unstable_by_key(|n| n.0);
            nodes.dedup_by_key(|n| n.0);
            let mut edges: Vec<EdgeIndex> = Vec::new();
            for n in &nodes {
                for &edge in &self.nodes[n.0 as usize].edges {
                    let [a, b] = self.edges[edge.0 as usize].nodes;
                    if nodes.binary_search_by_key(&a.0, |n| n.0).is_ok()
                        && nodes.binary_search_by_key(&b.0, |n| n.0).is_ok()
                    {
                        edges.push(edge);
                    }
                }
            }
            edges.sort_unstable_by_key(|e| e.0);
            edges.dedup();

            visitor(&nodes, &edges);
        }
    }

    fn first_connecting_node(&self) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|n| n.alive && n.connecting)
            .map(|i| NodeIndex(i as u32))
    }

    fn bfs(&self, start: NodeIndex, visited: &mut [bool]) {
        let mut queue = std::collections::VecDeque::new();
        visited[start.0 as usize] = true;
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            if !self.nodes[node.0 as usize].connecting {
                continue;
            }
            for &edge in &self.nodes[node.0 as usize].edges {
                let [a, b] = self.edges[edge.0 as usize].nodes;
                let other = if a == node { b } else { a };
                if !visited[other.0 as usize] {
                    visited[other.0 as usize] = true;
                    queue.push_back(other);
                }
            }
        }
    }
}
