//! The execution-graph storage: a two-dimensional mesh of vertices where
//! horizontal edges carry one worker's state over time and vertical edges
//! carry causal relations between workers.
//!
//! Vertices and edges live in arenas and are addressed by [`VertexId`] and
//! [`EdgeId`]. Each vertex has exactly four edge slots (incoming/outgoing ×
//! horizontal/vertical) and at most one edge per slot; violating a slot or
//! appending out of chronological order is a programming error and panics.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use derive_more::derive::{Display, From};
use serde::Serialize;

use crate::model::{Time, WorkerRef};

/// Classification of an edge: what a worker was doing over a horizontal
/// segment, or why a vertical causal relation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize)]
pub enum EdgeType {
    #[default]
    Unknown,
    Running,
    Blocked,
    Preempted,
    Timer,
    Interrupted,
    Wakeup,
    Network,
    BlockDevice,
    Ipi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeDirection {
    OutgoingVertical,
    IncomingVertical,
    OutgoingHorizontal,
    IncomingHorizontal,
}

impl EdgeDirection {
    const fn index(self) -> usize {
        match self {
            Self::OutgoingVertical => 0,
            Self::IncomingVertical => 1,
            Self::OutgoingHorizontal => 2,
            Self::IncomingHorizontal => 3,
        }
    }

    /// The slot the same edge occupies on its other endpoint.
    const fn opposite(self) -> Self {
        match self {
            Self::OutgoingVertical => Self::IncomingVertical,
            Self::IncomingVertical => Self::OutgoingVertical,
            Self::OutgoingHorizontal => Self::IncomingHorizontal,
            Self::IncomingHorizontal => Self::OutgoingHorizontal,
        }
    }

    const fn is_incoming(self) -> bool {
        matches!(self, Self::IncomingVertical | Self::IncomingHorizontal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(usize);

/// Key wrapper giving worker handles reference identity in maps, so a
/// replaced registry entry owns a fresh timeline.
#[derive(Debug, From)]
struct WorkerKey(WorkerRef);

impl PartialEq for WorkerKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for WorkerKey {}

impl Clone for WorkerKey {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Hash for WorkerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

#[derive(Debug)]
struct VertexNode {
    timestamp: Time,
    worker: usize,
    edges: [Option<EdgeId>; 4],
}

#[derive(Debug)]
struct EdgeNode {
    from: VertexId,
    to: VertexId,
    kind: EdgeType,
    qualifier: Option<String>,
}

#[derive(Debug, Default)]
pub struct Graph {
    workers: Vec<WorkerRef>,
    worker_indices: HashMap<WorkerKey, usize>,
    series: Vec<Vec<VertexId>>,
    vertices: Vec<VertexNode>,
    edges: Vec<EdgeNode>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices in the graph.
    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    fn worker_index(&mut self, worker: &WorkerRef) -> usize {
        if let Some(&index) = self.worker_indices.get(&WorkerKey(Arc::clone(worker))) {
            return index;
        }
        let index = self.workers.len();
        self.workers.push(Arc::clone(worker));
        self.series.push(Vec::new());
        self.worker_indices
            .insert(WorkerKey(Arc::clone(worker)), index);
        index
    }

    /// Add a vertex to the end of a worker's timeline without linking it.
    pub fn add_vertex(&mut self, worker: &WorkerRef, timestamp: Time) -> VertexId {
        let index = self.worker_index(worker);
        let id = VertexId(self.vertices.len());
        self.vertices.push(VertexNode {
            timestamp,
            worker: index,
            edges: [None; 4],
        });
        self.series[index].push(id);
        id
    }

    /// Add a vertex and link it horizontally from the worker's previous
    /// tail. Returns no edge for the first vertex of a timeline.
    pub fn append(
        &mut self,
        worker: &WorkerRef,
        timestamp: Time,
        kind: EdgeType,
    ) -> (VertexId, Option<EdgeId>) {
        let tail = self.tail(worker);
        if let Some(tail) = tail {
            assert!(
                self.timestamp(tail) <= timestamp,
                "vertex appended out of chronological order"
            );
        }
        let vertex = self.add_vertex(worker, timestamp);
        let edge = tail.map(|tail| self.link_horizontal(tail, vertex, kind));
        (vertex, edge)
    }

    /// Link two vertices: horizontally when they belong to the same worker,
    /// vertically otherwise.
    pub fn link(&mut self, from: VertexId, to: VertexId, kind: EdgeType) -> EdgeId {
        if self.vertices[from.0].worker == self.vertices[to.0].worker {
            self.link_horizontal(from, to, kind)
        } else {
            self.link_vertical(from, to, kind)
        }
    }

    pub fn link_horizontal(&mut self, from: VertexId, to: VertexId, kind: EdgeType) -> EdgeId {
        self.connect(from, to, kind, EdgeDirection::OutgoingHorizontal)
    }

    pub fn link_vertical(&mut self, from: VertexId, to: VertexId, kind: EdgeType) -> EdgeId {
        self.connect(from, to, kind, EdgeDirection::OutgoingVertical)
    }

    fn connect(
        &mut self,
        from: VertexId,
        to: VertexId,
        kind: EdgeType,
        out_direction: EdgeDirection,
    ) -> EdgeId {
        assert!(
            self.timestamp(from) <= self.timestamp(to),
            "edge target precedes its source"
        );
        let in_direction = out_direction.opposite();
        assert!(
            self.vertices[from.0].edges[out_direction.index()].is_none(),
            "outgoing edge slot already occupied"
        );
        assert!(
            self.vertices[to.0].edges[in_direction.index()].is_none(),
            "incoming edge slot already occupied"
        );

        let id = EdgeId(self.edges.len());
        self.edges.push(EdgeNode {
            from,
            to,
            kind,
            qualifier: None,
        });
        self.vertices[from.0].edges[out_direction.index()] = Some(id);
        self.vertices[to.0].edges[in_direction.index()] = Some(id);
        id
    }

    pub fn edge(&self, vertex: VertexId, direction: EdgeDirection) -> Option<EdgeId> {
        self.vertices[vertex.0].edges[direction.index()]
    }

    /// Unlink the edge in the given slot from both of its endpoints. No-op
    /// if the slot is empty.
    pub fn remove_edge(&mut self, vertex: VertexId, direction: EdgeDirection) {
        let Some(edge) = self.vertices[vertex.0].edges[direction.index()].take() else {
            return;
        };
        let other = if direction.is_incoming() {
            self.edges[edge.0].from
        } else {
            self.edges[edge.0].to
        };
        self.vertices[other.0].edges[direction.opposite().index()] = None;
    }

    pub fn edge_source(&self, edge: EdgeId) -> VertexId {
        self.edges[edge.0].from
    }

    pub fn edge_target(&self, edge: EdgeId) -> VertexId {
        self.edges[edge.0].to
    }

    pub fn edge_kind(&self, edge: EdgeId) -> EdgeType {
        self.edges[edge.0].kind
    }

    pub fn set_edge_kind(&mut self, edge: EdgeId, kind: EdgeType) {
        self.edges[edge.0].kind = kind;
    }

    pub fn edge_qualifier(&self, edge: EdgeId) -> Option<&str> {
        self.edges[edge.0].qualifier.as_deref()
    }

    pub fn set_edge_qualifier(&mut self, edge: EdgeId, qualifier: impl Into<String>) {
        self.edges[edge.0].qualifier = Some(qualifier.into());
    }

    pub fn timestamp(&self, vertex: VertexId) -> Time {
        self.vertices[vertex.0].timestamp
    }

    pub fn worker_of(&self, vertex: VertexId) -> &WorkerRef {
        &self.workers[self.vertices[vertex.0].worker]
    }

    pub fn head(&self, worker: &WorkerRef) -> Option<VertexId> {
        self.nodes_of(worker).first().copied()
    }

    pub fn tail(&self, worker: &WorkerRef) -> Option<VertexId> {
        self.nodes_of(worker).last().copied()
    }

    /// The ordered vertex timeline of a worker; empty for workers the graph
    /// has never seen.
    pub fn nodes_of(&self, worker: &WorkerRef) -> &[VertexId] {
        self.worker_indices
            .get(&WorkerKey(Arc::clone(worker)))
            .map_or(&[], |&index| &self.series[index])
    }

    /// All workers owning at least one vertex, in first-seen order.
    pub fn workers(&self) -> impl Iterator<Item = &WorkerRef> {
        self.workers.iter()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::model::{HostThread, Worker};

    fn worker(tid: i64) -> WorkerRef {
        Arc::new(Mutex::new(Worker::new(
            HostThread::new("h1", tid),
            format!("t{tid}"),
            Time::from_nanos(0),
        )))
    }

    fn ts(nanos: i64) -> Time {
        Time::from_nanos(nanos)
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = Graph::new();
        assert_eq!(graph.size(), 0);
        assert_eq!(graph.workers().count(), 0);
    }

    #[test]
    fn add_vertex_does_not_link() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        let v0 = graph.add_vertex(&w1, ts(0));
        let v1 = graph.add_vertex(&w1, ts(1));

        assert_eq!(graph.nodes_of(&w1), &[v0, v1]);
        for v in [v0, v1] {
            assert!(graph.edge(v, EdgeDirection::OutgoingHorizontal).is_none());
            assert!(graph.edge(v, EdgeDirection::IncomingHorizontal).is_none());
            assert!(graph.edge(v, EdgeDirection::OutgoingVertical).is_none());
            assert!(graph.edge(v, EdgeDirection::IncomingVertical).is_none());
        }
    }

    #[test]
    fn append_links_the_timeline() {
        let mut graph = Graph::new();
        let w1 = worker(1);

        let (v0, first) = graph.append(&w1, ts(0), EdgeType::Unknown);
        assert!(first.is_none());

        let (v1, edge) = graph.append(&w1, ts(1), EdgeType::Running);
        let edge = edge.unwrap();
        assert_eq!(graph.edge_source(edge), v0);
        assert_eq!(graph.edge_target(edge), v1);
        assert_eq!(graph.edge_kind(edge), EdgeType::Running);

        let (v2, edge) = graph.append(&w1, ts(2), EdgeType::Blocked);
        assert_eq!(graph.edge_kind(edge.unwrap()), EdgeType::Blocked);

        assert_eq!(graph.head(&w1), Some(v0));
        assert_eq!(graph.tail(&w1), Some(v2));
        assert_eq!(
            graph.edge(v1, EdgeDirection::OutgoingHorizontal),
            graph.edge(v2, EdgeDirection::IncomingHorizontal)
        );
    }

    #[test]
    #[should_panic(expected = "chronological")]
    fn append_rejects_time_going_backwards() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        graph.append(&w1, ts(1), EdgeType::Unknown);
        graph.append(&w1, ts(0), EdgeType::Unknown);
    }

    #[test]
    fn link_picks_direction_from_worker_ownership() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        let w2 = worker(2);

        let v0 = graph.add_vertex(&w1, ts(0));
        let v1 = graph.add_vertex(&w1, ts(1));
        let edge = graph.link(v0, v1, EdgeType::Network);
        assert_eq!(
            graph.edge(v0, EdgeDirection::OutgoingHorizontal),
            Some(edge)
        );
        assert_eq!(
            graph.edge(v1, EdgeDirection::IncomingHorizontal),
            Some(edge)
        );

        let v2 = graph.add_vertex(&w2, ts(2));
        assert!(Arc::ptr_eq(graph.worker_of(v1), &w1));
        assert!(Arc::ptr_eq(graph.worker_of(v2), &w2));

        let vertical = graph.link(v1, v2, EdgeType::Network);
        assert_eq!(
            graph.edge(v1, EdgeDirection::OutgoingVertical),
            Some(vertical)
        );
        assert_eq!(
            graph.edge(v2, EdgeDirection::IncomingVertical),
            Some(vertical)
        );
        assert_eq!(graph.nodes_of(&w2), &[v2]);
    }

    #[test]
    fn remove_edge_unlinks_both_endpoints() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        let w2 = worker(2);
        let v0 = graph.add_vertex(&w1, ts(0));
        let v1 = graph.add_vertex(&w2, ts(1));
        graph.link_vertical(v0, v1, EdgeType::Wakeup);

        graph.remove_edge(v1, EdgeDirection::IncomingVertical);
        assert!(graph.edge(v1, EdgeDirection::IncomingVertical).is_none());
        assert!(graph.edge(v0, EdgeDirection::OutgoingVertical).is_none());

        // Removing an empty slot is a no-op.
        graph.remove_edge(v1, EdgeDirection::IncomingVertical);
    }

    #[test]
    #[should_panic(expected = "occupied")]
    fn one_edge_per_slot() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        let w2 = worker(2);
        let v0 = graph.add_vertex(&w1, ts(0));
        let v1 = graph.add_vertex(&w2, ts(1));
        let v2 = graph.add_vertex(&w2, ts(2));
        graph.link_vertical(v0, v1, EdgeType::Wakeup);
        graph.link_vertical(v0, v2, EdgeType::Wakeup);
    }

    #[test]
    fn qualifier_is_attached_to_the_edge() {
        let mut graph = Graph::new();
        let w1 = worker(1);
        let w2 = worker(2);
        let v0 = graph.add_vertex(&w1, ts(0));
        let v1 = graph.add_vertex(&w2, ts(1));
        let edge = graph.link_vertical(v0, v1, EdgeType::Network);

        assert!(graph.edge_qualifier(edge).is_none());
        graph.set_edge_qualifier(edge, "eth0");
        assert_eq!(graph.edge_qualifier(edge), Some("eth0"));
    }

    #[test]
    fn replaced_worker_handle_owns_a_fresh_timeline() {
        let mut graph = Graph::new();
        let first = worker(5);
        let second = worker(5);
        graph.add_vertex(&first, ts(0));
        graph.add_vertex(&second, ts(1));

        assert_eq!(graph.nodes_of(&first).len(), 1);
        assert_eq!(graph.nodes_of(&second).len(), 1);
        assert_eq!(graph.workers().count(), 2);
    }
}
