// access_graph.rs — Access dependency graph over AccessIds
//
// Incremental directed graph: one vertex per AccessId (dense in-graph index,
// assigned in first-seen order) and one edge `writer -> reader` per pair of
// accesses in a statement, weighted with the union of the observed read
// extents. An edge means the value of `reader` must be available, within the
// stated offsets, when `writer` is computed.
//
// Preconditions: statements are inserted in execution order.
// Postconditions: clones share no storage with their source; SCC and DAG
//                 queries are deterministic for identical insertion order.
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::extent::Extent;
use crate::id::AccessId;
use crate::iir::Statement;

// ── Public types ────────────────────────────────────────────────────────────

/// A vertex: one AccessId.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub access_id: AccessId,
    /// Written by at least one inserted statement.
    pub written: bool,
}

/// A directed edge between two dense vertex indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub extent: Extent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDependencyGraph {
    index_of: BTreeMap<AccessId, usize>,
    vertices: Vec<Vertex>,
    adjacency: Vec<Vec<Edge>>,
}

impl AccessDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn contains(&self, id: AccessId) -> bool {
        self.index_of.contains_key(&id)
    }

    pub fn vertex_index(&self, id: AccessId) -> Option<usize> {
        self.index_of.get(&id).copied()
    }

    pub fn access_id(&self, index: usize) -> AccessId {
        self.vertices[index].access_id
    }

    /// Outgoing edges of a vertex.
    pub fn edges_from(&self, index: usize) -> &[Edge] {
        &self.adjacency[index]
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.adjacency.iter().flatten()
    }

    /// Extent of the edge `from -> to`, if present.
    pub fn edge_extent(&self, from: AccessId, to: AccessId) -> Option<Extent> {
        let (f, t) = (self.vertex_index(from)?, self.vertex_index(to)?);
        self.adjacency[f]
            .iter()
            .find(|e| e.to == t)
            .map(|e| e.extent)
    }

    // ── Construction ────────────────────────────────────────────────────

    pub fn insert_node(&mut self, id: AccessId) -> usize {
        if let Some(&idx) = self.index_of.get(&id) {
            return idx;
        }
        let idx = self.vertices.len();
        self.vertices.push(Vertex {
            access_id: id,
            written: false,
        });
        self.adjacency.push(Vec::new());
        self.index_of.insert(id, idx);
        idx
    }

    /// Insert `from -> to`, or widen the existing edge to the union of extents.
    pub fn insert_edge(&mut self, from: AccessId, to: AccessId, extent: Extent) {
        let f = self.insert_node(from);
        let t = self.insert_node(to);
        match self.adjacency[f].iter_mut().find(|e| e.to == t) {
            Some(edge) => edge.extent.merge(&extent),
            None => self.adjacency[f].push(Edge {
                from: f,
                to: t,
                extent,
            }),
        }
    }

    /// Add the accesses of one statement.
    ///
    /// Every written AccessId gets an edge to every read AccessId. A pointwise
    /// read of the value being written (`a = a + 1`) adds no self-loop.
    pub fn insert_statement(&mut self, stmt: &Statement) {
        for &write in stmt.accesses.writes.keys() {
            let w = self.insert_node(write);
            self.vertices[w].written = true;
            for (&read, extent) in &stmt.accesses.reads {
                if read == write && extent.is_pointwise() {
                    continue;
                }
                self.insert_edge(write, read, *extent);
            }
        }
    }

    /// Union with `other`; overlapping edges keep the widest extent.
    pub fn merge(&mut self, other: &AccessDependencyGraph) {
        for vertex in &other.vertices {
            let idx = self.insert_node(vertex.access_id);
            self.vertices[idx].written |= vertex.written;
        }
        for edge in other.edges() {
            self.insert_edge(
                other.access_id(edge.from),
                other.access_id(edge.to),
                edge.extent,
            );
        }
    }

    // ── Structure queries ───────────────────────────────────────────────

    /// Partition of all vertices into strongly connected components.
    ///
    /// Components are listed in reverse topological order of the
    /// condensation (Tarjan's discovery order).
    pub fn find_sccs(&self) -> Vec<BTreeSet<AccessId>> {
        let mut g: DiGraph<AccessId, ()> =
            DiGraph::with_capacity(self.vertex_count(), self.edge_count());
        for vertex in &self.vertices {
            g.add_node(vertex.access_id);
        }
        for edge in self.edges() {
            g.add_edge(NodeIndex::new(edge.from), NodeIndex::new(edge.to), ());
        }
        tarjan_scc(&g)
            .into_iter()
            .map(|component| component.into_iter().map(|n| g[n]).collect())
            .collect()
    }

    /// Components with two or more vertices, i.e. true multi-vertex cycles.
    pub fn cyclic_sccs(&self) -> Vec<BTreeSet<AccessId>> {
        self.find_sccs()
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .collect()
    }

    pub fn has_self_loop(&self, id: AccessId) -> bool {
        self.self_loop(id).is_some()
    }

    /// Extent of the self-loop on `id`, if any.
    pub fn self_loop(&self, id: AccessId) -> Option<Extent> {
        self.edge_extent(id, id)
    }

    /// AccessIds carrying a self-loop, in vertex order.
    pub fn self_loops(&self) -> impl Iterator<Item = (AccessId, Extent)> + '_ {
        self.edges()
            .filter(|e| e.from == e.to)
            .map(|e| (self.access_id(e.from), e.extent))
    }

    /// True iff every SCC is a single vertex and no vertex has a self-loop.
    pub fn is_dag(&self) -> bool {
        self.self_loops().next().is_none() && self.cyclic_sccs().is_empty()
    }

    /// Edges whose endpoints both lie in `component`.
    pub fn edges_within<'a>(
        &'a self,
        component: &'a BTreeSet<AccessId>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges().filter(move |e| {
            component.contains(&self.access_id(e.from)) && component.contains(&self.access_id(e.to))
        })
    }

    /// Vertices no other vertex depends on (nothing reads them).
    pub fn output_vertices(&self) -> Vec<usize> {
        let mut has_incoming = vec![false; self.vertex_count()];
        for edge in self.edges().filter(|e| e.from != e.to) {
            has_incoming[edge.to] = true;
        }
        (0..self.vertex_count())
            .filter(|&v| !has_incoming[v])
            .collect()
    }

    /// Vertices that depend on nothing (pure inputs).
    pub fn input_vertices(&self) -> Vec<usize> {
        (0..self.vertex_count())
            .filter(|&v| self.adjacency[v].iter().all(|e| e.to == v))
            .collect()
    }
}
