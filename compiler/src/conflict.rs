// conflict.rs — Read-before-write conflicts and boundary (halo) extents
//
// Both analyses run on an access dependency graph (writer -> reader edges).
// A read-before-write conflict is an edge into a vertex that is also written
// somewhere in the graph, whose vertical extent reaches levels the sweep has
// not computed yet (or has already passed). Boundary extents
// accumulate read extents along writer -> reader chains, starting from the
// vertices nothing reads.
//
// Preconditions: none; graphs with multi-vertex cycles are tolerated.
// Postconditions: results depend only on graph contents.
// Failure modes: none.
// Side effects: none.

use std::collections::VecDeque;
use std::ops::BitOr;

use crate::access_graph::AccessDependencyGraph;
use crate::extent::{Extent, LoopOrder};
use crate::id::AccessId;

// ── Read-before-write ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadBeforeWriteConflict {
    /// A written value is read at a level the sweep has already passed.
    pub loop_order_conflict: bool,
    /// A written value is read at a level the sweep has not reached yet.
    pub counter_loop_order_conflict: bool,
}

impl ReadBeforeWriteConflict {
    pub fn any(&self) -> bool {
        self.loop_order_conflict || self.counter_loop_order_conflict
    }
}

impl BitOr for ReadBeforeWriteConflict {
    type Output = ReadBeforeWriteConflict;

    fn bitor(self, rhs: Self) -> Self {
        ReadBeforeWriteConflict {
            loop_order_conflict: self.loop_order_conflict || rhs.loop_order_conflict,
            counter_loop_order_conflict: self.counter_loop_order_conflict
                || rhs.counter_loop_order_conflict,
        }
    }
}

/// Vertical conflicts of `graph` when swept in `loop_order`.
pub fn has_vertical_read_before_write_conflict(
    graph: &AccessDependencyGraph,
    loop_order: LoopOrder,
) -> ReadBeforeWriteConflict {
    graph
        .edges()
        .filter(|edge| graph.vertices()[edge.to].written)
        .fold(ReadBeforeWriteConflict::default(), |acc, edge| {
            let access = edge.extent.vertical_loop_order_accesses(loop_order);
            acc | ReadBeforeWriteConflict {
                loop_order_conflict: access.loop_order,
                counter_loop_order_conflict: access.counter_loop_order,
            }
        })
}

// ── Boundary extents ────────────────────────────────────────────────────────

/// Accumulated extent of every vertex, in vertex order.
///
/// Vertices nothing reads start at the zero extent; every edge
/// `writer -> reader` widens the reader by `extent(writer) + edge extent`.
/// Self-loops widen their own vertex once.
pub fn compute_boundary_extents(graph: &AccessDependencyGraph) -> Vec<(AccessId, Extent)> {
    let n = graph.vertex_count();
    let mut extents = vec![Extent::zero(); n];

    let mut in_degree = vec![0usize; n];
    for edge in graph.edges().filter(|e| e.from != e.to) {
        in_degree[edge.to] += 1;
    }
    let mut queue: VecDeque<usize> = graph.output_vertices().into_iter().collect();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while let Some(v) = queue.pop_front() {
        visited[v] = true;
        order.push(v);
        for edge in graph.edges_from(v).iter().filter(|e| e.to != v) {
            in_degree[edge.to] -= 1;
            if in_degree[edge.to] == 0 {
                queue.push_back(edge.to);
            }
        }
    }
    // Cycle members never reach in-degree zero; visit them last.
    order.extend((0..n).filter(|&v| !visited[v]));

    for v in order {
        if let Some(self_loop) = graph.edges_from(v).iter().find(|e| e.to == v) {
            let widened = extents[v].add(&self_loop.extent);
            extents[v].merge(&widened);
        }
        for edge in graph.edges_from(v).iter().filter(|e| e.to != v) {
            let reach = extents[v].add(&edge.extent);
            extents[edge.to].merge(&reach);
        }
    }

    (0..n).map(|v| (graph.access_id(v), extents[v])).collect()
}

/// Largest horizontal halo over all boundary extents.
pub fn max_boundary_halo(graph: &AccessDependencyGraph) -> u32 {
    compute_boundary_extents(graph)
        .iter()
        .map(|(_, extent)| extent.horizontal_halo())
        .max()
        .unwrap_or(0)
}
