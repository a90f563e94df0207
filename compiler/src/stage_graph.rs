// stage_graph.rs — Stage-ordering DAG
//
// Coarse dependencies between the stages of one stencil. An edge `a -> b`
// means "stage a depends on stage b": b must run no later than a. Edges are
// derived from the field summaries of each stage pair in original order:
// a later stage depends on an earlier one when it reads what the earlier
// stage writes, writes what it reads, or writes what it writes.
//
// Preconditions: stages carry unique StageIds.
// Postconditions: graphs built from a dependency-valid stencil are acyclic.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::id::{AccessId, StageId};
use crate::iir::{Field, Stencil};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StageGraphRepr", into = "StageGraphRepr")]
pub struct StageDependencyGraph {
    graph: DiGraphMap<StageId, ()>,
}

impl StageDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the ordering constraints of `stencil` from its current stage order.
    pub fn build(stencil: &Stencil) -> Self {
        let mut sdg = StageDependencyGraph::new();
        let summaries: Vec<(StageId, Vec<Field>)> =
            stencil.stages().map(|s| (s.id, s.fields())).collect();

        for (later_idx, (later, later_fields)) in summaries.iter().enumerate() {
            sdg.insert_stage(*later);
            for (earlier, earlier_fields) in &summaries[..later_idx] {
                if fields_conflict(later_fields, earlier_fields) {
                    sdg.insert_dependency(*later, *earlier);
                }
            }
        }
        sdg
    }

    pub fn insert_stage(&mut self, stage: StageId) {
        self.graph.add_node(stage);
    }

    /// Record that `stage` must run after `on`.
    pub fn insert_dependency(&mut self, stage: StageId, on: StageId) {
        self.graph.add_edge(stage, on, ());
    }

    /// Does `stage` directly depend on `on`?
    pub fn depends(&self, stage: StageId, on: StageId) -> bool {
        self.graph.contains_edge(stage, on)
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.graph.contains_node(stage)
    }

    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All `(stage, on)` pairs, sorted.
    pub fn dependencies(&self) -> Vec<(StageId, StageId)> {
        let mut deps: Vec<_> = self.graph.all_edges().map(|(a, b, _)| (a, b)).collect();
        deps.sort();
        deps
    }

    pub fn is_acyclic(&self) -> bool {
        toposort(&self.graph, None).is_ok()
    }
}

fn fields_conflict(later: &[Field], earlier: &[Field]) -> bool {
    let ids = |fields: &[Field], pick: fn(&Field) -> bool| -> BTreeSet<AccessId> {
        fields
            .iter()
            .filter(|f| pick(f))
            .map(|f| f.access_id)
            .collect()
    };
    let later_reads = ids(later, Field::is_read);
    let later_writes = ids(later, Field::is_written);
    let earlier_reads = ids(earlier, Field::is_read);
    let earlier_writes = ids(earlier, Field::is_written);

    !later_reads.is_disjoint(&earlier_writes)
        || !later_writes.is_disjoint(&earlier_reads)
        || !later_writes.is_disjoint(&earlier_writes)
}

impl PartialEq for StageDependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        let nodes = |g: &DiGraphMap<StageId, ()>| g.nodes().collect::<BTreeSet<_>>();
        nodes(&self.graph) == nodes(&other.graph) && self.dependencies() == other.dependencies()
    }
}

impl Eq for StageDependencyGraph {}

// ── Serialized form ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StageGraphRepr {
    #[serde(default)]
    stages: Vec<StageId>,
    /// `[stage, depends_on]` pairs.
    #[serde(default)]
    dependencies: Vec<(StageId, StageId)>,
}

impl From<StageGraphRepr> for StageDependencyGraph {
    fn from(repr: StageGraphRepr) -> Self {
        let mut sdg = StageDependencyGraph::new();
        for stage in repr.stages {
            sdg.insert_stage(stage);
        }
        for (stage, on) in repr.dependencies {
            sdg.insert_dependency(stage, on);
        }
        sdg
    }
}

impl From<StageDependencyGraph> for StageGraphRepr {
    fn from(sdg: StageDependencyGraph) -> Self {
        let mut stages: Vec<StageId> = sdg.graph.nodes().collect();
        stages.sort();
        StageGraphRepr {
            stages,
            dependencies: sdg.dependencies(),
        }
    }
}
