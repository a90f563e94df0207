// field_versioning.rs — Race repair by field versioning
//
// Detects in-place updates that race under a multi-stage's loop order
// (`u = u(i+1)` in a parallel sweep, `a = a(k+1)` in a forward sweep, ...)
// and breaks the offending dependency cycle by giving the value read on the
// right-hand side a fresh versioned identity.
//
// Each multi-stage is walked bottom-up (stages and statements in reverse
// execution order) while an access graph accumulates the statements seen so
// far. Before a statement is inserted, the graph is snapshotted; if the
// insertion creates a race that renaming fixes, the snapshot is restored and
// the rewritten statement is inserted instead.
//
// Preconditions: statement access summaries are exact; every AccessId is
//                registered in the instantiation metadata.
// Postconditions: on success, no multi-stage graph holds a hazardous cycle
//                 or a hazardous self-loop.
// Failure modes: a hazard inside a non-assignment statement, or one whose
//                assignment target is outside the cycle, aborts the pass.
//                Renames applied before the failing statement are kept.
// Side effects: optional DOT dump of the failing graph.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access_graph::AccessDependencyGraph;
use crate::diag::{codes, Diagnostic};
use crate::error::{OptimizerError, Result};
use crate::extent::{Extent, LoopOrder};
use crate::id::{AccessId, StencilId};
use crate::iir::{Stencil, StencilInstantiation, StmtKind};
use crate::metadata::StencilMetadata;
use crate::pipeline::OptimizerOptions;
use crate::rename::{create_version_and_rename, statement, StatementPosition};

// ── Public types ────────────────────────────────────────────────────────────

/// One right-hand-side access given a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameRecord {
    pub stencil: StencilId,
    pub position: StatementPosition,
    pub line: u32,
    pub old: AccessId,
    pub new: AccessId,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersioningOutcome {
    /// Renames in the order they were applied.
    pub renames: Vec<RenameRecord>,
}

impl VersioningOutcome {
    pub fn rename_count(&self) -> usize {
        self.renames.len()
    }
}

/// Hazards of an access graph under one loop order.
///
/// Returns, in order of preference: the multi-vertex cycles holding a
/// horizontal stencil or counter-loop-order edge; else the vertices with
/// such a self-loop; else, when the graph is not a DAG, its first cycle.
pub fn find_hazards(graph: &AccessDependencyGraph, loop_order: LoopOrder) -> Vec<BTreeSet<AccessId>> {
    let is_hazard = |extent: &Extent| {
        extent.is_horizontal_stencil_or_counter_loop_order(loop_order)
    };

    let cycles = graph.cyclic_sccs();
    let stencil_cycles: Vec<BTreeSet<AccessId>> = cycles
        .iter()
        .filter(|scc| graph.edges_within(scc).any(|e| is_hazard(&e.extent)))
        .cloned()
        .collect();
    if !stencil_cycles.is_empty() {
        return stencil_cycles;
    }

    let self_loops: Vec<BTreeSet<AccessId>> = graph
        .self_loops()
        .filter(|(_, extent)| is_hazard(extent))
        .map(|(id, _)| BTreeSet::from([id]))
        .collect();
    if !self_loops.is_empty() {
        return self_loops;
    }

    // `a = b; b = a;` holds no stencil access but still has to become a DAG.
    match cycles.into_iter().next() {
        Some(first) if !graph.is_dag() => vec![first],
        _ => Vec::new(),
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Repair every race of every stencil in `inst`.
pub fn run_field_versioning(
    inst: &mut StencilInstantiation,
    options: &OptimizerOptions,
) -> Result<VersioningOutcome> {
    let mut ctx = VersioningCtx {
        name: &inst.name,
        metadata: &mut inst.metadata,
        options,
        renames: Vec::new(),
    };
    for stencil in inst.stencils.iter_mut() {
        ctx.version_stencil(stencil)?;
    }

    let outcome = VersioningOutcome {
        renames: ctx.renames,
    };
    if outcome.renames.is_empty() {
        if options.report_field_versioning {
            info!(instantiation = %inst.name, "field versioning: no rename");
        }
    } else {
        debug!(
            instantiation = %inst.name,
            renames = outcome.rename_count(),
            "field versioning complete"
        );
    }
    Ok(outcome)
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for versioning postconditions (V1-V2).
#[derive(Debug, Clone)]
pub struct VersioningCert {
    /// V1: No multi-stage graph holds a hazard under its loop order.
    pub v1_no_hazards: bool,
    /// V2: Every referenced AccessId is registered in the metadata.
    pub v2_accesses_registered: bool,
}

impl crate::pass::StageCert for VersioningCert {
    fn all_pass(&self) -> bool {
        self.v1_no_hazards && self.v2_accesses_registered
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_no_hazards", self.v1_no_hazards),
            ("V2_accesses_registered", self.v2_accesses_registered),
        ]
    }
}

pub fn verify_versioning(inst: &StencilInstantiation) -> VersioningCert {
    let multi_stages = || inst.stencils.iter().flat_map(|s| s.multi_stages.iter());
    let v1_no_hazards = multi_stages()
        .all(|ms| find_hazards(&ms.dependency_graph(), ms.loop_order).is_empty());
    let v2_accesses_registered = multi_stages()
        .flat_map(|ms| ms.stages.iter())
        .flat_map(|stage| stage.do_method.statements.iter())
        .flat_map(|stmt| stmt.accesses.access_ids())
        .all(|id| inst.metadata.contains(id));
    VersioningCert {
        v1_no_hazards,
        v2_accesses_registered,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

enum RaceFix {
    Nothing,
    Fixed,
}

struct VersioningCtx<'a> {
    name: &'a str,
    metadata: &'a mut StencilMetadata,
    options: &'a OptimizerOptions,
    renames: Vec<RenameRecord>,
}

impl VersioningCtx<'_> {
    fn version_stencil(&mut self, stencil: &mut Stencil) -> Result<()> {
        for ms_idx in (0..stencil.multi_stages.len()).rev() {
            let loop_order = stencil.multi_stages[ms_idx].loop_order;
            let mut graph = AccessDependencyGraph::new();

            for stage_idx in (0..stencil.multi_stages[ms_idx].stages.len()).rev() {
                let stmt_count = stencil.multi_stages[ms_idx].stages[stage_idx]
                    .do_method
                    .statements
                    .len();
                for stmt_idx in (0..stmt_count).rev() {
                    let pos = StatementPosition {
                        multi_stage: ms_idx,
                        stage: stage_idx,
                        statement: stmt_idx,
                    };
                    let snapshot = graph.clone();
                    graph.insert_statement(statement(stencil, pos));

                    match self.fix_race_condition(&graph, stencil, pos, loop_order)? {
                        RaceFix::Nothing => {}
                        RaceFix::Fixed => {
                            graph = snapshot;
                            graph.insert_statement(statement(stencil, pos));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fix_race_condition(
        &mut self,
        graph: &AccessDependencyGraph,
        stencil: &mut Stencil,
        pos: StatementPosition,
        loop_order: LoopOrder,
    ) -> Result<RaceFix> {
        let hazards = find_hazards(graph, loop_order);
        if hazards.is_empty() {
            return Ok(RaceFix::Nothing);
        }

        let (lhs_id, rhs) = match &statement(stencil, pos).kind {
            StmtKind::Assign { lhs, rhs } => match (lhs.len(), lhs.first()) {
                (1, Some(&lhs_id)) => (lhs_id, rhs.clone()),
                _ => panic!("left hand side should only have only one AccessId"),
            },
            _ => return Err(self.unresolvable(graph, stencil, pos, loop_order, None)),
        };

        if hazards.iter().any(|scc| !scc.contains(&lhs_id)) {
            return Err(self.unresolvable(graph, stencil, pos, loop_order, Some(lhs_id)));
        }
        assert!(
            hazards.len() == 1,
            "only one strongly connected component can be handled"
        );

        let line = statement(stencil, pos).loc.line;
        let candidates: Vec<AccessId> = hazards[0].intersection(&rhs).copied().collect();
        for old in candidates {
            let (new, scope) = create_version_and_rename(self.metadata, stencil, pos, old);
            let record = RenameRecord {
                stencil: stencil.id,
                position: pos,
                line,
                old,
                new,
                old_name: self.metadata.display_name(old),
                new_name: self.metadata.display_name(new),
            };
            if self.options.report_field_versioning {
                info!(
                    instantiation = self.name,
                    line,
                    "field versioning: rename {}:{}",
                    record.old_name,
                    record.new_name
                );
            }
            debug!(
                ?pos,
                rewritten = scope.rewritten_reads.len(),
                writer = ?scope.retargeted_writer,
                "renamed {} -> {}",
                record.old_name,
                record.new_name
            );
            self.renames.push(record);
        }
        Ok(RaceFix::Fixed)
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    fn unresolvable(
        &self,
        graph: &AccessDependencyGraph,
        stencil: &Stencil,
        pos: StatementPosition,
        loop_order: LoopOrder,
        lhs_outside_cycle: Option<AccessId>,
    ) -> OptimizerError {
        if self.options.dump_race_condition_graph {
            self.dump_graph(graph, loop_order);
        }

        let stmt = statement(stencil, pos);
        let message = if matches!(stmt.kind, StmtKind::If { .. }) {
            "unresolvable race-condition in body of if-statement"
        } else {
            "unresolvable race-condition in statement"
        };
        let mut diag = Diagnostic::error(stmt.loc, message);
        diag = match lhs_outside_cycle {
            Some(lhs) => diag.with_code(codes::E0101).with_hint(format!(
                "'{}' is not part of the dependency cycle",
                self.metadata.display_name(lhs)
            )),
            None => diag.with_code(codes::E0100),
        };
        for call in stmt.stack_trace.iter().rev() {
            diag = diag.with_note(
                call.loc,
                format!(
                    "detected during instantiation of stencil-call '{}'",
                    call.callee
                ),
            );
        }

        OptimizerError::UnresolvableRace {
            stencil: self.name.to_string(),
            diagnostics: vec![diag],
        }
    }

    fn dump_graph(&self, graph: &AccessDependencyGraph, loop_order: LoopOrder) {
        let file_name = format!("rc_{}.dot", self.name);
        let path: PathBuf = match &self.options.dump_dir {
            Some(dir) => dir.join(&file_name),
            None => PathBuf::from(&file_name),
        };
        let dot = crate::dot::emit_graph_dot(
            graph,
            self.metadata,
            &format!("rc_{}", self.name),
            loop_order,
        );
        match std::fs::write(&path, dot) {
            Ok(()) => info!(path = %path.display(), "wrote race-condition graph"),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot write race-condition graph"),
        }
    }
}
