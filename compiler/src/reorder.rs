// reorder.rs — Greedy stage reordering into multi-stages
//
// Repacks the stages of a stencil into as few multi-stages as the greedy
// strategy finds, preferring a parallel loop order. Stages are visited in
// original order; each one is inserted right after the latest already-placed
// stage it depends on, in the first multi-stage from there on that accepts
// it. A multi-stage accepts a stage when
//   1. the loop orders are compatible,
//   2. the merged access graph stays free of cycles and some permitted loop
//      order has no counter-loop-order read-before-write conflict, and
//   3. the whole merged multi-stage needs no more halo points than allowed.
//
// Preconditions: `stencil.stage_graph` is set and acyclic; races are repaired.
// Postconditions: returns a new Stencil holding every stage exactly once;
//                 the input stencil is never modified.
// Failure modes: a stage whose own halo exceeds the budget aborts with
//                `HaloBudgetExceeded`; a stage rejected by a fresh
//                multi-stage for any other reason panics (cyclic input).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::conflict::{has_vertical_read_before_write_conflict, max_boundary_halo};
use crate::diag::{codes, Diagnostic, SourceLocation};
use crate::error::{OptimizerError, Result};
use crate::extent::LoopOrder;
use crate::iir::{MultiStage, Stage, Stencil};

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for reordering postconditions (R1-R5).
#[derive(Debug, Clone)]
pub struct ReorderCert {
    /// R1: Every original stage appears exactly once.
    pub r1_stages_placed_once: bool,
    /// R2: Every stage runs after all stages it depends on.
    pub r2_dependencies_respected: bool,
    /// R3: Every multi-stage's merged graph stays within the halo budget.
    pub r3_halo_within_budget: bool,
    /// R4: No stage runs in a multi-stage sweeping against its own order.
    pub r4_loop_orders_compatible: bool,
    /// R5: No multi-stage is left empty.
    pub r5_no_empty_multi_stages: bool,
}

impl crate::pass::StageCert for ReorderCert {
    fn all_pass(&self) -> bool {
        self.r1_stages_placed_once
            && self.r2_dependencies_respected
            && self.r3_halo_within_budget
            && self.r4_loop_orders_compatible
            && self.r5_no_empty_multi_stages
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("R1_stages_placed_once", self.r1_stages_placed_once),
            ("R2_dependencies_respected", self.r2_dependencies_respected),
            ("R3_halo_within_budget", self.r3_halo_within_budget),
            ("R4_loop_orders_compatible", self.r4_loop_orders_compatible),
            ("R5_no_empty_multi_stages", self.r5_no_empty_multi_stages),
        ]
    }
}

/// Check a reordered stencil against the stencil it was built from.
pub fn verify_reorder(original: &Stencil, reordered: &Stencil, max_halo_points: u32) -> ReorderCert {
    ReorderCert {
        r1_stages_placed_once: verify_r1_stages_placed_once(original, reordered),
        r2_dependencies_respected: verify_r2_dependencies_respected(original, reordered),
        r3_halo_within_budget: verify_r3_halo_within_budget(reordered, max_halo_points),
        r4_loop_orders_compatible: verify_r4_loop_orders_compatible(original, reordered),
        r5_no_empty_multi_stages: reordered.multi_stages.iter().all(|ms| !ms.is_empty()),
    }
}

fn verify_r1_stages_placed_once(original: &Stencil, reordered: &Stencil) -> bool {
    let mut seen = BTreeSet::new();
    for stage in reordered.stages() {
        if !seen.insert(stage.id) {
            return false; // duplicate
        }
    }
    let expected: BTreeSet<_> = original.stages().map(|s| s.id).collect();
    seen == expected && reordered.stage_count() == original.stage_count()
}

/// R2: for every `(stage, on)` edge, `on` comes first in execution order.
fn verify_r2_dependencies_respected(original: &Stencil, reordered: &Stencil) -> bool {
    let Some(sdg) = &original.stage_graph else {
        return true;
    };
    let order: BTreeMap<_, _> = reordered
        .stages()
        .enumerate()
        .map(|(idx, s)| (s.id, idx))
        .collect();
    sdg.dependencies()
        .iter()
        .all(|(stage, on)| match (order.get(stage), order.get(on)) {
            (Some(a), Some(b)) => b < a,
            _ => false,
        })
}

fn verify_r3_halo_within_budget(reordered: &Stencil, max_halo_points: u32) -> bool {
    reordered
        .multi_stages
        .iter()
        .all(|ms| merged_halo(ms) <= max_halo_points)
}

fn verify_r4_loop_orders_compatible(original: &Stencil, reordered: &Stencil) -> bool {
    let before = original.stage_loop_orders();
    reordered.multi_stages.iter().all(|ms| {
        ms.stages.iter().all(|stage| match before.get(&stage.id) {
            Some(lo) => *lo == LoopOrder::Parallel || *lo == ms.loop_order,
            None => false,
        })
    })
}

// ── Mergeability ────────────────────────────────────────────────────────────

/// Loop orders a stage may run in when joining a multi-stage, best first.
///
/// ```text
///                 MULTI-STAGE
///              |  P    F    B
///         -----+---------------
///    S     P   | PFB   F    B
///    T     F   |  F    F    X
///    G     B   |  B    X    B
/// ```
fn possible_loop_orders(stage: LoopOrder, multi_stage: LoopOrder) -> Vec<LoopOrder> {
    match (multi_stage, stage) {
        (LoopOrder::Parallel, LoopOrder::Parallel) => {
            vec![LoopOrder::Parallel, LoopOrder::Forward, LoopOrder::Backward]
        }
        (ms, LoopOrder::Parallel) => vec![ms],
        (_, stage) => vec![stage],
    }
}

/// Can `stage` join `ms`? Returns the loop order the merged multi-stage uses.
pub fn is_mergeable(stage: &Stage, stage_loop_order: LoopOrder, ms: &MultiStage) -> Option<LoopOrder> {
    let mut graph = ms.dependency_graph_of_interval(&stage.extended_interval());
    graph.merge(&stage.do_method.dependency_graph());

    let candidates = possible_loop_orders(stage_loop_order, ms.loop_order);
    if graph.is_empty() {
        return Some(candidates[0]);
    }

    // Vertical recurrences (self-loops) are judged by the conflict check below.
    if !graph.cyclic_sccs().is_empty() {
        return None;
    }

    candidates.into_iter().find(|&lo| {
        !has_vertical_read_before_write_conflict(&graph, lo).counter_loop_order_conflict
    })
}

/// Halo of the whole multi-stage, over all of its stages and levels.
///
/// Boundary extents only grow when edges are added, so this bounds the halo
/// of every interval-restricted view of `ms` as well.
pub fn merged_halo(ms: &MultiStage) -> u32 {
    max_boundary_halo(&ms.dependency_graph())
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Reorder the stages of `stencil` greedily; `name` names it in diagnostics.
pub fn reorder_greedy(stencil: &Stencil, name: &str, max_halo_points: u32) -> Result<Stencil> {
    let sdg = stencil
        .stage_graph
        .as_ref()
        .ok_or_else(|| OptimizerError::MissingStageGraph {
            stencil: name.to_string(),
        })?;

    let mut reordered = Stencil {
        id: stencil.id,
        multi_stages: Vec::new(),
        stage_graph: Some(sdg.clone()),
    };

    for original_ms in &stencil.multi_stages {
        // Every original multi-stage opens an empty one.
        reordered
            .multi_stages
            .push(MultiStage::new(LoopOrder::Parallel, Vec::new()));

        for stage in &original_ms.stages {
            let stage_loop_order = original_ms.loop_order;

            // Right after the latest placed stage this one depends on.
            let (mut ms_idx, mut insert_at) = match reordered
                .stage_positions()
                .into_iter()
                .rev()
                .find(|(_, placed)| sdg.depends(stage.id, *placed))
            {
                Some((pos, _)) => (pos.multi_stage, pos.stage + 1),
                None => (0, 0),
            };

            let mut last_chance = false;
            loop {
                let ms = &reordered.multi_stages[ms_idx];
                if stage_loop_order.is_compatible_with(ms.loop_order) {
                    if let Some(loop_order) = is_mergeable(stage, stage_loop_order, ms) {
                        let mut candidate = ms.clone();
                        candidate.stages.insert(insert_at, stage.clone());
                        let needed = merged_halo(&candidate);
                        if needed <= max_halo_points {
                            reordered.multi_stages[ms_idx].loop_order = loop_order;
                            break;
                        } else if last_chance {
                            return Err(halo_budget_exceeded(name, stage, needed, max_halo_points));
                        }
                    }
                    assert!(
                        !last_chance,
                        "merging stage {} in empty multi-stage failed (this probably means the \
                         stage graph contains cycles - i.e is not a DAG!)",
                        stage.id
                    );
                }

                ms_idx += 1;
                insert_at = 0;

                if ms_idx == reordered.multi_stages.len() {
                    reordered
                        .multi_stages
                        .push(MultiStage::new(LoopOrder::Parallel, Vec::new()));
                    last_chance = true;
                }
            }

            debug!(
                stage = %stage.id,
                multi_stage = ms_idx,
                offset = insert_at,
                loop_order = %reordered.multi_stages[ms_idx].loop_order,
                "placed stage"
            );
            reordered.multi_stages[ms_idx]
                .stages
                .insert(insert_at, stage.clone());
        }
    }

    reordered.multi_stages.retain(|ms| !ms.is_empty());
    debug!(
        stencil = name,
        before = stencil.multi_stages.len(),
        after = reordered.multi_stages.len(),
        "reordered stages"
    );
    Ok(reordered)
}

fn halo_budget_exceeded(name: &str, stage: &Stage, needed: u32, max_halo_points: u32) -> OptimizerError {
    let diagnostic = Diagnostic::error(
        SourceLocation::default(),
        format!("stencil '{name}' exceeds maximum number of allowed halo lines ({max_halo_points})"),
    )
    .with_code(codes::E0200)
    .with_hint(format!(
        "stage {} alone needs {needed} halo points; raise the limit or split the stage",
        stage.id
    ));
    OptimizerError::HaloBudgetExceeded {
        stencil: name.to_string(),
        max_halo_points,
        diagnostic,
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

/// One line per multi-stage: loop order and stage ids.
pub fn summarize(stencil: &Stencil) -> String {
    stencil
        .multi_stages
        .iter()
        .map(|ms| {
            let ids: Vec<String> = ms.stages.iter().map(|s| s.id.to_string()).collect();
            format!("{} [{}]", ms.loop_order, ids.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
