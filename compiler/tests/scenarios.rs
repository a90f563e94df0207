// Scenario tests: end-to-end behavior of the optimizer passes.
//
// Each test builds (or loads from demos/) a small stencil instantiation and
// runs the passes through the library API, checking renames, the resulting
// multi-stage layout and the reported diagnostics.

use std::path::{Path, PathBuf};

use stencilopt::diag::codes;
use stencilopt::error::OptimizerError;
use stencilopt::extent::{Extent, Interval, LoopOrder};
use stencilopt::field_versioning::{run_field_versioning, verify_versioning};
use stencilopt::id::{StageId, StencilId};
use stencilopt::iir::{MultiStage, Stage, Statement, Stencil, StencilInstantiation};
use stencilopt::metadata::StencilMetadata;
use stencilopt::pass::{PassId, StageCert};
use stencilopt::pipeline::{run_pipeline, CompilationState, OptimizerOptions};
use stencilopt::reorder::{reorder_greedy, summarize, verify_reorder};
use stencilopt::stage_graph::StageDependencyGraph;

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_demo(name: &str) -> StencilInstantiation {
    let path = project_root().join("demos").join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("bad demo {}: {}", name, e))
}

fn optimize(inst: StencilInstantiation, options: &OptimizerOptions) -> CompilationState {
    let mut state = CompilationState::new(inst);
    run_pipeline(&mut state, PassId::ReorderStages, options, |_, _| {}).unwrap_or_else(|e| {
        panic!("pipeline failed in {}: {:?}", e.failing_pass, cause_messages(&e))
    });
    state
}

fn cause_messages(e: &stencilopt::pipeline::PipelineError) -> Vec<String> {
    e.cause
        .iter()
        .flat_map(|c| c.diagnostics())
        .map(|d| d.to_string())
        .collect()
}

fn layout(state: &CompilationState) -> String {
    summarize(&state.instantiation.stencils[0])
}

fn single_stage(md: StencilMetadata, loop_order: LoopOrder, stmts: Vec<Statement>) -> StencilInstantiation {
    let mut inst = StencilInstantiation::new("scenario", md);
    inst.stencils.push(Stencil::new(
        StencilId(0),
        vec![MultiStage::new(
            loop_order,
            vec![Stage::new(StageId(0), Interval::new(0, 59), stmts)],
        )],
    ));
    inst
}

// ── Race repair ─────────────────────────────────────────────────────────────

/// `u = u(i+1)` in a parallel sweep: one rename of the right-hand side.
#[test]
fn scenario_a_horizontal_self_update() {
    let mut md = StencilMetadata::new("scenario");
    let u = md.add_field("u");
    let mut inst = single_stage(
        md,
        LoopOrder::Parallel,
        vec![Statement::assign(u, [(u, Extent::from_offset(1, 0, 0))]).at(3, 5)],
    );
    let outcome = run_field_versioning(&mut inst, &OptimizerOptions::default()).unwrap();
    assert_eq!(outcome.rename_count(), 1);
    assert_eq!(outcome.renames[0].new_name, "u_1");
    assert_eq!(outcome.renames[0].line, 3);
    assert!(verify_versioning(&inst).all_pass());
}

/// `a = b; b = a;` forms a pointwise cycle that is still broken.
#[test]
fn scenario_b_pointwise_swap() {
    let state = optimize(load_demo("swap.json"), &OptimizerOptions::default());
    let versioning = state.versioning.as_ref().unwrap();
    assert_eq!(versioning.rename_count(), 1);
    let r = &versioning.renames[0];
    assert_eq!((r.old_name.as_str(), r.new_name.as_str(), r.line), ("b", "b_1", 8));
    assert!(state.instantiation.metadata.is_version(r.new));
    assert_eq!(layout(&state), "parallel [s0]");
}

/// A race inside a conditional cannot be renamed away.
#[test]
fn scenario_c_race_in_conditional() {
    let mut inst = load_demo("conditional_race.json");
    let before = inst.clone();
    let err = run_field_versioning(&mut inst, &OptimizerOptions::default()).unwrap_err();
    match &err {
        OptimizerError::UnresolvableRace { stencil, diagnostics } => {
            assert_eq!(stencil, "conditional_race");
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].loc.line, 21);
            assert_eq!(diagnostics[0].code, Some(codes::E0100));
            // Innermost call site first.
            assert_eq!(diagnostics[0].notes[0].loc.line, 30);
            assert_eq!(diagnostics[0].notes[1].loc.line, 40);
        }
        other => panic!("expected an unresolvable race, got {other:?}"),
    }
    assert_eq!(inst, before, "no rename may be applied");
}

#[test]
fn in_place_diffusion_versions_input() {
    let state = optimize(load_demo("hori_diff.json"), &OptimizerOptions::default());
    let versioning = state.versioning.as_ref().unwrap();
    assert_eq!(versioning.rename_count(), 1);
    assert_eq!(versioning.renames[0].old_name, "u");
    assert_eq!(versioning.renames[0].line, 12);
    assert_eq!(layout(&state), "parallel [s0 s1]");
}

#[test]
fn vertical_solver_keeps_sweeps_apart() {
    let state = optimize(load_demo("vertical_solver.json"), &OptimizerOptions::default());
    assert_eq!(state.versioning.as_ref().unwrap().rename_count(), 0);
    assert_eq!(layout(&state), "forward [s0]\nbackward [s1]");
}

#[test]
fn repair_is_idempotent_on_demos() {
    for demo in ["hori_diff.json", "swap.json", "vertical_solver.json", "disjoint.json"] {
        let mut inst = load_demo(demo);
        run_field_versioning(&mut inst, &OptimizerOptions::default()).unwrap();
        let again = run_field_versioning(&mut inst, &OptimizerOptions::default()).unwrap();
        assert_eq!(again.rename_count(), 0, "{demo}: second run renamed");
    }
}

// ── Scheduling ──────────────────────────────────────────────────────────────

/// Five stages with disjoint accesses fuse into a single multi-stage.
#[test]
fn scenario_d_disjoint_stages_fuse() {
    let options = OptimizerOptions {
        max_halo_points: 10,
        ..Default::default()
    };
    let state = optimize(load_demo("disjoint.json"), &options);
    let stencil = &state.instantiation.stencils[0];
    assert_eq!(stencil.multi_stages.len(), 1);
    assert_eq!(stencil.stage_count(), 5);
    assert_eq!(stencil.multi_stages[0].loop_order, LoopOrder::Parallel);
}

/// A stage whose own halo is over budget fails even on its own.
#[test]
fn scenario_e_stage_over_halo_budget() {
    let mut inst = load_demo("wide_halo.json");
    let stencil = &mut inst.stencils[0];
    stencil.stage_graph = Some(StageDependencyGraph::build(stencil));
    match reorder_greedy(stencil, &inst.name, 3) {
        Err(OptimizerError::HaloBudgetExceeded {
            stencil,
            max_halo_points,
            ..
        }) => {
            assert_eq!(stencil, "wide_halo");
            assert_eq!(max_halo_points, 3);
        }
        other => panic!("expected a halo failure, got {other:?}"),
    }

    let relaxed = OptimizerOptions {
        max_halo_points: 5,
        ..Default::default()
    };
    let state = optimize(load_demo("wide_halo.json"), &relaxed);
    assert_eq!(layout(&state), "parallel [s0]");
}

#[test]
fn failed_reorder_leaves_stencil_untouched() {
    let inst = load_demo("wide_halo.json");
    let mut state = CompilationState::new(inst.clone());
    let err = run_pipeline(
        &mut state,
        PassId::ReorderStages,
        &OptimizerOptions::default(),
        |_, _| {},
    )
    .unwrap_err();
    assert_eq!(err.failing_pass, PassId::ReorderStages);
    assert_eq!(state.instantiation.stencils[0].multi_stages, inst.stencils[0].multi_stages);
}

#[test]
fn dependent_stages_keep_their_order_across_multistages() {
    let mut md = StencilMetadata::new("chain");
    let (a, b, c) = (md.add_field("a"), md.add_field("b"), md.add_field("c"));
    let mut inst = StencilInstantiation::new("chain", md);
    let stage = |n, stmt| Stage::new(StageId(n), Interval::new(0, 59), vec![stmt]);
    inst.stencils.push(Stencil::new(
        StencilId(0),
        vec![
            MultiStage::new(
                LoopOrder::Parallel,
                vec![stage(0, Statement::assign(b, [(a, Extent::from_offset(1, 0, 0))]))],
            ),
            MultiStage::new(
                LoopOrder::Parallel,
                vec![stage(1, Statement::assign(c, [(b, Extent::from_offset(0, 1, 0))]))],
            ),
        ],
    ));
    let original = {
        let mut s = inst.stencils[0].clone();
        s.stage_graph = Some(StageDependencyGraph::build(&s));
        s
    };
    let state = optimize(inst, &OptimizerOptions::default());
    assert_eq!(layout(&state), "parallel [s0 s1]");
    assert!(verify_reorder(&original, &state.instantiation.stencils[0], 3).all_pass());
}

/// A stage reading one level above its interval pulls in a neighbor whose
/// interval starts there; their merged halo decides the split.
#[test]
fn halo_budget_covers_neighbors_reached_vertically() {
    let mut md = StencilMetadata::new("stacked");
    let (a, b, c) = (md.add_field("a"), md.add_field("b"), md.add_field("c"));
    let mut inst = StencilInstantiation::new("stacked", md);
    inst.stencils.push(Stencil::new(
        StencilId(0),
        vec![MultiStage::new(
            LoopOrder::Parallel,
            vec![
                Stage::new(
                    StageId(0),
                    Interval::new(0, 4),
                    vec![Statement::assign(c, [(a, Extent::from_offset(2, 0, 1))]).at(10, 5)],
                ),
                Stage::new(
                    StageId(1),
                    Interval::new(5, 9),
                    vec![Statement::assign(a, [(b, Extent::from_offset(2, 0, 0))]).at(11, 5)],
                ),
            ],
        )],
    ));

    let state = optimize(inst.clone(), &OptimizerOptions::default());
    assert_eq!(state.versioning.as_ref().unwrap().rename_count(), 0);
    assert_eq!(layout(&state), "parallel [s0]\nparallel [s1]");

    let relaxed = OptimizerOptions {
        max_halo_points: 4,
        ..Default::default()
    };
    let state = optimize(inst, &relaxed);
    assert_eq!(state.instantiation.stencils[0].multi_stages.len(), 1);
}

#[test]
fn until_stops_after_named_pass() {
    let mut state = CompilationState::new(load_demo("disjoint.json"));
    run_pipeline(&mut state, PassId::SetStageGraph, &OptimizerOptions::default(), |_, _| {}).unwrap();
    assert_eq!(state.completed, vec![PassId::FieldVersioning, PassId::SetStageGraph]);
    let stencil = &state.instantiation.stencils[0];
    assert_eq!(stencil.multi_stages.len(), 5);
    assert_eq!(stencil.stage_graph.as_ref().map(|g| g.stage_count()), Some(5));
}
