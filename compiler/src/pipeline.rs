// pipeline.rs — Compilation state and pass orchestration
//
// Holds the instantiation being optimized plus every pass artifact, and runs
// the minimal set of passes for a given terminal PassId.
//
// Preconditions: the instantiation is set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics, including
//                postcondition certificates that do not hold.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diag::{codes, has_errors, Diagnostic, SourceLocation};
use crate::error::OptimizerError;
use crate::field_versioning::{run_field_versioning, verify_versioning, VersioningOutcome};
use crate::iir::StencilInstantiation;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::reorder::{reorder_greedy, verify_reorder};
use crate::stage_graph::StageDependencyGraph;

// ── Options ────────────────────────────────────────────────────────────────

/// Knobs shared by every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Largest horizontal halo a merged multi-stage may need.
    pub max_halo_points: u32,
    /// Log every rename (and "no rename") at info level.
    pub report_field_versioning: bool,
    /// Write `rc_<name>.dot` when a race cannot be repaired.
    pub dump_race_condition_graph: bool,
    /// Directory for graph dumps; the working directory when unset.
    pub dump_dir: Option<PathBuf>,
    /// Check pass postconditions after each pass.
    pub verify: bool,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            max_halo_points: 3,
            report_field_versioning: false,
            dump_race_condition_graph: false,
            dump_dir: None,
            verify: true,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible runs and cache-key use.
///
/// `source_hash`: SHA-256 of the raw input document.
/// `options_fingerprint`: SHA-256 of the options as compact JSON.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceRepr<'a> {
    source_hash: String,
    options_fingerprint: String,
    compiler_version: &'a str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let repr = ProvenanceRepr {
            source_hash: self.source_hash_hex(),
            options_fingerprint: self.options_fingerprint_hex(),
            compiler_version: self.compiler_version,
        };
        // A struct of strings always serializes.
        let mut json = serde_json::to_string_pretty(&repr).unwrap_or_default();
        json.push('\n');
        json
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Compute provenance from the input document and the options in effect.
pub fn compute_provenance(source: &str, options: &OptimizerOptions) -> Provenance {
    let canonical = serde_json::to_string(options).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds the instantiation, pass artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub instantiation: StencilInstantiation,
    pub versioning: Option<VersioningOutcome>,
    /// Passes that finished without error, in execution order.
    pub completed: Vec<PassId>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(instantiation: StencilInstantiation) -> Self {
        Self {
            instantiation,
            versioning: None,
            completed: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, thiserror::Error)]
#[error("pass '{failing_pass}' failed")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
    /// The optimizer failure behind it; `None` for postcondition failures.
    #[source]
    pub cause: Option<OptimizerError>,
}

// ── Per-pass post-processing ───────────────────────────────────────────────

/// Callback, accumulate, log, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    cause: Option<OptimizerError>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags) || cause.is_some();
    state.diagnostics.extend(diags);
    debug!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
            cause,
        });
    }
    state.completed.push(pass_id);
    Ok(())
}

fn cert_failure(what: &str, cert: &impl StageCert, code: crate::diag::DiagCode) -> Diagnostic {
    Diagnostic::error(
        SourceLocation::default(),
        format!("{what} verification failed: {}", cert.failed().join(", ")),
    )
    .with_code(code)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → verify → on_pass_complete(callback) → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &OptimizerOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let (diags, cause) = match pass_id {
            PassId::FieldVersioning => run_versioning_pass(state, options),
            PassId::SetStageGraph => (run_stage_graph_pass(state, options), None),
            PassId::ReorderStages => run_reorder_pass(state, options),
        };
        finish_pass(state, pass_id, diags, cause, t.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

fn run_versioning_pass(
    state: &mut CompilationState,
    options: &OptimizerOptions,
) -> (Vec<Diagnostic>, Option<OptimizerError>) {
    match run_field_versioning(&mut state.instantiation, options) {
        Ok(outcome) => {
            state.versioning = Some(outcome);
            let mut diags = Vec::new();
            if options.verify {
                let cert = verify_versioning(&state.instantiation);
                if !cert.all_pass() {
                    diags.push(cert_failure("field versioning", &cert, codes::E0600));
                }
            }
            (diags, None)
        }
        Err(e) => (e.diagnostics(), Some(e)),
    }
}

fn run_stage_graph_pass(state: &mut CompilationState, options: &OptimizerOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for stencil in &mut state.instantiation.stencils {
        let sdg = StageDependencyGraph::build(stencil);
        if options.verify && !sdg.is_acyclic() {
            diags.push(
                Diagnostic::error(
                    SourceLocation::default(),
                    format!("stage dependency graph of stencil {} is cyclic", stencil.id.0),
                )
                .with_code(codes::E0601),
            );
        }
        debug!(
            stencil = stencil.id.0,
            stages = sdg.stage_count(),
            dependencies = sdg.dependencies().len(),
            "built stage graph"
        );
        stencil.stage_graph = Some(sdg);
    }
    diags
}

fn run_reorder_pass(
    state: &mut CompilationState,
    options: &OptimizerOptions,
) -> (Vec<Diagnostic>, Option<OptimizerError>) {
    let inst = &mut state.instantiation;
    let mut diags = Vec::new();
    for stencil in &mut inst.stencils {
        let reordered = match reorder_greedy(stencil, &inst.name, options.max_halo_points) {
            Ok(r) => r,
            Err(e) => {
                diags.extend(e.diagnostics());
                return (diags, Some(e));
            }
        };
        if options.verify {
            let cert = verify_reorder(stencil, &reordered, options.max_halo_points);
            if !cert.all_pass() {
                diags.push(cert_failure("stage reordering", &cert, codes::E0602));
                continue;
            }
        }
        *stencil = reordered;
    }
    (diags, None)
}

// ── Tests ──────────────────────────────────────────────────────────────────
