use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use stencilopt::iir::StencilInstantiation;
use stencilopt::logging::{init_logging, LogLevel};
use stencilopt::pass::PassId;
use stencilopt::pipeline::{compute_provenance, run_pipeline, CompilationState, OptimizerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Emit {
    /// Optimized instantiation as JSON
    Iir,
    /// Optimized instantiation as indented text
    Text,
    /// Renames and final multi-stage layout as JSON
    Report,
    /// Access graphs of every multi-stage in DOT format
    Dot,
    /// Input hash, options fingerprint and compiler version
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "stencilopt",
    version,
    about = "Stencil optimizer: repairs in-place races and regroups stages into multi-stages"
)]
struct Cli {
    /// Input stencil instantiation (.json)
    input: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output kind
    #[arg(long, value_enum, default_value_t = Emit::Iir)]
    emit: Emit,

    /// Maximum number of halo points a merged multi-stage may need
    #[arg(long = "max-halo", default_value_t = 3)]
    max_halo: u32,

    /// Stop after this pass (field-versioning, set-stage-graph, reorder-stages)
    #[arg(long, default_value = "reorder-stages")]
    until: PassId,

    /// Dump the access graph of an unresolvable race as rc_<name>.dot
    #[arg(long = "dump-rc-graph")]
    dump_rc_graph: bool,

    /// Directory for graph dumps
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Log every field-versioning rename
    #[arg(long = "report-versioning")]
    report_versioning: bool,

    /// Skip pass postcondition checks
    #[arg(long = "no-verify")]
    no_verify: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (overrides -v and STENCILOPT_LOG)
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_level, cli.verbose) {
        eprintln!("stencilopt: warning: {e:#}");
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("stencilopt: error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let options = OptimizerOptions {
        max_halo_points: cli.max_halo,
        report_field_versioning: cli.report_versioning,
        dump_race_condition_graph: cli.dump_rc_graph,
        dump_dir: cli.dump_dir.clone(),
        verify: !cli.no_verify,
    };

    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;
    let instantiation: StencilInstantiation = serde_json::from_str(&source)
        .with_context(|| format!("{} is not a valid stencil instantiation", cli.input.display()))?;
    instantiation
        .validate()
        .with_context(|| format!("{} is not a valid stencil instantiation", cli.input.display()))?;

    let mut state = CompilationState::new(instantiation);
    state.provenance = Some(compute_provenance(&source, &options));
    info!(input = %cli.input.display(), until = %cli.until, "optimizing");

    let result = run_pipeline(&mut state, cli.until, &options, |_, diags| {
        for diag in diags {
            eprintln!("stencilopt: {diag}");
        }
    });
    if let Err(e) = result {
        match &e.cause {
            Some(cause) => eprintln!("stencilopt: error: {cause}"),
            None => eprintln!("stencilopt: error: {e}"),
        }
        return Ok(ExitCode::from(1));
    }

    let out = render(cli.emit, &state)?;
    match &cli.output {
        Some(path) => std::fs::write(path, out)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => print!("{out}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn render(emit: Emit, state: &CompilationState) -> Result<String> {
    let inst = &state.instantiation;
    let out = match emit {
        Emit::Iir => {
            let mut json = serde_json::to_string_pretty(inst)?;
            json.push('\n');
            json
        }
        Emit::Text => inst.to_string(),
        Emit::Dot => stencilopt::dot::emit_instantiation_dot(inst),
        Emit::Report => {
            let layouts: Vec<_> = inst
                .stencils
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "stencil": s.id,
                        "multi_stages": stencilopt::reorder::summarize(s).lines().collect::<Vec<_>>(),
                    })
                })
                .collect();
            let report = serde_json::json!({
                "instantiation": inst.name,
                "passes": state.completed.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                "renames": state.versioning.as_ref().map(|v| &v.renames),
                "stencils": layouts,
            });
            let mut json = serde_json::to_string_pretty(&report)?;
            json.push('\n');
            json
        }
        Emit::BuildInfo => state
            .provenance
            .as_ref()
            .map(|p| p.to_json())
            .unwrap_or_default(),
    };
    Ok(out)
}
