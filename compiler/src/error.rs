// error.rs — Fatal optimizer failures
//
// Every variant carries the diagnostics a driver prints for it. Invariant
// violations inside the passes are not represented here; they panic.

use thiserror::Error;

use crate::diag::Diagnostic;
use crate::id::{AccessId, StageId, StencilId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    /// A hazardous cycle that renaming cannot break.
    #[error("unresolvable race-condition in stencil instantiation '{stencil}'")]
    UnresolvableRace {
        stencil: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// A stage needs more halo points than allowed, even on its own.
    #[error("stencil '{stencil}' exceeds maximum number of allowed halo lines ({max_halo_points})")]
    HaloBudgetExceeded {
        stencil: String,
        max_halo_points: u32,
        diagnostic: Diagnostic,
    },

    #[error("stencil '{stencil}' has no stage dependency graph")]
    MissingStageGraph { stencil: String },
}

impl OptimizerError {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            OptimizerError::UnresolvableRace { diagnostics, .. } => diagnostics.clone(),
            OptimizerError::HaloBudgetExceeded { diagnostic, .. } => vec![diagnostic.clone()],
            OptimizerError::MissingStageGraph { stencil } => vec![Diagnostic::error(
                Default::default(),
                format!("stage reordering of '{stencil}' requires a stage dependency graph"),
            )
            .with_code(crate::diag::codes::E0201)
            .with_hint("run the set-stage-graph pass first")],
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Structural problems in an instantiation loaded from outside.
///
/// The passes assume none of these hold; `StencilInstantiation::validate`
/// rejects them before any pass runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("line {line}: access {id} is not registered in the metadata")]
    UnregisteredAccess { id: AccessId, line: u32 },

    #[error("line {line}: assignment must have exactly one target, found {found}")]
    AssignTargets { line: u32, found: usize },

    #[error("stencil {}: stage {stage} appears more than once", stencil.0)]
    DuplicateStage { stencil: StencilId, stage: StageId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::SourceLocation;

    #[test]
    fn halo_error_names_stencil_and_limit() {
        let err = OptimizerError::HaloBudgetExceeded {
            stencil: "hd".into(),
            max_halo_points: 3,
            diagnostic: Diagnostic::error(SourceLocation::default(), "too wide"),
        };
        assert_eq!(
            err.to_string(),
            "stencil 'hd' exceeds maximum number of allowed halo lines (3)"
        );
        assert_eq!(err.diagnostics().len(), 1);
    }

    #[test]
    fn invalid_input_messages() {
        let err = InvalidInput::UnregisteredAccess { id: AccessId(7), line: 4 };
        assert_eq!(err.to_string(), "line 4: access #7 is not registered in the metadata");
        let err = InvalidInput::DuplicateStage {
            stencil: StencilId(0),
            stage: StageId(2),
        };
        assert_eq!(err.to_string(), "stencil 0: stage s2 appears more than once");
    }

    #[test]
    fn missing_stage_graph_has_hint() {
        let err = OptimizerError::MissingStageGraph { stencil: "s".into() };
        let diags = err.diagnostics();
        assert_eq!(diags[0].code, Some(crate::diag::codes::E0201));
        assert!(diags[0].hint.is_some());
    }
}
