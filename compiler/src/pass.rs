// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the optimizer's passes, their dependency edges, and the
// artifacts they produce. Used by the pipeline runner to compute the
// minimal pass subset for a requested terminal pass.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each optimizer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    FieldVersioning,
    SetStageGraph,
    ReorderStages,
}

/// Machine-readable artifact identifiers. Each maps to a concrete value
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Renames,     // VersioningOutcome
    StageGraphs, // Stencil::stage_graph
    Schedule,    // reordered Stencils
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about an optimizer pass.
pub struct PassDescriptor {
    /// Name used on the command line and in log events.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Postconditions (documentation; checked by certs where one exists).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::FieldVersioning => PassDescriptor {
            name: "field-versioning",
            inputs: &[],
            outputs: &[ArtifactId::Renames],
            invariants: "no multi-stage holds a hazardous cycle or self-loop",
        },
        PassId::SetStageGraph => PassDescriptor {
            name: "set-stage-graph",
            inputs: &[PassId::FieldVersioning],
            outputs: &[ArtifactId::StageGraphs],
            invariants: "every stencil has an acyclic stage dependency graph",
        },
        PassId::ReorderStages => PassDescriptor {
            name: "reorder-stages",
            inputs: &[PassId::SetStageGraph],
            outputs: &[ArtifactId::Schedule],
            invariants: "stages placed once, dependencies and halo budget respected",
        },
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", descriptor(*self).name)
    }
}

impl FromStr for PassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PASSES
            .iter()
            .copied()
            .find(|p| descriptor(*p).name == s)
            .ok_or_else(|| {
                let names: Vec<_> = ALL_PASSES.iter().map(|p| descriptor(*p).name).collect();
                format!("unknown pass '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

// ── Verification certificates ──────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that failed.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 3] = [
    PassId::FieldVersioning,
    PassId::SetStageGraph,
    PassId::ReorderStages,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_reorder_includes_all() {
        assert_eq!(
            required_passes(PassId::ReorderStages),
            vec![
                PassId::FieldVersioning,
                PassId::SetStageGraph,
                PassId::ReorderStages
            ]
        );
    }

    #[test]
    fn required_passes_versioning_is_minimal() {
        assert_eq!(
            required_passes(PassId::FieldVersioning),
            vec![PassId::FieldVersioning]
        );
    }

    #[test]
    fn pass_names_round_trip() {
        for pass in ALL_PASSES {
            assert_eq!(pass.to_string().parse::<PassId>(), Ok(pass));
        }
        let err = "inline".parse::<PassId>().unwrap_err();
        assert!(err.contains("reorder-stages"));
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    #[test]
    fn failed_lists_only_broken_obligations() {
        struct Fake;
        impl StageCert for Fake {
            fn all_pass(&self) -> bool {
                false
            }
            fn obligations(&self) -> Vec<(&'static str, bool)> {
                vec![("A", true), ("B", false)]
            }
        }
        assert_eq!(Fake.failed(), vec!["B"]);
    }
}
