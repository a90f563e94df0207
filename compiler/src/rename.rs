// rename.rs — Mint a new version of an access and rewrite references to it
//
// Renaming runs upward from a statement: the statement's own reads of the
// old identity are retargeted, then every earlier statement of the stencil
// (earlier stages and multi-stages included) has its reads retargeted until
// the nearest earlier writer of the old identity. That writer produces the
// new version: its writes are retargeted, its reads are left alone, and the
// walk stops.

use serde::Serialize;

use crate::id::AccessId;
use crate::iir::{Statement, Stencil};
use crate::metadata::StencilMetadata;

/// Location of a top-level statement inside a stencil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StatementPosition {
    pub multi_stage: usize,
    pub stage: usize,
    pub statement: usize,
}

/// Outcome of one upward rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameScope {
    /// Statements whose reads were retargeted, current statement first.
    pub rewritten_reads: Vec<StatementPosition>,
    /// The earlier statement now writing the new version, if any.
    pub retargeted_writer: Option<StatementPosition>,
}

/// Create a version of `old` in `metadata` and rename references above `at`.
pub fn create_version_and_rename(
    metadata: &mut StencilMetadata,
    stencil: &mut Stencil,
    at: StatementPosition,
    old: AccessId,
) -> (AccessId, RenameScope) {
    let new = metadata.create_version(old);
    let scope = rename_above(stencil, at, old, new);
    (new, scope)
}

/// Rename `old` to `new` at and above `at`, stopping at the nearest writer.
pub fn rename_above(
    stencil: &mut Stencil,
    at: StatementPosition,
    old: AccessId,
    new: AccessId,
) -> RenameScope {
    let mut scope = RenameScope {
        rewritten_reads: Vec::new(),
        retargeted_writer: None,
    };

    let current = statement_mut(stencil, at);
    if current.reads(old) {
        current.rename_reads(old, new);
        scope.rewritten_reads.push(at);
    }

    for pos in positions_above(stencil, at) {
        let stmt = statement_mut(stencil, pos);
        if stmt.writes(old) {
            stmt.rename_writes(old, new);
            scope.retargeted_writer = Some(pos);
            break;
        }
        if stmt.reads(old) {
            stmt.rename_reads(old, new);
            scope.rewritten_reads.push(pos);
        }
    }
    scope
}

/// Every statement position strictly before `at`, nearest first.
pub fn positions_above(stencil: &Stencil, at: StatementPosition) -> Vec<StatementPosition> {
    let mut out = Vec::new();
    for ms_idx in (0..=at.multi_stage).rev() {
        let stages = &stencil.multi_stages[ms_idx].stages;
        let stage_end = if ms_idx == at.multi_stage {
            at.stage + 1
        } else {
            stages.len()
        };
        for stage_idx in (0..stage_end).rev() {
            let stmt_count = stages[stage_idx].do_method.statements.len();
            let stmt_end = if ms_idx == at.multi_stage && stage_idx == at.stage {
                at.statement
            } else {
                stmt_count
            };
            for stmt_idx in (0..stmt_end).rev() {
                out.push(StatementPosition {
                    multi_stage: ms_idx,
                    stage: stage_idx,
                    statement: stmt_idx,
                });
            }
        }
    }
    out
}

pub fn statement(stencil: &Stencil, pos: StatementPosition) -> &Statement {
    &stencil.multi_stages[pos.multi_stage].stages[pos.stage]
        .do_method
        .statements[pos.statement]
}

pub fn statement_mut(stencil: &mut Stencil, pos: StatementPosition) -> &mut Statement {
    &mut stencil.multi_stages[pos.multi_stage].stages[pos.stage]
        .do_method
        .statements[pos.statement]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{Extent, Interval, LoopOrder};
    use crate::id::{StageId, StencilId};
    use crate::iir::{MultiStage, Stage};

    fn pos(ms: usize, stage: usize, statement: usize) -> StatementPosition {
        StatementPosition {
            multi_stage: ms,
            stage,
            statement,
        }
    }

    fn assign(lhs: AccessId, reads: &[AccessId]) -> Statement {
        Statement::assign(lhs, reads.iter().map(|&r| (r, Extent::zero())))
    }

    #[test]
    fn positions_above_cross_stage_and_multistage_boundaries() {
        let stage = |n, k| Stage::new(StageId(n), Interval::new(0, 1), (0..k).map(|_| assign(AccessId(0), &[])).collect());
        let stencil = Stencil::new(
            StencilId(0),
            vec![
                MultiStage::new(LoopOrder::Parallel, vec![stage(0, 1)]),
                MultiStage::new(LoopOrder::Parallel, vec![stage(1, 2), stage(2, 2)]),
            ],
        );
        assert_eq!(
            positions_above(&stencil, pos(1, 1, 1)),
            vec![pos(1, 1, 0), pos(1, 0, 1), pos(1, 0, 0), pos(0, 0, 0)]
        );
        assert!(positions_above(&stencil, pos(0, 0, 0)).is_empty());
    }

    #[test]
    fn rename_stops_at_nearest_writer() {
        let mut md = StencilMetadata::new("s");
        let u = md.add_field("u");
        let a = md.add_field("a");
        let b = md.add_field("b");
        let mut stencil = Stencil::new(
            StencilId(0),
            vec![MultiStage::new(
                LoopOrder::Parallel,
                vec![Stage::new(
                    StageId(0),
                    Interval::new(0, 9),
                    vec![
                        assign(b, &[u]), // reads the caller's u
                        assign(u, &[u, a]), // writer: reads old u, writes new
                        assign(a, &[u]),
                        assign(u, &[u]),
                    ],
                )],
            )],
        );

        let (u1, scope) = create_version_and_rename(&mut md, &mut stencil, pos(0, 0, 3), u);
        assert_eq!(md.name(u1), Some("u_1"));
        assert_eq!(scope.rewritten_reads, vec![pos(0, 0, 3), pos(0, 0, 2)]);
        assert_eq!(scope.retargeted_writer, Some(pos(0, 0, 1)));

        assert!(statement(&stencil, pos(0, 0, 3)).writes(u));
        assert!(statement(&stencil, pos(0, 0, 3)).reads(u1));
        assert!(statement(&stencil, pos(0, 0, 2)).reads(u1));
        assert!(statement(&stencil, pos(0, 0, 1)).writes(u1));
        assert!(statement(&stencil, pos(0, 0, 1)).reads(u));
        assert!(statement(&stencil, pos(0, 0, 0)).reads(u));
    }
}
