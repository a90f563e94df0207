// iir.rs — Optimizer intermediate representation
//
// Tree-shaped IR: StencilInstantiation owns its metadata and Stencils;
// Stencil owns an ordered sequence of MultiStages; MultiStage owns ordered
// Stages plus a loop order; Stage owns one DoMethod (ordered Statements over a
// vertical interval). Statements carry precomputed access summaries, so the
// passes never inspect expression syntax; statement kinds are plain tagged
// variants.
//
// Preconditions: statement access summaries are complete and exact.
// Postconditions: none (data types and queries only).
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access_graph::AccessDependencyGraph;
use crate::diag::SourceLocation;
use crate::error::InvalidInput;
use crate::extent::{Bounds, Extent, Interval, LoopOrder};
use crate::id::{AccessId, StageId, StencilId};
use crate::metadata::StencilMetadata;
use crate::stage_graph::StageDependencyGraph;

// ── Accesses ────────────────────────────────────────────────────────────────

/// Read and write footprint of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AccessesRepr", into = "AccessesRepr")]
pub struct Accesses {
    pub writes: BTreeMap<AccessId, Extent>,
    pub reads: BTreeMap<AccessId, Extent>,
}

impl Accesses {
    pub fn add_write(&mut self, id: AccessId, extent: Extent) {
        self.writes.entry(id).or_default().merge(&extent);
    }

    pub fn add_read(&mut self, id: AccessId, extent: Extent) {
        self.reads.entry(id).or_default().merge(&extent);
    }

    pub fn merge(&mut self, other: &Accesses) {
        for (&id, extent) in &other.writes {
            self.add_write(id, *extent);
        }
        for (&id, extent) in &other.reads {
            self.add_read(id, *extent);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }

    /// Every AccessId read or written.
    pub fn access_ids(&self) -> BTreeSet<AccessId> {
        self.writes.keys().chain(self.reads.keys()).copied().collect()
    }

    /// Union of all read and write extents.
    pub fn total_extent(&self) -> Extent {
        self.writes
            .values()
            .chain(self.reads.values())
            .fold(Extent::zero(), |acc, e| acc.merged(e))
    }

    fn rename_reads(&mut self, old: AccessId, new: AccessId) {
        if let Some(extent) = self.reads.remove(&old) {
            self.add_read(new, extent);
        }
    }

    fn rename_writes(&mut self, old: AccessId, new: AccessId) {
        if let Some(extent) = self.writes.remove(&old) {
            self.add_write(new, extent);
        }
    }
}

/// One access entry in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessEntry {
    id: AccessId,
    #[serde(default, skip_serializing_if = "is_zero_extent")]
    extent: Extent,
}

fn is_zero_extent(e: &Extent) -> bool {
    *e == Extent::zero()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccessesRepr {
    #[serde(default)]
    writes: Vec<AccessEntry>,
    #[serde(default)]
    reads: Vec<AccessEntry>,
}

impl From<AccessesRepr> for Accesses {
    fn from(repr: AccessesRepr) -> Self {
        let mut accesses = Accesses::default();
        for entry in repr.writes {
            accesses.add_write(entry.id, entry.extent);
        }
        for entry in repr.reads {
            accesses.add_read(entry.id, entry.extent);
        }
        accesses
    }
}

impl From<Accesses> for AccessesRepr {
    fn from(accesses: Accesses) -> Self {
        let entries = |map: BTreeMap<AccessId, Extent>| {
            map.into_iter()
                .map(|(id, extent)| AccessEntry { id, extent })
                .collect()
        };
        AccessesRepr {
            writes: entries(accesses.writes),
            reads: entries(accesses.reads),
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// A stencil call through which a statement was instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilCall {
    pub callee: String,
    #[serde(default)]
    pub loc: SourceLocation,
}

/// Shape of a statement, reduced to the AccessIds each part references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StmtKind {
    /// `lhs = rhs`
    Assign {
        lhs: BTreeSet<AccessId>,
        #[serde(default)]
        rhs: BTreeSet<AccessId>,
    },
    /// Local variable declaration with optional initializer.
    VarDecl {
        var: AccessId,
        #[serde(default)]
        init: BTreeSet<AccessId>,
    },
    /// Expression evaluated for its effects (e.g. a stencil function call).
    Expr {
        #[serde(default)]
        refs: BTreeSet<AccessId>,
    },
    If {
        #[serde(default)]
        cond: BTreeSet<AccessId>,
        #[serde(default)]
        then_body: Vec<Statement>,
        #[serde(default)]
        else_body: Vec<Statement>,
    },
}

/// One ordered computation unit with its precomputed accesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StmtKind,
    pub accesses: Accesses,
    #[serde(default)]
    pub loc: SourceLocation,
    /// Stencil calls this statement was instantiated through, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<StencilCall>,
}

impl Statement {
    /// `lhs = f(reads...)`
    pub fn assign(lhs: AccessId, reads: impl IntoIterator<Item = (AccessId, Extent)>) -> Self {
        let mut accesses = Accesses::default();
        accesses.add_write(lhs, Extent::zero());
        let mut rhs = BTreeSet::new();
        for (id, extent) in reads {
            accesses.add_read(id, extent);
            rhs.insert(id);
        }
        Statement::from_parts(
            StmtKind::Assign {
                lhs: BTreeSet::from([lhs]),
                rhs,
            },
            accesses,
        )
    }

    pub fn var_decl(var: AccessId, reads: impl IntoIterator<Item = (AccessId, Extent)>) -> Self {
        let mut accesses = Accesses::default();
        accesses.add_write(var, Extent::zero());
        let mut init = BTreeSet::new();
        for (id, extent) in reads {
            accesses.add_read(id, extent);
            init.insert(id);
        }
        Statement::from_parts(StmtKind::VarDecl { var, init }, accesses)
    }

    pub fn expr(reads: impl IntoIterator<Item = (AccessId, Extent)>) -> Self {
        let mut accesses = Accesses::default();
        let mut refs = BTreeSet::new();
        for (id, extent) in reads {
            accesses.add_read(id, extent);
            refs.insert(id);
        }
        Statement::from_parts(StmtKind::Expr { refs }, accesses)
    }

    /// Conditional; its accesses are the condition reads plus both branches.
    pub fn if_else(
        cond: impl IntoIterator<Item = (AccessId, Extent)>,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    ) -> Self {
        let mut accesses = Accesses::default();
        let mut cond_ids = BTreeSet::new();
        for (id, extent) in cond {
            accesses.add_read(id, extent);
            cond_ids.insert(id);
        }
        for stmt in then_body.iter().chain(else_body.iter()) {
            accesses.merge(&stmt.accesses);
        }
        Statement::from_parts(
            StmtKind::If {
                cond: cond_ids,
                then_body,
                else_body,
            },
            accesses,
        )
    }

    fn from_parts(kind: StmtKind, accesses: Accesses) -> Self {
        Statement {
            kind,
            accesses,
            loc: SourceLocation::default(),
            stack_trace: Vec::new(),
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.loc = SourceLocation::new(line, column);
        self
    }

    pub fn with_stack_trace(mut self, calls: Vec<StencilCall>) -> Self {
        self.stack_trace = calls;
        self
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self.kind, StmtKind::Assign { .. })
    }

    pub fn writes(&self, id: AccessId) -> bool {
        self.accesses.writes.contains_key(&id)
    }

    pub fn reads(&self, id: AccessId) -> bool {
        self.accesses.reads.contains_key(&id)
    }

    /// Retarget every read of `old` to `new`.
    pub fn rename_reads(&mut self, old: AccessId, new: AccessId) {
        self.accesses.rename_reads(old, new);
        match &mut self.kind {
            StmtKind::Assign { rhs, .. } => rename_in_set(rhs, old, new),
            StmtKind::VarDecl { init, .. } => rename_in_set(init, old, new),
            StmtKind::Expr { refs } => rename_in_set(refs, old, new),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                rename_in_set(cond, old, new);
                for stmt in then_body.iter_mut().chain(else_body.iter_mut()) {
                    stmt.rename_reads(old, new);
                }
            }
        }
    }

    /// Retarget every write of `old` to `new`.
    pub fn rename_writes(&mut self, old: AccessId, new: AccessId) {
        self.accesses.rename_writes(old, new);
        match &mut self.kind {
            StmtKind::Assign { lhs, .. } => rename_in_set(lhs, old, new),
            StmtKind::VarDecl { var, .. } => {
                if *var == old {
                    *var = new;
                }
            }
            StmtKind::Expr { refs } => rename_in_set(refs, old, new),
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                for stmt in then_body.iter_mut().chain(else_body.iter_mut()) {
                    stmt.rename_writes(old, new);
                }
            }
        }
    }
}

fn rename_in_set(set: &mut BTreeSet<AccessId>, old: AccessId, new: AccessId) {
    if set.remove(&old) {
        set.insert(new);
    }
}

// ── Field summaries ─────────────────────────────────────────────────────────

/// How a stage uses a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldIntent {
    Input,
    Output,
    InputOutput,
}

/// A field (or variable) referenced by a do-method, with accumulated extents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_id: AccessId,
    pub intent: FieldIntent,
    pub read_extent: Extent,
    pub write_extent: Extent,
}

impl Field {
    pub fn is_read(&self) -> bool {
        matches!(self.intent, FieldIntent::Input | FieldIntent::InputOutput)
    }

    pub fn is_written(&self) -> bool {
        matches!(self.intent, FieldIntent::Output | FieldIntent::InputOutput)
    }
}

/// Classify every access of `statements` in execution order.
///
/// A field read after being written (or written after being read) is
/// `InputOutput`; otherwise it keeps the intent of its first access.
pub fn compute_fields(statements: &[Statement]) -> Vec<Field> {
    let mut fields: BTreeMap<AccessId, Field> = BTreeMap::new();
    for stmt in statements {
        for (&id, extent) in &stmt.accesses.writes {
            let field = fields.entry(id).or_insert(Field {
                access_id: id,
                intent: FieldIntent::Output,
                read_extent: Extent::zero(),
                write_extent: Extent::zero(),
            });
            if field.intent == FieldIntent::Input {
                field.intent = FieldIntent::InputOutput;
            }
            field.write_extent.merge(extent);
        }
        for (&id, extent) in &stmt.accesses.reads {
            let field = fields.entry(id).or_insert(Field {
                access_id: id,
                intent: FieldIntent::Input,
                read_extent: Extent::zero(),
                write_extent: Extent::zero(),
            });
            if field.intent == FieldIntent::Output {
                field.intent = FieldIntent::InputOutput;
            }
            field.read_extent.merge(extent);
        }
    }
    fields.into_values().collect()
}

// ── DoMethod / Stage / MultiStage / Stencil ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoMethod {
    pub interval: Interval,
    pub statements: Vec<Statement>,
}

impl DoMethod {
    pub fn new(interval: Interval, statements: Vec<Statement>) -> Self {
        DoMethod {
            interval,
            statements,
        }
    }

    /// Access dependency graph of all statements, inserted in execution order.
    pub fn dependency_graph(&self) -> AccessDependencyGraph {
        let mut graph = AccessDependencyGraph::new();
        for stmt in &self.statements {
            graph.insert_statement(stmt);
        }
        graph
    }

    pub fn fields(&self) -> Vec<Field> {
        compute_fields(&self.statements)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub do_method: DoMethod,
}

impl Stage {
    pub fn new(id: StageId, interval: Interval, statements: Vec<Statement>) -> Self {
        Stage {
            id,
            do_method: DoMethod::new(interval, statements),
        }
    }

    pub fn interval(&self) -> Interval {
        self.do_method.interval
    }

    /// Interval widened by the vertical extent of every access in the stage.
    pub fn extended_interval(&self) -> Interval {
        let k = self
            .do_method
            .statements
            .iter()
            .fold(Bounds::ZERO, |mut acc, stmt| {
                acc.merge(&stmt.accesses.total_extent().k);
                acc
            });
        self.interval().extended_by(&k)
    }

    pub fn fields(&self) -> Vec<Field> {
        self.do_method.fields()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStage {
    pub loop_order: LoopOrder,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl MultiStage {
    pub fn new(loop_order: LoopOrder, stages: Vec<Stage>) -> Self {
        MultiStage { loop_order, stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Merged graph of the stages running over levels that overlap `interval`.
    pub fn dependency_graph_of_interval(&self, interval: &Interval) -> AccessDependencyGraph {
        let mut graph = AccessDependencyGraph::new();
        for stage in &self.stages {
            if stage.interval().overlaps(interval) {
                graph.merge(&stage.do_method.dependency_graph());
            }
        }
        graph
    }

    /// Merged graph of all stages.
    pub fn dependency_graph(&self) -> AccessDependencyGraph {
        let mut graph = AccessDependencyGraph::new();
        for stage in &self.stages {
            graph.merge(&stage.do_method.dependency_graph());
        }
        graph
    }
}

/// Location of a stage inside a stencil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StagePosition {
    pub multi_stage: usize,
    pub stage: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stencil {
    pub id: StencilId,
    #[serde(default)]
    pub multi_stages: Vec<MultiStage>,
    /// Stage-level ordering constraints ("stage A must precede stage B").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_graph: Option<StageDependencyGraph>,
}

impl Stencil {
    pub fn new(id: StencilId, multi_stages: Vec<MultiStage>) -> Self {
        Stencil {
            id,
            multi_stages,
            stage_graph: None,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.multi_stages.iter().map(|ms| ms.stages.len()).sum()
    }

    /// All stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.multi_stages.iter().flat_map(|ms| ms.stages.iter())
    }

    /// Positions of all stages in execution order.
    pub fn stage_positions(&self) -> Vec<(StagePosition, StageId)> {
        let mut out = Vec::with_capacity(self.stage_count());
        for (ms_idx, ms) in self.multi_stages.iter().enumerate() {
            for (stage_idx, stage) in ms.stages.iter().enumerate() {
                out.push((
                    StagePosition {
                        multi_stage: ms_idx,
                        stage: stage_idx,
                    },
                    stage.id,
                ));
            }
        }
        out
    }

    pub fn position_of(&self, id: StageId) -> Option<StagePosition> {
        self.stage_positions()
            .into_iter()
            .find(|(_, sid)| *sid == id)
            .map(|(pos, _)| pos)
    }

    pub fn stage(&self, pos: StagePosition) -> &Stage {
        &self.multi_stages[pos.multi_stage].stages[pos.stage]
    }

    /// Loop order of the multi-stage each stage currently lives in.
    pub fn stage_loop_orders(&self) -> BTreeMap<StageId, LoopOrder> {
        self.multi_stages
            .iter()
            .flat_map(|ms| ms.stages.iter().map(move |s| (s.id, ms.loop_order)))
            .collect()
    }
}

// ── Instantiation ───────────────────────────────────────────────────────────

/// A compilation unit: stencils plus the metadata table they share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StencilInstantiation {
    pub name: String,
    pub metadata: StencilMetadata,
    #[serde(default)]
    pub stencils: Vec<Stencil>,
}

impl StencilInstantiation {
    pub fn new(name: impl Into<String>, metadata: StencilMetadata) -> Self {
        StencilInstantiation {
            name: name.into(),
            metadata,
            stencils: Vec::new(),
        }
    }

    /// Reject input the passes cannot handle: references to unregistered
    /// accesses, assignments without exactly one target, and stages that
    /// appear twice in a stencil.
    pub fn validate(&self) -> std::result::Result<(), InvalidInput> {
        for stencil in &self.stencils {
            let mut seen = BTreeSet::new();
            for stage in stencil.stages() {
                if !seen.insert(stage.id) {
                    return Err(InvalidInput::DuplicateStage {
                        stencil: stencil.id,
                        stage: stage.id,
                    });
                }
                for stmt in &stage.do_method.statements {
                    self.validate_statement(stmt)?;
                }
            }
        }
        Ok(())
    }

    fn validate_statement(&self, stmt: &Statement) -> std::result::Result<(), InvalidInput> {
        let line = stmt.loc.line;
        let mut ids = stmt.accesses.access_ids();
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => {
                if lhs.len() != 1 {
                    return Err(InvalidInput::AssignTargets {
                        line,
                        found: lhs.len(),
                    });
                }
                ids.extend(lhs.iter().chain(rhs).copied());
            }
            StmtKind::VarDecl { var, init } => {
                ids.insert(*var);
                ids.extend(init.iter().copied());
            }
            StmtKind::Expr { refs } => ids.extend(refs.iter().copied()),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                ids.extend(cond.iter().copied());
                for nested in then_body.iter().chain(else_body) {
                    self.validate_statement(nested)?;
                }
            }
        }
        match ids.into_iter().find(|&id| !self.metadata.contains(id)) {
            Some(id) => Err(InvalidInput::UnregisteredAccess { id, line }),
            None => Ok(()),
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for StencilInstantiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "instantiation {}", self.name)?;
        for stencil in &self.stencils {
            writeln!(f, "  stencil {}", stencil.id.0)?;
            for (ms_idx, ms) in stencil.multi_stages.iter().enumerate() {
                writeln!(f, "    multistage {} {}", ms_idx, ms.loop_order)?;
                for stage in &ms.stages {
                    writeln!(f, "      stage {} {}", stage.id, stage.interval())?;
                    for stmt in &stage.do_method.statements {
                        write_statement(f, &self.metadata, stmt, "        ")?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_statement(
    f: &mut fmt::Formatter<'_>,
    metadata: &StencilMetadata,
    stmt: &Statement,
    indent: &str,
) -> fmt::Result {
    let read = |ids: &BTreeSet<AccessId>| -> String {
        ids.iter()
            .map(|id| {
                let name = metadata.display_name(*id);
                match stmt.accesses.reads.get(id) {
                    Some(extent) if !extent.is_pointwise() => format!("{name}{extent}"),
                    _ => name,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    let names = |ids: &BTreeSet<AccessId>| -> String {
        ids.iter()
            .map(|id| metadata.display_name(*id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } => {
            writeln!(f, "{indent}{}: {} = ({})", stmt.loc.line, names(lhs), read(rhs))
        }
        StmtKind::VarDecl { var, init } => writeln!(
            f,
            "{indent}{}: var {} = ({})",
            stmt.loc.line,
            metadata.display_name(*var),
            read(init)
        ),
        StmtKind::Expr { refs } => writeln!(f, "{indent}{}: expr ({})", stmt.loc.line, read(refs)),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            writeln!(f, "{indent}{}: if ({})", stmt.loc.line, read(cond))?;
            let nested = format!("{indent}  ");
            for s in then_body {
                write_statement(f, metadata, s, &nested)?;
            }
            if !else_body.is_empty() {
                writeln!(f, "{indent}else")?;
                for s in else_body {
                    write_statement(f, metadata, s, &nested)?;
                }
            }
            Ok(())
        }
    }
}
