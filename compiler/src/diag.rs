// diag.rs — Unified diagnostics model
//
// Provides the diagnostic types shared by every optimizer pass. A diagnostic
// names a source location and may carry notes, e.g. the stack of stencil
// calls through which an offending statement was instantiated.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Source location ──────────────────────────────────────────────────────

/// Line/column position in the stencil source. `0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLocation { line, column }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// Race condition inside a statement that is not a plain assignment.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Race condition whose assignment target is not part of the cycle.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Stage exceeds the configured halo budget even in isolation.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Stage reordering requested without a stage dependency graph.
    pub const E0201: DiagCode = DiagCode("E0201");

    // Pass postcondition failures (internal errors)
    /// Field versioning left a hazard or an unregistered access behind.
    pub const E0600: DiagCode = DiagCode("E0600");
    /// A stage dependency graph contains a cycle.
    pub const E0601: DiagCode = DiagCode("E0601");
    /// Reordered stencil violates a scheduling postcondition.
    pub const E0602: DiagCode = DiagCode("E0602");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
    Note,
}

impl fmt::Display for DiagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
            DiagLevel::Note => "note",
        };
        write!(f, "{s}")
    }
}

// ── Note ─────────────────────────────────────────────────────────────────

/// A secondary location giving context for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub loc: SourceLocation,
    pub message: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by an optimizer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: SourceLocation,
    pub message: String,
    pub hint: Option<String>,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or notes.
    pub fn new(level: DiagLevel, loc: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc,
            message: message.into(),
            hint: None,
            notes: Vec::new(),
        }
    }

    pub fn error(loc: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, loc, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a note at a secondary location.
    pub fn with_note(mut self, loc: SourceLocation, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            loc,
            message: message.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loc.is_known() {
            write!(f, "{}: ", self.loc)?;
        }
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", self.level, code, self.message)?;
        } else {
            write!(f, "{}: {}", self.level, self.message)?;
        }
        for note in &self.notes {
            if note.loc.is_known() {
                write!(f, "\n  {}: note: {}", note.loc, note.message)?;
            } else {
                write!(f, "\n  note: {}", note.message)?;
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
