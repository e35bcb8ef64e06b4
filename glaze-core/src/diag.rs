//! Diagnostics for backend legalization passes.
//!
//! Passes report user-facing problems into a [`DiagnosticSink`] and keep
//! going; conditions that can only arise from upstream compiler bugs are not
//! diagnosed here, they abort with a `BUG:` panic at the point of detection.

use thiserror::Error;

/// An opaque handle identifying a location in the original source.
///
/// The frontend assigns these when declarations are created; backend passes
/// only ever carry them through to diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLoc(pub u32);

impl SourceLoc {
    pub const UNKNOWN: SourceLoc = SourceLoc(0);
}

/// The kinds of diagnostics backend legalization can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticKind {
    /// A varying carried a system-value semantic the target does not know.
    #[error("unknown system-value semantic '{0}'")]
    UnknownSystemValueSemantic(String),
}

/// A single reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub loc: SourceLoc,
    pub kind: DiagnosticKind,
}

/// Accumulates diagnostics in report order.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink {
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnose(&mut self, loc: SourceLoc, kind: DiagnosticKind) {
        log::debug!("diagnostic at {:?}: {}", loc, kind);
        self.diagnostics.push(Diagnostic { loc, kind });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }
}
