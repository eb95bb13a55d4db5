use std::fmt;

use thiserror::Error;

/// Byte span within a source text plus the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
    Ownership,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Lexer => write!(f, "lexical error"),
            DiagnosticKind::Parser => write!(f, "syntax error"),
            DiagnosticKind::Runtime => write!(f, "runtime error"),
            DiagnosticKind::Ownership => write!(f, "ownership violation"),
        }
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn lexer(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Lexer, message)
    }

    pub fn parser(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Parser, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime, message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " (line {}, column {})", span.line, span.column)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Nyx toolchain.
#[derive(Debug, Error)]
pub enum NyxError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("runtime error: interpreter step limit exceeded ({limit} steps)")]
    StepLimit { limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NyxError {
    /// Stage that produced the failure, if it came from the pipeline.
    pub fn kind(&self) -> Option<DiagnosticKind> {
        match self {
            NyxError::Diagnostic(diag) => Some(diag.kind),
            NyxError::StepLimit { .. } => Some(DiagnosticKind::Runtime),
            NyxError::Io(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, NyxError::Diagnostic(_))
    }
}

pub type Result<T> = std::result::Result<T, NyxError>;
