use std::fmt;

use tracing::debug;

use super::{
    alias::LifetimeInference,
    borrow::{BorrowChecker, TraceStep},
    context::{BorrowId, OwnerId, OwnershipContext},
    types::BorrowKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub location: String,
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {}: {}",
            self.severity, self.code, self.location, self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixSuggestion {
    pub code: String,
    pub message: String,
}

/// Collects diagnostics without ever aborting; callers query the result.
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    messages: Vec<DiagnosticMessage>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, severity: Severity, code: &str, message: String, location: String) -> &DiagnosticMessage {
        self.messages.push(DiagnosticMessage {
            severity,
            code: code.to_string(),
            message,
            location,
        });
        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    pub fn add_error(
        &mut self,
        code: &str,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> &DiagnosticMessage {
        self.push(Severity::Error, code, message.into(), location.into())
    }

    pub fn add_warning(
        &mut self,
        code: &str,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> &DiagnosticMessage {
        self.push(Severity::Warning, code, message.into(), location.into())
    }

    pub fn add_info(
        &mut self,
        code: &str,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> &DiagnosticMessage {
        self.push(Severity::Info, code, message.into(), location.into())
    }

    pub fn add_hint(
        &mut self,
        code: &str,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> &DiagnosticMessage {
        self.push(Severity::Hint, code, message.into(), location.into())
    }

    pub fn messages(&self) -> &[DiagnosticMessage] {
        &self.messages
    }

    pub fn suggestion(&self, code: &str) -> FixSuggestion {
        FixSuggestion {
            code: code.to_string(),
            message: format!("Review rule {code} and apply safe refactor"),
        }
    }

    fn count(&self, pred: impl Fn(Severity) -> bool) -> usize {
        self.messages.iter().filter(|m| pred(m.severity)).count()
    }

    /// Three-line summary; hints are counted as info.
    pub fn generate_report(&self) -> String {
        let errors = self.count(|s| s == Severity::Error);
        let warnings = self.count(|s| s == Severity::Warning);
        let info = self.count(|s| matches!(s, Severity::Info | Severity::Hint));
        format!("Errors: {errors}\nWarnings: {warnings}\nInfo: {info}")
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_errors())
    }
}

/// Soft-fail wrappers over [`BorrowChecker`] and [`OwnershipContext`]: every
/// failure becomes a [`StaticVerifier`] entry instead of an error.
pub struct EnhancedBorrowChecker {
    checker: BorrowChecker,
    context: OwnershipContext,
    verifier: StaticVerifier,
    inference: LifetimeInference,
    source_name: String,
}

impl Default for EnhancedBorrowChecker {
    fn default() -> Self {
        Self {
            checker: BorrowChecker::new(),
            context: OwnershipContext::new(),
            verifier: StaticVerifier::new(),
            inference: LifetimeInference::new(),
            source_name: "<memory>".to_string(),
        }
    }
}

impl EnhancedBorrowChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `name` instead of `<memory>` in diagnostic locations.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    fn location(&self, line: usize) -> String {
        format!("{}:{line}", self.source_name)
    }

    pub fn checker(&self) -> &BorrowChecker {
        &self.checker
    }

    pub fn context(&self) -> &OwnershipContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut OwnershipContext {
        &mut self.context
    }

    pub fn verifier(&self) -> &StaticVerifier {
        &self.verifier
    }

    pub fn verifier_mut(&mut self) -> &mut StaticVerifier {
        &mut self.verifier
    }

    pub fn check_borrow_with_diagnostics(&mut self, name: &str, mutable: bool, line: usize) -> bool {
        let ok = self.checker.check_borrow(name, mutable, line);
        if !ok {
            let location = self.location(line);
            self.verifier
                .add_error("E-BORROW", format!("invalid borrow for {name}"), location);
        }
        ok
    }

    pub fn check_move_with_diagnostics(&mut self, name: &str, line: usize) -> bool {
        let ok = self.checker.check_move(name, line);
        if !ok {
            let location = self.location(line);
            self.verifier
                .add_error("E-MOVE", format!("invalid move for {name}"), location);
        }
        ok
    }

    /// Records that `longer` outlives `shorter` for later lifetime checks.
    pub fn declare_outlives(&mut self, longer: &str, shorter: &str) {
        self.inference.add_constraint(longer, shorter);
    }

    /// Distinct lifetimes warn unless one was declared to outlive the other.
    pub fn check_lifetime_with_diagnostics(&mut self, left: &str, right: &str, line: usize) -> bool {
        if self.inference.outlives(left, right) || self.inference.outlives(right, left) {
            return true;
        }
        let location = self.location(line);
        self.verifier.add_warning(
            "W-LIFETIME",
            format!("lifetime {left} may not outlive {right}"),
            location,
        );
        false
    }

    pub fn check_bounds_with_diagnostics(&mut self, index: i64, length: usize, line: usize) -> bool {
        let in_bounds = usize::try_from(index).is_ok_and(|idx| idx < length);
        if !in_bounds {
            let location = self.location(line);
            self.verifier.add_error(
                "E-BOUNDS",
                format!("index {index} out of bounds for len {length}"),
                location,
            );
        }
        in_bounds
    }

    pub fn borrow_ref_with_diagnostics(
        &mut self,
        owner: OwnerId,
        kind: BorrowKind,
        lifetime: &str,
        line: usize,
    ) -> Option<BorrowId> {
        match self.context.borrow_ref(owner, kind, lifetime, line) {
            Ok(id) => Some(id),
            Err(err) => {
                let location = self.location(line);
                self.verifier.add_error("E-BORROW", err.to_string(), location);
                None
            }
        }
    }

    pub fn move_owner_with_diagnostics(
        &mut self,
        owner: OwnerId,
        new_name: &str,
        line: usize,
    ) -> Option<OwnerId> {
        match self.context.move_owner(owner, new_name, line) {
            Ok(id) => Some(id),
            Err(err) => {
                let location = self.location(line);
                self.verifier.add_error("E-MOVE", err.to_string(), location);
                None
            }
        }
    }

    /// Warns once per borrow whose lifetime has ended by `line`.
    pub fn validate_lifetimes_with_diagnostics(&mut self, line: usize) -> bool {
        let expired = self.context.validate_lifetimes(line);
        let location = self.location(line);
        for message in &expired {
            self.verifier
                .add_warning("W-LIFETIME", message.clone(), location.clone());
        }
        expired.is_empty()
    }

    /// Replays one trace step at `line`, recording any violation.
    pub fn apply_step(&mut self, step: &TraceStep, line: usize) -> bool {
        match self.checker.apply(step) {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, line, "trace step rejected");
                let code = match step {
                    TraceStep::Move { .. } => "E-MOVE",
                    _ => "E-BORROW",
                };
                let location = self.location(line);
                self.verifier.add_error(code, err.to_string(), location);
                false
            }
        }
    }

    pub fn verify_with_report(&self) -> (bool, String) {
        (!self.verifier.has_errors(), self.verifier.generate_report())
    }
}
