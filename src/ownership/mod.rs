//! Ownership and borrow verification.
//!
//! Independent of the interpreter: the checkers are state machines driven
//! directly or by replaying a recorded [`borrow::TraceStep`] list. Every
//! shared container guards all of its state with a single mutex, so one
//! lock serializes every resource in that container.

pub mod alias;
pub mod borrow;
pub mod context;
pub mod raii;
pub mod thread_safety;
pub mod types;
pub mod verifier;

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticKind, NyxError};

pub use alias::{AliasAnalysis, LifetimeInference};
pub use borrow::{
    parse_trace, parse_trace_lines, validate_borrow_trace, BorrowChecker, BorrowState, TraceFailure,
    TraceStep,
};
pub use context::{Borrow, BorrowId, Lifetime, Owner, OwnerId, OwnershipContext};
pub use raii::{Destructor, RaiiGuard, RaiiManager, RaiiResource, ResourceId};
pub use thread_safety::{Access, DataRace, SendableKind, SyncKind, ThreadSafety, ThreadSafetyChecker};
pub use types::{BorrowKind, TypeRef};
pub use verifier::{DiagnosticMessage, EnhancedBorrowChecker, FixSuggestion, Severity, StaticVerifier};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("cannot {} borrow `{name}` while {}", .kind, blocker(.kind))]
    BorrowConflict { name: String, kind: BorrowKind },
    #[error("use of moved variable `{name}`")]
    UseAfterMove { name: String },
    #[error("cannot move borrowed variable `{name}`")]
    MovedWhileBorrowed { name: String },
    #[error("resource `{name}` already moved")]
    AlreadyMoved { name: String },
    #[error("owner #{id} not found")]
    UnknownOwner { id: OwnerId },
    #[error("resource `{name}` not declared")]
    UnknownResource { name: String },
    #[error("operation on `{name}` rejected: {reason}")]
    Rejected { name: String, reason: String },
    #[error("invalid trace line {line}: {message}")]
    InvalidTrace { line: usize, message: String },
}

fn blocker(kind: &BorrowKind) -> &'static str {
    match kind {
        BorrowKind::Immutable => "a mutable borrow is active",
        BorrowKind::Mutable => "another borrow is active",
    }
}

impl From<OwnershipError> for Diagnostic {
    fn from(err: OwnershipError) -> Self {
        Diagnostic::new(DiagnosticKind::Ownership, err.to_string())
    }
}

impl From<OwnershipError> for NyxError {
    fn from(err: OwnershipError) -> Self {
        NyxError::Diagnostic(err.into())
    }
}

/// Locks `mutex`, recovering the data if another thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// Ownership context, RAII resources and thread-safety registry behind one
/// shareable handle.
#[derive(Default)]
pub struct SafetyEngine {
    ownership: Mutex<OwnershipContext>,
    raii: Mutex<RaiiManager>,
    thread_safety: Mutex<ThreadSafetyChecker>,
}

impl SafetyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_owner(&self, object_id: u64, name: &str, line: usize) -> OwnerId {
        lock(&self.ownership).create_owner(object_id, name, line)
    }

    pub fn borrow_immutable(
        &self,
        owner: OwnerId,
        lifetime: &str,
        line: usize,
    ) -> Result<BorrowId, OwnershipError> {
        lock(&self.ownership).borrow_ref(owner, BorrowKind::Immutable, lifetime, line)
    }

    pub fn borrow_mutable(
        &self,
        owner: OwnerId,
        lifetime: &str,
        line: usize,
    ) -> Result<BorrowId, OwnershipError> {
        lock(&self.ownership).borrow_ref(owner, BorrowKind::Mutable, lifetime, line)
    }

    pub fn end_borrow(&self, borrow: BorrowId) {
        lock(&self.ownership).end_borrow(borrow);
    }

    pub fn move_value(
        &self,
        owner: OwnerId,
        new_name: &str,
        line: usize,
    ) -> Result<OwnerId, OwnershipError> {
        lock(&self.ownership).move_owner(owner, new_name, line)
    }

    pub fn validate(&self, line: usize) -> Vec<String> {
        lock(&self.ownership).validate_lifetimes(line)
    }

    pub fn acquire_resource(
        &self,
        name: &str,
        destructor: Option<Destructor>,
        line: usize,
    ) -> ResourceId {
        lock(&self.raii).acquire(name, destructor, line)
    }

    pub fn release_resource(&self, id: ResourceId) -> bool {
        lock(&self.raii).release(id)
    }

    pub fn release_all_resources(&self) {
        lock(&self.raii).release_all();
    }

    pub fn active_resources(&self) -> usize {
        lock(&self.raii).active_count()
    }

    pub fn register_type(&self, name: &str, safety: ThreadSafety) {
        lock(&self.thread_safety).register_type(name, safety);
    }

    /// `(is_send, is_sync)` for a registered type name.
    pub fn check_thread_safety(&self, type_name: &str) -> (bool, bool) {
        let checker = lock(&self.thread_safety);
        (checker.check_send(type_name), checker.check_sync(type_name))
    }
}
