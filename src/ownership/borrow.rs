use std::{str::FromStr, sync::Mutex};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use super::{lock, types::BorrowKind, OwnershipError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorrowState {
    pub immutable_count: usize,
    pub mutable_active: bool,
}

impl BorrowState {
    pub fn is_borrowed(&self) -> bool {
        self.mutable_active || self.immutable_count > 0
    }
}

/// Runs before every borrow; an `Err` vetoes it with the given reason.
pub type BorrowValidator = Box<dyn Fn(&str, &BorrowState) -> Result<(), String> + Send + Sync>;

/// Runs before every move with `(resource, old_owner, new_owner)`.
pub type MoveHook = Box<dyn Fn(&str, &str, &str) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone)]
struct OwnerRecord {
    owner: String,
    moved: bool,
}

#[derive(Default)]
struct CheckerState {
    borrows: IndexMap<String, BorrowState>,
    owners: IndexMap<String, OwnerRecord>,
    errors: Vec<String>,
    validators: Vec<BorrowValidator>,
    move_hooks: Vec<MoveHook>,
}

impl CheckerState {
    fn is_moved(&self, name: &str) -> bool {
        self.owners.get(name).is_some_and(|record| record.moved)
    }

    fn validate(&self, name: &str) -> Result<(), OwnershipError> {
        let state = self.borrows.get(name).copied().unwrap_or_default();
        for validator in &self.validators {
            validator(name, &state).map_err(|reason| OwnershipError::Rejected {
                name: name.to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Name-keyed borrow and move tracking: many shared borrows or one
/// exclusive borrow per resource, and no borrows after a move.
///
/// One mutex guards every resource in the checker.
#[derive(Default)]
pub struct BorrowChecker {
    state: Mutex<CheckerState>,
}

impl std::fmt::Debug for BorrowChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowChecker").finish_non_exhaustive()
    }
}

impl BorrowChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` as owned by `owner`, clearing any moved or borrowed
    /// state from an earlier declaration.
    pub fn declare(&self, name: &str, owner: &str) {
        let mut state = lock(&self.state);
        state.owners.insert(
            name.to_string(),
            OwnerRecord {
                owner: owner.to_string(),
                moved: false,
            },
        );
        state.borrows.shift_remove(name);
    }

    /// Makes a moved resource usable again under its current owner.
    pub fn redeclare(&self, name: &str) -> Result<(), OwnershipError> {
        let mut state = lock(&self.state);
        let record = state
            .owners
            .get_mut(name)
            .ok_or_else(|| OwnershipError::UnknownResource {
                name: name.to_string(),
            })?;
        record.moved = false;
        state.borrows.shift_remove(name);
        Ok(())
    }

    pub fn borrow_immutable(&self, name: &str) -> Result<(), OwnershipError> {
        self.acquire(name, BorrowKind::Immutable)
    }

    pub fn borrow_mutable(&self, name: &str) -> Result<(), OwnershipError> {
        self.acquire(name, BorrowKind::Mutable)
    }

    fn acquire(&self, name: &str, kind: BorrowKind) -> Result<(), OwnershipError> {
        let mut state = lock(&self.state);
        let result = Self::try_acquire(&mut state, name, kind);
        if let Err(err) = &result {
            debug!(%err, "borrow rejected");
        }
        result
    }

    fn try_acquire(
        state: &mut CheckerState,
        name: &str,
        kind: BorrowKind,
    ) -> Result<(), OwnershipError> {
        if state.is_moved(name) {
            return Err(OwnershipError::UseAfterMove {
                name: name.to_string(),
            });
        }
        state.validate(name)?;
        let borrow = state.borrows.entry(name.to_string()).or_default();
        let conflict = match kind {
            BorrowKind::Immutable => borrow.mutable_active,
            BorrowKind::Mutable => borrow.is_borrowed(),
        };
        if conflict {
            return Err(OwnershipError::BorrowConflict {
                name: name.to_string(),
                kind,
            });
        }
        match kind {
            BorrowKind::Immutable => borrow.immutable_count += 1,
            BorrowKind::Mutable => borrow.mutable_active = true,
        }
        Ok(())
    }

    /// Releases one shared borrow; a no-op when none is held.
    pub fn release_immutable(&self, name: &str) {
        let mut state = lock(&self.state);
        if let Some(borrow) = state.borrows.get_mut(name) {
            borrow.immutable_count = borrow.immutable_count.saturating_sub(1);
        }
    }

    pub fn release_mutable(&self, name: &str) {
        let mut state = lock(&self.state);
        if let Some(borrow) = state.borrows.get_mut(name) {
            borrow.mutable_active = false;
        }
    }

    /// Moves `name` to `new_owner`. Undeclared resources are declared by the
    /// move itself.
    pub fn move_to(&self, name: &str, new_owner: &str) -> Result<(), OwnershipError> {
        let mut state = lock(&self.state);
        if state
            .borrows
            .get(name)
            .is_some_and(BorrowState::is_borrowed)
        {
            let err = OwnershipError::MovedWhileBorrowed {
                name: name.to_string(),
            };
            debug!(%err, "move rejected");
            return Err(err);
        }
        let old_owner = match state.owners.get(name) {
            Some(record) if record.moved => {
                return Err(OwnershipError::AlreadyMoved {
                    name: name.to_string(),
                });
            }
            Some(record) => record.owner.clone(),
            None => name.to_string(),
        };
        for hook in &state.move_hooks {
            hook(name, &old_owner, new_owner).map_err(|reason| OwnershipError::Rejected {
                name: name.to_string(),
                reason,
            })?;
        }
        state.owners.insert(
            name.to_string(),
            OwnerRecord {
                owner: new_owner.to_string(),
                moved: true,
            },
        );
        Ok(())
    }

    /// Borrow attempt that records a line-tagged error instead of failing.
    pub fn check_borrow(&self, name: &str, mutable: bool, line: usize) -> bool {
        let kind = if mutable {
            BorrowKind::Mutable
        } else {
            BorrowKind::Immutable
        };
        let mut state = lock(&self.state);
        match Self::try_acquire(&mut state, name, kind) {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, line, "borrow rejected");
                state.errors.push(format!("{line}: {err}"));
                false
            }
        }
    }

    /// Move check that records a line-tagged error instead of failing.
    pub fn check_move(&self, name: &str, line: usize) -> bool {
        let mut state = lock(&self.state);
        if state
            .borrows
            .get(name)
            .is_some_and(BorrowState::is_borrowed)
        {
            state
                .errors
                .push(format!("{line}: cannot move borrowed variable `{name}`"));
            return false;
        }
        let owner = state
            .owners
            .get(name)
            .map_or_else(|| name.to_string(), |record| record.owner.clone());
        state
            .owners
            .insert(name.to_string(), OwnerRecord { owner, moved: true });
        true
    }

    /// Ends every borrow of `name`.
    pub fn end_borrow(&self, name: &str) {
        let mut state = lock(&self.state);
        state.borrows.insert(name.to_string(), BorrowState::default());
    }

    /// `Ok` when no check has failed, otherwise every recorded error.
    pub fn verify(&self) -> Result<(), Vec<String>> {
        let state = lock(&self.state);
        if state.errors.is_empty() {
            Ok(())
        } else {
            Err(state.errors.clone())
        }
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.state).errors.clone()
    }

    pub fn register_validator<F>(&self, validator: F)
    where
        F: Fn(&str, &BorrowState) -> Result<(), String> + Send + Sync + 'static,
    {
        lock(&self.state).validators.push(Box::new(validator));
    }

    pub fn register_before_move_hook<F>(&self, hook: F)
    where
        F: Fn(&str, &str, &str) -> Result<(), String> + Send + Sync + 'static,
    {
        lock(&self.state).move_hooks.push(Box::new(hook));
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .owners
            .get(name)
            .map(|record| record.owner.clone())
    }

    pub fn is_moved(&self, name: &str) -> bool {
        lock(&self.state).is_moved(name)
    }

    /// Borrow state of every resource seen so far, in first-seen order.
    pub fn snapshot(&self) -> IndexMap<String, BorrowState> {
        lock(&self.state).borrows.clone()
    }

    pub fn apply(&self, step: &TraceStep) -> Result<(), OwnershipError> {
        match step {
            TraceStep::BorrowImmutable(name) => self.borrow_immutable(name),
            TraceStep::ReleaseImmutable(name) => {
                self.release_immutable(name);
                Ok(())
            }
            TraceStep::BorrowMutable(name) => self.borrow_mutable(name),
            TraceStep::ReleaseMutable(name) => {
                self.release_mutable(name);
                Ok(())
            }
            TraceStep::Move { name, new_owner } => self.move_to(name, new_owner),
        }
    }
}

/// One recorded borrow-checker operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceStep {
    BorrowImmutable(String),
    ReleaseImmutable(String),
    BorrowMutable(String),
    ReleaseMutable(String),
    Move { name: String, new_owner: String },
}

impl FromStr for TraceStep {
    type Err = OwnershipError;

    /// Parses `borrow_immut x`, `release_immut x`, `borrow_mut x`,
    /// `release_mut x` or `move x new_owner`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| OwnershipError::InvalidTrace { line: 0, message };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["borrow_immut", name] => Ok(TraceStep::BorrowImmutable(name.to_string())),
            ["release_immut", name] => Ok(TraceStep::ReleaseImmutable(name.to_string())),
            ["borrow_mut", name] => Ok(TraceStep::BorrowMutable(name.to_string())),
            ["release_mut", name] => Ok(TraceStep::ReleaseMutable(name.to_string())),
            ["move", name, new_owner] => Ok(TraceStep::Move {
                name: name.to_string(),
                new_owner: new_owner.to_string(),
            }),
            [] => Err(invalid("empty step".to_string())),
            _ => Err(invalid(format!("unrecognized step `{}`", line.trim()))),
        }
    }
}

/// Parses a trace file: one step per line, blank lines and `#` comments
/// ignored.
pub fn parse_trace(text: &str) -> Result<Vec<TraceStep>, OwnershipError> {
    Ok(parse_trace_lines(text)?
        .into_iter()
        .map(|(_, step)| step)
        .collect())
}

/// Like [`parse_trace`], keeping the 1-based source line of each step.
pub fn parse_trace_lines(text: &str) -> Result<Vec<(usize, TraceStep)>, OwnershipError> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            line.parse()
                .map(|step| (number, step))
                .map_err(|err| match err {
                    OwnershipError::InvalidTrace { message, .. } => OwnershipError::InvalidTrace {
                        line: number,
                        message,
                    },
                    other => other,
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {step}: {error}")]
pub struct TraceFailure {
    /// Zero-based index of the failing step.
    pub step: usize,
    pub error: OwnershipError,
}

/// Replays `steps` against a fresh checker, stopping at the first violation.
pub fn validate_borrow_trace(steps: &[TraceStep]) -> Result<BorrowChecker, TraceFailure> {
    let checker = BorrowChecker::new();
    for (step, op) in steps.iter().enumerate() {
        checker
            .apply(op)
            .map_err(|error| TraceFailure { step, error })?;
    }
    Ok(checker)
}
