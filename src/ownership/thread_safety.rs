use std::fmt;

use indexmap::IndexMap;

use super::types::{BorrowKind, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendableKind {
    Atomic,
    Owned,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Atomic,
    Locked,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSafety {
    pub is_send: bool,
    pub is_sync: bool,
    pub sendable: SendableKind,
    pub sync: SyncKind,
}

impl ThreadSafety {
    pub const PRIMITIVE: ThreadSafety = ThreadSafety {
        is_send: true,
        is_sync: true,
        sendable: SendableKind::Atomic,
        sync: SyncKind::Atomic,
    };

    pub const UNSAFE: ThreadSafety = ThreadSafety {
        is_send: false,
        is_sync: false,
        sendable: SendableKind::Unsafe,
        sync: SyncKind::Unsafe,
    };

    /// Owned data behind a lock: movable and shareable.
    pub const LOCKED: ThreadSafety = ThreadSafety {
        is_send: true,
        is_sync: true,
        sendable: SendableKind::Owned,
        sync: SyncKind::Locked,
    };
}

const PRIMITIVES: &[&str] = &[
    "bool", "char", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "isize", "usize",
    "f32", "f64",
];

/// One observed access to a variable from some thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub variable: String,
    pub mutates: bool,
    /// Performed while holding a lock.
    pub protected: bool,
}

impl Access {
    pub fn read(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            mutates: false,
            protected: false,
        }
    }

    pub fn write(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            mutates: true,
            protected: false,
        }
    }

    pub fn locked_write(variable: impl Into<String>) -> Self {
        Self {
            protected: true,
            ..Self::write(variable)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRace {
    pub variable: String,
    pub mutating_accesses: usize,
}

impl fmt::Display for DataRace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data race on {}", self.variable)
    }
}

/// Send/Sync registry. Primitive types are both; anything else must be
/// registered, and unknown names are neither.
#[derive(Debug, Clone)]
pub struct ThreadSafetyChecker {
    types: IndexMap<String, ThreadSafety>,
}

impl Default for ThreadSafetyChecker {
    fn default() -> Self {
        let types = PRIMITIVES
            .iter()
            .map(|name| (name.to_string(), ThreadSafety::PRIMITIVE))
            .collect();
        Self { types }
    }
}

impl ThreadSafetyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, name: &str, safety: ThreadSafety) {
        self.types.insert(name.to_string(), safety);
    }

    pub fn safety(&self, name: &str) -> ThreadSafety {
        self.types.get(name).copied().unwrap_or(ThreadSafety::UNSAFE)
    }

    pub fn check_send(&self, name: &str) -> bool {
        self.safety(name).is_send
    }

    pub fn check_sync(&self, name: &str) -> bool {
        self.safety(name).is_sync
    }

    /// `&T` is Send when `T` is Sync; `&mut T` when `T` is Send.
    pub fn check_type_send(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Owned { name } => self.check_send(name),
            TypeRef::Reference {
                target,
                kind: BorrowKind::Immutable,
            } => self.check_sync(target),
            TypeRef::Reference {
                target,
                kind: BorrowKind::Mutable,
            } => self.check_send(target),
        }
    }

    /// `&T` is Sync when `T` is; `&mut T` likewise.
    pub fn check_type_sync(&self, ty: &TypeRef) -> bool {
        self.check_sync(ty.base_name())
    }

    /// Groups accesses by variable and reports a race wherever more than one
    /// access mutates and not all of those are protected.
    pub fn verify_no_data_race(&self, accesses: &[Access]) -> Vec<DataRace> {
        let mut by_variable: IndexMap<&str, Vec<&Access>> = IndexMap::new();
        for access in accesses {
            by_variable
                .entry(access.variable.as_str())
                .or_default()
                .push(access);
        }
        by_variable
            .into_iter()
            .filter_map(|(variable, accesses)| {
                let mutating: Vec<_> = accesses.into_iter().filter(|a| a.mutates).collect();
                let racy = mutating.len() > 1 && !mutating.iter().all(|a| a.protected);
                racy.then(|| DataRace {
                    variable: variable.to_string(),
                    mutating_accesses: mutating.len(),
                })
            })
            .collect()
    }
}
