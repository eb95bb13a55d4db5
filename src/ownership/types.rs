use std::fmt;

/// Shared (`&T`) or exclusive (`&mut T`) access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowKind {
    Immutable,
    Mutable,
}

impl BorrowKind {
    pub fn is_mutable(self) -> bool {
        matches!(self, BorrowKind::Mutable)
    }
}

impl fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowKind::Immutable => write!(f, "immutable"),
            BorrowKind::Mutable => write!(f, "mutable"),
        }
    }
}

/// A type as seen by the ownership checks: owned, or a reference to a
/// named target type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Owned { name: String },
    Reference { target: String, kind: BorrowKind },
}

impl TypeRef {
    pub fn owned(name: impl Into<String>) -> Self {
        TypeRef::Owned { name: name.into() }
    }

    pub fn reference(target: impl Into<String>, kind: BorrowKind) -> Self {
        TypeRef::Reference {
            target: target.into(),
            kind,
        }
    }

    /// Name of the underlying type, without the reference.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Owned { name } => name,
            TypeRef::Reference { target, .. } => target,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, TypeRef::Reference { .. })
    }

    pub fn is_mutable_reference(&self) -> bool {
        matches!(
            self,
            TypeRef::Reference {
                kind: BorrowKind::Mutable,
                ..
            }
        )
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Owned { name } => write!(f, "{name}"),
            TypeRef::Reference {
                target,
                kind: BorrowKind::Immutable,
            } => write!(f, "&{target}"),
            TypeRef::Reference {
                target,
                kind: BorrowKind::Mutable,
            } => write!(f, "&mut {target}"),
        }
    }
}
