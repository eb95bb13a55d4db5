use indexmap::IndexMap;
use tracing::debug;

use super::{types::BorrowKind, OwnershipError};

pub type OwnerId = u64;
pub type BorrowId = u64;

/// A flat `[start_line, end_line]` interval; open-ended borrows end at
/// `usize::MAX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifetime {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Lifetime {
    pub fn new(name: impl Into<String>, start_line: usize) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line: usize::MAX,
        }
    }

    pub fn ending_at(mut self, end_line: usize) -> Self {
        self.end_line = end_line;
        self
    }

    pub fn is_valid_at(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }

    pub fn outlives(&self, other: &Lifetime) -> bool {
        self.start_line <= other.start_line && self.end_line >= other.end_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub object_id: u64,
    pub name: String,
    pub declared_at: usize,
    pub moved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Borrow {
    pub id: BorrowId,
    pub owner: OwnerId,
    pub kind: BorrowKind,
    pub lifetime: Lifetime,
    pub line: usize,
    pub active: bool,
}

/// Id-keyed owners and borrows. The primitives here fail immediately;
/// [`super::EnhancedBorrowChecker`] wraps them into recorded diagnostics.
#[derive(Debug, Default)]
pub struct OwnershipContext {
    owners: IndexMap<OwnerId, Owner>,
    borrows: IndexMap<BorrowId, Borrow>,
    next_owner: OwnerId,
    next_borrow: BorrowId,
}

impl OwnershipContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_owner(&mut self, object_id: u64, name: &str, line: usize) -> OwnerId {
        self.next_owner += 1;
        let id = self.next_owner;
        self.owners.insert(
            id,
            Owner {
                object_id,
                name: name.to_string(),
                declared_at: line,
                moved: false,
            },
        );
        id
    }

    pub fn owner(&self, id: OwnerId) -> Option<&Owner> {
        self.owners.get(&id)
    }

    pub fn borrow(&self, id: BorrowId) -> Option<&Borrow> {
        self.borrows.get(&id)
    }

    pub fn active_borrows(&self, owner: OwnerId) -> impl Iterator<Item = &Borrow> {
        self.borrows
            .values()
            .filter(move |borrow| borrow.owner == owner && borrow.active)
    }

    /// Borrows `owner` under an open-ended lifetime starting at `line`.
    pub fn borrow_ref(
        &mut self,
        owner: OwnerId,
        kind: BorrowKind,
        lifetime: &str,
        line: usize,
    ) -> Result<BorrowId, OwnershipError> {
        self.borrow_with_lifetime(owner, kind, Lifetime::new(lifetime, line), line)
    }

    pub fn borrow_with_lifetime(
        &mut self,
        owner: OwnerId,
        kind: BorrowKind,
        lifetime: Lifetime,
        line: usize,
    ) -> Result<BorrowId, OwnershipError> {
        let record = self
            .owners
            .get(&owner)
            .ok_or(OwnershipError::UnknownOwner { id: owner })?;
        if record.moved {
            return Err(OwnershipError::UseAfterMove {
                name: record.name.clone(),
            });
        }
        let conflict = match kind {
            BorrowKind::Mutable => self.active_borrows(owner).next().is_some(),
            BorrowKind::Immutable => self
                .active_borrows(owner)
                .any(|borrow| borrow.kind.is_mutable()),
        };
        if conflict {
            let err = OwnershipError::BorrowConflict {
                name: record.name.clone(),
                kind,
            };
            debug!(%err, line, "borrow rejected");
            return Err(err);
        }

        self.next_borrow += 1;
        let id = self.next_borrow;
        self.borrows.insert(
            id,
            Borrow {
                id,
                owner,
                kind,
                lifetime,
                line,
                active: true,
            },
        );
        Ok(id)
    }

    /// Object the borrow refers to.
    pub fn borrowed_object(&self, borrow: BorrowId) -> Option<u64> {
        let borrow = self.borrows.get(&borrow)?;
        self.owners.get(&borrow.owner).map(|owner| owner.object_id)
    }

    /// Ends a borrow; unknown ids are ignored.
    pub fn end_borrow(&mut self, borrow: BorrowId) {
        if let Some(borrow) = self.borrows.get_mut(&borrow) {
            borrow.active = false;
        }
    }

    /// Moves the object to a fresh owner named `new_name`; the old owner is
    /// marked moved and rejects further borrows.
    pub fn move_owner(
        &mut self,
        owner: OwnerId,
        new_name: &str,
        line: usize,
    ) -> Result<OwnerId, OwnershipError> {
        let borrowed = self.active_borrows(owner).next().is_some();
        let record = self
            .owners
            .get_mut(&owner)
            .ok_or(OwnershipError::UnknownOwner { id: owner })?;
        if record.moved {
            return Err(OwnershipError::AlreadyMoved {
                name: record.name.clone(),
            });
        }
        if borrowed {
            let err = OwnershipError::MovedWhileBorrowed {
                name: record.name.clone(),
            };
            debug!(%err, line, "move rejected");
            return Err(err);
        }
        record.moved = true;
        let object_id = record.object_id;
        Ok(self.create_owner(object_id, new_name, line))
    }

    /// Active borrows whose lifetime no longer covers `line`.
    pub fn validate_lifetimes(&self, line: usize) -> Vec<String> {
        self.borrows
            .values()
            .filter(|borrow| borrow.active && !borrow.lifetime.is_valid_at(line))
            .map(|borrow| format!("expired lifetime {}", borrow.lifetime.name))
            .collect()
    }

    pub fn check_no_active_borrows(&self, owner: OwnerId) -> bool {
        self.active_borrows(owner).next().is_none()
    }
}
