//! Core type definitions for graphtx.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused. A
/// transaction handle keeps its ID across `begin`/`commit` cycles, so locks
/// retained past a commit stay attributed to the same holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Shared; any number of holders.
    Read,
    /// Exclusive; excludes every other holder.
    Write,
}

impl LockMode {
    /// Returns true if locks of these modes held by different transactions
    /// conflict.
    #[must_use]
    pub const fn conflicts_with(self, other: LockMode) -> bool {
        matches!(self, LockMode::Write) || matches!(other, LockMode::Write)
    }

    /// Returns true if holding `self` already satisfies a request for `requested`.
    #[must_use]
    pub const fn covers(self, requested: LockMode) -> bool {
        matches!(self, LockMode::Write) || matches!(requested, LockMode::Read)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => f.write_str("READ"),
            LockMode::Write => f.write_str("WRITE"),
        }
    }
}

/// Lifecycle state of a managed object within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Known to the transaction but not persistent.
    Transient,
    /// Persistent and unchanged since load or last flush.
    PersistentClean,
    /// Persistent with unflushed changes.
    PersistentDirty,
    /// Will be inserted at the next flush.
    MarkedNew,
    /// Will be deleted at the next flush.
    MarkedDeleted,
}

impl ObjectState {
    /// Returns true if the object exists, or will exist after the next flush.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            ObjectState::PersistentClean | ObjectState::PersistentDirty | ObjectState::MarkedNew
        )
    }
}

/// A pending write kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Insert a new row.
    Insert,
    /// Update an existing row.
    Update,
    /// Delete an existing row.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => f.write_str("INSERT"),
            Operation::Update => f.write_str("UPDATE"),
            Operation::Delete => f.write_str("DELETE"),
        }
    }
}
