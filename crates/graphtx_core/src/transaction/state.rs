//! Transaction state machine.

use std::fmt;

/// Lifecycle state of a transaction.
///
/// ```text
/// NotStarted -> Active -> (Checkpointing -> Active)* -> Committing -> Committed
///               Active -> Aborting -> Aborted
/// ```
///
/// `Committed` and `Aborted` are terminal for one unit of work; `begin`
/// starts the next one on the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created but never begun.
    NotStarted,
    /// Accepting operations.
    Active,
    /// Flushing pending writes; returns to `Active`.
    Checkpointing,
    /// Performing the final flush.
    Committing,
    /// Committed.
    Committed,
    /// Discarding pending writes.
    Aborting,
    /// Aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true if `begin` is allowed from this state.
    #[must_use]
    pub const fn can_begin(self) -> bool {
        matches!(
            self,
            TransactionState::NotStarted | TransactionState::Committed | TransactionState::Aborted
        )
    }

    /// Returns true while a unit of work is in progress.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(
            self,
            TransactionState::Active
                | TransactionState::Checkpointing
                | TransactionState::Committing
                | TransactionState::Aborting
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::NotStarted => "NOT_STARTED",
            TransactionState::Active => "ACTIVE",
            TransactionState::Checkpointing => "CHECKPOINTING",
            TransactionState::Committing => "COMMITTING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborting => "ABORTING",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}
