//! Error types for graphtx core.

use crate::transaction::TransactionState;
use crate::types::{LockMode, Operation};
use graphtx_store::{Identity, StoreError};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a lock request was not granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockFailure {
    /// The wait deadline elapsed.
    Timeout,
    /// A non-blocking request met a conflicting lock.
    Conflict,
    /// Waiting would close a cycle in the wait-for graph.
    Deadlock,
    /// The waiting transaction was interrupted.
    Interrupted,
    /// Explicit locking is configured and the required lock is not held.
    NotHeld,
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockFailure::Timeout => "timed out",
            LockFailure::Conflict => "conflict",
            LockFailure::Deadlock => "deadlock",
            LockFailure::Interrupted => "interrupted",
            LockFailure::NotHeld => "lock not held",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in graphtx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A read against the store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A lock could not be acquired.
    #[error("lock not granted: {mode} on {identity} ({reason})")]
    LockNotGranted {
        /// The identity that was requested.
        identity: Identity,
        /// The requested mode.
        mode: LockMode,
        /// Why it was refused.
        reason: LockFailure,
    },

    /// A delete or insert would leave a dangling reference.
    #[error("referential integrity violation: {referrer}.{field} references {identity}")]
    ReferentialIntegrityViolation {
        /// The referenced object.
        identity: Identity,
        /// The object holding the reference.
        referrer: Identity,
        /// The reference field on the referrer.
        field: String,
    },

    /// A binding with this name already exists.
    #[error("name not unique: {name}")]
    NameNotUnique {
        /// The binding name.
        name: String,
    },

    /// No binding with this name exists.
    #[error("name not found: {name}")]
    NameNotFound {
        /// The binding name.
        name: String,
    },

    /// The query or its range is malformed.
    #[error("query invalid: {message}")]
    QueryInvalid {
        /// Description of the problem.
        message: String,
    },

    /// The operation requires an active transaction.
    #[error("transaction not active (state: {state})")]
    TransactionNotActive {
        /// The state the transaction was in.
        state: TransactionState,
    },

    /// The store rejected a write while flushing.
    #[error("flush failed: {operation} of {identity}: {source}")]
    FlushFailure {
        /// The identity being written.
        identity: Identity,
        /// The write that failed.
        operation: Operation,
        /// The store's error.
        #[source]
        source: StoreError,
    },

    /// The object does not exist in the transaction or the store.
    #[error("object not found: {identity}")]
    ObjectNotFound {
        /// The missing identity.
        identity: Identity,
    },

    /// No metadata is registered for the kind.
    #[error("unknown kind: {kind}")]
    UnknownKind {
        /// The kind name.
        kind: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a lock-not-granted error.
    pub fn lock_not_granted(identity: &Identity, mode: LockMode, reason: LockFailure) -> Self {
        Self::LockNotGranted {
            identity: identity.clone(),
            mode,
            reason,
        }
    }

    /// Creates a referential integrity violation.
    pub fn referential_integrity(
        identity: &Identity,
        referrer: &Identity,
        field: impl Into<String>,
    ) -> Self {
        Self::ReferentialIntegrityViolation {
            identity: identity.clone(),
            referrer: referrer.clone(),
            field: field.into(),
        }
    }

    /// Creates a query invalid error.
    pub fn query_invalid(message: impl Into<String>) -> Self {
        Self::QueryInvalid {
            message: message.into(),
        }
    }

    /// Creates an object not found error.
    pub fn object_not_found(identity: &Identity) -> Self {
        Self::ObjectNotFound {
            identity: identity.clone(),
        }
    }

    /// Creates an unknown kind error.
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for a lock failure of the given kind.
    #[must_use]
    pub fn is_lock_failure(&self, reason: LockFailure) -> bool {
        matches!(self, Self::LockNotGranted { reason: r, .. } if *r == reason)
    }
}
