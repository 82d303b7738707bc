//! Error types for store operations.

use crate::value::Identity;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a [`Store`](crate::Store) can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same identity already exists.
    #[error("duplicate key: {identity}")]
    DuplicateKey {
        /// The identity that already exists.
        identity: Identity,
    },

    /// The addressed row does not exist.
    #[error("row not found: {identity}")]
    NotFound {
        /// The identity that was not found.
        identity: Identity,
    },

    /// The backing store rejected the operation.
    #[error("store rejected operation: {0}")]
    Rejected(String),

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a not-found error for `identity`.
    pub fn not_found(identity: &Identity) -> Self {
        Self::NotFound {
            identity: identity.clone(),
        }
    }
}
