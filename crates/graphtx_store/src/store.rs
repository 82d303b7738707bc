//! Store capability trait.

use crate::error::StoreResult;
use crate::predicate::{Predicate, RowRange};
use crate::value::{Fields, Identity, Row};

/// A tabular backing store addressed by object identity.
///
/// The store is the persistence collaborator of the transactional core. It
/// knows nothing about transactions, locks or object graphs: it applies
/// single-row writes in the order it receives them and answers reads.
///
/// # Invariants
///
/// - `insert` fails with [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey)
///   if the identity already exists
/// - `update` and `delete` fail with [`StoreError::NotFound`](crate::StoreError::NotFound)
///   if it does not
/// - `query` returns rows in a stable order across calls
/// - Implementations must be `Send + Sync`; every transaction shares one store
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - reference implementation for tests
pub trait Store: Send + Sync {
    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity already exists or the store rejects
    /// the write.
    fn insert(&self, identity: &Identity, fields: &Fields) -> StoreResult<()>;

    /// Replaces the fields of an existing row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or the store rejects the
    /// write.
    fn update(&self, identity: &Identity, fields: &Fields) -> StoreResult<()>;

    /// Deletes an existing row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or the store rejects the
    /// write.
    fn delete(&self, identity: &Identity) -> StoreResult<()>;

    /// Reads one row by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails; an absent row is `Ok(None)`.
    fn get(&self, identity: &Identity) -> StoreResult<Option<Fields>>;

    /// Returns the rows of `kind` matching `predicate`.
    ///
    /// Stores that report [`supports_scrolling`](Self::supports_scrolling)
    /// apply `range` themselves. Other stores may ignore it and return every
    /// matching row; callers window the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn query(&self, kind: &str, predicate: &Predicate, range: RowRange) -> StoreResult<Vec<Row>>;

    /// Whether `query` honours `range` server-side.
    fn supports_scrolling(&self) -> bool {
        false
    }
}
