//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::predicate::{Predicate, RowRange};
use crate::store::Store;
use crate::value::{Fields, Identity, Row, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A write applied to an [`InMemoryStore`], recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// A row was inserted.
    Insert(Identity),
    /// A row was updated.
    Update(Identity),
    /// A row was deleted.
    Delete(Identity),
}

impl WriteOp {
    /// Returns the identity the write addressed.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        match self {
            WriteOp::Insert(id) | WriteOp::Update(id) | WriteOp::Delete(id) => id,
        }
    }
}

type Table = BTreeMap<Vec<Value>, Fields>;

/// An in-memory store.
///
/// Rows live in one ordered table per kind, so query results come back in
/// key order. Every successful write is appended to a journal that tests
/// can inspect to check flush ordering.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across transactions.
///
/// # Example
///
/// ```rust
/// use graphtx_store::{fields, Identity, InMemoryStore, Store, Value};
///
/// let store = InMemoryStore::new();
/// let id = Identity::of("ProductGroup", 1);
/// store.insert(&id, &fields([("name", Value::from("tools"))])).unwrap();
/// assert!(store.get(&id).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<String, Table>>,
    journal: RwLock<Vec<WriteOp>>,
    scrolling: bool,
    queries: AtomicUsize,
}

impl InMemoryStore {
    /// Creates an empty store without server-side scrolling.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that applies query ranges itself.
    #[must_use]
    pub fn with_scrolling() -> Self {
        Self {
            scrolling: true,
            ..Self::default()
        }
    }

    /// Creates a store pre-populated with rows, bypassing the journal.
    #[must_use]
    pub fn with_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for row in rows {
                tables
                    .entry(row.identity.kind().to_owned())
                    .or_default()
                    .insert(row.identity.key().to_vec(), row.fields);
            }
        }
        store
    }

    /// Returns true if a row with this identity exists.
    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.tables
            .read()
            .get(identity.kind())
            .is_some_and(|t| t.contains_key(identity.key()))
    }

    /// Returns the number of rows of a kind.
    #[must_use]
    pub fn row_count(&self, kind: &str) -> usize {
        self.tables.read().get(kind).map_or(0, BTreeMap::len)
    }

    /// Returns a copy of the write journal.
    #[must_use]
    pub fn journal(&self) -> Vec<WriteOp> {
        self.journal.read().clone()
    }

    /// Clears the write journal.
    pub fn clear_journal(&self) {
        self.journal.write().clear();
    }

    /// Returns how many times `query` has been called.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Store for InMemoryStore {
    fn insert(&self, identity: &Identity, fields: &Fields) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table = tables.entry(identity.kind().to_owned()).or_default();
        if table.contains_key(identity.key()) {
            return Err(StoreError::DuplicateKey {
                identity: identity.clone(),
            });
        }
        table.insert(identity.key().to_vec(), fields.clone());
        self.journal.write().push(WriteOp::Insert(identity.clone()));
        Ok(())
    }

    fn update(&self, identity: &Identity, fields: &Fields) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(identity.kind())
            .and_then(|t| t.get_mut(identity.key()))
            .ok_or_else(|| StoreError::not_found(identity))?;
        *row = fields.clone();
        self.journal.write().push(WriteOp::Update(identity.clone()));
        Ok(())
    }

    fn delete(&self, identity: &Identity) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables
            .get_mut(identity.kind())
            .and_then(|t| t.remove(identity.key()))
            .ok_or_else(|| StoreError::not_found(identity))?;
        self.journal.write().push(WriteOp::Delete(identity.clone()));
        Ok(())
    }

    fn get(&self, identity: &Identity) -> StoreResult<Option<Fields>> {
        Ok(self
            .tables
            .read()
            .get(identity.kind())
            .and_then(|t| t.get(identity.key()))
            .cloned())
    }

    fn query(&self, kind: &str, predicate: &Predicate, range: RowRange) -> StoreResult<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read();
        let Some(table) = tables.get(kind) else {
            return Ok(Vec::new());
        };
        let rows: Vec<Row> = table
            .iter()
            .filter(|(_, fields)| predicate.matches(fields))
            .map(|(key, fields)| Row::new(Identity::new(kind, key.clone()), fields.clone()))
            .collect();
        if self.scrolling {
            Ok(range.apply(rows))
        } else {
            Ok(rows)
        }
    }

    fn supports_scrolling(&self) -> bool {
        self.scrolling
    }
}
