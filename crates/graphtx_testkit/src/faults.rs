//! Fault injection for store writes.
//!
//! [`FaultyStore`] wraps another store and rejects selected writes, so
//! tests can drive a transaction into a failed flush. Point reads can be
//! failed too.

use graphtx_store::{Fields, Identity, Predicate, Row, RowRange, Store, StoreError, StoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Which writes a [`FaultyStore`] rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Any write addressing this identity.
    Identity(Identity),
    /// Any write to a row of this kind.
    Kind(String),
    /// Every write after the given number of successful ones.
    AfterWrites(usize),
    /// Point reads of this identity. Writes are unaffected.
    Read(Identity),
}

impl Fault {
    fn hits(&self, identity: &Identity, writes_so_far: usize) -> bool {
        match self {
            Fault::Identity(id) => id == identity,
            Fault::Kind(kind) => kind == identity.kind(),
            Fault::AfterWrites(n) => writes_so_far >= *n,
            Fault::Read(_) => false,
        }
    }
}

/// A store that rejects writes matching any armed [`Fault`].
///
/// Queries always pass through.
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    faults: Mutex<Vec<Fault>>,
    writes: AtomicUsize,
    rejected: AtomicUsize,
}

impl FaultyStore {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Arms a fault.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    /// Disarms every fault.
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    /// Returns the number of writes that reached the inner store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of rejected writes.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn check(&self, identity: &Identity, op: &str) -> StoreResult<()> {
        let so_far = self.writes();
        if self.faults.lock().iter().any(|f| f.hits(identity, so_far)) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::rejected(format!("injected fault on {op} {identity}")));
        }
        Ok(())
    }

    fn write(&self, identity: &Identity, op: &str, f: impl FnOnce() -> StoreResult<()>) -> StoreResult<()> {
        self.check(identity, op)?;
        f()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Store for FaultyStore {
    fn insert(&self, identity: &Identity, fields: &Fields) -> StoreResult<()> {
        self.write(identity, "insert", || self.inner.insert(identity, fields))
    }

    fn update(&self, identity: &Identity, fields: &Fields) -> StoreResult<()> {
        self.write(identity, "update", || self.inner.update(identity, fields))
    }

    fn delete(&self, identity: &Identity) -> StoreResult<()> {
        self.write(identity, "delete", || self.inner.delete(identity))
    }

    fn get(&self, identity: &Identity) -> StoreResult<Option<Fields>> {
        let failing = self
            .faults
            .lock()
            .iter()
            .any(|f| matches!(f, Fault::Read(id) if id == identity));
        if failing {
            return Err(StoreError::rejected(format!("injected fault on read {identity}")));
        }
        self.inner.get(identity)
    }

    fn query(&self, kind: &str, predicate: &Predicate, range: RowRange) -> StoreResult<Vec<Row>> {
        self.inner.query(kind, predicate, range)
    }

    fn supports_scrolling(&self) -> bool {
        self.inner.supports_scrolling()
    }
}
