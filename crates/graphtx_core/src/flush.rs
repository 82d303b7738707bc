//! Write-behind: applying drained enlistments to the store.

use crate::enlistment::Enlistment;
use crate::error::{CoreError, CoreResult};
use crate::object::IdentityMap;
use crate::types::Operation;
use graphtx_store::{Fields, Identity, Store, StoreError};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Undo {
    Remove(Identity),
    Restore(Identity, Fields),
    Reinsert(Identity, Fields),
}

/// Before-images of the store writes issued by one flush.
///
/// A flush either completes or is rolled back: on failure the recorded
/// writes are reverted newest first, so the store is left as the previous
/// flush left it.
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<Undo>,
}

impl UndoLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an insert; undone by deleting the row.
    pub fn record_insert(&mut self, identity: &Identity) {
        self.entries.push(Undo::Remove(identity.clone()));
    }

    /// Records an update of a row that held `before`.
    pub fn record_update(&mut self, identity: &Identity, before: Fields) {
        self.entries.push(Undo::Restore(identity.clone(), before));
    }

    /// Records the delete of a row that held `before`.
    pub fn record_delete(&mut self, identity: &Identity, before: Fields) {
        self.entries.push(Undo::Reinsert(identity.clone(), before));
    }

    /// Returns the number of recorded writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reverts every recorded write, newest first.
    ///
    /// Returns how many writes were reverted. A revert the store refuses is
    /// logged and skipped.
    pub fn rollback(self, store: &dyn Store) -> usize {
        let mut reverted = 0;
        for undo in self.entries.into_iter().rev() {
            let result = match &undo {
                Undo::Remove(identity) => store.delete(identity),
                Undo::Restore(identity, before) => store.update(identity, before),
                Undo::Reinsert(identity, before) => store.insert(identity, before),
            };
            match result {
                Ok(()) => reverted += 1,
                Err(error) => warn!(?undo, %error, "could not revert write"),
            }
        }
        debug!(reverted, "flush rolled back");
        reverted
    }
}

/// Issues ordered writes against a store.
///
/// Each successful write is reflected in the identity map right away, so
/// after a failure the map still tells which objects reached the store.
pub struct WriteBehind<'a> {
    store: &'a dyn Store,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted; these identities are ready for eviction.
    pub deleted: Vec<Identity>,
}

impl FlushReport {
    /// Total number of store writes issued.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted.len()
    }
}

impl<'a> WriteBehind<'a> {
    /// Creates a coordinator writing to `store`.
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Writes every enlistment in the given order.
    ///
    /// Field values are taken from the identity map at flush time, so an
    /// insert carries the last values set before the flush. Every write that
    /// reaches the store is recorded in `undo` together with the row it
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushFailure`] for the first rejected write;
    /// later enlistments are not attempted. Reverting the writes already
    /// issued is up to the caller.
    pub fn flush(
        &self,
        ordered: Vec<Enlistment>,
        objects: &IdentityMap,
        undo: &mut UndoLog,
    ) -> CoreResult<FlushReport> {
        let mut report = FlushReport::default();
        for enlistment in ordered {
            let identity = &enlistment.identity;
            let object = objects
                .get(identity)
                .ok_or_else(|| CoreError::object_not_found(identity))?;

            if let Err(source) = self.write(identity, enlistment.operation, object.read().fields(), undo) {
                warn!(%identity, operation = %enlistment.operation, error = %source, "store rejected write");
                return Err(flush_failure(identity, enlistment.operation, source));
            }
            trace!(%identity, operation = %enlistment.operation, "flushed");

            object.write().mark_flushed();
            match enlistment.operation {
                Operation::Insert => report.inserted += 1,
                Operation::Update => report.updated += 1,
                Operation::Delete => report.deleted.push(enlistment.identity),
            }
        }
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted.len(),
            "flush complete"
        );
        Ok(report)
    }

    fn write(
        &self,
        identity: &Identity,
        operation: Operation,
        fields: &Fields,
        undo: &mut UndoLog,
    ) -> Result<(), StoreError> {
        match operation {
            Operation::Insert => {
                self.store.insert(identity, fields)?;
                undo.record_insert(identity);
            }
            Operation::Update => {
                let before = self.store.get(identity)?.ok_or_else(|| StoreError::not_found(identity))?;
                self.store.update(identity, fields)?;
                undo.record_update(identity, before);
            }
            Operation::Delete => {
                let before = self.store.get(identity)?.ok_or_else(|| StoreError::not_found(identity))?;
                self.store.delete(identity)?;
                undo.record_delete(identity, before);
            }
        }
        Ok(())
    }
}

pub(crate) fn flush_failure(identity: &Identity, operation: Operation, source: StoreError) -> CoreError {
    CoreError::FlushFailure {
        identity: identity.clone(),
        operation,
        source,
    }
}
