//! Begin, checkpoint, commit and abort.

use super::{Transaction, TransactionState};
use crate::binding::BindingTable;
use crate::cascade::Cascader;
use crate::config::LockReleasePolicy;
use crate::error::{CoreError, CoreResult};
use crate::flush::{FlushReport, UndoLog, WriteBehind};
use crate::lock::InterruptHandle;
use crate::types::{ObjectState, Operation};
use graphtx_store::{Identity, Store};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

impl Transaction {
    /// Begins a unit of work.
    ///
    /// Allowed from `NotStarted`, `Committed` and `Aborted`. Locks retained
    /// past a previous commit stay held.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is already open or the database is closed.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.shared.ensure_open()?;
        if !self.state.can_begin() {
            return Err(CoreError::invalid_operation(format!(
                "{} is already {}",
                self.id, self.state
            )));
        }
        self.shared.locks.clear_interrupt(self.id);
        self.objects.clear();
        self.enlisted.clear();
        self.bindings.clear();
        self.state = TransactionState::Active;
        debug!(txid = %self.id, "transaction begun");
        Ok(())
    }

    /// Flushes pending changes and stays active with all locks held.
    ///
    /// Checkpoints are not savepoints: a later abort does not undo what a
    /// checkpoint wrote.
    ///
    /// # Errors
    ///
    /// A [`CoreError::FlushFailure`] aborts the transaction. Any other error
    /// is raised before the store is touched and leaves it active with its
    /// pending changes.
    pub fn checkpoint(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Checkpointing;
        match self.flush_pending() {
            Ok(report) => {
                self.state = TransactionState::Active;
                debug!(txid = %self.id, writes = report.writes(), "checkpoint complete");
                Ok(())
            }
            Err(err @ CoreError::FlushFailure { .. }) => {
                warn!(txid = %self.id, error = %err, "checkpoint failed; aborting");
                self.discard();
                Err(err)
            }
            Err(err) => {
                self.state = TransactionState::Active;
                Err(err)
            }
        }
    }

    /// Flushes pending changes and ends the unit of work.
    ///
    /// Locks are released unless the configuration retains them past commit.
    ///
    /// # Errors
    ///
    /// Any failure aborts the transaction, releasing all its locks, and is
    /// returned to the caller.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;
        let report = match self.flush_pending() {
            Ok(report) => report,
            Err(err) => {
                warn!(txid = %self.id, error = %err, "commit failed; aborting");
                self.discard();
                return Err(err);
            }
        };

        if self.shared.config.lock_release == LockReleasePolicy::OnCommit {
            self.shared.locks.release_all(self.id);
        }
        self.objects.clear();
        self.state = TransactionState::Committed;
        debug!(txid = %self.id, writes = report.writes(), "transaction committed");
        Ok(())
    }

    /// Discards pending changes and releases every lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotActive`] if no unit of work is open.
    pub fn abort(&mut self) -> CoreResult<()> {
        if !self.state.is_open() {
            return Err(CoreError::TransactionNotActive { state: self.state });
        }
        self.discard();
        Ok(())
    }

    pub(super) fn discard(&mut self) {
        self.state = TransactionState::Aborting;
        let discarded = self.enlisted.len();
        self.enlisted.clear();
        self.bindings.clear();
        self.objects.clear();
        let released = self.shared.locks.release_all(self.id);
        self.shared.locks.clear_interrupt(self.id);
        self.state = TransactionState::Aborted;
        debug!(txid = %self.id, discarded, released, "transaction aborted");
    }

    /// Releases locks retained past commit.
    ///
    /// # Errors
    ///
    /// Fails while a unit of work is open.
    pub fn release_locks(&mut self) -> CoreResult<usize> {
        if self.state.is_open() {
            return Err(CoreError::invalid_operation(
                "locks of an open transaction are released by commit or abort",
            ));
        }
        Ok(self.shared.locks.release_all(self.id))
    }

    /// Returns a handle that can interrupt this transaction's lock waits
    /// from another thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.id, Arc::clone(&self.shared.locks))
    }

    /// Writes pending changes as one unit: on failure every write issued by
    /// this flush is reverted before the error is returned.
    fn flush_pending(&mut self) -> CoreResult<FlushReport> {
        let roots: Vec<Identity> = self
            .enlisted
            .iter()
            .filter(|e| e.operation != Operation::Delete)
            .map(|e| e.identity.clone())
            .collect();
        for root in &roots {
            self.persist_reachable(root)?;
        }
        self.validate_pending()?;

        let shared = Arc::clone(&self.shared);
        let store = shared.store.as_ref();
        let mut undo = UndoLog::new();
        let report = match self.write_pending(store, &shared.bindings, &mut undo) {
            Ok(report) => report,
            Err(err) => {
                let issued = undo.len();
                let reverted = undo.rollback(store);
                warn!(txid = %self.id, issued, reverted, "flush failed; writes reverted");
                return Err(err);
            }
        };

        let deleted: HashSet<&Identity> = report.deleted.iter().collect();
        self.objects
            .retain(|id, obj| !deleted.contains(id) && obj.state() != ObjectState::MarkedDeleted);
        Ok(report)
    }

    fn write_pending(
        &mut self,
        store: &dyn Store,
        bindings: &BindingTable,
        undo: &mut UndoLog,
    ) -> CoreResult<FlushReport> {
        let ordered = self.enlisted.drain_ordered();
        let report = WriteBehind::new(store).flush(ordered, &self.objects, undo)?;
        self.bindings.flush(store, bindings, undo)?;
        Ok(report)
    }

    /// Checks every pending enlistment against the object graph.
    ///
    /// Inserts and updates READ-lock the targets of their 1:1 references
    /// first, so no other transaction can delete a target that the check
    /// has just found.
    fn validate_pending(&self) -> CoreResult<()> {
        let cascader = Cascader::new(self.shared.metadata.as_ref());
        for enlistment in self.enlisted.iter() {
            if enlistment.operation == Operation::Delete {
                continue;
            }
            if let Some(obj) = self.objects.get(&enlistment.identity) {
                let targets = self.foreign_keys(&enlistment.identity, &obj.fields());
                self.lock_referenced(&enlistment.identity, &targets)?;
            }
        }

        let graph = self.graph();
        for enlistment in self.enlisted.iter() {
            match enlistment.operation {
                Operation::Delete => cascader.validate_delete(&enlistment.identity, &graph)?,
                Operation::Insert | Operation::Update => {
                    cascader.validate_references(&enlistment.identity, &graph)?;
                }
            }
        }
        Ok(())
    }
}
