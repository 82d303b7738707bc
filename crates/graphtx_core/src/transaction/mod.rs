//! Transactions over managed object graphs.
//!
//! A [`Transaction`] coordinates the other components for one unit of work:
//! - Locks are taken through the shared lock manager
//! - Objects are cached in a private identity map
//! - Writes are enlisted and flushed in dependency order at checkpoint and
//!   commit
//! - Named binding changes are staged and published at flush
//!
//! A transaction handle is owned by one thread. It keeps its id across
//! `begin`/`commit` cycles.

mod graph;
mod lifecycle;
mod objects;
mod state;

pub use state::TransactionState;

use crate::binding::NamedBindingRegistry;
use crate::config::Config;
use crate::database::Shared;
use crate::enlistment::EnlistmentRegistry;
use crate::error::{CoreError, CoreResult};
use crate::object::IdentityMap;
use crate::types::TransactionId;
use graphtx_store::Store;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A transaction handle.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    shared: Arc<Shared>,
    objects: IdentityMap,
    enlisted: EnlistmentRegistry,
    bindings: NamedBindingRegistry,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, shared: Arc<Shared>) -> Self {
        Self {
            id,
            state: TransactionState::NotStarted,
            shared,
            objects: IdentityMap::new(),
            enlisted: EnlistmentRegistry::new(),
            bindings: NamedBindingRegistry::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.shared.store.as_ref()
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::TransactionNotActive { state: self.state })
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("cached", &self.objects.len())
            .field("enlisted", &self.enlisted.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_open() {
            warn!(txid = %self.id, state = %self.state, "dropping open transaction; aborting");
            self.discard();
        }
        self.shared.locks.release_all(self.id);
        self.shared.locks.clear_interrupt(self.id);
    }
}
