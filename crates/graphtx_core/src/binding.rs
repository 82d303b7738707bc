//! Named bindings: global name to identity associations.
//!
//! The committed bindings live in a database-wide [`BindingTable`] backed by
//! rows of the reserved kind [`BINDING_KIND`]. Each transaction stages its
//! changes in a [`NamedBindingRegistry`]; names are serialized through the
//! lock manager under [`binding_identity`].

use crate::error::{CoreError, CoreResult};
use crate::flush::{flush_failure, UndoLog};
use crate::types::Operation;
use graphtx_store::{fields, Identity, Predicate, RowRange, Store, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Store kind holding one row per committed binding.
pub const BINDING_KIND: &str = "__named_binding__";

const TARGET_FIELD: &str = "target";

/// Identity under which the binding `name` is stored and locked.
#[must_use]
pub fn binding_identity(name: &str) -> Identity {
    Identity::of(BINDING_KIND, name)
}

/// Committed bindings shared by every transaction of a database.
#[derive(Debug, Default)]
pub struct BindingTable {
    names: RwLock<HashMap<String, Identity>>,
}

impl BindingTable {
    /// Loads the committed bindings from `store`.
    ///
    /// # Errors
    ///
    /// Fails if the store query fails.
    pub fn load(store: &dyn Store) -> CoreResult<Self> {
        let rows = store.query(BINDING_KIND, &Predicate::True, RowRange::all())?;
        let mut names = HashMap::with_capacity(rows.len());
        for row in rows {
            let name = row.identity.key().first().and_then(Value::as_text);
            let target = row.fields.get(TARGET_FIELD).and_then(Value::as_identity);
            match (name, target) {
                (Some(name), Some(target)) => {
                    names.insert(name.to_owned(), target.clone());
                }
                _ => warn!(identity = %row.identity, "skipping malformed binding row"),
            }
        }
        debug!(bindings = names.len(), "loaded named bindings");
        Ok(Self {
            names: RwLock::new(names),
        })
    }

    /// Returns the committed target of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Identity> {
        self.names.read().get(name).cloned()
    }

    /// Returns the number of committed bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// Returns true if no binding is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    fn apply(&self, name: &str, change: &BindingChange) {
        let mut names = self.names.write();
        match change {
            BindingChange::Bind(target) => {
                names.insert(name.to_owned(), target.clone());
            }
            BindingChange::Unbind => {
                names.remove(name);
            }
        }
    }
}

/// A staged change to one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingChange {
    /// Bind the name to an identity.
    Bind(Identity),
    /// Remove the binding.
    Unbind,
}

/// Binding changes staged by one transaction.
#[derive(Debug, Default)]
pub struct NamedBindingRegistry {
    pending: BTreeMap<String, BindingChange>,
}

impl NamedBindingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn effective(&self, name: &str, committed: &BindingTable) -> Option<Identity> {
        match self.pending.get(name) {
            Some(BindingChange::Bind(target)) => Some(target.clone()),
            Some(BindingChange::Unbind) => None,
            None => committed.get(name),
        }
    }

    /// Binds `name` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotUnique`] if the name is bound, counting
    /// both staged and committed bindings. Nothing changes on failure.
    pub fn bind(&mut self, name: &str, target: &Identity, committed: &BindingTable) -> CoreResult<()> {
        if self.effective(name, committed).is_some() {
            return Err(CoreError::NameNotUnique { name: name.to_owned() });
        }
        self.pending
            .insert(name.to_owned(), BindingChange::Bind(target.clone()));
        Ok(())
    }

    /// Removes the binding of `name`, returning the identity it pointed at.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotFound`] if the name is not bound.
    pub fn unbind(&mut self, name: &str, committed: &BindingTable) -> CoreResult<Identity> {
        let target = self
            .effective(name, committed)
            .ok_or_else(|| CoreError::NameNotFound { name: name.to_owned() })?;
        if committed.get(name).is_some() {
            self.pending.insert(name.to_owned(), BindingChange::Unbind);
        } else {
            self.pending.remove(name);
        }
        Ok(target)
    }

    /// Returns the identity bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotFound`] if the name is not bound.
    pub fn lookup(&self, name: &str, committed: &BindingTable) -> CoreResult<Identity> {
        self.effective(name, committed)
            .ok_or_else(|| CoreError::NameNotFound { name: name.to_owned() })
    }

    /// Returns true if changes are staged.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Writes staged changes to the store and publishes them.
    ///
    /// Returns the number of store writes issued. Each write is recorded in
    /// `undo`. Nothing is published unless every write succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushFailure`] for the first rejected write. The
    /// staged changes are kept and the committed table is unchanged.
    pub fn flush(
        &mut self,
        store: &dyn Store,
        committed: &BindingTable,
        undo: &mut UndoLog,
    ) -> CoreResult<usize> {
        let mut writes = 0;
        for (name, change) in &self.pending {
            let identity = binding_identity(name);
            let previous = committed
                .get(name)
                .map(|target| fields([(TARGET_FIELD, Value::from(target))]));
            match (change, previous) {
                (BindingChange::Bind(target), None) => {
                    store
                        .insert(&identity, &fields([(TARGET_FIELD, Value::from(target))]))
                        .map_err(|e| flush_failure(&identity, Operation::Insert, e))?;
                    undo.record_insert(&identity);
                }
                (BindingChange::Bind(target), Some(before)) => {
                    store
                        .update(&identity, &fields([(TARGET_FIELD, Value::from(target))]))
                        .map_err(|e| flush_failure(&identity, Operation::Update, e))?;
                    undo.record_update(&identity, before);
                }
                (BindingChange::Unbind, Some(before)) => {
                    store
                        .delete(&identity)
                        .map_err(|e| flush_failure(&identity, Operation::Delete, e))?;
                    undo.record_delete(&identity, before);
                }
                (BindingChange::Unbind, None) => continue,
            }
            writes += 1;
        }
        for (name, change) in std::mem::take(&mut self.pending) {
            committed.apply(&name, &change);
        }
        Ok(writes)
    }

    /// Drops staged changes.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
