//! Managed object state and shared handles.

use crate::error::CoreResult;
use crate::transaction::Transaction;
use crate::types::ObjectState;
use graphtx_store::{Fields, Identity, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

/// A domain object under management of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedObject {
    identity: Identity,
    fields: Fields,
    state: ObjectState,
    /// Whether a row for this identity exists in the store as of the last flush.
    in_store: bool,
}

impl ManagedObject {
    /// Creates a transient object.
    #[must_use]
    pub fn transient(identity: Identity, fields: Fields) -> Self {
        Self {
            identity,
            fields,
            state: ObjectState::Transient,
            in_store: false,
        }
    }

    /// Creates a clean object loaded from the store.
    #[must_use]
    pub fn loaded(identity: Identity, fields: Fields) -> Self {
        Self {
            identity,
            fields,
            state: ObjectState::PersistentClean,
            in_store: true,
        }
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the current field values.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Returns one field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.state
    }

    /// Returns whether a row exists in the store as of the last flush.
    #[must_use]
    pub fn in_store(&self) -> bool {
        self.in_store
    }

    pub(crate) fn set_fields(&mut self, fields: Fields) {
        self.fields = fields;
    }

    pub(crate) fn set_state(&mut self, state: ObjectState) {
        self.state = state;
    }

    /// Records that the pending write for this object reached the store.
    pub(crate) fn mark_flushed(&mut self) {
        match self.state {
            ObjectState::MarkedNew | ObjectState::PersistentDirty => {
                self.state = ObjectState::PersistentClean;
                self.in_store = true;
            }
            ObjectState::MarkedDeleted => {
                self.state = ObjectState::Transient;
                self.in_store = false;
            }
            ObjectState::Transient | ObjectState::PersistentClean => {}
        }
    }
}

/// A shared handle to a managed object.
///
/// Every path that resolves the same identity within one transaction gets a
/// handle to the same instance; [`ObjectRef::ptr_eq`] tells them apart from
/// equal-valued copies. Handles are read-only: mutations go through the
/// owning [`Transaction`] so they can be locked and enlisted.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<ManagedObject>>);

impl ObjectRef {
    pub(crate) fn new(object: ManagedObject) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.0.read().identity.clone()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.0.read().state
    }

    /// Returns a copy of one field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.read().fields.get(field).cloned()
    }

    /// Returns a copy of all field values.
    #[must_use]
    pub fn fields(&self) -> Fields {
        self.0.read().fields.clone()
    }

    /// Borrows the object for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, ManagedObject> {
        self.0.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ManagedObject> {
        self.0.write()
    }

    /// Returns true if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obj = self.0.read();
        f.debug_struct("ObjectRef")
            .field("identity", &obj.identity)
            .field("state", &obj.state)
            .finish_non_exhaustive()
    }
}

/// A reference that is resolved on first access.
///
/// Stands in for a generated lazy-loading proxy: an unresolved reference is
/// just the identity, and resolving goes through the transaction's identity
/// map so it yields the canonical instance.
#[derive(Debug, Clone)]
pub enum Lazy {
    /// Already resolved.
    Resolved(ObjectRef),
    /// Not yet loaded.
    Unresolved(Identity),
}

impl Lazy {
    /// Returns the identity of the referenced object.
    #[must_use]
    pub fn identity(&self) -> Identity {
        match self {
            Lazy::Resolved(obj) => obj.identity(),
            Lazy::Unresolved(id) => id.clone(),
        }
    }

    /// Returns true once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Lazy::Resolved(_))
    }

    /// Resolves the reference through `tx`, caching the result.
    ///
    /// Returns `Ok(None)` if the object no longer exists.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the read lock cannot be
    /// taken, or the store read fails.
    pub fn resolve(&mut self, tx: &mut Transaction) -> CoreResult<Option<ObjectRef>> {
        match self {
            Lazy::Resolved(obj) => Ok(Some(obj.clone())),
            Lazy::Unresolved(id) => {
                let resolved = tx.get(id)?;
                if let Some(obj) = &resolved {
                    *self = Lazy::Resolved(obj.clone());
                }
                Ok(resolved)
            }
        }
    }
}
