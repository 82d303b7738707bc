//! The object graph as one transaction sees it.

use crate::cascade::ObjectGraph;
use crate::error::CoreResult;
use crate::object::IdentityMap;
use crate::types::ObjectState;
use graphtx_store::{Fields, Identity, Predicate, RowRange, Store};
use std::collections::BTreeSet;

/// Cached objects layered over stored rows.
///
/// A cached object always shadows its stored row, including when the
/// cached copy is deleted or no longer holds a reference.
pub(super) struct TxGraph<'a> {
    pub(super) store: &'a dyn Store,
    pub(super) objects: &'a IdentityMap,
}

impl ObjectGraph for TxGraph<'_> {
    fn fields_of(&self, identity: &Identity) -> CoreResult<Option<Fields>> {
        match self.objects.get(identity) {
            Some(obj) => Ok(Some(obj.fields())),
            None => Ok(self.store.get(identity)?),
        }
    }

    fn exists(&self, identity: &Identity) -> CoreResult<bool> {
        match self.objects.state_of(identity) {
            Some(state) => Ok(state.is_live()),
            None => Ok(self.store.get(identity)?.is_some()),
        }
    }

    fn state_of(&self, identity: &Identity) -> Option<ObjectState> {
        self.objects.state_of(identity)
    }

    fn referrers(&self, kind: &str, field: &str, target: &Identity) -> CoreResult<Vec<Identity>> {
        let predicate = Predicate::refers_to(field, target.clone());
        let mut found: BTreeSet<Identity> = self
            .store
            .query(kind, &predicate, RowRange::all())?
            .into_iter()
            .map(|row| row.identity)
            .filter(|id| !self.objects.contains(id))
            .collect();

        for obj in self.objects.of_kind(kind) {
            let obj = obj.read();
            if obj.state().is_live() && obj.get(field).is_some_and(|v| v.refers_to(target)) {
                found.insert(obj.identity().clone());
            }
        }
        Ok(found.into_iter().collect())
    }
}

impl super::Transaction {
    pub(super) fn graph(&self) -> TxGraph<'_> {
        TxGraph {
            store: self.shared.store.as_ref(),
            objects: &self.objects,
        }
    }
}
