//! Per-transaction identity map.

use crate::object::managed::{ManagedObject, ObjectRef};
use crate::types::ObjectState;
use graphtx_store::Identity;
use std::collections::HashMap;

/// Canonical cache from identity to managed instance.
///
/// One identity maps to at most one [`ObjectRef`] for the lifetime of the
/// map, so handles obtained through any path compare equal under
/// [`ObjectRef::ptr_eq`]. The map is owned by a single transaction.
#[derive(Debug, Default)]
pub struct IdentityMap {
    objects: HashMap<Identity, ObjectRef>,
}

impl IdentityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for an identity.
    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&ObjectRef> {
        self.objects.get(identity)
    }

    /// Returns true if the identity is cached.
    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.objects.contains_key(identity)
    }

    /// Returns the state of a cached object.
    #[must_use]
    pub fn state_of(&self, identity: &Identity) -> Option<ObjectState> {
        self.objects.get(identity).map(ObjectRef::state)
    }

    /// Returns the cached handle, registering `make()` first if absent.
    ///
    /// `make` only runs when the identity is not cached yet, so an existing
    /// instance is never replaced.
    pub fn get_or_insert_with(
        &mut self,
        identity: &Identity,
        make: impl FnOnce() -> ManagedObject,
    ) -> ObjectRef {
        self.objects
            .entry(identity.clone())
            .or_insert_with(|| ObjectRef::new(make()))
            .clone()
    }

    /// Removes an identity from the map.
    pub fn evict(&mut self, identity: &Identity) -> Option<ObjectRef> {
        self.objects.remove(identity)
    }

    /// Keeps only the objects for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&Identity, &ObjectRef) -> bool) {
        self.objects.retain(|id, obj| keep(id, obj));
    }

    /// Drops every cached object.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Returns the number of cached objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates over cached handles of one kind.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a ObjectRef> + 'a {
        self.objects
            .iter()
            .filter(move |(id, _)| id.kind() == kind)
            .map(|(_, obj)| obj)
    }

    /// Iterates over all cached handles.
    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &ObjectRef)> {
        self.objects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphtx_store::Fields;

    fn article(n: i64) -> Identity {
        Identity::of("Article", n)
    }

    #[test]
    fn get_or_insert_returns_canonical_instance() {
        let mut map = IdentityMap::new();
        let a = map.get_or_insert_with(&article(1), || {
            ManagedObject::loaded(article(1), Fields::new())
        });
        let b = map.get_or_insert_with(&article(1), || {
            panic!("existing instance must be reused")
        });
        assert!(a.ptr_eq(&b));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn evict_and_reinsert_creates_new_instance() {
        let mut map = IdentityMap::new();
        let a = map.get_or_insert_with(&article(1), || {
            ManagedObject::loaded(article(1), Fields::new())
        });
        assert!(map.evict(&article(1)).is_some());
        assert!(!map.contains(&article(1)));
        let b = map.get_or_insert_with(&article(1), || {
            ManagedObject::loaded(article(1), Fields::new())
        });
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn of_kind_filters() {
        let mut map = IdentityMap::new();
        map.get_or_insert_with(&article(1), || ManagedObject::loaded(article(1), Fields::new()));
        let group = Identity::of("ProductGroup", 1);
        map.get_or_insert_with(&group, || ManagedObject::loaded(group.clone(), Fields::new()));
        assert_eq!(map.of_kind("Article").count(), 1);
        assert_eq!(map.state_of(&group), Some(ObjectState::PersistentClean));
    }

    #[test]
    fn retain_and_clear() {
        let mut map = IdentityMap::new();
        for n in 0..4 {
            map.get_or_insert_with(&article(n), || ManagedObject::loaded(article(n), Fields::new()));
        }
        map.retain(|id, _| id.key()[0].as_integer().is_some_and(|n| n % 2 == 0));
        assert_eq!(map.len(), 2);
        map.clear();
        assert!(map.is_empty());
    }
}
