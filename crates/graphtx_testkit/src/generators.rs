//! Property-based test generators using proptest.
//!
//! Besides value strategies this module provides [`CatalogOp`] sequences
//! over product groups together with a reference model of what the store
//! must hold after they commit.

use crate::fixtures::{group, group_fields};
use graphtx_core::{CoreError, CoreResult, Transaction};
use graphtx_store::Value;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for scalar field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for product group names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

/// One step applied to the product groups of a transaction.
#[derive(Debug, Clone)]
pub enum CatalogOp {
    /// `make_persistent` with fresh values.
    Put {
        /// Group key.
        key: i64,
        /// New name.
        name: String,
    },
    /// Change the name of an existing group.
    Rename {
        /// Group key.
        key: i64,
        /// New name.
        name: String,
    },
    /// `delete_persistent`.
    Delete {
        /// Group key.
        key: i64,
    },
    /// Flush without ending the transaction.
    Checkpoint,
    /// Evict unchanged objects from the cache.
    ClearCache,
}

/// Strategy for one [`CatalogOp`] over keys `0..keys`.
pub fn catalog_op_strategy(keys: i64) -> impl Strategy<Value = CatalogOp> {
    prop_oneof![
        4 => (0..keys, name_strategy()).prop_map(|(key, name)| CatalogOp::Put { key, name }),
        2 => (0..keys, name_strategy()).prop_map(|(key, name)| CatalogOp::Rename { key, name }),
        3 => (0..keys).prop_map(|key| CatalogOp::Delete { key }),
        1 => Just(CatalogOp::Checkpoint),
        1 => Just(CatalogOp::ClearCache),
    ]
}

/// Strategy for a sequence of up to `max_len` ops over `keys` keys.
pub fn catalog_ops_strategy(keys: i64, max_len: usize) -> impl Strategy<Value = Vec<CatalogOp>> {
    prop::collection::vec(catalog_op_strategy(keys), 0..max_len)
}

/// Strategy for committed starting rows: key to name.
pub fn initial_groups_strategy(keys: i64) -> impl Strategy<Value = BTreeMap<i64, String>> {
    prop::collection::btree_map(0..keys, name_strategy(), 0..keys as usize)
}

/// Applies `op` to `tx`.
///
/// Renaming or deleting a group that does not exist fails with
/// [`CoreError::ObjectNotFound`] and changes nothing; that outcome is
/// returned as `Ok(false)`.
///
/// # Errors
///
/// Any other failure.
pub fn apply_op(tx: &mut Transaction, op: &CatalogOp) -> CoreResult<bool> {
    let result = match op {
        CatalogOp::Put { key, name } => tx.make_persistent(&group(*key), group_fields(*key, name)).map(|_| ()),
        CatalogOp::Rename { key, name } => tx.set(&group(*key), "name", name.as_str()),
        CatalogOp::Delete { key } => tx.delete_persistent(&group(*key)),
        CatalogOp::Checkpoint => tx.checkpoint(),
        CatalogOp::ClearCache => tx.clear_cache(),
    };
    match result {
        Ok(()) => Ok(true),
        Err(CoreError::ObjectNotFound { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Reference model: the group names the store must hold after committing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogModel {
    /// Group key to name.
    pub groups: BTreeMap<i64, String>,
}

impl CatalogModel {
    /// Starts from committed rows.
    #[must_use]
    pub fn new(groups: BTreeMap<i64, String>) -> Self {
        Self { groups }
    }

    /// Applies `op`, returning whether it takes effect.
    pub fn apply(&mut self, op: &CatalogOp) -> bool {
        match op {
            CatalogOp::Put { key, name } => {
                self.groups.insert(*key, name.clone());
                true
            }
            CatalogOp::Rename { key, name } => match self.groups.get_mut(key) {
                Some(current) => {
                    current.clone_from(name);
                    true
                }
                None => false,
            },
            CatalogOp::Delete { key } => self.groups.remove(key).is_some(),
            CatalogOp::Checkpoint | CatalogOp::ClearCache => true,
        }
    }
}
