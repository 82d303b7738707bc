//! Pending writes of a transaction.
//!
//! Every mutation enlists its object exactly once. Later mutations of the same
//! object collapse into the existing entry, so a flush issues at most one
//! store operation per identity. [`EnlistmentRegistry::drain_ordered`] hands
//! the entries back in an order the store can apply without violating
//! foreign keys.

use crate::error::{CoreError, CoreResult};
use crate::types::Operation;
use graphtx_store::Identity;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enlistment {
    /// The object to write.
    pub identity: Identity,
    /// The collapsed operation.
    pub operation: Operation,
    /// Objects this one holds foreign keys to, as of the last enlistment.
    pub dependencies: BTreeSet<Identity>,
    seq: u64,
}

/// Collects and orders the writes of one transaction.
#[derive(Debug, Default)]
pub struct EnlistmentRegistry {
    entries: HashMap<Identity, Enlistment>,
    next_seq: u64,
}

impl EnlistmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, identity: &Identity, operation: Operation, mut dependencies: BTreeSet<Identity>) {
        dependencies.remove(identity);
        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.operation = operation;
                entry.dependencies = dependencies;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(
                    identity.clone(),
                    Enlistment {
                        identity: identity.clone(),
                        operation,
                        dependencies,
                        seq,
                    },
                );
            }
        }
    }

    /// Enlists an insert.
    ///
    /// Inserting over a pending delete becomes an update of the stored row.
    pub fn enlist_insert(&mut self, identity: &Identity, dependencies: BTreeSet<Identity>) {
        let op = match self.operation(identity) {
            None | Some(Operation::Insert) => Operation::Insert,
            Some(Operation::Update | Operation::Delete) => Operation::Update,
        };
        self.put(identity, op, dependencies);
    }

    /// Enlists an update.
    ///
    /// # Errors
    ///
    /// Fails if the object is already enlisted for deletion.
    pub fn enlist_update(
        &mut self,
        identity: &Identity,
        dependencies: BTreeSet<Identity>,
    ) -> CoreResult<()> {
        let op = match self.operation(identity) {
            None | Some(Operation::Update) => Operation::Update,
            Some(Operation::Insert) => Operation::Insert,
            Some(Operation::Delete) => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot update {identity}: it is marked for deletion"
                )))
            }
        };
        self.put(identity, op, dependencies);
        Ok(())
    }

    /// Enlists a delete.
    ///
    /// Deleting an object that has a pending insert cancels both. An object
    /// with no stored row needs no delete.
    pub fn enlist_delete(
        &mut self,
        identity: &Identity,
        dependencies: BTreeSet<Identity>,
        in_store: bool,
    ) {
        if in_store {
            self.put(identity, Operation::Delete, dependencies);
        } else {
            self.entries.remove(identity);
        }
    }

    /// Returns the pending operation for `identity`.
    #[must_use]
    pub fn operation(&self, identity: &Identity) -> Option<Operation> {
        self.entries.get(identity).map(|e| e.operation)
    }

    /// Returns true if `identity` has a pending write.
    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over pending writes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Enlistment> {
        self.entries.values()
    }

    /// Discards every pending write.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Takes every pending write in flush order.
    ///
    /// Inserts and updates come first, with an inserted object ahead of any
    /// object that references it. Deletes follow, with a referring object
    /// ahead of the object it references. Ties keep enlistment order. A
    /// reference cycle is broken at its earliest-enlisted member.
    pub fn drain_ordered(&mut self) -> Vec<Enlistment> {
        let (deletes, writes): (Vec<_>, Vec<_>) = self
            .entries
            .drain()
            .map(|(_, e)| e)
            .partition(|e| e.operation == Operation::Delete);

        // For writes, an object waits for the inserts it depends on.
        let mut ordered = topological(writes, |node, other| {
            other.operation == Operation::Insert && node.dependencies.contains(&other.identity)
        });
        // For deletes, the referenced object waits for its referrers.
        ordered.extend(topological(deletes, |node, other| {
            other.dependencies.contains(&node.identity)
        }));
        ordered
    }
}

/// Orders `nodes` so that every node follows the nodes it `waits_for`.
fn topological(
    nodes: Vec<Enlistment>,
    waits_for: impl Fn(&Enlistment, &Enlistment) -> bool,
) -> Vec<Enlistment> {
    let n = nodes.len();
    let mut blockers = vec![0usize; n];
    let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node) in nodes.iter().enumerate() {
        for (j, other) in nodes.iter().enumerate() {
            if i != j && waits_for(node, other) {
                blockers[i] += 1;
                unblocks[j].push(i);
            }
        }
    }

    // Ready nodes keyed by enlistment order.
    let mut ready: BTreeMap<u64, usize> = BTreeMap::new();
    let mut pending: BTreeMap<u64, usize> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if blockers[i] == 0 {
            ready.insert(node.seq, i);
        } else {
            pending.insert(node.seq, i);
        }
    }

    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = match ready.pop_first() {
            Some((_, i)) => i,
            // Only cycles remain.
            None => match pending.pop_first() {
                Some((_, i)) => i,
                None => break,
            },
        };
        order.push(next);
        for &k in &unblocks[next] {
            if blockers[k] == 0 {
                continue;
            }
            blockers[k] -= 1;
            if blockers[k] == 0 && pending.remove(&nodes[k].seq).is_some() {
                ready.insert(nodes[k].seq, k);
            }
        }
        blockers[next] = 0;
    }

    let mut slots: Vec<Option<Enlistment>> = nodes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
