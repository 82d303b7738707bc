//! Lock table and wait queues.

use crate::error::{CoreError, CoreResult, LockFailure};
use crate::types::{LockMode, TransactionId};
use graphtx_store::Identity;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long a lock request may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail immediately on conflict.
    NoWait,
    /// Block up to the given duration.
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    txid: TransactionId,
    mode: LockMode,
    ticket: u64,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<TransactionId, LockMode>,
    queue: VecDeque<Waiter>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }

    /// Holders other than `txid` whose lock conflicts with `mode`.
    fn blockers(&self, txid: TransactionId, mode: LockMode) -> impl Iterator<Item = TransactionId> + '_ {
        self.holders
            .iter()
            .filter(move |(holder, held)| **holder != txid && mode.conflicts_with(**held))
            .map(|(holder, _)| *holder)
    }

    /// Decides whether `txid` may take `mode` now.
    ///
    /// A re-entrant request is always granted. Otherwise the request must be
    /// compatible with every other holder, and a fresh request must also be
    /// first in line: `ticket` is the caller's queue position, `None` for a
    /// request that has not queued. Upgrades from READ skip the queue.
    fn grantable(&self, txid: TransactionId, mode: LockMode, ticket: Option<u64>) -> bool {
        let held = self.holders.get(&txid).copied();
        if held.is_some_and(|h| h.covers(mode)) {
            return true;
        }
        if self.blockers(txid, mode).next().is_some() {
            return false;
        }
        if held.is_some() {
            return true;
        }
        match ticket {
            None => self.queue.is_empty(),
            Some(t) => self.queue.front().is_some_and(|w| w.ticket == t),
        }
    }

    fn grant(&mut self, txid: TransactionId, mode: LockMode) {
        let slot = self.holders.entry(txid).or_insert(mode);
        if mode == LockMode::Write {
            *slot = LockMode::Write;
        }
    }

    fn dequeue(&mut self, ticket: u64) {
        self.queue.retain(|w| w.ticket != ticket);
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<Identity, LockEntry>,
    /// Which identity each blocked transaction is waiting for.
    waiting: HashMap<TransactionId, (Identity, LockMode)>,
    interrupted: HashSet<TransactionId>,
    next_ticket: u64,
}

impl LockTable {
    /// Returns true if `txid` waiting for `identity` would close a cycle in
    /// the wait-for graph.
    fn would_deadlock(&self, txid: TransactionId, identity: &Identity, mode: LockMode) -> bool {
        let Some(entry) = self.entries.get(identity) else {
            return false;
        };
        let mut stack: Vec<TransactionId> = entry.blockers(txid, mode).collect();
        let mut seen = HashSet::new();
        while let Some(t) = stack.pop() {
            if t == txid {
                return true;
            }
            if !seen.insert(t) {
                continue;
            }
            if let Some((waited, wmode)) = self.waiting.get(&t) {
                if let Some(e) = self.entries.get(waited) {
                    stack.extend(e.blockers(t, *wmode));
                }
            }
        }
        false
    }

    fn forget_if_idle(&mut self, identity: &Identity) {
        if self.entries.get(identity).is_some_and(LockEntry::is_idle) {
            self.entries.remove(identity);
        }
    }

    fn stop_waiting(&mut self, txid: TransactionId, identity: &Identity, ticket: u64) {
        self.waiting.remove(&txid);
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.dequeue(ticket);
        }
        self.forget_if_idle(identity);
    }
}

/// Grants and releases per-identity locks.
///
/// The lock manager provides:
/// - Shared READ locks and exclusive WRITE locks per identity
/// - Re-entrant requests and READ to WRITE upgrades
/// - First-come first-served queueing of blocked requests
/// - Deadline-bounded blocking, a cheap side-effect-free `try_lock`
/// - A wait-for-graph check that fails a request instead of letting it
///   block into a deadlock
///
/// Retrying after a failed `try_lock` is left to callers.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
}

impl LockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `mode` on `identity` for `txid`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotGranted`] with reason `Conflict` for a
    /// refused `NoWait` request, `Timeout` when the deadline elapses,
    /// `Deadlock` if waiting would deadlock, or `Interrupted` if the
    /// transaction was interrupted.
    pub fn acquire(
        &self,
        txid: TransactionId,
        identity: &Identity,
        mode: LockMode,
        wait: LockWait,
    ) -> CoreResult<()> {
        let mut table = self.table.lock();
        if table.interrupted.contains(&txid) {
            return Err(CoreError::lock_not_granted(identity, mode, LockFailure::Interrupted));
        }

        let entry = table.entries.entry(identity.clone()).or_default();
        if entry.grantable(txid, mode, None) {
            entry.grant(txid, mode);
            trace!(%txid, %identity, %mode, "lock granted");
            return Ok(());
        }

        let timeout = match wait {
            LockWait::NoWait => {
                table.forget_if_idle(identity);
                return Err(CoreError::lock_not_granted(identity, mode, LockFailure::Conflict));
            }
            LockWait::Timeout(timeout) => timeout,
        };

        if table.would_deadlock(txid, identity, mode) {
            debug!(%txid, %identity, %mode, "lock request would deadlock");
            table.forget_if_idle(identity);
            return Err(CoreError::lock_not_granted(identity, mode, LockFailure::Deadlock));
        }

        let ticket = table.next_ticket;
        table.next_ticket += 1;
        if let Some(entry) = table.entries.get_mut(identity) {
            entry.queue.push_back(Waiter { txid, mode, ticket });
        }
        table.waiting.insert(txid, (identity.clone(), mode));
        debug!(%txid, %identity, %mode, ?timeout, "waiting for lock");

        // A timeout past the end of the clock waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if table.interrupted.contains(&txid) {
                table.stop_waiting(txid, identity, ticket);
                self.changed.notify_all();
                return Err(CoreError::lock_not_granted(identity, mode, LockFailure::Interrupted));
            }

            let granted = match table.entries.get_mut(identity) {
                Some(entry) if entry.grantable(txid, mode, Some(ticket)) => {
                    entry.dequeue(ticket);
                    entry.grant(txid, mode);
                    true
                }
                _ => false,
            };
            if granted {
                table.waiting.remove(&txid);
                // The next waiter may now be at the head of the queue.
                self.changed.notify_all();
                trace!(%txid, %identity, %mode, "lock granted after wait");
                return Ok(());
            }

            let timed_out = match deadline {
                Some(deadline) => self.changed.wait_until(&mut table, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut table);
                    false
                }
            };
            if timed_out {
                let granted = match table.entries.get_mut(identity) {
                    Some(entry) if entry.grantable(txid, mode, Some(ticket)) => {
                        entry.dequeue(ticket);
                        entry.grant(txid, mode);
                        true
                    }
                    _ => false,
                };
                if granted {
                    table.waiting.remove(&txid);
                    self.changed.notify_all();
                    return Ok(());
                }
                table.stop_waiting(txid, identity, ticket);
                self.changed.notify_all();
                debug!(%txid, %identity, %mode, "lock wait timed out");
                return Err(CoreError::lock_not_granted(identity, mode, LockFailure::Timeout));
            }
        }
    }

    /// Attempts to acquire without blocking.
    ///
    /// Returns false, leaving no trace in the lock table, if the lock is not
    /// immediately available.
    pub fn try_lock(&self, txid: TransactionId, identity: &Identity, mode: LockMode) -> bool {
        self.acquire(txid, identity, mode, LockWait::NoWait).is_ok()
    }

    /// Releases whatever lock `txid` holds on `identity`.
    ///
    /// Returns true if a lock was held.
    pub fn release(&self, txid: TransactionId, identity: &Identity) -> bool {
        let mut table = self.table.lock();
        let released = table
            .entries
            .get_mut(identity)
            .is_some_and(|e| e.holders.remove(&txid).is_some());
        if released {
            table.forget_if_idle(identity);
            self.changed.notify_all();
            trace!(%txid, %identity, "lock released");
        }
        released
    }

    /// Releases every lock held by `txid`, returning how many were held.
    pub fn release_all(&self, txid: TransactionId) -> usize {
        let mut table = self.table.lock();
        let mut released = 0;
        table.entries.retain(|_, entry| {
            if entry.holders.remove(&txid).is_some() {
                released += 1;
            }
            !entry.is_idle()
        });
        if released > 0 {
            self.changed.notify_all();
            debug!(%txid, released, "released all locks");
        }
        released
    }

    /// Interrupts any blocked or future lock request of `txid`.
    ///
    /// The flag stays set until [`clear_interrupt`](Self::clear_interrupt).
    pub fn interrupt(&self, txid: TransactionId) {
        self.table.lock().interrupted.insert(txid);
        self.changed.notify_all();
    }

    /// Clears the interrupt flag of `txid`.
    pub fn clear_interrupt(&self, txid: TransactionId) {
        self.table.lock().interrupted.remove(&txid);
    }

    /// Returns the mode `txid` holds on `identity`, if any.
    #[must_use]
    pub fn mode_held(&self, txid: TransactionId, identity: &Identity) -> Option<LockMode> {
        self.table
            .lock()
            .entries
            .get(identity)
            .and_then(|e| e.holders.get(&txid).copied())
    }

    /// Returns every holder of `identity`, ordered by transaction id.
    #[must_use]
    pub fn holders(&self, identity: &Identity) -> Vec<(TransactionId, LockMode)> {
        let mut holders: Vec<_> = self
            .table
            .lock()
            .entries
            .get(identity)
            .map(|e| e.holders.iter().map(|(t, m)| (*t, *m)).collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    /// Returns how many identities `txid` holds a lock on.
    #[must_use]
    pub fn lock_count(&self, txid: TransactionId) -> usize {
        self.table
            .lock()
            .entries
            .values()
            .filter(|e| e.holders.contains_key(&txid))
            .count()
    }

    /// Returns how many requests are queued on `identity`.
    #[must_use]
    pub fn waiting_count(&self, identity: &Identity) -> usize {
        self.table
            .lock()
            .entries
            .get(identity)
            .map_or(0, |e| e.queue.len())
    }
}

/// Cancels the blocked lock requests of one transaction from another thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    txid: TransactionId,
    locks: Arc<LockManager>,
}

impl InterruptHandle {
    pub(crate) fn new(txid: TransactionId, locks: Arc<LockManager>) -> Self {
        Self { txid, locks }
    }

    /// Interrupts the transaction's current and future lock waits until it
    /// begins again or aborts.
    pub fn interrupt(&self) {
        self.locks.interrupt(self.txid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn id(n: i64) -> Identity {
        Identity::of("Article", n)
    }

    const T1: TransactionId = TransactionId::new(1);
    const T2: TransactionId = TransactionId::new(2);
    const T3: TransactionId = TransactionId::new(3);

    #[test]
    fn shared_reads_coexist() {
        let lm = LockManager::new();
        assert!(lm.try_lock(T1, &id(1), LockMode::Read));
        assert!(lm.try_lock(T2, &id(1), LockMode::Read));
        assert_eq!(lm.holders(&id(1)).len(), 2);
    }

    #[test]
    fn write_excludes_everyone_else() {
        let lm = LockManager::new();
        assert!(lm.try_lock(T1, &id(1), LockMode::Write));
        assert!(!lm.try_lock(T2, &id(1), LockMode::Read));
        assert!(!lm.try_lock(T2, &id(1), LockMode::Write));
        assert!(lm.try_lock(T1, &id(1), LockMode::Read));
        assert_eq!(lm.mode_held(T1, &id(1)), Some(LockMode::Write));
    }

    #[test]
    fn failed_try_lock_leaves_no_trace() {
        let lm = LockManager::new();
        assert!(lm.try_lock(T1, &id(1), LockMode::Write));
        assert!(!lm.try_lock(T2, &id(1), LockMode::Write));
        assert_eq!(lm.holders(&id(1)), vec![(T1, LockMode::Write)]);
        assert_eq!(lm.waiting_count(&id(1)), 0);
        assert_eq!(lm.lock_count(T2), 0);
    }

    #[test]
    fn upgrade_when_sole_reader() {
        let lm = LockManager::new();
        assert!(lm.try_lock(T1, &id(1), LockMode::Read));
        assert!(lm.try_lock(T1, &id(1), LockMode::Write));
        assert_eq!(lm.mode_held(T1, &id(1)), Some(LockMode::Write));
    }

    #[test]
    fn upgrade_blocked_by_other_reader() {
        let lm = LockManager::new();
        assert!(lm.try_lock(T1, &id(1), LockMode::Read));
        assert!(lm.try_lock(T2, &id(1), LockMode::Read));
        let err = lm
            .acquire(T1, &id(1), LockMode::Write, LockWait::Timeout(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is_lock_failure(LockFailure::Timeout));
        assert_eq!(lm.mode_held(T1, &id(1)), Some(LockMode::Read));
    }

    #[test]
    fn blocking_request_times_out() {
        let lm = LockManager::new();
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();
        let start = Instant::now();
        let err = lm
            .acquire(T2, &id(1), LockMode::Read, LockWait::Timeout(Duration::from_millis(30)))
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(err.is_lock_failure(LockFailure::Timeout));
        assert_eq!(lm.waiting_count(&id(1)), 0);
    }

    #[test]
    fn release_wakes_blocked_writer() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T2, &id(1), LockMode::Write, LockWait::Timeout(Duration::from_secs(5)))
            })
        };

        while lm.waiting_count(&id(1)) == 0 {
            thread::yield_now();
        }
        assert!(lm.release(T1, &id(1)));
        waiter.join().unwrap().unwrap();
        assert_eq!(lm.holders(&id(1)), vec![(T2, LockMode::Write)]);
    }

    #[test]
    fn unbounded_timeout_waits_for_release() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T2, &id(1), LockMode::Write, LockWait::Timeout(Duration::MAX))
            })
        };
        while lm.waiting_count(&id(1)) == 0 {
            thread::yield_now();
        }

        lm.release_all(T1);
        waiter.join().unwrap().unwrap();
        assert_eq!(lm.mode_held(T2, &id(1)), Some(LockMode::Write));
    }

    #[test]
    fn unbounded_timeout_still_honors_interrupt() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T2, &id(1), LockMode::Read, LockWait::Timeout(Duration::MAX))
            })
        };
        while lm.waiting_count(&id(1)) == 0 {
            thread::yield_now();
        }
        lm.interrupt(T2);

        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_lock_failure(LockFailure::Interrupted));
    }

    #[test]
    fn fresh_request_queues_behind_waiter() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Read, LockWait::NoWait).unwrap();

        let writer = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T2, &id(1), LockMode::Write, LockWait::Timeout(Duration::from_secs(5)))
            })
        };
        while lm.waiting_count(&id(1)) == 0 {
            thread::yield_now();
        }

        // Compatible with the holder, but a writer is queued first.
        assert!(!lm.try_lock(T3, &id(1), LockMode::Read));

        lm.release_all(T1);
        writer.join().unwrap().unwrap();
        assert_eq!(lm.mode_held(T2, &id(1)), Some(LockMode::Write));
    }

    #[test]
    fn crossed_waits_report_deadlock() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();
        lm.acquire(T2, &id(2), LockMode::Write, LockWait::NoWait).unwrap();

        let t1 = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T1, &id(2), LockMode::Write, LockWait::Timeout(Duration::from_secs(5)))
            })
        };
        while lm.waiting_count(&id(2)) == 0 {
            thread::yield_now();
        }

        let err = lm
            .acquire(T2, &id(1), LockMode::Write, LockWait::Timeout(Duration::from_secs(5)))
            .unwrap_err();
        assert!(err.is_lock_failure(LockFailure::Deadlock));

        lm.release_all(T2);
        t1.join().unwrap().unwrap();
    }

    #[test]
    fn interrupt_cancels_wait() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(T1, &id(1), LockMode::Write, LockWait::NoWait).unwrap();

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(T2, &id(1), LockMode::Write, LockWait::Timeout(Duration::from_secs(30)))
            })
        };
        while lm.waiting_count(&id(1)) == 0 {
            thread::yield_now();
        }
        InterruptHandle::new(T2, Arc::clone(&lm)).interrupt();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_lock_failure(LockFailure::Interrupted));
        assert_eq!(lm.waiting_count(&id(1)), 0);

        lm.clear_interrupt(T2);
        lm.release_all(T1);
        assert!(lm.try_lock(T2, &id(1), LockMode::Write));
    }

    #[test]
    fn release_all_clears_table() {
        let lm = LockManager::new();
        for n in 0..5 {
            lm.acquire(T1, &id(n), LockMode::Write, LockWait::NoWait).unwrap();
        }
        assert_eq!(lm.lock_count(T1), 5);
        assert_eq!(lm.release_all(T1), 5);
        assert_eq!(lm.lock_count(T1), 0);
        assert!(!lm.release(T1, &id(0)));
    }

    proptest! {
        #[test]
        fn grant_matches_compatibility(first in prop::bool::ANY, second in prop::bool::ANY) {
            let mode = |w: bool| if w { LockMode::Write } else { LockMode::Read };
            let lm = LockManager::new();
            prop_assert!(lm.try_lock(T1, &id(1), mode(first)));
            let granted = lm.try_lock(T2, &id(1), mode(second));
            prop_assert_eq!(granted, !mode(first).conflicts_with(mode(second)));
        }
    }
}
