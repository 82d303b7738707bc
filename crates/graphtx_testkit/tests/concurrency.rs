//! Lock behavior across threads.

use graphtx_core::{Config, CoreError, LockFailure, LockMode, TransactionState};
use graphtx_store::Value;
use graphtx_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

fn seeded_with_timeout(timeout: Duration) -> TestDatabase {
    TestDatabase::with_store(Catalog::sample().store(), Config::default().lock_timeout(timeout))
}

#[test]
fn second_writer_blocks_until_commit() {
    let test_db = seeded_with_timeout(Duration::from_secs(5));
    let target = group(1);

    let mut first = test_db.begin().unwrap();
    first.set(&target, "name", "renamed").unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let db = test_db.db.clone();
        let acquired = Arc::clone(&acquired);
        let target = target.clone();
        thread::spawn(move || {
            let mut second = db.begin().unwrap();
            second.lock(&target, LockMode::Write).unwrap();
            acquired.store(true, Ordering::SeqCst);
            let name = second.fetch(&target).unwrap().get("name");
            second.commit().unwrap();
            name
        })
    };

    wait_until(|| test_db.lock_manager().waiting_count(&target) == 1);
    assert!(!acquired.load(Ordering::SeqCst));

    let mut bystander = test_db.begin().unwrap();
    assert!(!bystander.try_lock(&target, LockMode::Write).unwrap());
    assert!(!bystander.try_lock(&target, LockMode::Read).unwrap());
    bystander.abort().unwrap();

    first.commit().unwrap();
    let seen = waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(seen, Some(Value::from("renamed")));
}

#[test]
fn abort_also_wakes_waiters() {
    let test_db = seeded_with_timeout(Duration::from_secs(5));
    let target = article(10);

    let mut first = test_db.begin().unwrap();
    first.lock(&target, LockMode::Write).unwrap();

    let waiter = {
        let db = test_db.db.clone();
        let target = target.clone();
        thread::spawn(move || {
            let mut second = db.begin().unwrap();
            second.lock(&target, LockMode::Write)
        })
    };

    wait_until(|| test_db.lock_manager().waiting_count(&target) == 1);
    first.abort().unwrap();
    waiter.join().unwrap().unwrap();
}

#[test]
fn readers_share_and_block_writers() {
    let test_db = seeded_with_timeout(Duration::from_millis(50));
    let target = group(2);

    let mut a = test_db.begin().unwrap();
    let mut b = test_db.begin().unwrap();
    a.fetch(&target).unwrap();
    b.fetch(&target).unwrap();
    assert_eq!(test_db.lock_manager().holders(&target).len(), 2);

    let mut c = test_db.begin().unwrap();
    let err = c.set(&target, "name", "x").unwrap_err();
    assert!(err.is_lock_failure(LockFailure::Timeout));
    assert!(c.is_active());
}

#[test]
fn crossing_writers_detect_deadlock() {
    let test_db = seeded_with_timeout(Duration::from_secs(5));
    let (x, y) = (group(1), group(2));

    let mut first = test_db.begin().unwrap();
    let mut second = test_db.begin().unwrap();
    first.lock(&x, LockMode::Write).unwrap();
    second.lock(&y, LockMode::Write).unwrap();

    let waiter = {
        let y = y.clone();
        thread::spawn(move || {
            let result = first.lock(&y, LockMode::Write);
            (first, result)
        })
    };

    wait_until(|| test_db.lock_manager().waiting_count(&y) == 1);
    let err = second.lock(&x, LockMode::Write).unwrap_err();
    assert!(err.is_lock_failure(LockFailure::Deadlock));

    second.abort().unwrap();
    let (mut first, result) = waiter.join().unwrap();
    result.unwrap();
    first.commit().unwrap();
    assert_eq!(first.state(), TransactionState::Committed);
}

#[test]
fn interrupt_cancels_a_blocked_wait() {
    let test_db = seeded_with_timeout(Duration::from_secs(30));
    let target = group(1);

    let mut holder = test_db.begin().unwrap();
    holder.lock(&target, LockMode::Write).unwrap();

    let mut blocked = test_db.begin().unwrap();
    let handle = blocked.interrupt_handle();
    let waiter = {
        let target = target.clone();
        thread::spawn(move || {
            let result = blocked.lock(&target, LockMode::Read);
            (blocked, result)
        })
    };

    wait_until(|| test_db.lock_manager().waiting_count(&target) == 1);
    handle.interrupt();
    let (mut blocked, result) = waiter.join().unwrap();
    assert!(result.unwrap_err().is_lock_failure(LockFailure::Interrupted));
    assert_eq!(test_db.lock_manager().waiting_count(&target), 0);

    // A fresh unit of work starts without the interrupt.
    blocked.abort().unwrap();
    holder.commit().unwrap();
    blocked.begin().unwrap();
    blocked.lock(&target, LockMode::Read).unwrap();
}

#[test]
fn insert_waits_for_concurrent_delete_of_its_parent() {
    let test_db = TestDatabase::with_config(Config::default().lock_timeout(Duration::from_secs(5)));
    test_db
        .transaction(|tx| tx.make_persistent(&group(1), group_fields(1, "tools")).map(|_| ()))
        .unwrap();

    let mut deleter = test_db.begin().unwrap();
    deleter.delete_persistent(&group(1)).unwrap();

    let inserter = {
        let db = test_db.db.clone();
        thread::spawn(move || {
            let mut tx = db.begin().unwrap();
            tx.make_persistent(&article(9), article_fields(9, "chisel", 1))?;
            tx.commit()
        })
    };

    wait_until(|| test_db.lock_manager().waiting_count(&group(1)) == 1);
    deleter.commit().unwrap();

    let err = inserter.join().unwrap().unwrap_err();
    assert!(matches!(err, CoreError::ReferentialIntegrityViolation { .. }));
    assert!(!test_db.store.contains(&group(1)));
    assert!(!test_db.store.contains(&article(9)));
}

#[test]
fn delete_waits_for_pending_referrer() {
    let test_db = TestDatabase::with_config(Config::default().lock_timeout(Duration::from_millis(50)));
    test_db
        .transaction(|tx| tx.make_persistent(&group(1), group_fields(1, "tools")).map(|_| ()))
        .unwrap();

    let mut inserter = test_db.begin().unwrap();
    inserter.make_persistent(&article(9), article_fields(9, "chisel", 1)).unwrap();

    let mut deleter = test_db.begin().unwrap();
    let err = deleter.delete_persistent(&group(1)).unwrap_err();
    assert!(err.is_lock_failure(LockFailure::Timeout));
    deleter.abort().unwrap();

    inserter.commit().unwrap();
    assert!(test_db.store.contains(&group(1)));
    assert!(test_db.store.contains(&article(9)));

    let mut deleter = test_db.begin().unwrap();
    assert!(matches!(
        deleter.delete_persistent(&group(1)),
        Err(CoreError::ReferentialIntegrityViolation { .. })
    ));
}

#[test]
fn contended_counters_stay_consistent() {
    let test_db = TestDatabase::with_config(Config::default().lock_timeout(Duration::from_millis(500)));
    let config = StressConfig {
        operations: 25,
        threads: 6,
        groups: 3,
        max_attempts: 200,
        ..Default::default()
    };
    seed_counters(&test_db, &config).unwrap();

    let result = stress_counter_increments(&test_db, &config);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.successful_ops, 150);
    assert_eq!(counter_total(&test_db, &config).unwrap(), 150);
}
