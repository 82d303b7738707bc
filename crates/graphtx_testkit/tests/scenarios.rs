//! End-to-end scenarios over the catalog schema.

use graphtx_core::{
    Config, CoreError, Database, LockMode, Operation, SingleRowRange, TransactionState,
    BINDING_KIND,
};
use graphtx_store::{InMemoryStore, Store, Value, WriteOp};
use graphtx_testkit::prelude::*;
use std::sync::Arc;

fn catalog_db(store: Arc<dyn Store>) -> Database {
    init_tracing();
    Database::open(store, Arc::new(catalog_schema()), Config::default()).unwrap()
}

#[test]
fn committed_inserts_hold_last_values() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| {
            tx.make_persistent(&group(1), group_fields(1, "first"))?;
            tx.set(&group(1), "name", "second")?;
            tx.set(&group(1), "rank", 7)?;
            assert_eq!(tx.operation(&group(1)), Some(Operation::Insert));
            Ok(())
        })
        .unwrap();

    let stored = test_db.store.get(&group(1)).unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("second")));
    assert_eq!(stored.get("rank"), Some(&Value::from(7)));

    let mut tx = test_db.reopen().begin().unwrap();
    assert_eq!(tx.fetch(&group(1)).unwrap().fields(), stored);
}

#[test]
fn product_group_and_article_lifecycle() {
    let test_db = TestDatabase::memory();

    // Transaction A builds the graph across two checkpoints.
    let mut a = test_db.begin().unwrap();
    a.make_persistent(&group(1), group_fields(1, "tools")).unwrap();
    a.checkpoint().unwrap();
    a.make_persistent(&article(1), article_fields(1, "saw", 1)).unwrap();
    a.add_reference(&group(1), "articles", &article(1)).unwrap();
    a.checkpoint().unwrap();
    a.commit().unwrap();
    assert_eq!(
        test_db.store.journal(),
        vec![
            WriteOp::Insert(group(1)),
            WriteOp::Insert(article(1)),
            WriteOp::Update(group(1)),
        ]
    );

    // Deleting the group first is refused and leaves the transaction usable.
    let mut b = test_db.begin().unwrap();
    let err = b.delete_persistent(&group(1)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::ReferentialIntegrityViolation { ref identity, ref referrer, .. }
            if *identity == group(1) && *referrer == article(1)
    ));
    assert_eq!(b.state(), TransactionState::Active);

    // Article first, then the group.
    b.delete_persistent(&article(1)).unwrap();
    b.delete_persistent(&group(1)).unwrap();
    test_db.store.clear_journal();
    b.commit().unwrap();

    assert_eq!(
        test_db.store.journal(),
        vec![WriteOp::Delete(article(1)), WriteOp::Delete(group(1))]
    );
    assert!(!test_db.store.contains(&group(1)));
    assert!(!test_db.store.contains(&article(1)));
}

#[test]
fn required_reference_blocks_delete_from_seeded_catalog() {
    with_seeded_db(|db, store| {
        let mut tx = db.begin().unwrap();
        assert!(matches!(
            tx.delete_persistent(&group(2)),
            Err(CoreError::ReferentialIntegrityViolation { .. })
        ));

        // The successor reference is optional: deleting rake pro breaks it.
        tx.delete_persistent(&article(21)).unwrap();
        assert_eq!(tx.operation(&article(20)), Some(Operation::Update));
        tx.commit().unwrap();

        let rake = store.get(&article(20)).unwrap().unwrap();
        assert_eq!(rake.get("successor"), Some(&Value::Null));
        let garden = store.get(&group(2)).unwrap().unwrap();
        assert_eq!(
            garden.get("articles"),
            Some(&Value::List(vec![Value::from(article(20))]))
        );
    });
}

#[test]
fn failed_read_during_delete_changes_nothing() {
    let faulty = Arc::new(FaultyStore::new(Arc::new(InMemoryStore::new())));
    let db = catalog_db(faulty.clone());
    db.transaction(|tx| {
        tx.make_persistent(&group(1), group_fields(1, "tools"))?;
        tx.make_persistent(&article(3), article_fields(3, "plane", 1))?;
        for n in [1, 2] {
            let mut fields = article_fields(n, "saw", 1);
            fields.insert("successor".into(), Value::from(article(3)));
            tx.make_persistent(&article(n), fields)?;
        }
        Ok(())
    })
    .unwrap();

    let mut tx = db.begin().unwrap();
    tx.fetch(&article(1)).unwrap();
    faulty.inject(Fault::Read(article(2)));
    assert!(matches!(tx.delete_persistent(&article(3)), Err(CoreError::Store(_))));

    assert_eq!(tx.enlisted_count(), 0);
    assert_eq!(
        tx.fetch(&article(1)).unwrap().get("successor"),
        Some(Value::from(article(3)))
    );
    assert!(tx.fetch(&article(3)).is_ok());
}

#[test]
fn second_bind_of_a_name_always_fails() {
    let test_db = TestDatabase::seeded();

    let mut tx = test_db.begin().unwrap();
    tx.bind(&group(1), "featured").unwrap();
    assert!(matches!(
        tx.bind(&group(2), "featured"),
        Err(CoreError::NameNotUnique { .. })
    ));
    tx.clear_cache().unwrap();
    assert!(matches!(
        tx.bind(&group(2), "featured"),
        Err(CoreError::NameNotUnique { .. })
    ));
    tx.commit().unwrap();

    let mut tx = test_db.begin().unwrap();
    tx.clear_cache().unwrap();
    assert!(matches!(
        tx.bind(&group(2), "featured"),
        Err(CoreError::NameNotUnique { .. })
    ));
    assert_eq!(tx.lookup("featured").unwrap(), group(1));
}

#[test]
fn unbind_of_unknown_name_fails() {
    let test_db = TestDatabase::seeded();
    let mut tx = test_db.begin().unwrap();
    assert!(matches!(tx.unbind("nobody"), Err(CoreError::NameNotFound { .. })));
    assert!(matches!(tx.lookup("nobody"), Err(CoreError::NameNotFound { .. })));

    tx.bind(&article(10), "saw").unwrap();
    tx.unbind("saw").unwrap();
    assert!(matches!(tx.unbind("saw"), Err(CoreError::NameNotFound { .. })));
    assert!(matches!(tx.lookup("saw"), Err(CoreError::NameNotFound { .. })));
}

#[test]
fn bindings_survive_reopen() {
    let test_db = TestDatabase::seeded();
    test_db.transaction(|tx| tx.bind(&group(2), "garden")).unwrap();

    let reopened = test_db.reopen();
    assert_eq!(reopened.lookup("garden"), Some(group(2)));
    let mut tx = reopened.begin().unwrap();
    assert_eq!(
        tx.lookup_object("garden").unwrap().get("name"),
        Some(Value::from("garden"))
    );
}

#[test]
fn reversed_range_fails_before_the_store_is_queried() {
    let test_db = TestDatabase::seeded();
    test_db.set_translator(Arc::new(SimpleTranslator));
    let mut tx = test_db.begin().unwrap();

    let calls = test_db.store.query_calls();
    let err = tx.query("from Article rows 10..5", &[]).err().unwrap();
    assert!(matches!(err, CoreError::QueryInvalid { .. }));
    assert_eq!(test_db.store.query_calls(), calls);
}

#[test]
fn translated_queries_filter_and_window() {
    let test_db = TestDatabase::seeded();
    test_db.set_translator(Arc::new(SimpleTranslator));
    let mut tx = test_db.begin().unwrap();

    let names: Vec<Value> = tx
        .query(
            "from Article where product_group refers ?1 and price > ?2 select name",
            &[Value::from(group(1)), Value::from(15)],
        )
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .filter_map(|item| match item {
            graphtx_core::ResultItem::Scalar(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec![Value::from("saw")]);

    let window = tx
        .query("from Article rows 1..2", &[])
        .unwrap()
        .objects()
        .unwrap();
    let ids: Vec<_> = window.iter().map(|o| o.identity()).collect();
    assert_eq!(ids, vec![article(11), article(20)]);
    assert!(window[0].ptr_eq(&tx.fetch(&article(11)).unwrap()));
}

#[test]
fn single_row_window_is_a_policy() {
    let window = TestDatabase::with_store(Catalog::sample().store(), Config::default());
    window.set_translator(Arc::new(SimpleTranslator));
    let mut tx = window.begin().unwrap();
    let rows = tx.query("from Article rows 2..2", &[]).unwrap().objects().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].identity(), article(20));

    let reject = TestDatabase::with_store(
        Catalog::sample().store(),
        Config::default().single_row_range(SingleRowRange::Reject),
    );
    reject.set_translator(Arc::new(SimpleTranslator));
    let mut tx = reject.begin().unwrap();
    assert!(matches!(
        tx.query("from Article rows 2..2", &[]).err().unwrap(),
        CoreError::QueryInvalid { .. }
    ));
}

#[test]
fn failed_flush_aborts_and_releases_locks() {
    let faulty = Arc::new(FaultyStore::new(Arc::new(InMemoryStore::new())));
    let db = catalog_db(faulty.clone());
    faulty.inject(Fault::Kind(ARTICLE.into()));

    let mut tx = db.begin().unwrap();
    tx.make_persistent(&group(1), group_fields(1, "tools")).unwrap();
    tx.make_persistent(&article(1), article_fields(1, "saw", 1)).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        CoreError::FlushFailure { ref identity, operation: Operation::Insert, .. }
            if *identity == article(1)
    ));
    assert_eq!(tx.state(), TransactionState::Aborted);
    assert!(db.lock_manager().holders(&article(1)).is_empty());
    assert!(db.lock_manager().holders(&group(1)).is_empty());
    assert_eq!(faulty.rejected(), 1);
    // The group insert that preceded the failure is reverted.
    assert!(faulty.get(&group(1)).unwrap().is_none());

    // The handle is reusable after begin().
    faulty.heal();
    tx.begin().unwrap();
    tx.make_persistent(&group(1), group_fields(1, "tools")).unwrap();
    tx.make_persistent(&article(2), article_fields(2, "hammer", 1)).unwrap();
    tx.commit().unwrap();
    assert!(faulty.get(&article(2)).unwrap().is_some());
}

#[test]
fn failed_binding_write_reverts_object_writes() {
    let faulty = Arc::new(FaultyStore::new(Arc::new(InMemoryStore::new())));
    let db = catalog_db(faulty.clone());
    faulty.inject(Fault::Kind(BINDING_KIND.into()));

    let mut tx = db.begin().unwrap();
    tx.make_persistent(&group(1), group_fields(1, "tools")).unwrap();
    tx.bind(&group(1), "tools").unwrap();
    assert!(matches!(tx.commit(), Err(CoreError::FlushFailure { .. })));

    assert!(faulty.get(&group(1)).unwrap().is_none());
    assert_eq!(db.lookup("tools"), None);
    assert_eq!(faulty.rejected(), 1);
}

#[test]
fn failed_checkpoint_aborts() {
    let faulty = Arc::new(FaultyStore::new(Arc::new(InMemoryStore::new())));
    let db = catalog_db(faulty.clone());
    faulty.inject(Fault::AfterWrites(0));

    let mut tx = db.begin().unwrap();
    tx.lock(&group(9), LockMode::Write).unwrap();
    tx.make_persistent(&group(1), group_fields(1, "tools")).unwrap();
    assert!(matches!(tx.checkpoint(), Err(CoreError::FlushFailure { .. })));
    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(db.lock_manager().lock_count(tx.id()), 0);
    assert!(matches!(
        tx.get(&group(1)),
        Err(CoreError::TransactionNotActive { .. })
    ));
}

#[test]
fn closed_database_refuses_transactions() {
    let test_db = TestDatabase::memory();
    test_db.close();
    assert!(matches!(test_db.begin(), Err(CoreError::DatabaseClosed)));
}
