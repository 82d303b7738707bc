//! Query execution over the store, resolved through the identity map.

use crate::config::SingleRowRange;
use crate::error::{CoreError, CoreResult};
use crate::object::{Lazy, ObjectRef};
use crate::transaction::Transaction;
use graphtx_store::{Identity, Predicate, Row, RowRange, Value};
use tracing::debug;

/// Turns a query string and its bound parameters into a [`Query`].
pub trait QueryTranslator: Send + Sync {
    /// Translates `query` with positional `params`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryInvalid`] for malformed queries.
    fn translate(&self, query: &str, params: &[Value]) -> CoreResult<Query>;
}

/// A translated query: what to select, how to shape it, which rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Kind whose rows are selected.
    pub kind: String,
    /// Row filter.
    pub predicate: Predicate,
    /// Columns to return instead of managed objects.
    pub projection: Option<Vec<String>>,
    /// Row window.
    pub range: RowRange,
}

impl Query {
    /// Selects every object of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            predicate: Predicate::True,
            projection: None,
            range: RowRange::all(),
        }
    }

    /// Adds a filter, combined with any existing one.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = self.predicate.and(predicate);
        self
    }

    /// Returns plain values of the listed fields instead of objects.
    #[must_use]
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts results to the zero-based inclusive window `start..=end`.
    #[must_use]
    pub fn range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.range = RowRange::new(start, end);
        self
    }

    /// Checks the row window.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryInvalid`] if `start > end`, or if
    /// `start == end` and single-row windows are rejected.
    pub fn validate(&self, single_row: SingleRowRange) -> CoreResult<()> {
        if let (Some(start), Some(end)) = (self.range.start, self.range.end) {
            if start > end {
                return Err(CoreError::query_invalid(format!(
                    "range start {start} is after range end {end}"
                )));
            }
            if start == end && single_row == SingleRowRange::Reject {
                return Err(CoreError::query_invalid(format!(
                    "single-row range {start}..={end} is not accepted"
                )));
            }
        }
        Ok(())
    }
}

/// One query result.
#[derive(Debug, Clone)]
pub enum ResultItem {
    /// A managed object from the identity map.
    Object(ObjectRef),
    /// An object not loaded yet.
    Proxy(Lazy),
    /// A single projected column.
    Scalar(Value),
    /// Several projected columns.
    Tuple(Vec<Value>),
}

impl ResultItem {
    /// Returns the managed object, if this result is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ResultItem::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the identity of an object or proxy result.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        match self {
            ResultItem::Object(obj) => Some(obj.identity()),
            ResultItem::Proxy(lazy) => Some(lazy.identity()),
            ResultItem::Scalar(_) | ResultItem::Tuple(_) => None,
        }
    }
}

#[derive(Debug)]
enum Source {
    /// Rows fetched once and windowed locally.
    Buffered(Vec<Row>),
    /// The store applies the window; every pass re-queries.
    Scrolling,
}

/// A restartable result sequence.
///
/// Each call to [`iter`](Self::iter) walks the results from the start. With
/// a scrolling store every walk re-executes the query; otherwise the rows are
/// read once when the query runs and later walks replay the buffer.
pub struct QueryResults<'t> {
    tx: &'t mut Transaction,
    query: Query,
    source: Source,
}

impl<'t> QueryResults<'t> {
    pub(crate) fn open(tx: &'t mut Transaction, query: Query) -> CoreResult<Self> {
        tx.ensure_active()?;
        query.validate(tx.config().single_row_range)?;

        let store = tx.store();
        let source = if store.supports_scrolling() {
            Source::Scrolling
        } else {
            let rows = store.query(&query.kind, &query.predicate, RowRange::all())?;
            Source::Buffered(query.range.apply(rows))
        };
        debug!(
            txid = %tx.id(),
            kind = %query.kind,
            scrolling = matches!(source, Source::Scrolling),
            "query opened"
        );
        Ok(Self { tx, query, source })
    }

    /// Returns the executed query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns true if results are replayed from a local buffer.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Buffered(_))
    }

    /// Starts a pass over the results.
    ///
    /// # Errors
    ///
    /// Fails if a scrolling store rejects the query.
    pub fn iter(&mut self) -> CoreResult<ResultIter<'_>> {
        let rows = match &self.source {
            Source::Buffered(rows) => rows.clone(),
            Source::Scrolling => self.tx.store().query(
                &self.query.kind,
                &self.query.predicate,
                self.query.range,
            )?,
        };
        Ok(ResultIter {
            tx: &mut *self.tx,
            projection: self.query.projection.as_deref(),
            rows: rows.into_iter(),
        })
    }

    /// Collects one full pass.
    ///
    /// # Errors
    ///
    /// Returns the first error met while materializing.
    pub fn to_vec(&mut self) -> CoreResult<Vec<ResultItem>> {
        self.iter()?.collect()
    }

    /// Collects the managed objects of one full pass.
    ///
    /// # Errors
    ///
    /// Returns the first error met while materializing, or
    /// [`CoreError::InvalidOperation`] if a result is not an object.
    pub fn objects(&mut self) -> CoreResult<Vec<ObjectRef>> {
        self.iter()?
            .map(|item| match item? {
                ResultItem::Object(obj) => Ok(obj),
                other => Err(CoreError::invalid_operation(format!(
                    "query result is not a managed object: {other:?}"
                ))),
            })
            .collect()
    }
}

/// One pass over query results, materializing rows as it goes.
pub struct ResultIter<'a> {
    tx: &'a mut Transaction,
    projection: Option<&'a [String]>,
    rows: std::vec::IntoIter<Row>,
}

impl Iterator for ResultIter<'_> {
    type Item = CoreResult<ResultItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.rows.next()?;
            match self.tx.materialize(row, self.projection) {
                Ok(Some(item)) => return Some(Ok(item)),
                // Deleted in this transaction.
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::Database;
    use crate::transaction::testing::{catalog_schema, group};
    use graphtx_store::{fields, InMemoryStore, Store};
    use std::sync::Arc;

    fn seeded(store: InMemoryStore, config: Config) -> (Database, Arc<InMemoryStore>) {
        let store = Arc::new(store);
        for n in 1..=5_i64 {
            store
                .insert(
                    &group(n),
                    &fields([("id", Value::from(n)), ("rank", Value::from(n * 10))]),
                )
                .unwrap();
        }
        let db = Database::open(store.clone(), Arc::new(catalog_schema()), config).unwrap();
        (db, store)
    }

    fn identities(items: &[ResultItem]) -> Vec<Identity> {
        items.iter().filter_map(ResultItem::identity).collect()
    }

    struct KindOnly;

    impl QueryTranslator for KindOnly {
        fn translate(&self, query: &str, _params: &[Value]) -> CoreResult<Query> {
            match query.strip_prefix("all ") {
                Some(kind) => Ok(Query::new(kind)),
                None => Err(CoreError::query_invalid(format!("cannot parse {query:?}"))),
            }
        }
    }

    #[test]
    fn reversed_range_is_invalid() {
        let q = Query::new("Article").range(Some(10), Some(5));
        assert!(matches!(
            q.validate(SingleRowRange::Window),
            Err(CoreError::QueryInvalid { .. })
        ));
    }

    #[test]
    fn single_row_range_follows_policy() {
        let q = Query::new("Article").range(Some(3), Some(3));
        q.validate(SingleRowRange::Window).unwrap();
        assert!(q.validate(SingleRowRange::Reject).is_err());
    }

    #[test]
    fn open_ended_ranges_are_valid() {
        Query::new("Article").range(Some(10), None).validate(SingleRowRange::Reject).unwrap();
        Query::new("Article").range(None, Some(0)).validate(SingleRowRange::Reject).unwrap();
    }

    #[test]
    fn filters_are_conjoined() {
        let q = Query::new("Article")
            .filter(Predicate::eq("price", 5))
            .filter(Predicate::eq("name", "saw"));
        assert_eq!(
            q.predicate,
            Predicate::And(vec![Predicate::eq("price", 5), Predicate::eq("name", "saw")])
        );
    }

    #[test]
    fn results_come_from_the_identity_map() {
        let (db, _) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        let second = tx.fetch(&group(2)).unwrap();

        let objects = tx.execute(Query::new("ProductGroup")).unwrap().objects().unwrap();
        assert_eq!(objects.len(), 5);
        assert!(objects[1].ptr_eq(&second));
        assert!(objects[3].ptr_eq(&tx.fetch(&group(4)).unwrap()));
    }

    #[test]
    fn invalid_range_never_reaches_the_store() {
        let (db, store) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        let calls = store.query_calls();
        let err = tx
            .execute(Query::new("ProductGroup").range(Some(10), Some(5)))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::QueryInvalid { .. }));
        assert_eq!(store.query_calls(), calls);
    }

    #[test]
    fn buffered_results_are_windowed_and_replayed() {
        let (db, store) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        let mut results = tx
            .execute(Query::new("ProductGroup").range(Some(1), Some(2)))
            .unwrap();
        assert!(results.is_buffered());
        let calls = store.query_calls();

        let first = results.to_vec().unwrap();
        let second = results.to_vec().unwrap();
        assert_eq!(identities(&first), vec![group(2), group(3)]);
        assert_eq!(identities(&first), identities(&second));
        assert_eq!(store.query_calls(), calls);
    }

    #[test]
    fn scrolling_results_requery_each_pass() {
        let (db, store) = seeded(InMemoryStore::with_scrolling(), Config::default());
        let mut tx = db.begin().unwrap();
        let mut results = tx
            .execute(Query::new("ProductGroup").range(Some(3), None))
            .unwrap();
        assert!(!results.is_buffered());
        let calls = store.query_calls();

        assert_eq!(identities(&results.to_vec().unwrap()), vec![group(4), group(5)]);
        assert_eq!(identities(&results.to_vec().unwrap()), vec![group(4), group(5)]);
        assert_eq!(store.query_calls(), calls + 2);
    }

    #[test]
    fn single_row_window_policy() {
        let (db, _) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        let items = tx
            .execute(Query::new("ProductGroup").range(Some(0), Some(0)))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(identities(&items), vec![group(1)]);
        drop(tx);

        let (db, _) = seeded(
            InMemoryStore::new(),
            Config::default().single_row_range(SingleRowRange::Reject),
        );
        let mut tx = db.begin().unwrap();
        assert!(tx
            .execute(Query::new("ProductGroup").range(Some(0), Some(0)))
            .is_err());
    }

    #[test]
    fn projections_yield_plain_values() {
        let (db, _) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();

        let scalars = tx
            .execute(
                Query::new("ProductGroup")
                    .filter(Predicate::eq("id", 3))
                    .project(["rank"]),
            )
            .unwrap()
            .to_vec()
            .unwrap();
        assert!(matches!(scalars.as_slice(), [ResultItem::Scalar(Value::Integer(30))]));

        let tuples = tx
            .execute(
                Query::new("ProductGroup")
                    .filter(Predicate::eq("id", 3))
                    .project(["id", "missing"]),
            )
            .unwrap()
            .to_vec()
            .unwrap();
        assert!(matches!(
            tuples.as_slice(),
            [ResultItem::Tuple(values)] if *values == vec![Value::Integer(3), Value::Null]
        ));
        assert_eq!(tx.cached_count(), 0);
    }

    #[test]
    fn deleted_objects_are_skipped() {
        let (db, _) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        tx.delete_persistent(&group(2)).unwrap();
        let items = tx.execute(Query::new("ProductGroup")).unwrap().to_vec().unwrap();
        assert_eq!(identities(&items), vec![group(1), group(3), group(4), group(5)]);
    }

    #[test]
    fn proxy_mode_defers_loading() {
        let (db, _) = seeded(
            InMemoryStore::new(),
            Config::default().proxy_query_results(true),
        );
        let mut tx = db.begin().unwrap();
        let cached = tx.fetch(&group(1)).unwrap();

        let items = tx.execute(Query::new("ProductGroup")).unwrap().to_vec().unwrap();
        assert!(items[0].as_object().is_some_and(|obj| obj.ptr_eq(&cached)));
        let ResultItem::Proxy(mut lazy) = items[1].clone() else {
            panic!("expected a proxy, got {:?}", items[1]);
        };
        assert!(!lazy.is_resolved());
        assert_eq!(tx.cached_count(), 1);

        let obj = lazy.resolve(&mut tx).unwrap().unwrap();
        assert_eq!(obj.identity(), group(2));
        assert_eq!(tx.cached_count(), 2);
    }

    #[test]
    fn query_strings_go_through_the_translator() {
        let (db, _) = seeded(InMemoryStore::new(), Config::default());
        let mut tx = db.begin().unwrap();
        assert!(matches!(
            tx.query("all ProductGroup", &[]).err().unwrap(),
            CoreError::InvalidOperation { .. }
        ));

        db.set_translator(Arc::new(KindOnly));
        assert_eq!(tx.query("all ProductGroup", &[]).unwrap().to_vec().unwrap().len(), 5);
        assert!(matches!(
            tx.query("everything", &[]).err().unwrap(),
            CoreError::QueryInvalid { .. }
        ));
    }
}
