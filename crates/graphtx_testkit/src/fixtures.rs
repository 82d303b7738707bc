//! Test fixtures and database helpers.
//!
//! The fixtures model a small product catalog: product groups holding a
//! collection of articles, each article pointing back at its group through
//! a required reference.

use graphtx_core::{
    Config, Database, KindDescriptor, ReferenceDescriptor, Schema,
};
use graphtx_store::{fields, Fields, Identity, InMemoryStore, Row, Value};
use serde::Deserialize;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Kind name of product groups.
pub const PRODUCT_GROUP: &str = "ProductGroup";

/// Kind name of articles.
pub const ARTICLE: &str = "Article";

/// A small catalog in the JSON fixture format.
pub const CATALOG_JSON: &str = r#"{
    "groups": [
        { "id": 1, "name": "tools" },
        { "id": 2, "name": "garden" }
    ],
    "articles": [
        { "id": 10, "name": "saw", "price": 25, "group": 1 },
        { "id": 11, "name": "hammer", "price": 12, "group": 1 },
        { "id": 20, "name": "rake", "price": 18, "group": 2, "successor": 21 },
        { "id": 21, "name": "rake pro", "price": 30, "group": 2 }
    ]
}"#;

/// The catalog schema.
///
/// - `ProductGroup.articles`: collection of articles, persisted by
///   reachability, broken when an article is deleted.
/// - `Article.product_group`: required 1:1 reference.
/// - `Article.successor`: optional 1:1 reference.
#[must_use]
pub fn catalog_schema() -> Schema {
    Schema::new()
        .with_kind(
            KindDescriptor::new(PRODUCT_GROUP, ["id"]).with_reference(
                ReferenceDescriptor::many("articles", ARTICLE).cascade_insert(true),
            ),
        )
        .with_kind(
            KindDescriptor::new(ARTICLE, ["id"])
                .with_reference(ReferenceDescriptor::one("product_group", PRODUCT_GROUP).required())
                .with_reference(ReferenceDescriptor::one("successor", ARTICLE)),
        )
}

/// Identity of product group `n`.
#[must_use]
pub fn group(n: i64) -> Identity {
    Identity::of(PRODUCT_GROUP, n)
}

/// Identity of article `n`.
#[must_use]
pub fn article(n: i64) -> Identity {
    Identity::of(ARTICLE, n)
}

/// Fields of a product group without articles.
#[must_use]
pub fn group_fields(n: i64, name: &str) -> Fields {
    fields([("id", Value::from(n)), ("name", Value::from(name))])
}

/// Fields of an article belonging to group `g`.
#[must_use]
pub fn article_fields(n: i64, name: &str, g: i64) -> Fields {
    fields([
        ("id", Value::from(n)),
        ("name", Value::from(name)),
        ("product_group", Value::from(group(g))),
    ])
}

#[derive(Debug, Deserialize)]
struct GroupRecord {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ArticleRecord {
    id: i64,
    name: String,
    price: i64,
    group: i64,
    #[serde(default)]
    successor: Option<i64>,
}

/// Catalog rows loaded from JSON.
///
/// Group rows get their `articles` collection filled in from the articles
/// that point at them.
#[derive(Debug, Deserialize)]
pub struct Catalog {
    groups: Vec<GroupRecord>,
    articles: Vec<ArticleRecord>,
}

impl Catalog {
    /// Parses the JSON fixture format of [`CATALOG_JSON`].
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed input.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The built-in catalog.
    #[must_use]
    pub fn sample() -> Self {
        Self::from_json(CATALOG_JSON).expect("built-in catalog is valid JSON")
    }

    /// Converts the records into store rows.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        let mut rows = Vec::with_capacity(self.groups.len() + self.articles.len());
        for g in &self.groups {
            let members: Vec<Value> = self
                .articles
                .iter()
                .filter(|a| a.group == g.id)
                .map(|a| Value::from(article(a.id)))
                .collect();
            let mut f = group_fields(g.id, &g.name);
            f.insert("articles".into(), Value::List(members));
            rows.push(Row::new(group(g.id), f));
        }
        for a in &self.articles {
            let mut f = article_fields(a.id, &a.name, a.group);
            f.insert("price".into(), Value::from(a.price));
            if let Some(next) = a.successor {
                f.insert("successor".into(), Value::from(article(next)));
            }
            rows.push(Row::new(article(a.id), f));
        }
        rows
    }

    /// Returns a store holding these rows.
    #[must_use]
    pub fn store(&self) -> InMemoryStore {
        InMemoryStore::with_rows(self.rows())
    }
}

/// A test database with direct access to its store.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The store behind the database.
    pub store: Arc<InMemoryStore>,
}

impl TestDatabase {
    /// Creates an empty database over the catalog schema.
    pub fn memory() -> Self {
        Self::with_store(InMemoryStore::new(), Config::default())
    }

    /// Creates an empty database with the given configuration.
    pub fn with_config(config: Config) -> Self {
        Self::with_store(InMemoryStore::new(), config)
    }

    /// Creates a database holding the sample catalog.
    pub fn seeded() -> Self {
        Self::with_store(Catalog::sample().store(), Config::default())
    }

    /// Opens a database over `store`.
    pub fn with_store(store: InMemoryStore, config: Config) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let db = Database::open(store.clone(), Arc::new(catalog_schema()), config)
            .expect("Failed to open database");
        Self { db, store }
    }

    /// Opens a second database over the same store, as after a restart.
    pub fn reopen(&self) -> Database {
        Database::open(
            self.store.clone(),
            Arc::new(catalog_schema()),
            self.db.config().clone(),
        )
        .expect("Failed to reopen database")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with an empty in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with the sample catalog loaded.
pub fn with_seeded_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &InMemoryStore) -> R,
{
    let test_db = TestDatabase::seeded();
    f(&test_db.db, &test_db.store)
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
