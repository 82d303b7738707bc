//! Database facade and shared state.

use crate::binding::BindingTable;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockManager;
use crate::metadata::MetadataProvider;
use crate::query::QueryTranslator;
use crate::transaction::Transaction;
use crate::types::TransactionId;
use graphtx_store::{Identity, InMemoryStore, Store};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// State shared by a database and all of its transactions.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) metadata: Arc<dyn MetadataProvider>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) bindings: BindingTable,
    pub(crate) config: Config,
    pub(crate) translator: RwLock<Option<Arc<dyn QueryTranslator>>>,
    next_txid: AtomicU64,
    is_open: AtomicBool,
}

impl Shared {
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

/// The main database handle.
///
/// `Database` ties a [`Store`], a [`MetadataProvider`] and a [`Config`]
/// together and hands out [`Transaction`]s. It provides:
/// - The lock manager shared by all transactions
/// - The committed named bindings
/// - An optional query translator
///
/// Handles are cheap to clone and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use graphtx_core::{Database, KindDescriptor, Schema};
/// use graphtx_store::{fields, Identity, Value};
///
/// let schema = Schema::new().with_kind(KindDescriptor::new("ProductGroup", ["id"]));
/// let db = Database::open_in_memory(schema)?;
///
/// db.transaction(|tx| {
///     tx.create("ProductGroup", fields([("id", Value::from(1)), ("name", Value::from("tools"))]))?;
///     Ok(())
/// })?;
///
/// let name = db.transaction(|tx| {
///     Ok(tx.fetch(&Identity::of("ProductGroup", 1))?.get("name"))
/// })?;
/// assert_eq!(name, Some(Value::from("tools")));
/// # Ok::<(), graphtx_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Opens a database over `store`.
    ///
    /// Loads the committed named bindings from the store.
    ///
    /// # Errors
    ///
    /// Fails if the bindings cannot be read.
    pub fn open(
        store: Arc<dyn Store>,
        metadata: Arc<dyn MetadataProvider>,
        config: Config,
    ) -> CoreResult<Self> {
        let bindings = BindingTable::load(store.as_ref())?;
        debug!(
            kinds = metadata.descriptors().len(),
            bindings = bindings.len(),
            "database opened"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                metadata,
                locks: Arc::new(LockManager::new()),
                bindings,
                config,
                translator: RwLock::new(None),
                next_txid: AtomicU64::new(1),
                is_open: AtomicBool::new(true),
            }),
        })
    }

    /// Opens a database over a fresh [`InMemoryStore`] with default
    /// configuration.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`open`](Self::open).
    pub fn open_in_memory(metadata: impl MetadataProvider + 'static) -> CoreResult<Self> {
        Self::open(
            Arc::new(InMemoryStore::new()),
            Arc::new(metadata),
            Config::default(),
        )
    }

    /// Installs the translator used by [`Transaction::query`].
    pub fn set_translator(&self, translator: Arc<dyn QueryTranslator>) {
        *self.shared.translator.write() = Some(translator);
    }

    /// Creates a transaction handle in the `NotStarted` state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`close`](Self::close).
    pub fn new_transaction(&self) -> CoreResult<Transaction> {
        self.shared.ensure_open()?;
        let id = TransactionId::new(self.shared.next_txid.fetch_add(1, Ordering::Relaxed));
        Ok(Transaction::new(id, Arc::clone(&self.shared)))
    }

    /// Creates and begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`close`](Self::close).
    pub fn begin(&self) -> CoreResult<Transaction> {
        let mut tx = self.new_transaction()?;
        tx.begin()?;
        Ok(tx)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    ///
    /// # Errors
    ///
    /// Returns the function's error, or the commit error.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if tx.state().is_open() {
                    tx.abort()?;
                }
                Err(err)
            }
        }
    }

    /// Returns the committed target of a named binding.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Identity> {
        self.shared.bindings.get(name)
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    /// Returns the metadata provider.
    #[must_use]
    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.shared.metadata
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.shared.locks
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Closes the database.
    ///
    /// New transactions and `begin` fail afterwards. Transactions already
    /// active may still commit or abort.
    pub fn close(&self) {
        if self.shared.is_open.swap(false, Ordering::AcqRel) {
            debug!("database closed");
        }
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("bindings", &self.shared.bindings.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
