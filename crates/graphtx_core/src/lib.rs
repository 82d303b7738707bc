//! # graphtx Core
//!
//! Transactional object-state engine for graphtx.
//!
//! This crate provides:
//! - A lock manager with shared and exclusive per-identity locks
//! - Per-transaction identity maps of managed objects
//! - Write-behind enlistment, flushed in foreign-key order
//! - Referential integrity cascades for deletes and inserts
//! - Named bindings with global uniqueness
//! - Query execution resolved through the identity map
//!
//! Persistence itself is delegated to a [`graphtx_store::Store`].
//!
//! ## Example
//!
//! ```rust
//! use graphtx_core::{Database, KindDescriptor, ReferenceDescriptor, Schema};
//! use graphtx_store::{fields, Identity, Value};
//!
//! let schema = Schema::new()
//!     .with_kind(KindDescriptor::new("ProductGroup", ["id"])
//!         .with_reference(ReferenceDescriptor::many("articles", "Article")))
//!     .with_kind(KindDescriptor::new("Article", ["id"])
//!         .with_reference(ReferenceDescriptor::one("product_group", "ProductGroup").required()));
//! let db = Database::open_in_memory(schema)?;
//!
//! let tools = Identity::of("ProductGroup", 1);
//! let saw = Identity::of("Article", 10);
//! db.transaction(|tx| {
//!     tx.make_persistent(&tools, fields([("id", Value::from(1))]))?;
//!     tx.make_persistent(&saw, fields([
//!         ("id", Value::from(10)),
//!         ("product_group", Value::from(&tools)),
//!     ]))?;
//!     tx.add_reference(&tools, "articles", &saw)
//! })?;
//!
//! // The group cannot go while an article requires it.
//! let mut tx = db.begin()?;
//! assert!(tx.delete_persistent(&tools).is_err());
//! tx.delete_persistent(&saw)?;
//! tx.delete_persistent(&tools)?;
//! tx.commit()?;
//! # Ok::<(), graphtx_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod cascade;
mod config;
mod database;
mod enlistment;
mod error;
mod flush;
mod lock;
mod metadata;
mod object;
mod query;
mod transaction;
mod types;

pub use binding::{binding_identity, BindingChange, BindingTable, NamedBindingRegistry, BINDING_KIND};
pub use cascade::{BrokenReference, Cascader, DeletePlan, ObjectGraph};
pub use config::{Config, LockReleasePolicy, SingleRowRange};
pub use database::Database;
pub use enlistment::{Enlistment, EnlistmentRegistry};
pub use error::{CoreError, CoreResult, LockFailure};
pub use flush::{FlushReport, UndoLog, WriteBehind};
pub use lock::{InterruptHandle, LockManager, LockWait};
pub use metadata::{Cardinality, KindDescriptor, MetadataProvider, ReferenceDescriptor, Schema};
pub use object::{IdentityMap, Lazy, ManagedObject, ObjectRef};
pub use query::{Query, QueryResults, QueryTranslator, ResultItem, ResultIter};
pub use transaction::{Transaction, TransactionState};
pub use types::{LockMode, ObjectState, Operation, TransactionId};
