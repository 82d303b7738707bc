//! # graphtx Store
//!
//! Store capability and data model for graphtx.
//!
//! This crate is the lowest layer of graphtx. It defines the values,
//! identities and predicates that flow between the transactional core and
//! whatever tabular store sits underneath, plus the [`Store`] trait that
//! store adapters implement.
//!
//! ## Design Principles
//!
//! - Stores apply single-row writes in the order given and know nothing of
//!   transactions, locks or object graphs
//! - References between objects are plain data ([`Value::Ref`]), never
//!   pointers
//! - Must be `Send + Sync`; one store is shared by every transaction
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral data
//!
//! ## Example
//!
//! ```rust
//! use graphtx_store::{fields, Identity, InMemoryStore, Predicate, RowRange, Store, Value};
//!
//! let store = InMemoryStore::new();
//! let id = Identity::of("Article", 1);
//! store.insert(&id, &fields([("name", Value::from("hammer"))])).unwrap();
//!
//! let rows = store
//!     .query("Article", &Predicate::eq("name", "hammer"), RowRange::all())
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod predicate;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, WriteOp};
pub use predicate::{CompareOp, Predicate, RowRange};
pub use store::Store;
pub use value::{fields, Fields, Identity, Row, Value};
