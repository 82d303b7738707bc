//! # graphtx testkit
//!
//! Test utilities for graphtx.
//!
//! This crate provides:
//! - The ProductGroup/Article catalog schema and JSON fixture rows
//! - Test database helpers and tracing setup
//! - A small query language translator
//! - A store wrapper that injects write failures
//! - Property-based test generators using proptest
//! - Stress helpers with lock-conflict retry
//!
//! ## Usage
//!
//! ```rust
//! use graphtx_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     db.transaction(|tx| tx.make_persistent(&group(1), group_fields(1, "tools")).map(|_| ()))
//!         .unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod translator;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::translator::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use translator::*;
