//! Per-identity READ/WRITE locking.
//!
//! The lock manager is shared by every transaction of a database. It grants
//! shared and exclusive locks per [`Identity`](graphtx_store::Identity),
//! queues blocked requesters first-come first-served and bounds every wait
//! by a deadline.

mod manager;

pub use manager::{InterruptHandle, LockManager, LockWait};
