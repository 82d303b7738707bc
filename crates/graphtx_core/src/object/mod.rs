//! Managed objects and the per-transaction identity map.

mod identity_map;
mod managed;

pub use identity_map::IdentityMap;
pub use managed::{Lazy, ManagedObject, ObjectRef};
