//! Embedded local document store and the leader lease primitive.
//!
//! The store is the only shared mutable resource in the system: every write
//! is a single-document upsert serialized internally, so callers never need
//! external locking.

#![forbid(unsafe_code)]

pub mod lease;
pub mod store;

pub use lease::{LeaderLease, LeaseError, LeaseMeta};
pub use store::{ChangeEvent, ChangeOrigin, LocalStore, StoreError};
