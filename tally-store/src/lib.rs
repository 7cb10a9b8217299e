//! SQLite storage layer for Tally.
//!
//! Entities are stored as typed JSON rows keyed by an integer primary key.
//! The store exposes exactly the operations the engine's contract requires:
//! point lookup, ordered kind scans, filtered pagination, reverse-relation
//! fetches for aggregation, natural-key lookup, and a scoped transaction
//! abstraction that every mutation path runs inside.
//!
//! Predicate filters are opaque to the store; the engine's filter-builder
//! collaborator constructs them. Ordering is driven by the caller's field
//! list with the primary key as the deterministic tiebreak.

mod entity_store;
mod error;

pub use entity_store::{EntityStore, Predicate, StoreTxn, now_millis};
pub use error::{StoreError, StoreResult};
