//! Core type definitions for Tally.
//!
//! This crate defines the fundamental, kind-agnostic types used throughout
//! the engine:
//! - Entity identifiers (integer primary keys, newtyped)
//! - The API error taxonomy shared by the store, engine, and HTTP layer
//!
//! All domain-specific types (kinds, descriptors, allowlists) belong in
//! `tally-model`, not here.

mod error;
mod ids;

pub use error::{ApiError, ApiResult};
pub use ids::EntityId;
