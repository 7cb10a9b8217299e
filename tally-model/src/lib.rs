//! Entity model for Tally.
//!
//! Defines the types every other subsystem depends on:
//! - [`Entity`] — the generic data container (id, kind, JSON payload, timestamps)
//! - [`Kind`] — the closed enumeration of entity kinds
//! - [`Visibility`] — the intrinsic per-donor redaction attribute
//! - [`Registry`] / [`KindDescriptor`] — the single source of truth for which
//!   fields may be returned, which relations may be followed, and which
//!   annotations may be computed per kind
//!
//! The registry is a security boundary: the engine never emits a field or
//! follows a relation that a descriptor does not declare.

mod entity;
mod kind;
mod registry;
mod visibility;

pub use entity::Entity;
pub use kind::Kind;
pub use registry::{
    AggFunc, Aggregate, Annotation, Coerce, KindDescriptor, Registry, RelatedInclude,
    RelationDescriptor,
};
pub use visibility::Visibility;
