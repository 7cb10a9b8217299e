//! Generic entity engine: search, mutation, and resequencing over the kinds
//! a [`Registry`] declares.
//!
//! The engine is transport-agnostic. A caller resolves a [`Principal`],
//! collects the request parameters as key-value pairs, and invokes one of the
//! [`Engine`] operations; everything kind-specific lives in registry data,
//! and the collaborator seams ([`FilterBuilder`], [`WritePolicy`]) are
//! injectable.

mod filter;
mod mutation;
mod params;
mod perms;
mod privacy;
mod query;
mod reorder;
mod serialize;

pub use filter::{FieldFilterBuilder, FilterBuilder, scalar_value};
pub use mutation::DeleteConfirmation;
pub use perms::{Capability, Principal, RegistryWritePolicy, WritePolicy};
pub use privacy::{RedactionFlags, redact};
pub use query::EngineConfig;
pub use serialize::{AnnotationValues, Record, Serializer, display};

use serde::Serialize;
use std::sync::Arc;
use tally_model::Registry;
use tally_store::EntityStore;
use tally_types::{ApiError, ApiResult};

/// Identity echo for an authenticated caller.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superuser: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// The engine facade: one instance per registry and store.
pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<EntityStore>,
    filters: Box<dyn FilterBuilder + Send + Sync>,
    policy: Box<dyn WritePolicy + Send + Sync>,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(registry: Registry, store: EntityStore) -> Self {
        Self {
            registry: Arc::new(registry),
            store: Arc::new(store),
            filters: Box::new(FieldFilterBuilder),
            policy: Box::new(RegistryWritePolicy),
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Swaps in a custom filter collaborator.
    #[must_use]
    pub fn with_filter_builder(mut self, filters: Box<dyn FilterBuilder + Send + Sync>) -> Self {
        self.filters = filters;
        self
    }

    /// Swaps in a custom write-authorization collaborator.
    #[must_use]
    pub fn with_write_policy(mut self, policy: Box<dyn WritePolicy + Send + Sync>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Bounded, filtered, redacted page of records.
    pub fn search(
        &self,
        principal: &Principal,
        params: Vec<(String, String)>,
    ) -> ApiResult<Vec<Record>> {
        query::run_search(
            &self.registry,
            &self.store,
            self.filters.as_ref(),
            &self.config,
            principal,
            params,
        )
    }

    /// Creates one entity and echoes it back serialized, without redaction.
    pub fn add(&self, principal: &Principal, params: Vec<(String, String)>) -> ApiResult<Record> {
        mutation::add(
            &self.registry,
            &self.store,
            self.policy.as_ref(),
            principal,
            params,
        )
    }

    /// Edits one entity and echoes it back serialized, without redaction.
    pub fn edit(&self, principal: &Principal, params: Vec<(String, String)>) -> ApiResult<Record> {
        mutation::edit(
            &self.registry,
            &self.store,
            self.policy.as_ref(),
            principal,
            params,
        )
    }

    pub fn delete(
        &self,
        principal: &Principal,
        params: Vec<(String, String)>,
    ) -> ApiResult<DeleteConfirmation> {
        mutation::delete(
            &self.registry,
            &self.store,
            self.policy.as_ref(),
            principal,
            params,
        )
    }

    /// Moves an interstitial to a new (slot, rank) position and returns every
    /// entity the resequencing touched, in final order.
    pub fn reorder(
        &self,
        principal: &Principal,
        params: Vec<(String, String)>,
    ) -> ApiResult<Vec<Record>> {
        reorder::reorder(&self.registry, &self.store, principal, params)
    }

    /// Who the caller is; anonymous callers are rejected.
    pub fn me(&self, principal: &Principal) -> ApiResult<MeResponse> {
        if principal.is_anonymous() {
            return Err(ApiError::denied());
        }
        Ok(MeResponse {
            username: principal.name().to_string(),
            superuser: principal.is_superuser().then_some(true),
            permissions: principal.permissions(),
        })
    }
}
