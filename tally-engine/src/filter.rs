//! The filter-builder seam.
//!
//! Predicate construction is an external collaborator per the engine's
//! contract: the engine hands over the unconsumed parameters and gets back an
//! opaque row filter. [`FieldFilterBuilder`] is the stock implementation —
//! exact-match clauses over allowlisted fields, ANDed together.

use serde_json::Value;
use std::collections::BTreeMap;
use tally_model::KindDescriptor;
use tally_types::{ApiError, ApiResult, EntityId};
use tally_store::Predicate;

use crate::Principal;

pub trait FilterBuilder {
    /// Builds a row filter from the unconsumed request parameters, or `None`
    /// when no filtering was requested.
    fn build(
        &self,
        desc: &KindDescriptor,
        params: &BTreeMap<String, String>,
        principal: &Principal,
    ) -> ApiResult<Option<Box<Predicate>>>;
}

/// Exact-match filtering on `id` and allowlisted self fields.
pub struct FieldFilterBuilder;

impl FilterBuilder for FieldFilterBuilder {
    fn build(
        &self,
        desc: &KindDescriptor,
        params: &BTreeMap<String, String>,
        _principal: &Principal,
    ) -> ApiResult<Option<Box<Predicate>>> {
        if params.is_empty() {
            return Ok(None);
        }
        let mut id_clause: Option<EntityId> = None;
        let mut clauses: Vec<(String, Value)> = Vec::new();
        for (key, value) in params {
            if key == "id" {
                let id = value
                    .parse::<EntityId>()
                    .map_err(|_| ApiError::Malformed(format!("invalid id: {value}")))?;
                id_clause = Some(id);
                continue;
            }
            if !desc.has_field(key) {
                return Err(ApiError::Malformed(format!(
                    "unrecognized search field: {key}"
                )));
            }
            clauses.push((key.clone(), scalar_value(value)));
        }
        Ok(Some(Box::new(move |entity| {
            if id_clause.is_some_and(|id| entity.id != id) {
                return false;
            }
            clauses.iter().all(|(field, expected)| {
                entity.field(field).is_some_and(|v| values_eq(v, expected))
            })
        })))
    }
}

/// Interprets a raw parameter token as a JSON scalar: booleans and numbers
/// when they parse, a string otherwise.
#[must_use]
pub fn scalar_value(token: &str) -> Value {
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = token.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = token.parse::<f64>() {
        if n.is_finite() {
            return Value::from(n);
        }
    }
    Value::String(token.to_string())
}

/// Equality with numeric widening, so `amount=5` matches a stored `5.0`.
fn values_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
