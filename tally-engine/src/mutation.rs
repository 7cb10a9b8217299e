//! The mutation executor.
//!
//! Create, edit, and delete all walk the same states: validate kind, check
//! write permission, check the field allowlist, coerce values, validate the
//! entity, persist, log. Every mutation runs inside one store transaction,
//! so any failure leaves no partial state. The human-readable change text is
//! a required side effect, emitted through the tracing layer as the audit
//! hook.

use crate::filter::scalar_value;
use crate::params::Params;
use crate::perms::{Capability, Principal, WritePolicy};
use crate::serialize::{Record, Serializer, display};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tally_model::{Kind, KindDescriptor, Registry, RelationDescriptor, Visibility};
use tally_store::{EntityStore, StoreTxn};
use tally_types::{ApiError, ApiResult, EntityId};
use tracing::info;

/// Response body for a successful delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteConfirmation {
    pub result: String,
}

pub(crate) fn add(
    registry: &Registry,
    store: &EntityStore,
    policy: &dyn WritePolicy,
    principal: &Principal,
    params: Vec<(String, String)>,
) -> ApiResult<Record> {
    let mut params = Params::new(params);
    let kind_key = params.single("type")?;
    let desc = registry.lookup(&kind_key)?;
    ensure_writable(desc)?;
    let mut fields = params.remaining()?;
    fields.remove("id");

    let entity = store.with_transaction::<_, ApiError>(|txn| {
        if !policy.can_add(principal, desc) {
            return Err(ApiError::PermissionDenied(
                "You do not have permission to add a model of the requested type".into(),
            ));
        }
        check_field_allowlist(policy, principal, desc, &fields, "on new objects")?;
        let mut data = Map::new();
        let mut changes = Vec::new();
        for (key, raw) in &fields {
            let value = parse_value(txn, registry, principal, desc, key, raw)?;
            changes.push(format!(
                "Set {key} to \"{}\".",
                display_value(txn, registry, desc, key, &value)
            ));
            data.insert(key.clone(), value);
        }
        validate_entity(desc, &mut data)?;
        check_unique_natural_key(txn, desc, &data, None)?;
        let mut entity = txn.insert(desc.kind, Value::Object(data))?;
        if desc.kind == Kind::Interstitial {
            // New items enter at the rank-0 sentinel and are immediately
            // resequenced into their slot.
            let slot = entity.get_i64("order").ok_or_else(|| {
                ApiError::ValidationFailed("interstitial requires an order slot".into())
            })?;
            let rank = entity.get_i64("suborder").filter(|r| *r > 0).unwrap_or(-1);
            entity.set_field("suborder", Value::from(0));
            crate::reorder::move_item(txn, entity.clone(), slot, rank)?;
            entity = txn
                .get(entity.id)?
                .ok_or_else(|| ApiError::Internal("inserted row vanished".into()))?;
        }
        if !changes.is_empty() {
            info!(
                kind = %desc.kind,
                id = %entity.id,
                principal = principal.name(),
                "{}",
                changes.join(" ")
            );
        }
        Ok(entity)
    })?;

    Serializer::new(registry, store).serialize_one(desc, &entity)
}

pub(crate) fn edit(
    registry: &Registry,
    store: &EntityStore,
    policy: &dyn WritePolicy,
    principal: &Principal,
    params: Vec<(String, String)>,
) -> ApiResult<Record> {
    let mut params = Params::new(params);
    let kind_key = params.single("type")?;
    let desc = registry.lookup(&kind_key)?;
    ensure_writable(desc)?;
    let id = parse_pk(&params.single("id")?)?;
    let mut fields = params.remaining()?;

    // Slot and rank are mutated only by the resequencer; pull them out of the
    // generic field loop so a plain edit can never leave a slot non-dense.
    let mut rank_request = None;
    if desc.kind == Kind::Interstitial {
        let slot = fields
            .remove("order")
            .map(|tok| {
                tok.parse::<i64>()
                    .map_err(|_| ApiError::Malformed("order must be an integer".into()))
            })
            .transpose()?;
        let rank = fields
            .remove("suborder")
            .map(|tok| {
                tok.parse::<i64>()
                    .map_err(|_| ApiError::Malformed("suborder must be an integer".into()))
            })
            .transpose()?;
        if slot.is_some() || rank.is_some() {
            rank_request = Some((slot, rank));
        }
    }

    let entity = store.with_transaction::<_, ApiError>(|txn| {
        let mut entity = txn
            .get(id)?
            .filter(|e| e.kind == desc.kind)
            .ok_or_else(|| ApiError::NotFound(format!("{} with pk {id} does not exist", desc.kind)))?;
        if !policy.can_change(principal, desc, &entity) {
            return Err(ApiError::PermissionDenied(
                "You do not have permission to change that object".into(),
            ));
        }
        check_field_allowlist(policy, principal, desc, &fields, "on the requested object")?;
        let mut changes = Vec::new();
        for (key, raw) in &fields {
            let old = entity.field(key).cloned().unwrap_or(Value::Null);
            let old_text = display_value(txn, registry, desc, key, &old);
            let value = parse_value(txn, registry, principal, desc, key, raw)?;
            let new_text = display_value(txn, registry, desc, key, &value);
            entity.set_field(key, value);
            if old_text != new_text {
                changes.push(change_text(key, &old_text, &new_text));
            }
        }
        let mut data = entity.data.as_object().cloned().unwrap_or_default();
        validate_entity(desc, &mut data)?;
        check_unique_natural_key(txn, desc, &data, Some(entity.id))?;
        entity.data = Value::Object(data);
        txn.update(&entity)?;
        if let Some((slot, rank)) = rank_request {
            crate::reorder::ensure_event_unlocked(txn, &entity)?;
            let slot = slot.or_else(|| entity.get_i64("order")).ok_or_else(|| {
                ApiError::ValidationFailed("interstitial is missing its order slot".into())
            })?;
            crate::reorder::move_item(txn, entity.clone(), slot, rank.unwrap_or(-1))?;
            entity = txn
                .get(entity.id)?
                .ok_or_else(|| ApiError::Internal("edited row vanished".into()))?;
        }
        if !changes.is_empty() {
            info!(
                kind = %desc.kind,
                id = %entity.id,
                principal = principal.name(),
                "{}",
                changes.join(" ")
            );
        }
        Ok(entity)
    })?;

    Serializer::new(registry, store).serialize_one(desc, &entity)
}

pub(crate) fn delete(
    registry: &Registry,
    store: &EntityStore,
    policy: &dyn WritePolicy,
    principal: &Principal,
    params: Vec<(String, String)>,
) -> ApiResult<DeleteConfirmation> {
    let mut params = Params::new(params);
    let kind_key = params.single("type")?;
    let desc = registry.lookup(&kind_key)?;
    ensure_writable(desc)?;
    let id = parse_pk(&params.single("id")?)?;

    store.with_transaction::<_, ApiError>(|txn| {
        let entity = txn
            .get(id)?
            .filter(|e| e.kind == desc.kind)
            .ok_or_else(|| ApiError::NotFound(format!("{} with pk {id} does not exist", desc.kind)))?;
        if !policy.can_delete(principal, desc, &entity) {
            return Err(ApiError::PermissionDenied(
                "You do not have permission to delete that object".into(),
            ));
        }
        txn.delete(id)?;
        info!(
            kind = %desc.kind,
            %id,
            principal = principal.name(),
            "deleted entity"
        );
        Ok(DeleteConfirmation {
            result: format!("Object {id} of type {} deleted", desc.kind),
        })
    })
}

fn ensure_writable(desc: &KindDescriptor) -> ApiResult<()> {
    if desc.read_only {
        return Err(ApiError::PermissionDenied(format!(
            "{} is not writeable via this api",
            desc.kind
        )));
    }
    Ok(())
}

fn parse_pk(token: &str) -> ApiResult<EntityId> {
    token
        .parse()
        .map_err(|_| ApiError::Malformed(format!("invalid primary key: {token}")))
}

/// Every submitted field must be in the principal's writable set; violators
/// are named, sorted, in the error.
fn check_field_allowlist(
    policy: &dyn WritePolicy,
    principal: &Principal,
    desc: &KindDescriptor,
    fields: &BTreeMap<String, String>,
    scope: &str,
) -> ApiResult<()> {
    let writable = policy.writable_fields(principal, desc);
    let bad: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|key| !writable.iter().any(|w| w == key))
        .collect();
    if !bad.is_empty() {
        // BTreeMap keys iterate sorted already
        return Err(ApiError::PermissionDenied(format!(
            "You do not have permission to set the following field(s) {scope}: {}",
            bad.join(",")
        )));
    }
    Ok(())
}

/// Coerces one incoming token to its stored value, resolving relations.
pub(crate) fn parse_value(
    txn: &StoreTxn<'_>,
    registry: &Registry,
    principal: &Principal,
    desc: &KindDescriptor,
    field: &str,
    token: &str,
) -> ApiResult<Value> {
    if token == "None" {
        return Ok(Value::Null);
    }
    let Some(rel) = desc.relation_for(field) else {
        return Ok(scalar_value(token));
    };
    if rel.multi {
        parse_multi_relation(txn, rel, field, token)
    } else {
        parse_single_relation(txn, registry, principal, rel, field, token)
    }
}

fn parse_multi_relation(
    txn: &StoreTxn<'_>,
    rel: &RelationDescriptor,
    field: &str,
    token: &str,
) -> ApiResult<Value> {
    let keys: Vec<String> = if token.trim_start().starts_with('[') {
        let parsed: Vec<Value> = serde_json::from_str(token).map_err(|_| {
            ApiError::Malformed(format!(
                "Value for field \"{field}\" could not be parsed as a json array of keys"
            ))
        })?;
        parsed
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(ApiError::Malformed(format!(
                    "invalid key {other} for field \"{field}\""
                ))),
            })
            .collect::<ApiResult<_>>()?
    } else {
        token
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    let mut resolved = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
        let hit = match key.parse::<EntityId>() {
            Ok(id) => txn.get(id)?.filter(|e| e.kind == rel.target),
            Err(_) => None,
        };
        match hit {
            Some(e) => resolved.push(Value::from(e.id.as_i64())),
            None => missing.push(key),
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::UnresolvedRelations {
            field: field.to_string(),
            keys: missing,
        });
    }
    Ok(Value::Array(resolved))
}

fn parse_single_relation(
    txn: &StoreTxn<'_>,
    registry: &Registry,
    principal: &Principal,
    rel: &RelationDescriptor,
    field: &str,
    token: &str,
) -> ApiResult<Value> {
    if let Ok(id) = token.parse::<EntityId>() {
        return match txn.get(id)? {
            Some(e) if e.kind == rel.target => Ok(Value::from(id.as_i64())),
            _ => Err(ApiError::NotFound(format!(
                "{} with pk {token} does not exist",
                rel.target
            ))),
        };
    }

    // Token is not a primary key; fall back to natural-key lookup.
    let key_values: Vec<Value> = if token.starts_with(['"', '[', '{']) {
        let parsed: Value = serde_json::from_str(token).map_err(|_| {
            ApiError::Malformed(format!(
                "Value \"{token}\" could not be parsed as json for natural key lookup on field \"{field}\""
            ))
        })?;
        match parsed {
            Value::Array(items) => items,
            other => vec![other],
        }
    } else {
        vec![Value::String(token.to_string())]
    };

    let target = registry.get(rel.target)?;
    if target.natural_key.is_empty() {
        return Err(ApiError::Malformed(format!(
            "{} does not support natural key lookup",
            rel.target
        )));
    }
    if key_values.len() != target.natural_key.len() {
        return Err(ApiError::Malformed(format!(
            "natural key for {} takes {} value(s)",
            rel.target,
            target.natural_key.len()
        )));
    }
    let pairs: Vec<(&str, &Value)> = target
        .natural_key
        .iter()
        .copied()
        .zip(key_values.iter())
        .collect();
    if let Some(existing) = txn.find_by_natural_key(rel.target, &pairs)? {
        return Ok(Value::from(existing.id.as_i64()));
    }
    if principal.has(Capability::Add(rel.target)) {
        let mut data = Map::new();
        for (key, value) in &pairs {
            data.insert((*key).to_string(), (*value).clone());
        }
        validate_entity(target, &mut data)?;
        let created = txn.insert(rel.target, Value::Object(data))?;
        info!(kind = %rel.target, id = %created.id, "created via natural key lookup");
        Ok(Value::from(created.id.as_i64()))
    } else {
        Err(ApiError::NotFound(format!(
            "{} matching {key_values:?} does not exist",
            rel.target
        )))
    }
}

/// Entity-level invariants checked before persistence.
fn validate_entity(desc: &KindDescriptor, data: &mut Map<String, Value>) -> ApiResult<()> {
    if desc.requires_visibility {
        let visibility = data.get("visibility").cloned();
        match visibility {
            None | Some(Value::Null) => {
                data.insert(
                    "visibility".into(),
                    Value::String(Visibility::FirstName.as_str().into()),
                );
            }
            Some(Value::String(s)) if Visibility::parse(&s).is_some() => {}
            Some(other) => {
                return Err(ApiError::ValidationFailed(format!(
                    "invalid visibility: {other}"
                )));
            }
        }
    }
    Ok(())
}

fn check_unique_natural_key(
    txn: &StoreTxn<'_>,
    desc: &KindDescriptor,
    data: &Map<String, Value>,
    exclude: Option<EntityId>,
) -> ApiResult<()> {
    if desc.natural_key.is_empty() {
        return Ok(());
    }
    let mut pairs = Vec::with_capacity(desc.natural_key.len());
    for field in &desc.natural_key {
        let Some(value) = data.get(*field) else {
            return Err(ApiError::ValidationFailed(format!(
                "missing natural key field: {field}"
            )));
        };
        pairs.push((*field, value));
    }
    if let Some(existing) = txn.find_by_natural_key(desc.kind, &pairs)? {
        if Some(existing.id) != exclude {
            return Err(ApiError::IntegrityConflict(format!(
                "{} with this natural key already exists (pk {})",
                desc.kind, existing.id
            )));
        }
    }
    Ok(())
}

/// Renders a stored value for the change log; relations render as the
/// related instance's display string.
fn display_value(
    txn: &StoreTxn<'_>,
    registry: &Registry,
    desc: &KindDescriptor,
    field: &str,
    value: &Value,
) -> String {
    let Some(rel) = desc.relation_for(field) else {
        return value_text(value);
    };
    if rel.multi {
        let names: Vec<String> = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|v| related_text(txn, registry, v))
                    .collect()
            })
            .unwrap_or_default();
        format!("[{}]", names.join(", "))
    } else {
        related_text(txn, registry, value)
    }
}

fn related_text(txn: &StoreTxn<'_>, registry: &Registry, value: &Value) -> String {
    let Some(id) = value.as_i64() else {
        return value_text(value);
    };
    match txn.get(EntityId::from_raw(id)) {
        Ok(Some(entity)) => display(registry, &entity),
        _ => id.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => "None".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn change_text(field: &str, old: &str, new: &str) -> String {
    let old_empty = old.is_empty() || old == "None";
    let new_empty = new.is_empty() || new == "None";
    if !old_empty && new_empty {
        format!("Changed {field} from \"{old}\" to empty.")
    } else if old_empty && !new_empty {
        format!("Changed {field} from empty to \"{new}\".")
    } else {
        format!("Changed {field} from \"{old}\" to \"{new}\".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_text_phrasing() {
        assert_eq!(
            change_text("alias", "Foo", "Bar"),
            "Changed alias from \"Foo\" to \"Bar\"."
        );
        assert_eq!(
            change_text("alias", "Foo", "None"),
            "Changed alias from \"Foo\" to empty."
        );
        assert_eq!(
            change_text("alias", "", "Bar"),
            "Changed alias from empty to \"Bar\"."
        );
    }

    #[test]
    fn value_text_renders_null_as_none() {
        assert_eq!(value_text(&Value::Null), "None");
        assert_eq!(value_text(&Value::String("x".into())), "x");
        assert_eq!(value_text(&Value::from(3)), "3");
    }
}
