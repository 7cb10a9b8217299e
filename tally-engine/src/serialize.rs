//! Record serialization.
//!
//! Converts a page of entity instances plus their prefetched relations into
//! generic key-value records. Only allowlisted fields are ever emitted; one
//! level of single-valued relations is flattened in under a
//! `relation__field` prefix, and multi-valued relations become lists of
//! primary keys.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tally_model::{Coerce, Entity, KindDescriptor, Registry};
use tally_store::EntityStore;
use tally_types::{ApiResult, EntityId};

/// Raw annotation values keyed by instance, computed by the query pass.
pub type AnnotationValues = HashMap<EntityId, HashMap<&'static str, f64>>;

/// A serialized record: kind tag, primary key, and the allowlisted fields.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub model: String,
    pub pk: EntityId,
    pub fields: Map<String, Value>,
}

/// The kind-specific display string, falling back to `kind#pk`.
#[must_use]
pub fn display(registry: &Registry, entity: &Entity) -> String {
    registry
        .get(entity.kind)
        .ok()
        .and_then(|desc| desc.display)
        .map_or_else(
            || format!("{}#{}", entity.kind, entity.id),
            |formatter| formatter(entity),
        )
}

pub struct Serializer<'a> {
    registry: &'a Registry,
    store: &'a EntityStore,
}

impl<'a> Serializer<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, store: &'a EntityStore) -> Self {
        Self { registry, store }
    }

    /// Serializes a page in order, sharing a related-instance cache across
    /// records so each related row is fetched at most once.
    pub fn serialize_page(
        &self,
        desc: &KindDescriptor,
        page: &[Entity],
        annotations: &AnnotationValues,
    ) -> ApiResult<Vec<Record>> {
        let mut cache: HashMap<EntityId, Option<Entity>> = HashMap::new();
        page.iter()
            .map(|entity| self.record(desc, entity, annotations, &mut cache))
            .collect()
    }

    /// Serializes a single instance, e.g. to echo a write back to the caller.
    pub fn serialize_one(&self, desc: &KindDescriptor, entity: &Entity) -> ApiResult<Record> {
        let mut cache = HashMap::new();
        self.record(desc, entity, &AnnotationValues::new(), &mut cache)
    }

    fn record(
        &self,
        desc: &KindDescriptor,
        entity: &Entity,
        annotations: &AnnotationValues,
        cache: &mut HashMap<EntityId, Option<Entity>>,
    ) -> ApiResult<Record> {
        let mut fields = allowlisted(&desc.fields, entity);
        fields.insert("public".into(), Value::String(display(self.registry, entity)));

        for annotation in &desc.annotations {
            let raw = annotations
                .get(&entity.id)
                .and_then(|values| values.get(annotation.name))
                .copied()
                .unwrap_or(0.0);
            let value = match annotation.coerce {
                Coerce::Int => Value::from(raw as i64),
                Coerce::Float => Value::from(raw),
            };
            fields.insert(annotation.name.to_string(), value);
        }

        for prefetched in &desc.prefetch {
            let ids: Vec<Value> = entity
                .get_refs(prefetched)
                .into_iter()
                .map(|id| Value::from(id.as_i64()))
                .collect();
            fields.insert(prefetched.to_string(), Value::Array(ids));
        }

        for include in &desc.related {
            // The registry may mark a relation as never followable.
            let followable = desc
                .relation_for(include.field)
                .is_some_and(|rel| rel.serialize);
            if !followable {
                continue;
            }
            let Some(target_id) = entity.get_ref(include.field) else {
                continue;
            };
            // A dangling reference flattens to nothing; a store failure is
            // not the same thing and must surface.
            let related = match cache.entry(target_id) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => slot.insert(self.store.get(target_id)?),
            };
            let Some(related) = related.clone() else {
                continue;
            };
            let target_desc = self.registry.get(include.target)?;
            for (key, value) in allowlisted(&include.fields, &related) {
                // Raw key references inside the nested record would only
                // duplicate what the id list already carries.
                if key.ends_with("id") || target_desc.relation_for(&key).is_some() {
                    continue;
                }
                fields.insert(format!("{}__{}", include.field, key), value);
            }
            fields.insert(
                format!("{}__public", include.field),
                Value::String(display(self.registry, &related)),
            );
        }

        Ok(Record {
            model: desc.kind.to_string(),
            pk: entity.id,
            fields,
        })
    }
}

/// Projects the allowlist onto the payload, emitting `null` for absent fields
/// so every record of a kind has the same shape.
fn allowlisted(fields: &[&'static str], entity: &Entity) -> Map<String, Value> {
    fields
        .iter()
        .map(|name| {
            (
                name.to_string(),
                entity.field(name).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}
