use crate::Kind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_types::EntityId;

/// A generic entity instance as stored by the engine.
///
/// All kinds flow through this type. The `data` field holds a flat JSON
/// object whose keys are defined by the kind's registry descriptor;
/// single-valued relations hold the related primary key as a number,
/// multi-valued relations hold an array of primary keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: Kind,
    pub data: Value,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Entity {
    /// Looks up a field on the JSON payload.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object().and_then(|o| o.get(name))
    }

    /// Extracts a string field.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Extracts an integer field.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(Value::as_i64)
    }

    /// Extracts a float field.
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(Value::as_f64)
    }

    /// Extracts a single-valued relation field as a primary key.
    #[must_use]
    pub fn get_ref(&self, name: &str) -> Option<EntityId> {
        self.get_i64(name).map(EntityId::from_raw)
    }

    /// Extracts a multi-valued relation field as a list of primary keys.
    /// Absent or null fields yield an empty list.
    #[must_use]
    pub fn get_refs(&self, name: &str) -> Vec<EntityId> {
        self.field(name)
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_i64)
                    .map(EntityId::from_raw)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sets a field on the JSON payload, promoting a non-object payload to an
    /// empty object first.
    pub fn set_field(&mut self, name: &str, value: Value) {
        if !self.data.is_object() {
            self.data = Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = self.data.as_object_mut() {
            obj.insert(name.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn donor() -> Entity {
        Entity {
            id: EntityId::from_raw(1),
            kind: Kind::Donor,
            data: json!({
                "alias": "Foo",
                "alias_num": 1234,
                "visibility": "ALIAS",
                "prize_claims": [3, 5],
            }),
            created_at: 0,
            modified_at: 0,
        }
    }

    #[test]
    fn field_accessors() {
        let d = donor();
        assert_eq!(d.get_str("alias"), Some("Foo"));
        assert_eq!(d.get_i64("alias_num"), Some(1234));
        assert_eq!(d.get_str("missing"), None);
        assert_eq!(
            d.get_refs("prize_claims"),
            vec![EntityId::from_raw(3), EntityId::from_raw(5)]
        );
        assert!(d.get_refs("missing").is_empty());
    }

    #[test]
    fn set_field_overwrites() {
        let mut d = donor();
        d.set_field("alias", json!("Bar"));
        assert_eq!(d.get_str("alias"), Some("Bar"));
    }
}
