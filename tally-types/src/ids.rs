//! Identifier types used throughout the Tally core.
//!
//! Primary keys are plain integers assigned by the entity store, newtyped so
//! they cannot be confused with slot keys, ranks, or other integer fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Unique identifier for an entity instance in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Creates an entity ID from a raw row id.
    #[must_use]
    pub const fn from_raw(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let id: EntityId = "42".parse().unwrap();
        assert_eq!(id, EntityId::from_raw(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_non_integer() {
        assert!("abc".parse::<EntityId>().is_err());
        assert!("[1,2]".parse::<EntityId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let id = EntityId::from_raw(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
    }
}
