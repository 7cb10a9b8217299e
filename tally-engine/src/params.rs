//! Flat request-parameter parsing.
//!
//! Parameters arrive as repeatable key/value pairs; a key consumed through
//! [`Params::single`] must appear exactly once, and flag keys take no value.

use std::collections::BTreeMap;
use tally_types::{ApiError, ApiResult};

/// A mutable view over the request's flat parameter mapping. Keys are popped
/// as they are consumed; whatever remains feeds the filter builder.
#[derive(Debug)]
pub struct Params {
    map: BTreeMap<String, Vec<String>>,
}

impl Params {
    #[must_use]
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            map.entry(key).or_default().push(value);
        }
        Self { map }
    }

    /// Consumes a required single-valued parameter.
    pub fn single(&mut self, key: &str) -> ApiResult<String> {
        let values = self
            .map
            .remove(key)
            .ok_or_else(|| ApiError::Malformed(format!("missing parameter: {key}")))?;
        Self::exactly_one(key, values)
    }

    /// Consumes an optional single-valued parameter, with a default.
    pub fn single_or(&mut self, key: &str, default: &str) -> ApiResult<String> {
        match self.map.remove(key) {
            Some(values) => Self::exactly_one(key, values),
            None => Ok(default.to_string()),
        }
    }

    /// Consumes a boolean flag. Flags must not carry a value.
    pub fn flag(&mut self, key: &str) -> ApiResult<bool> {
        let Some(values) = self.map.remove(key) else {
            return Ok(false);
        };
        let value = Self::exactly_one(key, values)?;
        if !value.is_empty() {
            return Err(ApiError::Malformed(format!(
                "\"{key}\" parameter does not take a value"
            )));
        }
        Ok(true)
    }

    /// Everything not consumed yet, as single values. Repeated leftover keys
    /// are a hard error.
    pub fn remaining(self) -> ApiResult<BTreeMap<String, String>> {
        self.map
            .into_iter()
            .map(|(key, values)| {
                let value = Self::exactly_one(&key, values)?;
                Ok((key, value))
            })
            .collect()
    }

    fn exactly_one(key: &str, mut values: Vec<String>) -> ApiResult<String> {
        if values.len() != 1 {
            return Err(ApiError::Malformed(format!("parameter repeated: {key}")));
        }
        Ok(values.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        Params::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn single_consumes_and_errors_on_repeat() {
        let mut p = params(&[("type", "donor"), ("limit", "5"), ("limit", "6")]);
        assert_eq!(p.single("type").unwrap(), "donor");
        assert!(p.single("type").is_err());
        let err = p.single("limit").unwrap_err();
        assert_eq!(err.category(), "malformed_parameters");
    }

    #[test]
    fn flag_rejects_values() {
        let mut p = params(&[("tech_notes", ""), ("all_comments", "yes")]);
        assert!(p.flag("tech_notes").unwrap());
        assert!(!p.flag("donor_names").unwrap());
        assert!(p.flag("all_comments").is_err());
    }

    #[test]
    fn remaining_yields_unconsumed_singles() {
        let mut p = params(&[("type", "donor"), ("alias", "Foo")]);
        p.single("type").unwrap();
        let rest = p.remaining().unwrap();
        assert_eq!(rest.get("alias").map(String::as_str), Some("Foo"));
        assert_eq!(rest.len(), 1);
    }
}
