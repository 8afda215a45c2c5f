//! Changed-field detection shared by every object kind
//!
//! Specs are compared through their serde representation, so a field's
//! change marker is derived from its serialized name rather than from
//! hand-written per-resource comparisons. A field left unset (`None`, or
//! skipped when serializing) in the desired spec carries no change marker.

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Names of the top-level fields that differ between two specs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    fields: BTreeSet<String>,
}

impl ChangeSet {
    /// Compare two specs field by field.
    ///
    /// Only fields set in `desired` count. A field that is `None`/absent there
    /// is left as it is, whatever `prior` holds.
    pub fn between<T: Serialize>(prior: &T, desired: &T) -> Result<Self> {
        let prior = as_object(serde_json::to_value(prior)?);
        let desired = as_object(serde_json::to_value(desired)?);

        let fields = desired
            .iter()
            .filter(|(key, after)| {
                !after.is_null() && prior.get(key.as_str()).unwrap_or(&Value::Null) != *after
            })
            .map(|(key, _)| key.clone())
            .collect();

        Ok(Self { fields })
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_change(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn any_of(&self, fields: &[&str]) -> bool {
        fields.iter().any(|f| self.has_change(f))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Fields changed but not in `known`; used to reject changes to immutable fields
    pub fn outside(&self, known: &[&str]) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !known.contains(&f.as_str()))
            .cloned()
            .collect()
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(String::new(), other);
            map
        }
    }
}
