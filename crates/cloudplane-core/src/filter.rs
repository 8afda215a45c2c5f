//! Typed describe filters
//!
//! Each object kind declares an enum of the filter names its describe action
//! accepts. Filters are validated when they are built, not when the remote
//! side rejects them.

use crate::error::{CloudError, Result};
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

pub const MAX_FILTERS: usize = 10;
pub const MAX_FILTER_VALUES: usize = 100;

/// A filter name accepted by one describe action
pub trait FilterKey: Copy + Eq + std::fmt::Debug {
    /// The wire name, e.g. `disk-id`
    fn name(self) -> &'static str;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireFilter {
    name: &'static str,
    values: Vec<String>,
}

/// Validated list of filters for one object kind
#[derive(Debug, Clone)]
pub struct Filters<K: FilterKey> {
    entries: Vec<WireFilter>,
    _key: PhantomData<K>,
}

impl<K: FilterKey> Default for Filters<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            _key: PhantomData,
        }
    }
}

impl<K: FilterKey> Filters<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Repeating a key merges its values.
    pub fn with<I, S>(mut self, key: K, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() || values.iter().any(|v| v.is_empty()) {
            return Err(CloudError::InvalidFilter(format!(
                "filter '{}' needs at least one non-empty value",
                key.name()
            )));
        }

        match self.entries.iter_mut().find(|f| f.name == key.name()) {
            Some(existing) => {
                for value in values {
                    if !existing.values.contains(&value) {
                        existing.values.push(value);
                    }
                }
            }
            None => {
                if self.entries.len() == MAX_FILTERS {
                    return Err(CloudError::InvalidFilter(format!(
                        "at most {MAX_FILTERS} filters are allowed"
                    )));
                }
                self.entries.push(WireFilter {
                    name: key.name(),
                    values,
                });
            }
        }

        let entry = self
            .entries
            .iter()
            .find(|f| f.name == key.name())
            .map(|f| f.values.len())
            .unwrap_or_default();
        if entry > MAX_FILTER_VALUES {
            return Err(CloudError::InvalidFilter(format!(
                "filter '{}' has {entry} values, at most {MAX_FILTER_VALUES} are allowed",
                key.name()
            )));
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Values for `key`, for APIs that take filters as plain parameters
    pub fn values(&self, key: K) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|f| f.name == key.name())
            .map(|f| f.values.as_slice())
    }

    /// The `Filters` array for a describe payload
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.entries).unwrap_or(Value::Array(Vec::new()))
    }
}

/// Resolve a wire name against a kind's keys, for user-supplied `name=value` input.
pub fn parse_key<K: FilterKey>(name: &str, keys: &[K]) -> Result<K> {
    keys.iter().copied().find(|k| k.name() == name).ok_or_else(|| {
        let known: Vec<&str> = keys.iter().map(|k| k.name()).collect();
        CloudError::InvalidFilter(format!(
            "unknown filter '{name}', expected one of: {}",
            known.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum DiskKey {
        DiskId,
        Zone,
    }

    impl FilterKey for DiskKey {
        fn name(self) -> &'static str {
            match self {
                DiskKey::DiskId => "disk-id",
                DiskKey::Zone => "zone",
            }
        }
    }

    #[test]
    fn test_serializes_to_wire_shape() {
        let filters = Filters::new()
            .with(DiskKey::DiskId, ["disk-1", "disk-2"])
            .unwrap()
            .with(DiskKey::Zone, ["ap-guangzhou-3"])
            .unwrap();

        assert_eq!(
            filters.to_value(),
            json!([
                {"Name": "disk-id", "Values": ["disk-1", "disk-2"]},
                {"Name": "zone", "Values": ["ap-guangzhou-3"]},
            ])
        );
    }

    #[test]
    fn test_repeated_key_merges() {
        let filters = Filters::new()
            .with(DiskKey::DiskId, ["disk-1"])
            .unwrap()
            .with(DiskKey::DiskId, ["disk-1", "disk-2"])
            .unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters.to_value()[0]["Values"], json!(["disk-1", "disk-2"]));
        assert_eq!(filters.values(DiskKey::DiskId).map(<[String]>::len), Some(2));
        assert!(filters.values(DiskKey::Zone).is_none());
    }

    #[test]
    fn test_rejects_empty_values() {
        assert!(Filters::new().with(DiskKey::Zone, Vec::<String>::new()).is_err());
        assert!(Filters::new().with(DiskKey::Zone, [""]).is_err());
    }

    #[test]
    fn test_rejects_too_many_values() {
        let values: Vec<String> = (0..=MAX_FILTER_VALUES).map(|i| format!("disk-{i}")).collect();
        assert!(Filters::new().with(DiskKey::DiskId, values).is_err());
    }

    #[test]
    fn test_parse_key() {
        let keys = [DiskKey::DiskId, DiskKey::Zone];
        assert_eq!(parse_key("zone", &keys).unwrap(), DiskKey::Zone);
        let err = parse_key("disk-name", &keys).unwrap_err();
        assert!(err.to_string().contains("disk-id, zone"));
    }
}
