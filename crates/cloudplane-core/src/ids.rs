//! Opaque resource ids, optionally packing several remote keys

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};

pub const ID_DELIMITER: char = '#';

/// The single id string the host persists for an object.
///
/// Composite ids join several remote keys with [`ID_DELIMITER`], e.g.
/// `disk-abc#dbackup-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Join remote keys into one id. Keys must be non-empty and free of the delimiter.
    pub fn join<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = parts.into_iter().map(|p| p.as_ref().to_string()).collect();
        let raw = parts.join(&ID_DELIMITER.to_string());
        if parts.is_empty() {
            return Err(CloudError::InvalidId {
                id: raw,
                reason: "no components".to_string(),
            });
        }
        for part in &parts {
            if part.is_empty() || part.contains(ID_DELIMITER) {
                return Err(CloudError::InvalidId {
                    id: raw,
                    reason: format!("component '{part}' is empty or contains '{ID_DELIMITER}'"),
                });
            }
        }
        Ok(Self(raw))
    }

    /// Parse a persisted id, requiring exactly `arity` non-empty components.
    pub fn parse(raw: &str, arity: usize) -> Result<Self> {
        let parts: Vec<&str> = raw.split(ID_DELIMITER).collect();
        if parts.len() != arity {
            return Err(CloudError::InvalidId {
                id: raw.to_string(),
                reason: format!("expected {arity} component(s), found {}", parts.len()),
            });
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CloudError::InvalidId {
                id: raw.to_string(),
                reason: "empty component".to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> Vec<&str> {
        self.0.split(ID_DELIMITER).collect()
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.0.split(ID_DELIMITER).nth(index)
    }

    pub fn arity(&self) -> usize {
        self.0.split(ID_DELIMITER).count()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
