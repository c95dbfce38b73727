//! Typed identity metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RegistryError;

/// Ordered field-name to value mapping attached to one identity.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One metadata value.
///
/// On the wire values are plain JSON. Timestamps travel as RFC 3339 strings and are
/// only recognised as [`MetadataValue::Timestamp`] once a schema declares the field
/// as a timestamp (see [`crate::IdentitySchema`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    StringArray(Vec<String>),
    Map(Metadata),
    Timestamp(DateTime<Utc>),
}

impl MetadataValue {
    /// Short type label used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Number(_) => "number",
            MetadataValue::String(_) => "string",
            MetadataValue::StringArray(_) => "string_array",
            MetadataValue::Map(_) => "map",
            MetadataValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Converts a JSON value into metadata, rejecting nulls and mixed arrays.
    pub fn from_json(value: serde_json::Value) -> Result<Self, RegistryError> {
        serde_json::from_value(value.clone()).map_err(|_| {
            RegistryError::invalid_metadata(format!("unsupported metadata value: {value}"))
        })
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        MetadataValue::Timestamp(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::StringArray(value)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(value: Metadata) -> Self {
        MetadataValue::Map(value)
    }
}

/// Converts a JSON object into [`Metadata`].
pub fn metadata_from_json(value: serde_json::Value) -> Result<Metadata, RegistryError> {
    match value {
        serde_json::Value::Null => Ok(Metadata::new()),
        serde_json::Value::Object(fields) => fields
            .into_iter()
            .map(|(name, value)| Ok((name, MetadataValue::from_json(value)?)))
            .collect(),
        other => Err(RegistryError::invalid_metadata(format!(
            "metadata must be an object, got {other}"
        ))),
    }
}

/// Resolves a dotted field path through nested maps.
pub fn lookup_path<'a>(metadata: &'a Metadata, path: &[String]) -> Option<&'a MetadataValue> {
    let (first, rest) = path.split_first()?;
    let mut current = metadata.get(first)?;
    for segment in rest {
        match current {
            MetadataValue::Map(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Builds a [`Metadata`] map from `(name, value)` pairs.
///
/// ```
/// use multicast_registry::{metadata, MetadataValue};
///
/// let meta = metadata([("type", "sensor".into()), ("battery", MetadataValue::Number(40.0))]);
/// assert_eq!(meta.len(), 2);
/// ```
pub fn metadata<const N: usize>(fields: [(&str, MetadataValue); N]) -> Metadata {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
