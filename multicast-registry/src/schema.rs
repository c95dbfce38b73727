//! Namespace-level metadata schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RegistryError;
use crate::metadata::{Metadata, MetadataValue};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Bool,
    Timestamp,
    StringArray,
    Map,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Timestamp => "timestamp",
            FieldType::StringArray => "string_array",
            FieldType::Map => "map",
        }
    }
}

/// Declaration of one metadata field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub indexed: bool,
    /// Permitted values for string fields.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            indexed: false,
            allowed_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Field declarations every registration in a namespace must satisfy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub allow_unknown_fields: bool,
}

impl IdentitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    /// Names of fields declared `indexed`.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.indexed)
            .map(|(name, _)| name.as_str())
    }

    /// Returns `true` when a filter may reference `path`.
    ///
    /// Only the root segment is checked; nested segments are addressable inside
    /// declared `map` fields.
    pub fn declares_path(&self, path: &[String]) -> bool {
        if self.allow_unknown_fields {
            return true;
        }
        match path.split_first() {
            Some((root, [])) => self.fields.contains_key(root),
            Some((root, _)) => self
                .fields
                .get(root)
                .is_some_and(|spec| spec.field_type == FieldType::Map),
            None => false,
        }
    }

    /// Checks `metadata` in place, coercing RFC 3339 strings on timestamp fields.
    pub fn validate(&self, metadata: &mut Metadata) -> Result<(), RegistryError> {
        for (name, spec) in &self.fields {
            if spec.required && !metadata.contains_key(name) {
                return Err(RegistryError::invalid_metadata(format!(
                    "required field '{name}' is missing"
                )));
            }
        }

        for (name, value) in metadata.iter_mut() {
            let Some(spec) = self.fields.get(name) else {
                if self.allow_unknown_fields {
                    continue;
                }
                return Err(RegistryError::invalid_metadata(format!(
                    "field '{name}' is not declared in the namespace schema"
                )));
            };

            coerce_timestamp(name, spec, value)?;

            if !type_matches(spec.field_type, value) {
                return Err(RegistryError::invalid_metadata(format!(
                    "field '{name}' must be {}, got {}",
                    spec.field_type.name(),
                    value.type_name()
                )));
            }

            if let (Some(allowed), MetadataValue::String(actual)) = (&spec.allowed_values, &*value)
            {
                if !allowed.iter().any(|candidate| candidate == actual) {
                    return Err(RegistryError::invalid_metadata(format!(
                        "field '{name}' value '{actual}' is not one of {allowed:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn coerce_timestamp(
    name: &str,
    spec: &FieldSpec,
    value: &mut MetadataValue,
) -> Result<(), RegistryError> {
    if spec.field_type != FieldType::Timestamp {
        return Ok(());
    }
    if let MetadataValue::String(raw) = value {
        let parsed = DateTime::parse_from_rfc3339(raw).map_err(|err| {
            RegistryError::invalid_metadata(format!(
                "field '{name}' is not an RFC 3339 timestamp: {err}"
            ))
        })?;
        *value = MetadataValue::Timestamp(parsed.with_timezone(&Utc));
    }
    Ok(())
}

fn type_matches(field_type: FieldType, value: &MetadataValue) -> bool {
    matches!(
        (field_type, value),
        (FieldType::String, MetadataValue::String(_))
            | (FieldType::Number, MetadataValue::Number(_))
            | (FieldType::Bool, MetadataValue::Bool(_))
            | (FieldType::Timestamp, MetadataValue::Timestamp(_))
            | (FieldType::StringArray, MetadataValue::StringArray(_))
            | (FieldType::Map, MetadataValue::Map(_))
    )
}
