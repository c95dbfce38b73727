//! Compilation of the textual filter syntax into a [`Filter`] tree.
//!
//! Syntax: a JSON object whose keys are either field paths (equality), field paths
//! suffixed with an operator (`battery_level.lt`, `capabilities.contains`,
//! `owner.exists`), or the combinators `$and` / `$or` (arrays of sub-filters) and
//! `$not` (one sub-filter). Several keys in one object are AND-ed together.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{Filter, Operand, Operator, Predicate};
use crate::error::RegistryError;
use crate::metadata::MetadataValue;
use crate::schema::IdentitySchema;

pub const DEFAULT_MAX_FILTER_DEPTH: usize = 5;
pub const DEFAULT_MAX_FILTER_CLAUSES: usize = 20;

const AND_KEY: &str = "$and";
const OR_KEY: &str = "$or";
const NOT_KEY: &str = "$not";

/// Bounds on filter cost.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterLimits {
    #[serde(default = "default_max_depth")]
    pub max_filter_depth: usize,
    #[serde(default = "default_max_clauses")]
    pub max_filter_clauses: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_FILTER_DEPTH
}

fn default_max_clauses() -> usize {
    DEFAULT_MAX_FILTER_CLAUSES
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_filter_clauses: DEFAULT_MAX_FILTER_CLAUSES,
        }
    }
}

/// Compiles and validates filters for one namespace.
#[derive(Clone, Debug, Default)]
pub struct FilterCompiler {
    limits: FilterLimits,
    schema: Option<Arc<IdentitySchema>>,
}

impl FilterCompiler {
    pub fn new(limits: FilterLimits) -> Self {
        Self {
            limits,
            schema: None,
        }
    }

    /// Restricts field references to the fields `schema` declares.
    pub fn with_schema(mut self, schema: Arc<IdentitySchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn limits(&self) -> FilterLimits {
        self.limits
    }

    /// Compiles a textual expression. `null` and `{}` compile to `None` (match all).
    pub fn compile(&self, expression: &Value) -> Result<Option<Filter>, RegistryError> {
        let filter = match expression {
            Value::Null => return Ok(None),
            Value::Object(fields) if fields.is_empty() => return Ok(None),
            Value::Object(fields) => self.parse_object(fields, 0)?,
            other => {
                return Err(RegistryError::invalid_filter(format!(
                    "filter must be an object, got {other}"
                )))
            }
        };
        self.validate(&filter)?;
        Ok(Some(filter))
    }

    /// Compiles a filter given as JSON text.
    pub fn compile_str(&self, expression: &str) -> Result<Option<Filter>, RegistryError> {
        let value: Value = serde_json::from_str(expression)
            .map_err(|err| RegistryError::invalid_filter(format!("malformed filter: {err}")))?;
        self.compile(&value)
    }

    /// Checks limits and schema references of an already-built filter.
    pub fn validate(&self, filter: &Filter) -> Result<(), RegistryError> {
        let depth = filter.depth();
        if depth > self.limits.max_filter_depth {
            return Err(RegistryError::invalid_filter(format!(
                "filter depth {depth} exceeds limit {}",
                self.limits.max_filter_depth
            )));
        }

        let clauses = filter.clause_count();
        if clauses > self.limits.max_filter_clauses {
            return Err(RegistryError::invalid_filter(format!(
                "filter has {clauses} clauses, limit is {}",
                self.limits.max_filter_clauses
            )));
        }

        if let Some(schema) = &self.schema {
            for predicate in filter.predicates() {
                if !schema.declares_path(&predicate.path) {
                    return Err(RegistryError::invalid_filter(format!(
                        "field '{}' is not declared in the namespace schema",
                        predicate.field()
                    )));
                }
            }
        }
        Ok(())
    }

    fn parse_object(&self, fields: &Map<String, Value>, level: usize) -> Result<Filter, RegistryError> {
        if fields.is_empty() {
            return Err(RegistryError::invalid_filter("empty sub-filter"));
        }

        let mut children = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            children.push(self.parse_entry(key, value, level)?);
        }

        if children.len() == 1 {
            Ok(children.remove(0))
        } else {
            self.check_level(level + 1)?;
            Ok(Filter::And(children))
        }
    }

    fn parse_entry(&self, key: &str, value: &Value, level: usize) -> Result<Filter, RegistryError> {
        match key {
            AND_KEY | OR_KEY => {
                self.check_level(level + 1)?;
                let items = value
                    .as_array()
                    .filter(|items| !items.is_empty())
                    .ok_or_else(|| {
                        RegistryError::invalid_filter(format!(
                            "{key} expects a non-empty array of filters"
                        ))
                    })?;
                let children = items
                    .iter()
                    .map(|item| self.parse_sub_filter(key, item, level + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if key == AND_KEY {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                })
            }
            NOT_KEY => {
                self.check_level(level + 1)?;
                let child = self.parse_sub_filter(key, value, level + 1)?;
                Ok(Filter::Not(Box::new(child)))
            }
            unknown if unknown.starts_with('$') => Err(RegistryError::invalid_filter(format!(
                "unknown operator '{unknown}'"
            ))),
            field_key => parse_predicate(field_key, value).map(Filter::Predicate),
        }
    }

    fn parse_sub_filter(&self, key: &str, value: &Value, level: usize) -> Result<Filter, RegistryError> {
        match value {
            Value::Object(fields) => self.parse_object(fields, level),
            other => Err(RegistryError::invalid_filter(format!(
                "{key} operands must be objects, got {other}"
            ))),
        }
    }

    // Bails out before recursing past the depth limit.
    fn check_level(&self, level: usize) -> Result<(), RegistryError> {
        if level > self.limits.max_filter_depth {
            Err(RegistryError::invalid_filter(format!(
                "filter depth exceeds limit {}",
                self.limits.max_filter_depth
            )))
        } else {
            Ok(())
        }
    }
}

fn split_field_key(key: &str) -> (&str, Operator) {
    match key.rsplit_once('.') {
        Some((field, suffix)) => match Operator::from_keyword(suffix) {
            Some(op) => (field, op),
            None => (key, Operator::Eq),
        },
        None => (key, Operator::Eq),
    }
}

fn parse_predicate(key: &str, value: &Value) -> Result<Predicate, RegistryError> {
    let (field, op) = split_field_key(key);
    let path: Vec<String> = field.split('.').map(str::to_string).collect();
    if path.iter().any(|segment| segment.is_empty()) {
        return Err(RegistryError::invalid_filter(format!(
            "invalid field path '{field}'"
        )));
    }

    let operand = match op {
        Operator::Exists => match value {
            Value::Bool(present) => Operand::Presence(*present),
            other => {
                return Err(RegistryError::invalid_filter(format!(
                    "{key} expects true or false, got {other}"
                )))
            }
        },
        Operator::In => match value {
            Value::Array(items) => Operand::List(
                items
                    .iter()
                    .map(|item| operand_value(key, item))
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(RegistryError::invalid_filter(format!(
                    "{key} expects an array, got {other}"
                )))
            }
        },
        Operator::StartsWith | Operator::EndsWith | Operator::Contains => match value {
            Value::String(text) => Operand::Value(MetadataValue::String(text.clone())),
            other => {
                return Err(RegistryError::invalid_filter(format!(
                    "{key} expects a string, got {other}"
                )))
            }
        },
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => match value {
            Value::Number(_) | Value::String(_) => Operand::Value(operand_value(key, value)?),
            other => {
                return Err(RegistryError::invalid_filter(format!(
                    "{key} expects a number or string, got {other}"
                )))
            }
        },
        Operator::Eq | Operator::Ne => Operand::Value(operand_value(key, value)?),
    };

    Ok(Predicate { path, op, operand })
}

fn operand_value(key: &str, value: &Value) -> Result<MetadataValue, RegistryError> {
    MetadataValue::from_json(value.clone())
        .map_err(|_| RegistryError::invalid_filter(format!("unsupported operand for {key}: {value}")))
}
