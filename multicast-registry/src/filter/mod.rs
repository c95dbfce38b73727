//! Filter Engine.
//!
//! A [`Filter`] is a boolean predicate tree over metadata field paths. It is built
//! either programmatically or by compiling the JSON-like textual syntax with a
//! [`FilterCompiler`], which enforces depth and clause limits and, when the
//! namespace has one, the metadata schema.
//!
//! ```
//! use multicast_registry::{metadata, FilterCompiler, FilterLimits};
//! use serde_json::json;
//!
//! let compiler = FilterCompiler::new(FilterLimits::default());
//! let filter = compiler
//!     .compile(&json!({"type": "sensor", "battery_level.lt": 20}))
//!     .unwrap()
//!     .expect("non-empty filter");
//!
//! let low = metadata([("type", "sensor".into()), ("battery_level", 12.0.into())]);
//! let full = metadata([("type", "sensor".into()), ("battery_level", 90.0.into())]);
//! assert!(filter.matches(&low));
//! assert!(!filter.matches(&full));
//! ```
//!
//! [`Filter::matches`] is pure, so a store may either translate the tree into its own
//! query plan or hand back a full scan for in-process evaluation; both must select
//! the same records.

mod compare;
mod compile;

pub use compile::{
    FilterCompiler, FilterLimits, DEFAULT_MAX_FILTER_CLAUSES, DEFAULT_MAX_FILTER_DEPTH,
};

use crate::metadata::{lookup_path, Metadata, MetadataValue};
use std::fmt::{Display, Formatter};

/// Leaf predicate operators.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    StartsWith,
    EndsWith,
    Contains,
    In,
    Exists,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Contains,
        Operator::In,
        Operator::Exists,
    ];

    /// Suffix used in the textual syntax (`field.<op>`).
    pub fn keyword(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::Exists => "exists",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.keyword() == keyword)
    }
}

/// Right-hand side of a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Value(MetadataValue),
    List(Vec<MetadataValue>),
    Presence(bool),
}

/// One `field <op> operand` test.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub path: Vec<String>,
    pub op: Operator,
    pub operand: Operand,
}

impl Predicate {
    pub fn field(&self) -> String {
        self.path.join(".")
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        let actual = lookup_path(metadata, &self.path);

        match (&self.operand, actual) {
            (Operand::Presence(expected), actual) => actual.is_some() == *expected,
            (_, None) => false,
            (Operand::List(candidates), Some(actual)) => {
                self.op == Operator::In
                    && candidates
                        .iter()
                        .any(|candidate| compare::values_equal(actual, candidate))
            }
            (Operand::Value(expected), Some(actual)) => match self.op {
                Operator::Eq => compare::values_equal(actual, expected),
                Operator::Ne => !compare::values_equal(actual, expected),
                Operator::Lt => compare::compare(actual, expected).is_some_and(|o| o.is_lt()),
                Operator::Lte => compare::compare(actual, expected).is_some_and(|o| o.is_le()),
                Operator::Gt => compare::compare(actual, expected).is_some_and(|o| o.is_gt()),
                Operator::Gte => compare::compare(actual, expected).is_some_and(|o| o.is_ge()),
                Operator::StartsWith => compare::starts_with(actual, expected),
                Operator::EndsWith => compare::ends_with(actual, expected),
                Operator::Contains => compare::contains(actual, expected),
                Operator::In | Operator::Exists => false,
            },
        }
    }
}

/// Boolean predicate tree over metadata.
///
/// "Match everything" is expressed as the absence of a filter (`Option<Filter>::None`).
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Predicate(Predicate),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn leaf(field: &str, op: Operator, operand: Operand) -> Self {
        Filter::Predicate(Predicate {
            path: field.split('.').map(str::to_string).collect(),
            op,
            operand,
        })
    }

    pub fn eq(field: &str, value: impl Into<MetadataValue>) -> Self {
        Self::leaf(field, Operator::Eq, Operand::Value(value.into()))
    }

    pub fn ne(field: &str, value: impl Into<MetadataValue>) -> Self {
        Self::leaf(field, Operator::Ne, Operand::Value(value.into()))
    }

    /// Builds a comparison or string predicate (`lt`, `startswith`, ...).
    pub fn compare(field: &str, op: Operator, value: impl Into<MetadataValue>) -> Self {
        Self::leaf(field, op, Operand::Value(value.into()))
    }

    pub fn one_of<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<MetadataValue>,
    {
        Self::leaf(
            field,
            Operator::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn exists(field: &str, present: bool) -> Self {
        Self::leaf(field, Operator::Exists, Operand::Presence(present))
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Filter) -> Self {
        Filter::Not(Box::new(child))
    }

    /// Evaluates the filter against one metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::Predicate(predicate) => predicate.matches(metadata),
            Filter::And(children) => children.iter().all(|child| child.matches(metadata)),
            Filter::Or(children) => children.iter().any(|child| child.matches(metadata)),
            Filter::Not(child) => !child.matches(metadata),
        }
    }

    /// Number of boolean nodes on the deepest root-to-leaf path.
    pub fn depth(&self) -> usize {
        match self {
            Filter::Predicate(_) => 0,
            Filter::And(children) | Filter::Or(children) => {
                1 + children.iter().map(Filter::depth).max().unwrap_or(0)
            }
            Filter::Not(child) => 1 + child.depth(),
        }
    }

    /// Number of leaf predicates.
    pub fn clause_count(&self) -> usize {
        match self {
            Filter::Predicate(_) => 1,
            Filter::And(children) | Filter::Or(children) => {
                children.iter().map(Filter::clause_count).sum()
            }
            Filter::Not(child) => child.clause_count(),
        }
    }

    /// Visits every leaf predicate.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Filter::Predicate(predicate) => out.push(predicate),
            Filter::And(children) | Filter::Or(children) => {
                children.iter().for_each(|child| child.collect_predicates(out))
            }
            Filter::Not(child) => child.collect_predicates(out),
        }
    }
}

/// `None` matches everything.
pub fn matches(filter: Option<&Filter>, metadata: &Metadata) -> bool {
    filter.map_or(true, |filter| filter.matches(metadata))
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Predicate(predicate) => match &predicate.operand {
                Operand::Value(value) => write!(
                    f,
                    "{}.{}={}",
                    predicate.field(),
                    predicate.op.keyword(),
                    serde_json::to_string(value).unwrap_or_default()
                ),
                Operand::List(values) => write!(
                    f,
                    "{}.{}={}",
                    predicate.field(),
                    predicate.op.keyword(),
                    serde_json::to_string(values).unwrap_or_default()
                ),
                Operand::Presence(present) => {
                    write!(f, "{}.exists={present}", predicate.field())
                }
            },
            Filter::And(children) | Filter::Or(children) => {
                let joiner = if matches!(self, Filter::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                write!(f, "(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Filter::Not(child) => write!(f, "NOT {child}"),
        }
    }
}
