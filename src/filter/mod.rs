//! Relational predicate model and its translation to the store's query DSL.
//!
//! The predicate tree is a closed tagged enum with an explicit [`Predicate::Opaque`]
//! variant for anything un-modeled: translation is exhaustive per variant, and
//! whatever cannot be translated safely is returned as untranslatable for the
//! caller to evaluate locally. Correctness is never sacrificed for pushdown
//! coverage — predicate shapes that would silently return wrong rows (exact
//! matching on an analyzed text field) are a hard error instead.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

mod translate;

pub use translate::{translate_filter_set, translate_predicate, validate_filter_set};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(
        "cannot filter on text field '{0}' because it lacks a .keyword subfield; \
         add a .keyword subfield to the mapping, or use the base query parameter \
         with native text queries"
    )]
    TextFieldWithoutKeyword(String),
}

/// A constant value appearing in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Literal {
    /// Renders the literal as a query-DSL value. Dates and timestamps become
    /// ISO 8601 strings, which the store accepts for its date fields.
    pub(crate) fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::from(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::UInt(u) => Value::from(*u),
            Literal::Double(d) => Value::from(*d),
            Literal::String(s) => Value::from(s.clone()),
            Literal::Date(d) => Value::from(d.format("%Y-%m-%d").to_string()),
            Literal::Timestamp(ts) => {
                let rendered = if ts.nanosecond() == 0 {
                    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
                } else {
                    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
                };
                Value::from(rendered)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctionOp {
    And,
    Or,
}

/// Spatial relation between a geo field and a constant geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoRelation {
    Within,
    Contains,
    Intersects,
    Disjoint,
}

/// One pushed-down predicate over a single column.
///
/// Predicates do not carry their target field; the translator receives the
/// column's field path separately and [`Predicate::Nested`] extends it one
/// dotted segment at a time, composing for arbitrarily deep struct access.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        op: ComparisonOp,
        constant: Literal,
    },
    Conjunction {
        op: ConjunctionOp,
        children: Vec<Predicate>,
    },
    SetMembership {
        constants: Vec<Literal>,
    },
    IsNull,
    IsNotNull,
    /// SQL wildcard pattern match (`LIKE` / `ILIKE`): `%` matches any run,
    /// `_` any single character, `\` escapes.
    Pattern {
        pattern: String,
        case_insensitive: bool,
    },
    /// Access into a nested struct field before applying the inner predicate.
    Nested {
        field: String,
        inner: Box<Predicate>,
    },
    /// Spatial relation against a constant GeoJSON geometry. `field_first`
    /// records the operand order of the source predicate: `within(field, g)`
    /// has the field first, `within(g, field)` has it second, and asymmetric
    /// relations flip accordingly during translation.
    Geo {
        relation: GeoRelation,
        field_first: bool,
        geometry: Value,
    },
    /// A predicate shape the model does not cover. Never translated; the
    /// caller evaluates it locally.
    Opaque,
}

/// Pushed-down filters keyed by output column name, in stable column order.
pub type FilterSet = BTreeMap<String, Predicate>;
