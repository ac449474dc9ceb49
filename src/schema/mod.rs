//! Relational schema resolution for schemaless collections.
//!
//! Resolution is strictly two-phase: a declared-type pass over the store's
//! field mapping, then a runtime-sample pass that may upgrade columns to list
//! form (the mapping cannot distinguish "one value" from "array of values").
//! The resolved [`Schema`] is a plain immutable value, safe to cache and
//! clone.

use crate::client;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
};
use thiserror::Error;

pub(crate) mod resolve;

pub use resolve::resolve;

pub type Result<T> = std::result::Result<T, Error>;

/// Name of the document-identifier column, always first in the output layout.
pub const ID_COLUMN: &str = "_id";
/// Name of the residual column capturing content outside the mapping, always
/// last in the output layout.
pub const RESIDUAL_COLUMN: &str = "_unmapped_";
/// Fallback column emitted when a collection declares no fields at all.
pub const SOURCE_COLUMN: &str = "_source";

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("failed to fetch field mapping for '{collection}': {source}")]
    MappingFetch {
        collection: String,
        source: client::Error,
    },
    #[error("malformed mapping response: {0}")]
    MalformedMapping(String),
    #[error(
        "incompatible types for field '{path}': collection '{first_collection}' has {first_type}, \
         but collection '{second_collection}' has {second_type}"
    )]
    IncompatibleFieldTypes {
        path: String,
        first_collection: String,
        first_type: String,
        second_collection: String,
        second_type: String,
    },
}

/// Relational type of one resolved column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Varchar,
    Timestamp,
    List(Box<ColumnType>),
    Struct(Vec<(String, ColumnType)>),
}

impl ColumnType {
    /// Wraps the type in a list unless it already is one. Sampling upgrades
    /// types this way and never downgrades them, keeping resolution
    /// idempotent.
    pub(crate) fn into_list(self) -> ColumnType {
        match self {
            ColumnType::List(_) => self,
            other => ColumnType::List(Box::new(other)),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Bool => write!(f, "BOOLEAN"),
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Int => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Varchar => write!(f, "VARCHAR"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::List(inner) => write!(f, "LIST({inner})"),
            ColumnType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Which zone of the output layout a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// The document identifier.
    Id,
    /// A mapped field.
    Field,
    /// The residual catch-all for unmapped content.
    Residual,
}

/// One resolved relational column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Output column name (the last path segment for mapped fields).
    pub name: String,
    /// Dotted field path into the document.
    pub path: String,
    pub column_type: ColumnType,
    /// The store's original type tag, kept for special decoding (geo types,
    /// text detection). Empty for the id and residual columns.
    pub external_type: String,
    pub kind: ColumnKind,
    /// Whether the field is full-text (analyzed), making exact and range
    /// queries on it unreliable.
    pub full_text: bool,
    /// Whether a full-text field carries a sibling exact-match (`.keyword`)
    /// companion enabling exact and range queries.
    pub exact_match_companion: bool,
}

/// The resolved relational schema for one logical collection, possibly merged
/// from several physical collections matched by a wildcard name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// Output columns in order: id, mapped fields, residual.
    pub columns: Vec<ColumnSchema>,
    /// Every mapped field path including nested ones, for residual detection.
    pub mapped_paths: BTreeSet<String>,
    /// Path to external type tag, for every path including nested ones.
    pub path_types: HashMap<String, String>,
    /// Paths of full-text fields, including nested ones.
    pub text_fields: HashSet<String>,
    /// Full-text paths that carry an exact-match companion subfield.
    pub text_fields_with_keyword: HashSet<String>,
}

impl Schema {
    /// The mapped field columns, excluding the id and residual zones.
    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnSchema> + '_ {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Field)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn external_type(&self, path: &str) -> Option<&str> {
        self.path_types.get(path).map(String::as_str)
    }

    pub(crate) fn is_text(&self, path: &str) -> bool {
        self.text_fields.contains(path)
    }

    pub(crate) fn has_exact_match_companion(&self, path: &str) -> bool {
        self.text_fields_with_keyword.contains(path)
    }
}
