//! Executes SQL-shaped scans against a schemaless document-search store.
//!
//! The crate is organized around four cooperating pieces:
//!
//! - [`schema`] resolves a relational [`schema::Schema`] from the store's field
//!   mapping plus a bounded document sample (declared types alone cannot tell a
//!   scalar field from an array field).
//! - [`filter`] translates pushed-down relational predicates into the store's
//!   native query DSL, refusing translations that would change semantics.
//! - [`client`] executes HTTP requests with classified retry/backoff and owns
//!   the server-side cursor token for one scan.
//! - [`scan`] pulls rows through a stateful multi-request cursor session,
//!   honoring projection, limit and offset.
//!
//! [`bind::bind`] ties them together: it resolves (and caches) the schema for a
//! connection/collection pair, after which [`scan::ScanRequest::compile`] and
//! [`scan::Scan`] drive the actual row production.

pub mod bind;
pub mod cache;
pub mod client;
pub mod filter;
mod geo;
pub mod options;
pub mod result;
pub mod scan;
pub mod schema;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::{
    bind::{bind, Bind, Pushdown},
    cache::{BindCache, BindCacheKey},
    client::{HttpTransport, Method, RequestTrace, RetryClient, StoreResponse, TraceSink, Transport},
    filter::{ComparisonOp, ConjunctionOp, FilterSet, GeoRelation, Literal, Predicate},
    options::ConnectionOptions,
    result::{Error, Result},
    scan::{CellValue, Projection, Row, Scan, ScanRequest},
    schema::{ColumnKind, ColumnSchema, ColumnType, Schema},
};
