//! Pull-based row production over a server-side cursor session.
//!
//! One scan is driven by one calling thread pulling rows synchronously; the
//! cursor protocol is not safe for concurrent readers, so there is no
//! internal parallelism across pages. The scan owns its client and its
//! cursor, and tears the cursor down exactly once.

use crate::{
    client::{RetryClient, Transport},
    filter::{translate_filter_set, FilterSet},
    options::ConnectionOptions,
    schema::{ColumnKind, ColumnSchema, Schema, SOURCE_COLUMN},
};
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

mod decode;
#[cfg(test)]
mod test;

pub(crate) use decode::decode_row;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed cursor page: {0}")]
    MalformedPage(String),
}

/// A decoded cell. Integer-typed columns all decode to `Int`; the column's
/// [`ColumnType`](crate::schema::ColumnType) records the declared width.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(NaiveDateTime),
    List(Vec<CellValue>),
    Struct(Vec<(String, CellValue)>),
}

pub type Row = Vec<CellValue>;

/// Which columns the host engine needs. `output` columns appear in rows, in
/// order; `filter_only` columns are referenced by pushed filters but can be
/// excluded from the document projection since the store filters server-side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub output: Vec<String>,
    pub filter_only: Vec<String>,
}

impl Projection {
    /// Projects every column of the schema.
    pub fn all(schema: &Schema) -> Self {
        Self {
            output: schema.columns.iter().map(|c| c.name.clone()).collect(),
            filter_only: Vec::new(),
        }
    }
}

/// Compiled, immutable query fragment for one scan: merged base query and
/// translated filter, source-field projection, and page-size decisions. Built
/// once per scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub collection: String,
    pub body: Value,
    /// Output columns in row order.
    pub columns: Vec<ColumnSchema>,
    pub first_page_size: u32,
    pub page_size: u32,
    pub cursor_ttl: String,
    pub limit: Option<u64>,
    pub offset: u64,
    mapped_paths: BTreeSet<String>,
}

impl ScanRequest {
    /// Compiles a scan request. Unsafe pushdowns (filtering an analyzed text
    /// field without an exact-match companion) fail here, before any cursor
    /// is opened.
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        schema: &Schema,
        collection: &str,
        base_query: Option<&Value>,
        filters: &FilterSet,
        projection: &Projection,
        limit: Option<u64>,
        offset: u64,
        options: &ConnectionOptions,
    ) -> crate::result::Result<Self> {
        let filter_clause = translate_filter_set(filters, schema)?;

        let query = match (base_query, filter_clause) {
            (Some(base), Some(filter)) => json!({ "bool": { "must": [base, filter] } }),
            (Some(base), None) => base.clone(),
            (None, Some(filter)) => filter,
            (None, None) => json!({ "match_all": {} }),
        };

        let columns: Vec<ColumnSchema> = projection
            .output
            .iter()
            .filter_map(|name| schema.column(name).cloned())
            .collect();

        // A requested residual column needs the whole document to detect
        // unmapped content, as does the mapping-less source fallback.
        let needs_full_source = columns
            .iter()
            .any(|c| c.kind == ColumnKind::Residual || c.path == SOURCE_COLUMN);

        let mut body = json!({ "query": query });
        if !needs_full_source {
            let source_fields: Vec<Value> = columns
                .iter()
                .filter(|c| c.kind == ColumnKind::Field)
                .map(|c| Value::from(c.path.clone()))
                .collect();
            if !source_fields.is_empty() {
                body["_source"] = Value::Array(source_fields);
            }
        }

        // For small limits, fetch everything needed in one page to avoid
        // pagination overhead; large limits keep the default page size and
        // accept mild overfetch on the final page.
        let threshold = options.page_size as u64 * options.page_size_threshold_factor as u64;
        let first_page_size = match limit.map(|l| l + offset) {
            Some(total) if total > 0 && total <= threshold => total as u32,
            _ => options.page_size,
        };

        Ok(Self {
            collection: collection.to_string(),
            body,
            columns,
            first_page_size,
            page_size: options.page_size,
            cursor_ttl: options.cursor_ttl.clone(),
            limit,
            offset,
            mapped_paths: schema.mapped_paths.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Draining,
    Exhausted,
}

/// One logical scan over a server-side cursor. `Exhausted` is terminal:
/// further pulls yield no rows, and the cursor is closed exactly once, on
/// entering that state or on drop, whichever comes first.
pub struct Scan<T: Transport> {
    client: RetryClient<T>,
    request: ScanRequest,
    state: State,
    cursor_id: Option<String>,
    buffered: VecDeque<Value>,
    rows_emitted: u64,
    rows_skipped: u64,
    cursor_closed: bool,
}

impl<T: Transport> Scan<T> {
    pub fn open(client: RetryClient<T>, request: ScanRequest) -> Self {
        Self {
            client,
            request,
            state: State::Init,
            cursor_id: None,
            buffered: VecDeque::new(),
            rows_emitted: 0,
            rows_skipped: 0,
            cursor_closed: false,
        }
    }

    /// Pulls the next row, fetching pages on demand. Returns `Ok(None)` once
    /// the scan is exhausted; offset rows are discarded client-side since the
    /// cursor protocol supports no arbitrary offsets.
    pub fn next_row(&mut self) -> crate::result::Result<Option<Row>> {
        loop {
            if self.state == State::Exhausted {
                return Ok(None);
            }

            if let Some(limit) = self.request.limit {
                if self.rows_emitted >= limit {
                    self.exhaust();
                    return Ok(None);
                }
            }

            match self.state {
                State::Init => {
                    let body = self.request.body.to_string();
                    let response = self.client.open_cursor(
                        &self.request.collection,
                        &body,
                        &self.request.cursor_ttl,
                        self.request.first_page_size,
                    )?;
                    let (cursor_id, hits) = parse_page(&response.body)?;
                    self.cursor_id = cursor_id;
                    self.buffered = hits;
                    self.state = State::Draining;
                    if self.buffered.is_empty() {
                        self.exhaust();
                        return Ok(None);
                    }
                }
                State::Draining => {
                    if self.buffered.is_empty() {
                        let cursor_id = match &self.cursor_id {
                            Some(id) => id.clone(),
                            None => {
                                self.exhaust();
                                return Ok(None);
                            }
                        };
                        let response = self
                            .client
                            .continue_cursor(&cursor_id, &self.request.cursor_ttl)?;
                        let (cursor_id, hits) = parse_page(&response.body)?;
                        if cursor_id.is_some() {
                            self.cursor_id = cursor_id;
                        }
                        self.buffered = hits;
                        if self.buffered.is_empty() {
                            self.exhaust();
                            return Ok(None);
                        }
                    }

                    if let Some(hit) = self.buffered.pop_front() {
                        if self.rows_skipped < self.request.offset {
                            self.rows_skipped += 1;
                            continue;
                        }
                        let row =
                            decode_row(&hit, &self.request.columns, &self.request.mapped_paths);
                        self.rows_emitted += 1;
                        return Ok(Some(row));
                    }
                }
                State::Exhausted => return Ok(None),
            }
        }
    }

    fn exhaust(&mut self) {
        self.state = State::Exhausted;
        self.close_cursor();
    }

    fn close_cursor(&mut self) {
        if self.cursor_closed {
            return;
        }
        self.cursor_closed = true;
        if let Some(id) = self.cursor_id.take() {
            self.client.close_cursor(&id);
        }
    }
}

impl<T: Transport> Drop for Scan<T> {
    fn drop(&mut self) {
        // Best-effort teardown for abandoned scans.
        self.close_cursor();
    }
}

fn parse_page(body: &str) -> std::result::Result<(Option<String>, VecDeque<Value>), Error> {
    let page: Value =
        serde_json::from_str(body).map_err(|e| Error::MalformedPage(e.to_string()))?;
    let cursor_id = page
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let hits = page
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok((cursor_id, hits.into()))
}
