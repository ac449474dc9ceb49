//! Decoding of document hits into relational rows.

use super::CellValue;
use crate::{
    geo,
    schema::{resolve::is_parent_of_mapped, resolve::value_by_path, ColumnKind, ColumnSchema, ColumnType, SOURCE_COLUMN},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub(crate) fn decode_row(
    hit: &Value,
    columns: &[ColumnSchema],
    mapped_paths: &BTreeSet<String>,
) -> Vec<CellValue> {
    let source = hit.get("_source");
    columns
        .iter()
        .map(|column| decode_column(hit, source, column, mapped_paths))
        .collect()
}

fn decode_column(
    hit: &Value,
    source: Option<&Value>,
    column: &ColumnSchema,
    mapped_paths: &BTreeSet<String>,
) -> CellValue {
    match column.kind {
        ColumnKind::Id => match hit.get("_id").and_then(Value::as_str) {
            Some(id) => CellValue::Str(id.to_string()),
            None => CellValue::Null,
        },
        ColumnKind::Residual => match source.and_then(|s| collect_unmapped(s, mapped_paths)) {
            Some(unmapped) => CellValue::Str(unmapped.to_string()),
            None => CellValue::Null,
        },
        ColumnKind::Field => {
            let source = match source {
                Some(source) => source,
                None => return CellValue::Null,
            };
            let value = if column.path == SOURCE_COLUMN {
                Some(source)
            } else {
                value_by_path(source, &column.path)
            };
            match value {
                Some(value) => decode_value(value, &column.column_type, &column.external_type),
                None => CellValue::Null,
            }
        }
    }
}

pub(crate) fn decode_value(value: &Value, ty: &ColumnType, external_type: &str) -> CellValue {
    if value.is_null() {
        return CellValue::Null;
    }

    // List columns accept either a genuine array or a bare scalar wrapped as
    // a single-element list; the store itself exhibits this ambiguity. This
    // takes precedence over any external-type handling.
    if let ColumnType::List(element) = ty {
        let items = match value.as_array() {
            Some(items) => items
                .iter()
                .map(|item| decode_value(item, element, external_type))
                .collect(),
            None => vec![decode_value(value, element, external_type)],
        };
        return CellValue::List(items);
    }

    // Geo fields normalize their several input encodings to one GeoJSON
    // interchange representation.
    match external_type {
        "geo_point" => {
            return match geo::geo_point_to_geojson(value) {
                Some(geojson) => CellValue::Str(geojson.to_string()),
                None => CellValue::Null,
            }
        }
        "geo_shape" => {
            return match geo::geo_shape_to_geojson(value) {
                Some(geojson) => CellValue::Str(geojson.to_string()),
                None => CellValue::Null,
            }
        }
        _ => {}
    }

    match ty {
        ColumnType::Varchar => match value {
            Value::String(s) => CellValue::Str(s.clone()),
            // Non-string content in a string column serializes to JSON text.
            other => CellValue::Str(other.to_string()),
        },
        ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Int | ColumnType::BigInt => {
            if let Some(i) = value.as_i64() {
                CellValue::Int(i)
            } else if let Some(u) = value.as_u64() {
                CellValue::Int(u as i64)
            } else {
                CellValue::Null
            }
        }
        ColumnType::Float | ColumnType::Double => match value.as_f64() {
            Some(f) => CellValue::Float(f),
            None => CellValue::Null,
        },
        ColumnType::Bool => match value.as_bool() {
            Some(b) => CellValue::Bool(b),
            None => CellValue::Null,
        },
        ColumnType::Timestamp => decode_timestamp(value),
        ColumnType::Struct(fields) => match value.as_object() {
            Some(object) => CellValue::Struct(
                fields
                    .iter()
                    .map(|(name, child_ty)| {
                        let cell = match object.get(name) {
                            Some(child) => decode_value(child, child_ty, ""),
                            None => CellValue::Null,
                        };
                        (name.clone(), cell)
                    })
                    .collect(),
            ),
            None => CellValue::Null,
        },
        ColumnType::List(_) => CellValue::Null,
    }
}

fn decode_timestamp(value: &Value) -> CellValue {
    match value {
        Value::String(s) => match parse_timestamp(s) {
            Some(ts) => CellValue::Timestamp(ts),
            None => CellValue::Null,
        },
        // Integers are milliseconds since epoch.
        Value::Number(n) => match n.as_i64().and_then(DateTime::from_timestamp_millis) {
            Some(ts) => CellValue::Timestamp(ts.naive_utc()),
            None => CellValue::Null,
        },
        _ => CellValue::Null,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Walks the full document and extracts everything not covered by any mapped
/// path, including partial extraction from mapped object fields whose
/// children are only partially declared. Returns `None` when the document
/// holds no unmapped content.
pub(crate) fn collect_unmapped(source: &Value, mapped_paths: &BTreeSet<String>) -> Option<Value> {
    let object = source.as_object()?;
    let unmapped = unmapped_subtree(object, "", mapped_paths);
    if unmapped.is_empty() {
        None
    } else {
        Some(Value::Object(unmapped))
    }
}

fn unmapped_subtree(
    object: &Map<String, Value>,
    prefix: &str,
    mapped_paths: &BTreeSet<String>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for (field_name, field_value) in object {
        let path = if prefix.is_empty() {
            field_name.clone()
        } else {
            format!("{prefix}.{field_name}")
        };

        let is_mapped = mapped_paths.contains(&path);
        let is_parent = is_parent_of_mapped(&path, mapped_paths);

        if is_mapped && !is_parent {
            // Terminal mapped type (keyword, geo point, ...): fully covered,
            // even when its value is an object encoding.
            continue;
        }

        if is_mapped || is_parent {
            // An object with declared children: keep only whatever the
            // declaration does not cover.
            if let Some(child_object) = field_value.as_object() {
                let sub = unmapped_subtree(child_object, &path, mapped_paths);
                if !sub.is_empty() {
                    out.insert(field_name.clone(), Value::Object(sub));
                }
            }
            continue;
        }

        // Completely unmapped: take the whole value.
        out.insert(field_name.clone(), field_value.clone());
    }

    out
}
