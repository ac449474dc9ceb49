use super::{
    ColumnKind, ColumnSchema, ColumnType, Error, Result, Schema, ID_COLUMN, RESIDUAL_COLUMN,
    SOURCE_COLUMN,
};
use crate::client::{RetryClient, Transport};
use serde_json::{json, Value};
use std::collections::{hash_map::Entry, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Cursor keep-alive used for sampling requests; sampling sessions are short.
const SAMPLE_CURSOR_TTL: &str = "1m";

/// Resolves a [`Schema`] for a (possibly wildcard) collection name.
///
/// The mapping fetch is fatal on failure; sampling degrades silently and is
/// treated conservatively as "no arrays, no residual content detected".
pub fn resolve<T: Transport>(
    client: &RetryClient<T>,
    collection: &str,
    base_query: Option<&Value>,
    sample_size: u32,
) -> Result<Schema> {
    let response = client
        .fetch_mapping(collection)
        .map_err(|source| Error::MappingFetch {
            collection: collection.to_string(),
            source,
        })?;

    let root: Value = serde_json::from_str(&response.body)
        .map_err(|e| Error::MalformedMapping(e.to_string()))?;
    let root = root
        .as_object()
        .ok_or_else(|| Error::MalformedMapping("expected a JSON object".to_string()))?;

    // Declared-type pass: merge field declarations across every matched
    // physical collection, preserving first-seen order.
    let mut merged: HashMap<String, MergedField> = HashMap::new();
    let mut field_order: Vec<String> = Vec::new();
    let mut mapped_paths = BTreeSet::new();
    let mut path_types = HashMap::new();
    let mut text_fields = HashSet::new();
    let mut text_fields_with_keyword = HashSet::new();

    for (collection_name, body) in root {
        let properties = match body.pointer("/mappings/properties").and_then(Value::as_object) {
            Some(p) => p,
            None => continue,
        };

        collect_paths(
            properties,
            "",
            &mut mapped_paths,
            &mut path_types,
            &mut text_fields,
            &mut text_fields_with_keyword,
        );

        for (field_name, field_def) in properties {
            let column_type = column_type_for_field(field_def);
            let external_type = external_type_tag(field_def);

            match merged.entry(field_name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(MergedField {
                        column_type,
                        external_type,
                        first_collection: collection_name.clone(),
                    });
                    field_order.push(field_name.clone());
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if !types_compatible(&existing.column_type, &column_type) {
                        return Err(Error::IncompatibleFieldTypes {
                            path: field_name.clone(),
                            first_collection: existing.first_collection.clone(),
                            first_type: existing.column_type.to_string(),
                            second_collection: collection_name.clone(),
                            second_type: column_type.to_string(),
                        });
                    }
                    existing.column_type =
                        merge_struct_types(existing.column_type.clone(), column_type);
                }
            }
        }
    }

    // Runtime-sample pass: upgrade columns whose values were observed as
    // arrays. Geo fields are skipped since their array form encodes
    // coordinates, not repetition.
    if sample_size > 0 && !field_order.is_empty() {
        let sample = sample_documents(
            client,
            collection,
            base_query,
            &field_order,
            &merged,
            &mapped_paths,
            sample_size,
        );
        for path in &sample.array_paths {
            if let Some(field) = merged.get_mut(path) {
                field.column_type = field.column_type.clone().into_list();
            }
        }
    }

    let mut columns = Vec::with_capacity(field_order.len() + 2);
    columns.push(ColumnSchema {
        name: ID_COLUMN.to_string(),
        path: ID_COLUMN.to_string(),
        column_type: ColumnType::Varchar,
        external_type: String::new(),
        kind: ColumnKind::Id,
        full_text: false,
        exact_match_companion: false,
    });

    if field_order.is_empty() {
        // A store with no declared fields must still be queryable: fall back
        // to one opaque JSON-string column holding the whole document.
        debug!(collection, "mapping declared no fields, emitting source fallback");
        columns.push(ColumnSchema {
            name: SOURCE_COLUMN.to_string(),
            path: SOURCE_COLUMN.to_string(),
            column_type: ColumnType::Varchar,
            external_type: "object".to_string(),
            kind: ColumnKind::Field,
            full_text: false,
            exact_match_companion: false,
        });
    } else {
        for path in &field_order {
            let field = &merged[path];
            columns.push(ColumnSchema {
                name: path.clone(),
                path: path.clone(),
                column_type: field.column_type.clone(),
                external_type: field.external_type.clone(),
                kind: ColumnKind::Field,
                full_text: text_fields.contains(path),
                exact_match_companion: text_fields_with_keyword.contains(path),
            });
        }
    }

    columns.push(ColumnSchema {
        name: RESIDUAL_COLUMN.to_string(),
        path: RESIDUAL_COLUMN.to_string(),
        column_type: ColumnType::Varchar,
        external_type: String::new(),
        kind: ColumnKind::Residual,
        full_text: false,
        exact_match_companion: false,
    });

    Ok(Schema {
        columns,
        mapped_paths,
        path_types,
        text_fields,
        text_fields_with_keyword,
    })
}

struct MergedField {
    column_type: ColumnType,
    external_type: String,
    first_collection: String,
}

/// Maps one declared field definition to its relational type.
fn column_type_for_field(field_def: &Value) -> ColumnType {
    let declared = field_def.get("type").and_then(Value::as_str);
    let properties = field_def.get("properties").and_then(Value::as_object);

    match declared {
        Some("nested") => match properties {
            Some(p) => ColumnType::List(Box::new(struct_type_from_properties(p))),
            None => ColumnType::List(Box::new(ColumnType::Varchar)),
        },
        Some("object") | None => match properties {
            Some(p) => struct_type_from_properties(p),
            // An object with no declared children falls back to an opaque
            // JSON-string column.
            None => ColumnType::Varchar,
        },
        Some("long") => ColumnType::BigInt,
        Some("integer") => ColumnType::Int,
        Some("short") => ColumnType::SmallInt,
        Some("byte") => ColumnType::TinyInt,
        Some("double") => ColumnType::Double,
        Some("float") | Some("half_float") => ColumnType::Float,
        Some("boolean") => ColumnType::Bool,
        Some("date") => ColumnType::Timestamp,
        // text, keyword, string, ip, geo_point, geo_shape and anything
        // unknown all carry string values relationally; geo columns hold
        // normalized GeoJSON.
        Some(_) => ColumnType::Varchar,
    }
}

fn struct_type_from_properties(properties: &serde_json::Map<String, Value>) -> ColumnType {
    if properties.is_empty() {
        return ColumnType::Varchar;
    }
    ColumnType::Struct(
        properties
            .iter()
            .map(|(name, def)| (name.clone(), column_type_for_field(def)))
            .collect(),
    )
}

fn external_type_tag(field_def: &Value) -> String {
    match field_def.get("type").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None if field_def.get("properties").is_some() => "object".to_string(),
        None => String::new(),
    }
}

/// Walks mapping properties recursively, collecting every path, its external
/// type tag, the full-text paths and those with an exact-match companion.
fn collect_paths(
    properties: &serde_json::Map<String, Value>,
    prefix: &str,
    mapped_paths: &mut BTreeSet<String>,
    path_types: &mut HashMap<String, String>,
    text_fields: &mut HashSet<String>,
    text_fields_with_keyword: &mut HashSet<String>,
) {
    for (field_name, field_def) in properties {
        let path = if prefix.is_empty() {
            field_name.clone()
        } else {
            format!("{prefix}.{field_name}")
        };

        if let Some(declared) = field_def.get("type").and_then(Value::as_str) {
            path_types.insert(path.clone(), declared.to_string());
            if declared == "text" {
                text_fields.insert(path.clone());
                if has_keyword_subfield(field_def) {
                    text_fields_with_keyword.insert(path.clone());
                }
            }
        }

        mapped_paths.insert(path.clone());

        if let Some(children) = field_def.get("properties").and_then(Value::as_object) {
            collect_paths(
                children,
                &path,
                mapped_paths,
                path_types,
                text_fields,
                text_fields_with_keyword,
            );
        }
    }
}

fn has_keyword_subfield(field_def: &Value) -> bool {
    field_def
        .pointer("/fields/keyword/type")
        .and_then(Value::as_str)
        == Some("keyword")
}

/// Same type id recursively: struct vs list vs primitive. Struct compatibility
/// checks only the overlapping children; differing field sets merge later.
fn types_compatible(a: &ColumnType, b: &ColumnType) -> bool {
    match (a, b) {
        (ColumnType::Struct(fields_a), ColumnType::Struct(fields_b)) => {
            let by_name: HashMap<&str, &ColumnType> = fields_b
                .iter()
                .map(|(name, ty)| (name.as_str(), ty))
                .collect();
            fields_a.iter().all(|(name, ty)| match by_name.get(name.as_str()) {
                Some(other) => types_compatible(ty, other),
                None => true,
            })
        }
        (ColumnType::List(a), ColumnType::List(b)) => types_compatible(a, b),
        (ColumnType::Struct(_), _) | (_, ColumnType::Struct(_)) => false,
        (ColumnType::List(_), _) | (_, ColumnType::List(_)) => false,
        (a, b) => a == b,
    }
}

/// Merges two struct types by unioning their field sets, preserving
/// first-seen field order and recursing into shared struct children. Inputs
/// must already be compatible.
fn merge_struct_types(a: ColumnType, b: ColumnType) -> ColumnType {
    let (fields_a, fields_b) = match (a, b) {
        (ColumnType::Struct(fa), ColumnType::Struct(fb)) => (fa, fb),
        (a, _) => return a,
    };

    let mut order: Vec<String> = fields_a.iter().map(|(name, _)| name.clone()).collect();
    let mut by_name: HashMap<String, ColumnType> = fields_a.into_iter().collect();

    for (name, ty) in fields_b {
        match by_name.remove(&name) {
            Some(existing) => {
                by_name.insert(name, merge_struct_types(existing, ty));
            }
            None => {
                by_name.insert(name.clone(), ty);
                order.push(name);
            }
        }
    }

    ColumnType::Struct(
        order
            .into_iter()
            .map(|name| {
                let ty = by_name
                    .remove(&name)
                    .unwrap_or(ColumnType::Varchar);
                (name, ty)
            })
            .collect(),
    )
}

/// What the runtime-sample pass learned.
#[derive(Debug, Default, PartialEq)]
struct SampleOutcome {
    /// Paths where at least one sampled document contained an array.
    array_paths: HashSet<String>,
    /// Whether any sampled document carried content outside the mapping.
    saw_residual_content: bool,
}

/// Fetches up to `sample_size` documents through a bounded cursor and checks
/// every non-geo field path for array values, plus the presence of content
/// not covered by the mapping. Short-circuits once every trackable condition
/// is resolved. Failures are non-fatal and yield the conservative default.
fn sample_documents<T: Transport>(
    client: &RetryClient<T>,
    collection: &str,
    base_query: Option<&Value>,
    field_order: &[String],
    merged: &HashMap<String, MergedField>,
    mapped_paths: &BTreeSet<String>,
    sample_size: u32,
) -> SampleOutcome {
    let mut outcome = SampleOutcome::default();

    let skip_paths: HashSet<&str> = field_order
        .iter()
        .filter(|path| {
            matches!(
                merged[path.as_str()].external_type.as_str(),
                "geo_point" | "geo_shape"
            )
        })
        .map(String::as_str)
        .collect();

    let query = match base_query {
        Some(clause) => json!({ "query": clause }),
        None => json!({ "query": { "match_all": {} } }),
    }
    .to_string();

    let mut response =
        match client.open_cursor(collection, &query, SAMPLE_CURSOR_TTL, sample_size) {
            Ok(response) => response,
            Err(e) => {
                warn!(collection, error = %e, "sampling failed, assuming scalar fields");
                return outcome;
            }
        };

    let all_detected = |outcome: &SampleOutcome| {
        outcome.array_paths.len() + skip_paths.len() >= field_order.len()
            && outcome.saw_residual_content
    };

    let mut docs_remaining = sample_size as i64;
    let mut cursor_id: Option<String> = None;

    while docs_remaining > 0 && !all_detected(&outcome) {
        let page: Value = match serde_json::from_str(&response.body) {
            Ok(page) => page,
            Err(_) => break,
        };

        if let Some(id) = page.get("_scroll_id").and_then(Value::as_str) {
            cursor_id = Some(id.to_string());
        }

        let hits = match page.pointer("/hits/hits").and_then(Value::as_array) {
            Some(hits) if !hits.is_empty() => hits,
            _ => break,
        };

        for hit in hits {
            if docs_remaining <= 0 || all_detected(&outcome) {
                break;
            }
            let source = match hit.get("_source") {
                Some(source) => source,
                None => continue,
            };
            docs_remaining -= 1;

            if !outcome.saw_residual_content {
                outcome.saw_residual_content = has_residual_content(source, "", mapped_paths);
            }

            for path in field_order {
                if skip_paths.contains(path.as_str()) || outcome.array_paths.contains(path) {
                    continue;
                }
                if matches!(value_by_path(source, path), Some(Value::Array(_))) {
                    outcome.array_paths.insert(path.clone());
                }
            }
        }

        let id = match (&cursor_id, docs_remaining > 0 && !all_detected(&outcome)) {
            (Some(id), true) => id.clone(),
            _ => break,
        };
        response = match client.continue_cursor(&id, SAMPLE_CURSOR_TTL) {
            Ok(response) => response,
            Err(_) => break,
        };
    }

    if let Some(id) = &cursor_id {
        client.close_cursor(id);
    }

    outcome
}

/// Whether the object holds any content not covered by the mapped paths.
fn has_residual_content(value: &Value, prefix: &str, mapped_paths: &BTreeSet<String>) -> bool {
    let object = match value.as_object() {
        Some(object) => object,
        None => return false,
    };

    for (field_name, field_value) in object {
        let path = if prefix.is_empty() {
            field_name.clone()
        } else {
            format!("{prefix}.{field_name}")
        };

        let is_mapped = mapped_paths.contains(&path);
        let is_parent = is_parent_of_mapped(&path, mapped_paths);

        if !is_mapped && !is_parent {
            return true;
        }
        // Recurse into objects that declare children; mapped terminal types
        // (geo points and the like) hold opaque object encodings.
        if is_parent && field_value.is_object() && has_residual_content(field_value, &path, mapped_paths)
        {
            return true;
        }
    }
    false
}

pub(crate) fn is_parent_of_mapped(path: &str, mapped_paths: &BTreeSet<String>) -> bool {
    let prefix = format!("{path}.");
    mapped_paths.iter().any(|mapped| mapped.starts_with(&prefix))
}

/// Dotted-path traversal; intermediate segments must be objects.
pub(crate) fn value_by_path<'a>(object: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = object;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            current = current.as_object()?.get(segment)?;
            if !current.is_object() {
                return None;
            }
        } else {
            return current.as_object()?.get(segment);
        }
    }
    None
}
