use super::{
    ComparisonOp, ConjunctionOp, Error, FilterSet, GeoRelation, Literal, Predicate, Result,
};
use crate::schema::Schema;
use serde_json::{json, Map, Value};

/// Translates a whole filter set into one query-DSL fragment. `Ok(None)`
/// means nothing could be pushed down; the caller then relies on the store
/// returning a superset and filtering locally.
pub fn translate_filter_set(filters: &FilterSet, schema: &Schema) -> Result<Option<Value>> {
    let mut translated = Vec::new();
    for (column, predicate) in filters {
        if let Some(fragment) = translate_predicate(predicate, column, schema)? {
            translated.push(fragment);
        }
    }
    Ok(combine_required(translated))
}

/// Checks a filter set for unsafe pushdowns without building the fragment, so
/// that plan compilation can fail before any cursor is opened.
pub fn validate_filter_set(filters: &FilterSet, schema: &Schema) -> Result<()> {
    for (column, predicate) in filters {
        validate_predicate(predicate, column, schema)?;
    }
    Ok(())
}

fn validate_predicate(predicate: &Predicate, field: &str, schema: &Schema) -> Result<()> {
    match predicate {
        Predicate::Comparison { .. } | Predicate::SetMembership { .. } | Predicate::Pattern { .. } => {
            require_filterable(field, schema)
        }
        Predicate::Conjunction { children, .. } => {
            for child in children {
                validate_predicate(child, field, schema)?;
            }
            Ok(())
        }
        Predicate::Nested { field: segment, inner } => {
            validate_predicate(inner, &format!("{field}.{segment}"), schema)
        }
        Predicate::IsNull | Predicate::IsNotNull | Predicate::Geo { .. } | Predicate::Opaque => {
            Ok(())
        }
    }
}

/// Translates one predicate against the given field path. `Ok(None)` marks
/// the predicate untranslatable (left for the caller to evaluate); errors are
/// reserved for predicates that must not be pushed down at all.
pub fn translate_predicate(
    predicate: &Predicate,
    field: &str,
    schema: &Schema,
) -> Result<Option<Value>> {
    match predicate {
        Predicate::Comparison { op, constant } => translate_comparison(*op, constant, field, schema),
        Predicate::Conjunction { op, children } => {
            translate_conjunction(*op, children, field, schema)
        }
        Predicate::SetMembership { constants } => {
            translate_set_membership(constants, field, schema)
        }
        Predicate::IsNull => Ok(Some(json!({
            "bool": { "must_not": { "exists": { "field": field } } }
        }))),
        Predicate::IsNotNull => Ok(Some(json!({ "exists": { "field": field } }))),
        Predicate::Pattern {
            pattern,
            case_insensitive,
        } => translate_pattern(pattern, *case_insensitive, field, schema),
        Predicate::Nested { field: segment, inner } => {
            // Unwrap one path segment and recurse; path metadata is keyed by
            // full dotted paths, so the extended path looks up correctly.
            translate_predicate(inner, &format!("{field}.{segment}"), schema)
        }
        Predicate::Geo {
            relation,
            field_first,
            geometry,
        } => Ok(translate_geo(*relation, *field_first, geometry, field)),
        Predicate::Opaque => Ok(None),
    }
}

/// Exact and range queries on an analyzed text field are only safe against
/// its exact-match companion. Without one, this is a hard error rather than a
/// silent downgrade to wrong results.
fn require_filterable(field: &str, schema: &Schema) -> Result<()> {
    if schema.is_text(field) && !schema.has_exact_match_companion(field) {
        return Err(Error::TextFieldWithoutKeyword(field.to_string()));
    }
    Ok(())
}

/// The field to target in exact-match and range queries: the `.keyword`
/// companion for text fields, the field itself otherwise.
fn target_field(field: &str, schema: &Schema) -> String {
    if schema.is_text(field) && schema.has_exact_match_companion(field) {
        format!("{field}.keyword")
    } else {
        field.to_string()
    }
}

/// Builds a single-entry object with a runtime key.
fn keyed(key: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(key.to_string(), value);
    Value::Object(object)
}

fn translate_comparison(
    op: ComparisonOp,
    constant: &Literal,
    field: &str,
    schema: &Schema,
) -> Result<Option<Value>> {
    require_filterable(field, schema)?;
    let target = target_field(field, schema);
    let value = constant.to_json();

    let fragment = match op {
        ComparisonOp::Eq => keyed("term", keyed(&target, value)),
        ComparisonOp::NotEq => json!({
            "bool": { "must_not": keyed("term", keyed(&target, value)) }
        }),
        ComparisonOp::Gt => keyed("range", keyed(&target, json!({ "gt": value }))),
        ComparisonOp::GtEq => keyed("range", keyed(&target, json!({ "gte": value }))),
        ComparisonOp::Lt => keyed("range", keyed(&target, json!({ "lt": value }))),
        ComparisonOp::LtEq => keyed("range", keyed(&target, json!({ "lte": value }))),
    };
    Ok(Some(fragment))
}

fn translate_conjunction(
    op: ConjunctionOp,
    children: &[Predicate],
    field: &str,
    schema: &Schema,
) -> Result<Option<Value>> {
    let mut translated = Vec::new();
    for child in children {
        if let Some(fragment) = translate_predicate(child, field, schema)? {
            translated.push(fragment);
        }
    }

    Ok(match op {
        ConjunctionOp::And => combine_required(translated),
        ConjunctionOp::Or => combine_any_of(translated),
    })
}

/// AND combination: zero children is untranslatable, one is returned
/// unwrapped, more become a `bool.must`.
fn combine_required(mut fragments: Vec<Value>) -> Option<Value> {
    match fragments.len() {
        0 => None,
        1 => fragments.pop(),
        _ => Some(json!({ "bool": { "must": fragments } })),
    }
}

/// OR combination with a minimum-match-one constraint, same single-child
/// shortcut as AND.
fn combine_any_of(mut fragments: Vec<Value>) -> Option<Value> {
    match fragments.len() {
        0 => None,
        1 => fragments.pop(),
        _ => Some(json!({
            "bool": { "should": fragments, "minimum_should_match": 1 }
        })),
    }
}

fn translate_set_membership(
    constants: &[Literal],
    field: &str,
    schema: &Schema,
) -> Result<Option<Value>> {
    require_filterable(field, schema)?;
    let target = target_field(field, schema);
    let values: Vec<Value> = constants.iter().map(Literal::to_json).collect();
    Ok(Some(keyed("terms", keyed(&target, Value::Array(values)))))
}

/// One element of a parsed wildcard pattern.
enum PatternToken {
    Literal(char),
    AnyRun,
    AnyChar,
}

/// Parses SQL wildcard syntax: `%` any run, `_` any char, `\` escapes the
/// next character.
fn parse_pattern(pattern: &str) -> Vec<PatternToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => tokens.push(PatternToken::AnyRun),
            '_' => tokens.push(PatternToken::AnyChar),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    tokens.push(PatternToken::Literal(escaped));
                }
            }
            other => tokens.push(PatternToken::Literal(other)),
        }
    }
    tokens
}

fn translate_pattern(
    pattern: &str,
    case_insensitive: bool,
    field: &str,
    schema: &Schema,
) -> Result<Option<Value>> {
    require_filterable(field, schema)?;
    let target = target_field(field, schema);
    let tokens = parse_pattern(pattern);

    let wildcard_count = tokens
        .iter()
        .filter(|t| !matches!(t, PatternToken::Literal(_)))
        .count();

    // Tier 1: no wildcards at all, exact match on the unescaped text.
    if wildcard_count == 0 {
        let text: String = tokens
            .iter()
            .filter_map(|t| match t {
                PatternToken::Literal(c) => Some(*c),
                _ => None,
            })
            .collect();
        let fragment = if case_insensitive {
            keyed(
                "term",
                keyed(&target, json!({ "value": text, "case_insensitive": true })),
            )
        } else {
            keyed("term", keyed(&target, Value::from(text)))
        };
        return Ok(Some(fragment));
    }

    // Tier 2: a single trailing any-run, cheaper as a native prefix query.
    if wildcard_count == 1 && matches!(tokens.last(), Some(PatternToken::AnyRun)) {
        let prefix: String = tokens[..tokens.len() - 1]
            .iter()
            .filter_map(|t| match t {
                PatternToken::Literal(c) => Some(*c),
                _ => None,
            })
            .collect();
        let mut options = Map::new();
        options.insert("value".to_string(), Value::from(prefix));
        if case_insensitive {
            options.insert("case_insensitive".to_string(), Value::from(true));
        }
        return Ok(Some(keyed("prefix", keyed(&target, Value::Object(options)))));
    }

    // Tier 3: general wildcard query. Literal `*` and `?` from the source
    // pattern are escaped so they keep their literal meaning.
    let mut wildcard = String::with_capacity(pattern.len());
    for token in &tokens {
        match token {
            PatternToken::AnyRun => wildcard.push('*'),
            PatternToken::AnyChar => wildcard.push('?'),
            PatternToken::Literal(c @ ('*' | '?')) => {
                wildcard.push('\\');
                wildcard.push(*c);
            }
            PatternToken::Literal(c) => wildcard.push(*c),
        }
    }
    let mut options = Map::new();
    options.insert("value".to_string(), Value::from(wildcard));
    if case_insensitive {
        options.insert("case_insensitive".to_string(), Value::from(true));
    }
    Ok(Some(keyed("wildcard", keyed(&target, Value::Object(options)))))
}

/// Translates a spatial relation. The geometry must be a constant GeoJSON
/// object; anything else is untranslatable rather than wrong.
fn translate_geo(
    relation: GeoRelation,
    field_first: bool,
    geometry: &Value,
    field: &str,
) -> Option<Value> {
    if !geometry.is_object() {
        return None;
    }

    // Normalize for operand order: within(g, field) means the field contains
    // g, and contains(g, field) means the field is within g. Intersects and
    // disjoint are symmetric.
    let effective = match (relation, field_first) {
        (GeoRelation::Within, true) | (GeoRelation::Contains, false) => GeoRelation::Within,
        (GeoRelation::Within, false) | (GeoRelation::Contains, true) => GeoRelation::Contains,
        (GeoRelation::Intersects, _) => GeoRelation::Intersects,
        (GeoRelation::Disjoint, _) => GeoRelation::Disjoint,
    };

    // An axis-aligned rectangle containing the field has a cheaper native
    // bounding-box form.
    if effective == GeoRelation::Within {
        if let Some(fragment) = bounding_box_query(geometry, field) {
            return Some(fragment);
        }
    }

    let relation_tag = match effective {
        GeoRelation::Within => "within",
        GeoRelation::Contains => "contains",
        GeoRelation::Intersects => "intersects",
        GeoRelation::Disjoint => "disjoint",
    };

    Some(keyed(
        "geo_shape",
        keyed(
            field,
            json!({ "shape": geometry, "relation": relation_tag }),
        ),
    ))
}

/// Recognizes an `envelope` geometry (`[[xmin, ymax], [xmax, ymin]]`) and
/// builds the native bounding-box query for it.
fn bounding_box_query(geometry: &Value, field: &str) -> Option<Value> {
    if geometry.get("type").and_then(Value::as_str) != Some("envelope") {
        return None;
    }
    let coordinates = geometry.get("coordinates").and_then(Value::as_array)?;
    if coordinates.len() != 2 {
        return None;
    }
    let top_left = coordinates[0].as_array()?;
    let bottom_right = coordinates[1].as_array()?;

    let xmin = top_left.first().and_then(Value::as_f64)?;
    let ymax = top_left.get(1).and_then(Value::as_f64)?;
    let xmax = bottom_right.first().and_then(Value::as_f64)?;
    let ymin = bottom_right.get(1).and_then(Value::as_f64)?;

    Some(keyed(
        "geo_bounding_box",
        keyed(
            field,
            json!({
                "top_left": { "lat": ymax, "lon": xmin },
                "bottom_right": { "lat": ymin, "lon": xmax }
            }),
        ),
    ))
}
