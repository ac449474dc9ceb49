//! Normalization of the store's geospatial encodings into GeoJSON values.
//!
//! Point fields arrive as lat/lon objects, `[lon, lat]` arrays, `"lat,lon"`
//! strings or WKT; shape fields arrive as GeoJSON objects or WKT strings. All
//! of them decode to a GeoJSON value so downstream consumers see one format.

use serde_json::{json, Value};

/// Converts a point field value to a GeoJSON Point. Returns `None` for
/// unparseable input (e.g. geohash strings), which decodes to NULL.
pub(crate) fn geo_point_to_geojson(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let lat = map.get("lat").and_then(Value::as_f64)?;
            let lon = map.get("lon").and_then(Value::as_f64)?;
            Some(point(lon, lat))
        }
        Value::Array(items) => {
            // [lon, lat] order.
            let lon = items.first().and_then(Value::as_f64)?;
            let lat = items.get(1).and_then(Value::as_f64)?;
            Some(point(lon, lat))
        }
        Value::String(s) => {
            if s.trim_start().starts_with("POINT") {
                return wkt_to_geojson(s);
            }
            // "lat,lon" string form.
            let (lat, lon) = s.split_once(',')?;
            let lat = lat.trim().parse::<f64>().ok()?;
            let lon = lon.trim().parse::<f64>().ok()?;
            Some(point(lon, lat))
        }
        _ => None,
    }
}

/// Converts a shape field value to GeoJSON: WKT strings are parsed, objects
/// are assumed to already be GeoJSON and pass through unchanged.
pub(crate) fn geo_shape_to_geojson(value: &Value) -> Option<Value> {
    match value {
        Value::String(wkt) => wkt_to_geojson(wkt),
        Value::Object(_) => Some(value.clone()),
        _ => None,
    }
}

/// Parses an uppercase-keyword WKT string into a GeoJSON value.
pub(crate) fn wkt_to_geojson(wkt: &str) -> Option<Value> {
    let trimmed = wkt.trim();
    if trimmed.starts_with("GEOMETRYCOLLECTION") {
        geometry_collection(trimmed)
    } else if trimmed.starts_with("MULTIPOLYGON") {
        multi_polygon(trimmed)
    } else if trimmed.starts_with("MULTILINESTRING") {
        multi_line_string(trimmed)
    } else if trimmed.starts_with("MULTIPOINT") {
        multi_point(trimmed)
    } else if trimmed.starts_with("POLYGON") {
        polygon(trimmed).map(|rings| json!({ "type": "Polygon", "coordinates": rings }))
    } else if trimmed.starts_with("LINESTRING") {
        let coords = coordinate_sequence(body_of(trimmed)?)?;
        Some(json!({ "type": "LineString", "coordinates": coords }))
    } else if trimmed.starts_with("POINT") {
        let (lon, lat) = coordinate(body_of(trimmed)?)?;
        Some(point(lon, lat))
    } else {
        None
    }
}

fn point(lon: f64, lat: f64) -> Value {
    json!({ "type": "Point", "coordinates": [lon, lat] })
}

/// The text between the first '(' and the last ')'.
fn body_of(wkt: &str) -> Option<&str> {
    let open = wkt.find('(')?;
    let close = wkt.rfind(')')?;
    if close <= open {
        return None;
    }
    Some(&wkt[open + 1..close])
}

/// Parses a "lon lat" pair.
fn coordinate(s: &str) -> Option<(f64, f64)> {
    let mut parts = s.split_whitespace();
    let lon = parts.next()?.parse::<f64>().ok()?;
    let lat = parts.next()?.parse::<f64>().ok()?;
    Some((lon, lat))
}

/// Parses "lon1 lat1, lon2 lat2, ..." into a coordinate array.
fn coordinate_sequence(s: &str) -> Option<Vec<Value>> {
    s.split(',')
        .map(|pair| coordinate(pair).map(|(lon, lat)| json!([lon, lat])))
        .collect()
}

/// Index of the ')' matching the '(' at `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s[open + 1..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + 1 + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Collects the contents of every top-level parenthesized group in `s`.
fn paren_groups(s: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut pos = 0usize;
    while let Some(rel) = s[pos..].find('(') {
        let open = pos + rel;
        let close = matching_paren(s, open)?;
        groups.push(&s[open + 1..close]);
        pos = close + 1;
    }
    Some(groups)
}

fn polygon(wkt: &str) -> Option<Vec<Value>> {
    let body = body_of(wkt)?;
    paren_groups(body)?
        .into_iter()
        .map(|ring| coordinate_sequence(ring).map(Value::Array))
        .collect()
}

fn multi_point(wkt: &str) -> Option<Value> {
    let body = body_of(wkt)?;
    let coords = if body.contains('(') {
        // ((lon lat), (lon lat)) form.
        paren_groups(body)?
            .into_iter()
            .map(|p| coordinate(p).map(|(lon, lat)| json!([lon, lat])))
            .collect::<Option<Vec<_>>>()?
    } else {
        // (lon1 lat1, lon2 lat2) form.
        coordinate_sequence(body)?
    };
    Some(json!({ "type": "MultiPoint", "coordinates": coords }))
}

fn multi_line_string(wkt: &str) -> Option<Value> {
    let body = body_of(wkt)?;
    let lines = paren_groups(body)?
        .into_iter()
        .map(|line| coordinate_sequence(line).map(Value::Array))
        .collect::<Option<Vec<_>>>()?;
    Some(json!({ "type": "MultiLineString", "coordinates": lines }))
}

fn multi_polygon(wkt: &str) -> Option<Value> {
    let body = body_of(wkt)?;
    let polygons = paren_groups(body)?
        .into_iter()
        .map(|rings| {
            paren_groups(rings)?
                .into_iter()
                .map(|ring| coordinate_sequence(ring).map(Value::Array))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        })
        .collect::<Option<Vec<_>>>()?;
    Some(json!({ "type": "MultiPolygon", "coordinates": polygons }))
}

fn geometry_collection(wkt: &str) -> Option<Value> {
    let body = body_of(wkt)?;
    let mut geometries = Vec::new();
    let mut pos = 0usize;

    while pos < body.len() {
        // Skip separators between member geometries.
        let rest = &body[pos..];
        let skip = rest
            .find(|c: char| !c.is_whitespace() && c != ',')
            .unwrap_or(rest.len());
        pos += skip;
        if pos >= body.len() {
            break;
        }

        let open_rel = body[pos..].find('(')?;
        let open = pos + open_rel;
        let close = matching_paren(body, open)?;
        geometries.push(wkt_to_geojson(&body[pos..=close])?);
        pos = close + 1;
    }

    Some(json!({ "type": "GeometryCollection", "geometries": geometries }))
}
