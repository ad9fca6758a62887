//! Converts untyped source rows into typed records.
//!
//! Numeric fields default to 0 and text fields to empty when absent.
//! Identifiers are never defaulted: a row without a usable identifier is
//! rejected with a [`NormalizationError`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::NormalizationError;
use crate::fetch::RawRow;
use crate::report::types::{
    AccidentCounts, Coordinates, InjuryCounts, ReportMetadata, SegmentRow, StatRow,
};

const SEGMENT_ID: &[&str] = &["segment_id", "road_segment_id", "id"];
const ROAD_ID: &[&str] = &["road", "road_id", "road_number"];
const SEGMENT_NAME: &[&str] = &["road_segment_name", "segment_name", "name"];
const START_COORDS: &[&str] = &["from_coordinates", "start_coordinates"];
const END_COORDS: &[&str] = &["to_coordinates", "end_coordinates"];

const FATAL: &[&str] = &["severity_fatal_count", "fatal"];
const SEVERE: &[&str] = &["severity_severe_count", "severe"];
const LIGHT: &[&str] = &["severity_light_count", "light"];
const KILLED: &[&str] = &["killed_count", "fatal_injuries"];
const SEVERE_INJURED: &[&str] = &["severe_injured_count", "severe_injuries"];
const LIGHT_INJURED: &[&str] = &["light_injured_count", "light_injuries"];

const ACCIDENT_WIDGET: &str = "accident_count_by_severity";
const INJURY_WIDGET: &str = "injured_count_by_severity";

/// Normalizes one row of the road segments source.
pub fn normalize_segment(row: &RawRow) -> Result<SegmentRow, NormalizationError> {
    let segment_id = required_id(row, "segment_id", SEGMENT_ID)?;
    let road = required_id(row, "road", ROAD_ID)?;

    let from_km = number(row, &["from_km"]);
    let to_km = number(row, &["to_km"]);
    let length_km = match lookup(row, &["length_km"]).and_then(as_f64) {
        Some(length) => length.abs(),
        None => (to_km - from_km).abs(),
    };

    Ok(SegmentRow {
        segment_id,
        road,
        name: text(row, SEGMENT_NAME),
        from_km,
        to_km,
        from_name: text(row, &["from_name"]),
        to_name: text(row, &["to_name"]),
        length_km: finite_or_zero(length_km),
        start: coordinates_field(row, START_COORDS),
        end: coordinates_field(row, END_COORDS),
    })
}

/// Normalizes one row of the infographics source.
///
/// Accepts either a flat row carrying the counts directly, or a row whose
/// `data` field (a JSON string or object) holds `meta.location_info` and
/// the severity widgets.
pub fn normalize_stat(row: &RawRow) -> Result<StatRow, NormalizationError> {
    match lookup(row, &["data"]) {
        Some(data) => normalize_infographic(&embedded_payload(data)?),
        None => Ok(flat_stat(row, required_id(row, "segment_id", SEGMENT_ID)?)),
    }
}

/// Applies `normalize` to every row, dropping and logging the failures.
/// Returns the good records and the number of rows skipped.
pub fn normalize_all<T, F>(rows: &[RawRow], kind: &str, normalize: F) -> (Vec<T>, usize)
where
    F: Fn(&RawRow) -> Result<T, NormalizationError>,
{
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for (index, row) in rows.iter().enumerate() {
        match normalize(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(kind, index, error = %e, "Skipping row");
            }
        }
    }

    (records, skipped)
}

/// Reads the report period from the first infographics row.
///
/// Missing or malformed metadata yields an empty [`ReportMetadata`].
pub fn extract_metadata(rows: &[RawRow]) -> ReportMetadata {
    let Some(dates) = rows
        .first()
        .and_then(|row| lookup(row, &["data"]))
        .and_then(|data| embedded_payload(data).ok())
        .and_then(|payload| payload.pointer("/meta/dates_comment").cloned())
    else {
        debug!("No dates_comment metadata in infographics data");
        return ReportMetadata::default();
    };

    let date_range = dates
        .get("date_range")
        .and_then(Value::as_array)
        .map(|years| years.iter().filter_map(as_year).collect())
        .unwrap_or_default();

    let last_update = dates
        .get("last_update")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    ReportMetadata {
        date_range,
        last_update,
    }
}

fn normalize_infographic(payload: &Value) -> Result<StatRow, NormalizationError> {
    let location = payload
        .pointer("/meta/location_info")
        .and_then(Value::as_object)
        .ok_or(NormalizationError::MissingField("meta.location_info"))?;

    let segment_id = required_id(location, "road_segment_id", &["road_segment_id"])?;

    let mut items = widget_items(payload, ACCIDENT_WIDGET);
    items.extend(widget_items(payload, INJURY_WIDGET));

    let mut stat = flat_stat(&items, segment_id);
    if stat.segment_name.is_empty() {
        stat.segment_name = text(location, &["road_segment_name"]);
    }
    Ok(stat)
}

fn flat_stat(row: &RawRow, segment_id: String) -> StatRow {
    StatRow {
        segment_id,
        segment_name: text(row, SEGMENT_NAME),
        accidents: AccidentCounts {
            fatal: count(row, FATAL),
            severe: count(row, SEVERE),
            light: count(row, LIGHT),
        },
        injuries: InjuryCounts {
            killed: count(row, KILLED),
            severe: count(row, SEVERE_INJURED),
            light: count(row, LIGHT_INJURED),
        },
        start_year: lookup(row, &["start_year"]).and_then(as_year),
        end_year: lookup(row, &["end_year"]).and_then(as_year),
    }
}

/// The `items` of the named widget as a flat map. Items may be an object
/// or a list of `[key, value]` pairs.
fn widget_items(payload: &Value, widget: &str) -> RawRow {
    let items = payload
        .get("widgets")
        .and_then(Value::as_array)
        .and_then(|widgets| {
            widgets
                .iter()
                .find(|w| w.get("name").and_then(Value::as_str) == Some(widget))
        })
        .and_then(|w| w.pointer("/data/items"));

    match items {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(pairs)) => pairs
            .iter()
            .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(key), value]) => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect(),
        _ => {
            debug!(widget, "Widget missing, counts default to 0");
            Map::new()
        }
    }
}

fn embedded_payload(data: &Value) -> Result<Value, NormalizationError> {
    match data {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| NormalizationError::InvalidData(e.to_string())),
        Value::Object(_) => Ok(data.clone()),
        other => Err(NormalizationError::InvalidData(format!(
            "expected a JSON string or object, got {other}"
        ))),
    }
}

/// First non-null value among `aliases`.
fn lookup<'a>(row: &'a RawRow, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| row.get(*key))
        .find(|v| !v.is_null())
}

fn required_id(
    row: &RawRow,
    field: &'static str,
    aliases: &[&str],
) -> Result<String, NormalizationError> {
    let value = lookup(row, aliases).ok_or(NormalizationError::MissingField(field))?;
    canonical_id(value).ok_or_else(|| NormalizationError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Canonical string form of an identifier so `1`, `1.0` and `"1"` join.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() {
                    None
                } else if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
        }
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn number(row: &RawRow, aliases: &[&str]) -> f64 {
    lookup(row, aliases).and_then(as_f64).unwrap_or(0.0)
}

/// Non-negative whole count; anything else counts as absent.
fn count(row: &RawRow, aliases: &[&str]) -> u64 {
    let Some(value) = lookup(row, aliases) else {
        return 0;
    };
    match as_f64(value) {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
        _ => {
            debug!(field = aliases[0], %value, "Unusable count, using 0");
            0
        }
    }
}

fn text(row: &RawRow, aliases: &[&str]) -> String {
    match lookup(row, aliases) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn as_year(value: &Value) -> Option<i32> {
    as_f64(value)
        .filter(|f| f.fract() == 0.0 && (0.0..=9999.0).contains(f))
        .map(|f| f as i32)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn coordinates_field(row: &RawRow, aliases: &[&str]) -> Option<Coordinates> {
    let value = lookup(row, aliases)?;
    let parsed = parse_coordinates(value);
    if parsed.is_none() {
        debug!(field = aliases[0], %value, "Unparsable coordinates");
    }
    parsed
}

/// Parses a coordinate pair from `[x, y]`, `{"lon": x, "lat": y}`,
/// `"x,y"`, `"x y"` or `"POINT(x y)"`.
pub fn parse_coordinates(value: &Value) -> Option<Coordinates> {
    let (x, y) = match value {
        Value::Array(items) => match items.as_slice() {
            [x, y] => (as_f64(x)?, as_f64(y)?),
            _ => return None,
        },
        Value::Object(map) => {
            let x = lookup(map, &["lon", "lng", "x"]).and_then(as_f64)?;
            let y = lookup(map, &["lat", "y"]).and_then(as_f64)?;
            (x, y)
        }
        Value::String(s) => parse_coordinate_text(s)?,
        _ => return None,
    };
    Some(Coordinates { x, y })
}

fn parse_coordinate_text(raw: &str) -> Option<(f64, f64)> {
    let mut body = raw.trim();
    if body.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("point")) {
        body = body[5..]
            .trim()
            .strip_prefix('(')?
            .strip_suffix(')')?
            .trim();
    }

    let mut parts = body
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some((x, y))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
