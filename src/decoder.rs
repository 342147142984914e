//! Device payload decoding.
//!
//! Devices report either as a URL-encoded query string
//! (`imei=...&sv=12.5&e={...}7`) or as a JSON object. Shapes are tried in
//! order and the first one that tokenizes wins. Individual fields that fail
//! to parse keep their defaults, only a payload matching no shape is an error.
//!
//! Timestamps default to the decode time, so decoding the same payload twice
//! yields identical records apart from `timestamp` and `created_at`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedded::{decode_embedded, set_parsed};
use crate::telemetry::TelemetryRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is neither a query string nor a JSON object")]
    Unparsable,
}

type ShapeDecoder = fn(&str, DateTime<Utc>) -> Option<TelemetryRecord>;

/// Candidate payload shapes, in the order they are tried.
const SHAPES: &[(&str, ShapeDecoder)] = &[("query", decode_query), ("json", decode_json)];

pub fn decode(raw: &str) -> Result<TelemetryRecord, DecodeError> {
    decode_at(raw, Utc::now())
}

/// Decodes with `now` standing in for the capture time of payloads that
/// carry none.
pub fn decode_at(raw: &str, now: DateTime<Utc>) -> Result<TelemetryRecord, DecodeError> {
    let raw = raw.trim();

    for (shape, decoder) in SHAPES {
        if let Some(record) = decoder(raw, now) {
            log::trace!("payload decoded as {}", shape);
            return Ok(record);
        }
    }

    Err(DecodeError::Unparsable)
}

fn decode_query(raw: &str, now: DateTime<Utc>) -> Option<TelemetryRecord> {
    let values = parse_query(raw)?;
    let get = |key: &str| values.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let mut record = TelemetryRecord::captured_at(now);

    if let Some(imei) = get("imei") {
        record.imei = imei.to_string();
        record.serial_number = imei.to_string();
    }
    record.token = get("tkn").map(str::to_string);

    let readings: [(&str, &mut f64); 7] = [
        ("sv", &mut record.supply_voltage),
        ("sc", &mut record.supply_current),
        ("bv", &mut record.battery_voltage),
        ("pv", &mut record.panel_voltage),
        ("pc", &mut record.panel_current),
        ("temp_room", &mut record.temp_room),
        ("temp_battery", &mut record.temp_battery),
    ];
    for (key, field) in readings {
        if let Some(value) = get(key) {
            set_parsed(field, value);
        }
    }

    if let Some(embedded) = get("e") {
        decode_embedded_field(embedded, &mut record);
    }

    Some(record)
}

/// `{...}` followed by the main-loop counter. Without a brace pair the whole
/// field is skipped.
fn decode_embedded_field(value: &str, record: &mut TelemetryRecord) {
    let (Some(start), Some(end)) = (value.find('{'), value.rfind('}')) else {
        return;
    };
    if end <= start {
        return;
    }

    decode_embedded(&value[start..=end], record);
    set_parsed(&mut record.main_loop_count, &value[end + 1..]);
}

/// Strict query-string tokenizer. Returns `None` on a malformed `%` escape,
/// a `;` separator, a key holding JSON punctuation (`{` or `"`), or when no
/// segment has the `key=value` form. The first occurrence of a repeated key
/// wins.
fn parse_query(raw: &str) -> Option<HashMap<String, String>> {
    let mut has_pair = false;

    for segment in raw.split('&').filter(|s| !s.is_empty()) {
        if segment.contains(';') || !valid_escapes(segment) {
            return None;
        }
        let key = segment.split_once('=').map_or(segment, |(key, _)| key);
        if key.contains(['{', '"']) {
            return None;
        }
        if !key.is_empty() && segment.contains('=') {
            has_pair = true;
        }
    }
    if !has_pair {
        return None;
    }

    let mut values = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        values
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }

    Some(values)
}

fn valid_escapes(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = bytes.get(idx + 1..idx + 3);
            if !matches!(hex, Some(h) if h.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }

    true
}

fn decode_json(raw: &str, now: DateTime<Utc>) -> Option<TelemetryRecord> {
    let object: Map<String, Value> = serde_json::from_str(raw).ok()?;
    let has_timestamp = object.contains_key("timestamp");
    let has_created_at = object.contains_key("created_at");

    let mut record: TelemetryRecord = serde_json::from_value(Value::Object(object)).ok()?;

    if !has_timestamp {
        record.timestamp = now;
    }
    if !has_created_at {
        record.created_at = now;
    }
    if record.serial_number.is_empty() {
        record.serial_number = record.imei.clone();
    }

    Some(record)
}
