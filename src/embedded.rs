//! Decoder for the brace-delimited `key:value` structure devices pack into
//! the `e` field, e.g. `{NwS:'4G',SD:1,la:31.5,S1:[0.10,0.20]}`.
//!
//! Decoding is best-effort: anything that does not parse leaves the
//! corresponding field at its default.

use crate::telemetry::TelemetryRecord;

/// Fills `record` from the embedded body. Surrounding braces are optional.
pub fn decode_embedded(body: &str, record: &mut TelemetryRecord) {
    let body = body.trim_matches(|c| c == '{' || c == '}');

    for entry in split_entries(body) {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "NwS" => record.network_strength = unquote(value).to_string(),
            "SD" => set_parsed(&mut record.sd_log_status, value),
            "la" => set_parsed(&mut record.latitude, value),
            "lo" => set_parsed(&mut record.longitude, value),
            "D" => set_parsed(&mut record.door_open_counter, value),
            "Hs" => set_parsed(&mut record.humidity, value),
            "Dc" => set_parsed(&mut record.is_door_sense, value),
            "DHc" => set_parsed(&mut record.is_ds8, value),
            "DSc" => set_parsed(&mut record.is_dht22, value),
            "Fv" => record.firmware_version = unquote(value).to_string(),
            "S1" => record.sensor1 = sensor_pair(value),
            "S2" => record.sensor2 = sensor_pair(value),
            "S3" => record.sensor3 = sensor_pair(value),
            _ => {}
        }
    }
}

/// Splits on commas that are not inside `[...]`.
pub fn split_entries(body: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in body.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < body.len() {
        entries.push(&body[start..]);
    }

    entries
}

/// Parses `[a,b]`. Missing components stay zero, extra ones are ignored.
pub fn sensor_pair(value: &str) -> [f64; 2] {
    let mut pair = [0.0; 2];
    let inner = value.trim_matches(|c| c == '[' || c == ']');

    for (slot, part) in pair.iter_mut().zip(inner.split(',')) {
        set_parsed(slot, part.trim());
    }

    pair
}

pub(crate) fn set_parsed<T: std::str::FromStr>(field: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *field = parsed;
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches('\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(body: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::default();
        decode_embedded(body, &mut record);
        record
    }

    #[test]
    fn bracketed_pairs_are_not_split() {
        assert_eq!(split_entries("S1:[1,2],S2:[3,4]"), vec!["S1:[1,2]", "S2:[3,4]"]);
    }

    #[test]
    fn trailing_comma_yields_no_empty_entry() {
        assert_eq!(split_entries("D:1,"), vec!["D:1"]);
        assert!(split_entries("").is_empty());
    }

    #[test]
    fn full_structure() {
        let record = decoded(
            "{NwS:'4G',SD:1,la:31.520370,lo:74.358749,D:12,Hs:45.5,Dc:1,DHc:0,DSc:1,\
             Fv:'v2.0.3',S1:[0.10,0.20],S2:[3,4],S3:[-1.5,2.25]}",
        );

        assert_eq!(record.network_strength, "4G");
        assert_eq!(record.sd_log_status, 1);
        assert_eq!(record.latitude, 31.520370);
        assert_eq!(record.longitude, 74.358749);
        assert_eq!(record.door_open_counter, 12);
        assert_eq!(record.humidity, 45.5);
        assert_eq!(record.is_door_sense, 1);
        assert_eq!(record.is_ds8, 0);
        assert_eq!(record.is_dht22, 1);
        assert_eq!(record.firmware_version, "v2.0.3");
        assert_eq!(record.sensor1, [0.10, 0.20]);
        assert_eq!(record.sensor2, [3.0, 4.0]);
        assert_eq!(record.sensor3, [-1.5, 2.25]);
    }

    #[test]
    fn whitespace_around_keys_and_values_is_trimmed() {
        let record = decoded("{ D : 7 , Fv : 'x' }");

        assert_eq!(record.door_open_counter, 7);
        assert_eq!(record.firmware_version, "x");
    }

    #[test]
    fn splits_on_first_colon_only() {
        let record = decoded("{NwS:a:b}");

        assert_eq!(record.network_strength, "a:b");
    }

    #[test]
    fn counters_beyond_32_bits_are_kept() {
        let record = decoded("{D:3000000000,SD:4294967296}");

        assert_eq!(record.door_open_counter, 3_000_000_000);
        assert_eq!(record.sd_log_status, 4_294_967_296);
    }

    #[test]
    fn malformed_entries_leave_defaults() {
        let record = decoded("{SD:x,la:north,D,Hs:,junk,Zz:9,D:4}");

        assert_eq!(record.sd_log_status, 0);
        assert_eq!(record.latitude, 0.0);
        assert_eq!(record.humidity, 0.0);
        assert_eq!(record.door_open_counter, 4);
    }

    #[test]
    fn sensor_pair_component_counts() {
        assert_eq!(sensor_pair("[1.5]"), [1.5, 0.0]);
        assert_eq!(sensor_pair("[1,2,3]"), [1.0, 2.0]);
        assert_eq!(sensor_pair("[a,2]"), [0.0, 2.0]);
        assert_eq!(sensor_pair("[]"), [0.0, 0.0]);
        assert_eq!(sensor_pair("[ 0.5 , 0.25 ]"), [0.5, 0.25]);
    }
}
