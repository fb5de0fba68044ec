//! The vehicle position record and the normalisation of raw API payloads.
//!
//! The locations endpoint is loosely typed: coordinates may arrive as JSON
//! numbers or numeric strings, the collection may be a bare array or wrapped
//! in an object, and most fields are optional.  Everything in this module is
//! pure (no I/O) so that the validation rules can be tested without a server.
//!
//! ## Validation rules
//!
//! * A record without a finite `latitude` **and** `longitude` is dropped.
//! * `speed` defaults to `0.0` when absent, unparseable or negative.
//! * `heading` is optional and dropped when unparseable.
//! * `last_updated` comes from `timestamp` / `last_updated` (RFC 3339) and
//!   falls back to the time the poll completed.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A single validated vehicle position.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    /// Opaque vehicle identifier, stable across polls.
    pub id: String,

    /// Latitude in degrees (always finite).
    pub latitude: f64,

    /// Longitude in degrees (always finite).
    pub longitude: f64,

    /// Ground speed in km/h, never negative.
    pub speed: f64,

    /// Compass heading in degrees, if the tracker reported one.
    pub heading: Option<f64>,

    /// When the position was recorded.
    pub last_updated: DateTime<Utc>,

    /// Fleet number painted on the bus, used as the display label.
    pub bus_number: Option<String>,

    /// Free-form operational status ("In Transit", "Depot", ...).
    pub status: Option<String>,
}

impl VehiclePosition {
    /// Label shown in lists and markers.
    pub fn label(&self) -> &str {
        self.bus_number.as_deref().unwrap_or("BUS")
    }
}

/// Normalise a locations response into validated positions.
///
/// `polled_at` is used for records that carry no timestamp.  Invalid records
/// are skipped; the relative order of the remaining records is preserved.
pub fn normalize(body: &Value, polled_at: DateTime<Utc>) -> Vec<VehiclePosition> {
    extract_records(body)
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let position = parse_record(record, index, polled_at);
            if position.is_none() {
                tracing::debug!(index, "dropping position record without valid coordinates");
            }
            position
        })
        .collect()
}

/// Pick out the record sequence from whatever shape the server returned.
///
/// Precedence for objects: `results`, then `data`, then the object's own
/// values.  Anything else yields no records.
fn extract_records(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in ["results", "data"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().collect();
                }
            }
            map.values().collect()
        }
        _ => Vec::new(),
    }
}

fn parse_record(record: &Value, index: usize, polled_at: DateTime<Utc>) -> Option<VehiclePosition> {
    let obj = record.as_object()?;

    let latitude = number_field(obj, "latitude")?;
    let longitude = number_field(obj, "longitude")?;

    let speed = number_field(obj, "speed")
        .filter(|s| *s >= 0.0)
        .unwrap_or(0.0);

    let last_updated = ["timestamp", "last_updated"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(polled_at, |dt| dt.with_timezone(&Utc));

    let id = ["id", "bus", "bus_id"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(text))
        .unwrap_or_else(|| format!("#{index}"));

    Some(VehiclePosition {
        id,
        latitude,
        longitude,
        speed,
        heading: number_field(obj, "heading"),
        last_updated,
        bus_number: obj.get("bus_number").and_then(text),
        status: obj.get("status").and_then(text),
    })
}

/// Read a finite number from either a JSON number or a numeric string.
fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match obj.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Render an identifier-like value as text.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn polled_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn parses_numbers_and_numeric_strings() {
        let body = json!([
            { "id": 1, "latitude": -19.45, "longitude": 29.81, "speed": 42.5, "heading": 90 },
            { "id": "bus-2", "latitude": " -19.5 ", "longitude": "29.9", "speed": "12" },
        ]);

        let positions = normalize(&body, polled_at());

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].id, "1");
        assert_eq!(positions[0].latitude, -19.45);
        assert_eq!(positions[0].speed, 42.5);
        assert_eq!(positions[0].heading, Some(90.0));
        assert_eq!(positions[1].id, "bus-2");
        assert_eq!(positions[1].latitude, -19.5);
        assert_eq!(positions[1].speed, 12.0);
        assert_eq!(positions[1].heading, None);
    }

    #[test]
    fn drops_exactly_the_records_with_bad_coordinates() {
        let body = json!([
            { "id": "a", "latitude": 1.0, "longitude": 2.0 },
            { "id": "b", "latitude": "north", "longitude": 2.0 },
            { "id": "c", "longitude": 2.0 },
            { "id": "d", "latitude": 3.0, "longitude": null },
            { "id": "e", "latitude": 4.0, "longitude": 5.0, "speed": 7.0 },
            "not an object",
        ]);

        let positions = normalize(&body, polled_at());
        let ids: Vec<&str> = positions.iter().map(|p| p.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "e"]);
        assert_eq!(positions[1].latitude, 4.0);
        assert_eq!(positions[1].longitude, 5.0);
        assert_eq!(positions[1].speed, 7.0);
    }

    #[test]
    fn zero_coordinates_are_valid() {
        let body = json!([{ "id": "null-island", "latitude": 0, "longitude": 0 }]);
        assert_eq!(normalize(&body, polled_at()).len(), 1);
    }

    #[test]
    fn speed_defaults_to_zero() {
        let body = json!([
            { "id": "a", "latitude": 1, "longitude": 1 },
            { "id": "b", "latitude": 1, "longitude": 1, "speed": "fast" },
            { "id": "c", "latitude": 1, "longitude": 1, "speed": -3 },
        ]);

        let positions = normalize(&body, polled_at());
        assert!(positions.iter().all(|p| p.speed == 0.0));
    }

    #[test]
    fn timestamp_defaults_to_poll_time() {
        let body = json!([
            { "id": "a", "latitude": 1, "longitude": 1, "timestamp": "2025-02-28T23:59:00Z" },
            { "id": "b", "latitude": 1, "longitude": 1 },
            { "id": "c", "latitude": 1, "longitude": 1, "timestamp": "yesterday" },
        ]);

        let positions = normalize(&body, polled_at());

        assert_eq!(
            positions[0].last_updated,
            Utc.with_ymd_and_hms(2025, 2, 28, 23, 59, 0).unwrap()
        );
        assert_eq!(positions[1].last_updated, polled_at());
        assert_eq!(positions[2].last_updated, polled_at());
    }

    #[test]
    fn unwraps_results_before_data() {
        let body = json!({
            "count": 1,
            "results": [{ "id": "r", "latitude": 1, "longitude": 1 }],
            "data": [{ "id": "d", "latitude": 1, "longitude": 1 }],
        });

        let positions = normalize(&body, polled_at());
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].id, "r");
    }

    #[test]
    fn unwraps_data_field() {
        let body = json!({ "data": [{ "id": "d", "latitude": 1, "longitude": 1 }] });
        assert_eq!(normalize(&body, polled_at())[0].id, "d");
    }

    #[test]
    fn falls_back_to_object_values() {
        let body = json!({
            "7": { "id": 7, "latitude": 1, "longitude": 1 },
            "8": { "id": 8, "latitude": 2, "longitude": 2 },
        });

        let mut ids: Vec<String> = normalize(&body, polled_at()).into_iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["7", "8"]);
    }

    #[test]
    fn scalar_body_yields_nothing() {
        assert!(normalize(&json!("nope"), polled_at()).is_empty());
        assert!(normalize(&json!(null), polled_at()).is_empty());
    }

    #[test]
    fn id_falls_back_to_bus_then_index() {
        let body = json!([
            { "bus": 12, "latitude": 1, "longitude": 1 },
            { "latitude": 1, "longitude": 1 },
        ]);

        let positions = normalize(&body, polled_at());
        assert_eq!(positions[0].id, "12");
        assert_eq!(positions[1].id, "#1");
    }

    #[test]
    fn label_prefers_bus_number() {
        let body = json!([
            { "id": 1, "latitude": 1, "longitude": 1, "bus_number": "GW-104", "status": "Depot" },
            { "id": 2, "latitude": 1, "longitude": 1 },
        ]);

        let positions = normalize(&body, polled_at());
        assert_eq!(positions[0].label(), "GW-104");
        assert_eq!(positions[0].status.as_deref(), Some("Depot"));
        assert_eq!(positions[1].label(), "BUS");
    }
}
