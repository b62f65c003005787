// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Flight data model and state-vector decoding.
//!
//! The upstream feed delivers each aircraft as a positional JSON array (a
//! "state vector"). The Data Proxy delivers the same data already normalized
//! into camel-cased objects. Both shapes end up as a [`Flight`].
//!
//! State vectors decode leniently per field: a vector without an `icao24` or
//! shorter than 17 entries is rejected, while a field of the wrong type decodes
//! as absent. Proxy objects decode strictly through serde, so a wrongly typed
//! field rejects the whole record. Either way the batch decoders skip and count
//! rejected records and keep the rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Minimum number of positional fields in a state vector.
pub const STATE_VECTOR_MIN_FIELDS: usize = 17;

const METERS_TO_FEET: f64 = 3.281;
const MPS_TO_KNOTS: f64 = 1.944;
const MPS_TO_FPM: f64 = 196.85;

/// Errors raised while decoding a single upstream record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("state vector is not an array")]
    NotAnArray,

    #[error("state vector has {0} fields, expected at least 17")]
    TooShort(usize),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Resolve the display altitude from geometric and barometric readings.
///
/// Geometric altitude wins when present and finite, barometric otherwise.
#[must_use]
pub fn resolve_altitude(geo_altitude: Option<f64>, baro_altitude: Option<f64>) -> Option<f64> {
    geo_altitude
        .filter(|a| a.is_finite())
        .or_else(|| baro_altitude.filter(|a| a.is_finite()))
}

/// One aircraft as currently observed by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    /// ICAO 24-bit transponder address (hex string).
    pub icao24: String,
    /// Trimmed callsign, possibly empty.
    #[serde(default, deserialize_with = "de_trimmed")]
    pub callsign: String,
    #[serde(default)]
    pub origin_country: Option<String>,
    /// Epoch seconds of the last position update.
    #[serde(default)]
    pub time_position: Option<i64>,
    /// Epoch seconds of the last message of any kind.
    #[serde(default)]
    pub last_contact: Option<i64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Barometric altitude in meters.
    #[serde(default)]
    pub baro_altitude: Option<f64>,
    /// Geometric altitude in meters.
    #[serde(default)]
    pub geo_altitude: Option<f64>,
    /// Resolved altitude in meters, see [`resolve_altitude`].
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub on_ground: bool,
    /// Ground speed in m/s.
    #[serde(default)]
    pub velocity: Option<f64>,
    /// True track in degrees clockwise from north.
    #[serde(default)]
    pub heading: Option<f64>,
    /// Vertical rate in m/s.
    #[serde(default)]
    pub vertical_rate: Option<f64>,
    #[serde(default)]
    pub sensors: Option<Vec<i64>>,
    #[serde(default)]
    pub squawk: Option<String>,
    #[serde(default)]
    pub spi: bool,
    #[serde(default)]
    pub position_source: Option<u8>,
    #[serde(default)]
    pub category: Option<u8>,
}

fn de_trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| s.trim().to_string()).unwrap_or_default())
}

impl Flight {
    /// Create an empty record for the given address.
    #[must_use]
    pub fn new(icao24: impl Into<String>) -> Self {
        Self {
            icao24: icao24.into(),
            callsign: String::new(),
            origin_country: None,
            time_position: None,
            last_contact: None,
            longitude: None,
            latitude: None,
            baro_altitude: None,
            geo_altitude: None,
            altitude: None,
            on_ground: false,
            velocity: None,
            heading: None,
            vertical_rate: None,
            sensors: None,
            squawk: None,
            spi: false,
            position_source: None,
            category: None,
        }
    }

    /// Decode one positional state vector.
    ///
    /// | idx | field | idx | field |
    /// |---|---|---|---|
    /// | 0 | icao24 | 9 | velocity |
    /// | 1 | callsign | 10 | true track |
    /// | 2 | origin country | 11 | vertical rate |
    /// | 3 | time position | 12 | sensors |
    /// | 4 | last contact | 13 | geometric altitude |
    /// | 5 | longitude | 14 | squawk |
    /// | 6 | latitude | 15 | spi |
    /// | 7 | barometric altitude | 16 | position source |
    /// | 8 | on ground | 17 | category (optional) |
    pub fn from_state_vector(raw: &Value) -> Result<Self, DecodeError> {
        let fields = raw.as_array().ok_or(DecodeError::NotAnArray)?;
        if fields.len() < STATE_VECTOR_MIN_FIELDS {
            return Err(DecodeError::TooShort(fields.len()));
        }

        let icao24 = match &fields[0] {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
            Value::Null => return Err(DecodeError::MissingField("icao24")),
            other => {
                return Err(DecodeError::InvalidValue {
                    field: "icao24",
                    value: other.to_string(),
                })
            }
        };

        let baro_altitude = as_f64(&fields[7]);
        let geo_altitude = as_f64(&fields[13]);

        Ok(Self {
            icao24,
            callsign: fields[1].as_str().map(|s| s.trim().to_string()).unwrap_or_default(),
            origin_country: as_string(&fields[2]),
            time_position: as_i64(&fields[3]),
            last_contact: as_i64(&fields[4]),
            longitude: as_f64(&fields[5]),
            latitude: as_f64(&fields[6]),
            baro_altitude,
            geo_altitude,
            altitude: resolve_altitude(geo_altitude, baro_altitude),
            on_ground: fields[8].as_bool().unwrap_or(false),
            velocity: as_f64(&fields[9]),
            heading: as_f64(&fields[10]),
            vertical_rate: as_f64(&fields[11]),
            sensors: fields[12]
                .as_array()
                .map(|s| s.iter().filter_map(Value::as_i64).collect()),
            squawk: as_string(&fields[14]),
            spi: fields[15].as_bool().unwrap_or(false),
            position_source: as_u8(&fields[16]),
            category: fields.get(17).and_then(as_u8),
        })
    }

    /// Re-apply the normalization rules to a record decoded from the proxy.
    pub fn normalize(&mut self) {
        self.icao24 = self.icao24.trim().to_lowercase();
        self.callsign = self.callsign.trim().to_string();
        if self.geo_altitude.is_some() || self.baro_altitude.is_some() {
            self.altitude = resolve_altitude(self.geo_altitude, self.baro_altitude);
        } else {
            self.altitude = self.altitude.filter(|a| a.is_finite());
        }
        if let Some(heading) = self.heading {
            self.heading = heading.is_finite().then(|| heading.rem_euclid(360.0));
        }
    }

    /// Position as `(lat, lon)` when both coordinates are finite numbers.
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Whether this record may be drawn on the map.
    #[must_use]
    pub fn is_map_eligible(&self) -> bool {
        self.position().is_some()
    }

    /// Display label: callsign, or the ICAO address when no callsign is known.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.callsign.is_empty() {
            &self.icao24
        } else {
            &self.callsign
        }
    }

    #[must_use]
    pub fn altitude_feet(&self) -> i64 {
        (self.altitude.unwrap_or(0.0) * METERS_TO_FEET).round() as i64
    }

    #[must_use]
    pub fn speed_knots(&self) -> i64 {
        (self.velocity.unwrap_or(0.0) * MPS_TO_KNOTS).round() as i64
    }

    #[must_use]
    pub fn vertical_rate_fpm(&self) -> i64 {
        (self.vertical_rate.unwrap_or(0.0) * MPS_TO_FPM).round() as i64
    }

    #[must_use]
    pub fn heading_or_zero(&self) -> f64 {
        self.heading.filter(|h| h.is_finite()).unwrap_or(0.0)
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn as_u8(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|v| u8::try_from(v).ok())
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Decode a batch of state vectors, skipping malformed records.
///
/// Returns the decoded flights and the number of records skipped.
#[must_use]
pub fn decode_state_vectors(states: &[Value]) -> (Vec<Flight>, usize) {
    let mut flights = Vec::with_capacity(states.len());
    let mut skipped = 0;
    for raw in states {
        match Flight::from_state_vector(raw) {
            Ok(flight) => flights.push(flight),
            Err(e) => {
                skipped += 1;
                log::debug!("Skipping state vector: {e}");
            }
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} malformed state vectors of {}", states.len());
    }
    (flights, skipped)
}

/// Decode proxy-normalized flight objects, skipping malformed records.
#[must_use]
pub fn decode_flight_objects(records: Vec<Value>) -> (Vec<Flight>, usize) {
    let total = records.len();
    let mut flights = Vec::with_capacity(total);
    let mut skipped = 0;
    for raw in records {
        match serde_json::from_value::<Flight>(raw) {
            Ok(mut flight) => {
                flight.normalize();
                flights.push(flight);
            }
            Err(e) => {
                skipped += 1;
                log::debug!("Skipping flight record: {e}");
            }
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} malformed flight records of {total}");
    }
    (flights, skipped)
}

/// Raw `states/all` envelope from the upstream feed.
#[derive(Debug, Clone, Deserialize)]
pub struct StateVectorResponse {
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub states: Option<Vec<Value>>,
}

/// A decoded snapshot of live flights as delivered by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightsPayload {
    pub flights: Vec<Flight>,
    /// Upstream snapshot time in epoch seconds.
    pub time: Option<i64>,
    /// Set when the data was served from a fallback cache.
    pub cached: bool,
    /// Error reported alongside the data, if any.
    pub error: Option<String>,
    /// Records dropped while decoding.
    pub skipped: usize,
}

impl FlightsPayload {
    /// Build a payload from a raw state-vector envelope.
    #[must_use]
    pub fn from_state_vectors(response: &StateVectorResponse) -> Self {
        let (flights, skipped) = response
            .states
            .as_deref()
            .map(decode_state_vectors)
            .unwrap_or_default();
        Self {
            flights,
            time: response.time,
            cached: false,
            error: None,
            skipped,
        }
    }

    /// Whether the payload carries data together with a fault marker.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.cached || self.error.is_some()
    }
}

/// One past flight of an aircraft, as estimated by the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightHistoryItem {
    pub icao24: String,
    #[serde(default, deserialize_with = "de_trimmed")]
    pub callsign: String,
    #[serde(default)]
    pub first_seen: i64,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub est_departure_airport: Option<String>,
    #[serde(default)]
    pub est_arrival_airport: Option<String>,
    #[serde(default)]
    pub est_departure_airport_horiz_distance: Option<f64>,
    #[serde(default)]
    pub est_departure_airport_vert_distance: Option<f64>,
    #[serde(default)]
    pub est_arrival_airport_horiz_distance: Option<f64>,
    #[serde(default)]
    pub est_arrival_airport_vert_distance: Option<f64>,
}

impl FlightHistoryItem {
    /// Flight duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        (self.last_seen - self.first_seen).max(0)
    }

    #[must_use]
    pub fn route_label(&self) -> String {
        format!(
            "{} → {}",
            self.est_departure_airport.as_deref().unwrap_or("????"),
            self.est_arrival_airport.as_deref().unwrap_or("????")
        )
    }
}

/// An arrival or departure at an airport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirportMovement {
    #[serde(flatten)]
    pub flight: FlightHistoryItem,
    #[serde(default)]
    pub departure_airport_candidates_count: Option<u32>,
    #[serde(default)]
    pub arrival_airport_candidates_count: Option<u32>,
}

/// Direction of an airport movement query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Arrivals,
    Departures,
}

impl MovementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arrivals => "arrivals",
            Self::Departures => "departures",
        }
    }

    /// Upstream endpoint segment for this kind.
    #[must_use]
    pub fn upstream_path(self) -> &'static str {
        match self {
            Self::Arrivals => "arrival",
            Self::Departures => "departure",
        }
    }
}

/// Response of a history request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPayload {
    #[serde(default)]
    pub flights: Vec<FlightHistoryItem>,
    pub icao24: String,
}

/// Response of an airport movement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportPayload {
    #[serde(default)]
    pub flights: Vec<AirportMovement>,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub airport: String,
    pub begin: i64,
    pub end: i64,
}

/// One waypoint of a recorded ground track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub time: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub baro_altitude: Option<f64>,
    pub true_track: Option<f64>,
    pub on_ground: bool,
}

/// Recent ground track of one aircraft.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightTrack {
    pub icao24: String,
    pub callsign: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub path: Vec<TrackPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrack {
    #[serde(default)]
    icao24: Option<String>,
    #[serde(default)]
    callsign: Option<String>,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
    #[serde(default)]
    path: Option<Vec<Value>>,
}

impl FlightTrack {
    /// Decode an upstream `tracks/all` body, dropping waypoints without coordinates.
    pub fn from_json(body: &[u8], icao24: &str) -> Result<Self, DecodeError> {
        let raw: RawTrack = serde_json::from_slice(body).map_err(|e| DecodeError::InvalidValue {
            field: "track",
            value: e.to_string(),
        })?;
        let path = raw
            .path
            .ok_or(DecodeError::MissingField("path"))?
            .iter()
            .filter_map(|pt| {
                let pt = pt.as_array()?;
                Some(TrackPoint {
                    time: pt.first().and_then(as_i64).unwrap_or(0),
                    latitude: pt.get(1).and_then(as_f64)?,
                    longitude: pt.get(2).and_then(as_f64)?,
                    baro_altitude: pt.get(3).and_then(as_f64),
                    true_track: pt.get(4).and_then(as_f64),
                    on_ground: pt.get(5).and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();
        Ok(Self {
            icao24: raw.icao24.unwrap_or_else(|| icao24.to_string()),
            callsign: raw.callsign.map(|c| c.trim().to_string()),
            start_time: raw.start_time,
            end_time: raw.end_time,
            path,
        })
    }

    /// Whether the track has enough points to draw a line.
    #[must_use]
    pub fn is_drawable(&self) -> bool {
        self.path.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_vector() -> Value {
        json!([
            "abc123", "BAW123  ", "United Kingdom", 1_700_000_000, 1_700_000_005,
            -0.1, 51.5, 10_000.0, false, 230.5, 87.0, -1.5, [1, 2], 10_150.0,
            "7000", false, 0, 4
        ])
    }

    #[test]
    fn test_decode_state_vector_fields() {
        let flight = Flight::from_state_vector(&sample_vector()).unwrap();
        assert_eq!(flight.icao24, "abc123");
        assert_eq!(flight.callsign, "BAW123");
        assert_eq!(flight.origin_country.as_deref(), Some("United Kingdom"));
        assert_eq!(flight.time_position, Some(1_700_000_000));
        assert_eq!(flight.last_contact, Some(1_700_000_005));
        assert_eq!(flight.longitude, Some(-0.1));
        assert_eq!(flight.latitude, Some(51.5));
        assert_eq!(flight.baro_altitude, Some(10_000.0));
        assert!(!flight.on_ground);
        assert_eq!(flight.velocity, Some(230.5));
        assert_eq!(flight.heading, Some(87.0));
        assert_eq!(flight.vertical_rate, Some(-1.5));
        assert_eq!(flight.sensors, Some(vec![1, 2]));
        assert_eq!(flight.geo_altitude, Some(10_150.0));
        assert_eq!(flight.altitude, Some(10_150.0));
        assert_eq!(flight.squawk.as_deref(), Some("7000"));
        assert!(!flight.spi);
        assert_eq!(flight.position_source, Some(0));
        assert_eq!(flight.category, Some(4));
    }

    #[test]
    fn test_decode_without_category() {
        let mut raw = sample_vector();
        raw.as_array_mut().unwrap().truncate(17);
        let flight = Flight::from_state_vector(&raw).unwrap();
        assert_eq!(flight.category, None);
    }

    #[test]
    fn test_missing_coordinates_keep_record_but_not_map_eligible() {
        let mut raw = sample_vector();
        raw[6] = Value::Null;
        let flight = Flight::from_state_vector(&raw).unwrap();
        assert_eq!(flight.latitude, None);
        assert!(!flight.is_map_eligible());

        let mut nan = Flight::new("def456");
        nan.latitude = Some(f64::NAN);
        nan.longitude = Some(2.0);
        assert!(nan.position().is_none());
    }

    #[test]
    fn test_reject_short_or_anonymous_vectors() {
        assert_eq!(
            Flight::from_state_vector(&json!(["abc123", null])),
            Err(DecodeError::TooShort(2))
        );
        let mut raw = sample_vector();
        raw[0] = Value::Null;
        assert_eq!(
            Flight::from_state_vector(&raw),
            Err(DecodeError::MissingField("icao24"))
        );
        assert_eq!(
            Flight::from_state_vector(&json!({"icao24": "abc"})),
            Err(DecodeError::NotAnArray)
        );
    }

    #[test]
    fn test_altitude_precedence() {
        assert_eq!(resolve_altitude(Some(100.0), Some(90.0)), Some(100.0));
        assert_eq!(resolve_altitude(None, Some(90.0)), Some(90.0));
        assert_eq!(resolve_altitude(Some(f64::NAN), Some(90.0)), Some(90.0));
        assert_eq!(resolve_altitude(None, None), None);
    }

    #[test]
    fn test_batch_skips_bad_records() {
        let states = vec![sample_vector(), json!("garbage"), json!([1, 2, 3])];
        let (flights, skipped) = decode_state_vectors(&states);
        assert_eq!(flights.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_decode_proxy_objects_normalizes() {
        let records = vec![
            json!({
                "icao24": "ABC123",
                "callsign": " DLH4  ",
                "latitude": 50.0,
                "longitude": 8.5,
                "baroAltitude": 3000.0,
                "geoAltitude": null,
                "altitude": 9999.0,
                "onGround": false
            }),
            json!({"callsign": "NOICAO"}),
        ];
        let (flights, skipped) = decode_flight_objects(records);
        assert_eq!(skipped, 1);
        assert_eq!(flights[0].icao24, "abc123");
        assert_eq!(flights[0].callsign, "DLH4");
        assert_eq!(flights[0].altitude, Some(3000.0));
    }

    #[test]
    fn test_wrongly_typed_field_handling_differs_by_shape() {
        // Positional vector: bad field is absent, record kept
        let mut vector = sample_vector();
        vector[5] = json!("east");
        let (flights, skipped) = decode_state_vectors(&[vector]);
        assert_eq!(skipped, 0);
        assert_eq!(flights[0].longitude, None);

        // Proxy object: bad field rejects the record
        let records = vec![
            json!({"icao24": "abc123", "latitude": 50.0, "longitude": "east"}),
            json!({"icao24": "def456", "latitude": 50.0, "longitude": 8.5}),
        ];
        let (flights, skipped) = decode_flight_objects(records);
        assert_eq!(skipped, 1);
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].icao24, "def456");
    }

    #[test]
    fn test_derived_displays_treat_absent_as_zero() {
        let flight = Flight::new("abc123");
        assert_eq!(flight.altitude_feet(), 0);
        assert_eq!(flight.speed_knots(), 0);
        assert_eq!(flight.vertical_rate_fpm(), 0);
        assert!(!flight.on_ground);
        assert_eq!(flight.label(), "abc123");
    }

    #[test]
    fn test_track_decoding_filters_points() {
        let body = br#"{"icao24":"abc123","callsign":"BAW1 ","startTime":1,"endTime":3,
            "path":[[1,51.0,-0.5,1000.0,90.0,false],[2,null,-0.4,1100.0,90.0,false],[3,51.2,-0.3,1200.0,91.0,false]]}"#;
        let track = FlightTrack::from_json(body, "abc123").unwrap();
        assert_eq!(track.path.len(), 2);
        assert!(track.is_drawable());
        assert_eq!(track.callsign.as_deref(), Some("BAW1"));
    }

    #[test]
    fn test_airport_payload_shape() {
        let body = json!({
            "flights": [{"icao24": "abc123", "callsign": "EZY1 ", "firstSeen": 10, "lastSeen": 70,
                         "estDepartureAirport": "EGKK", "estArrivalAirport": null,
                         "departureAirportCandidatesCount": 1}],
            "type": "departures", "airport": "EGKK", "begin": 0, "end": 100
        });
        let payload: AirportPayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.kind, MovementKind::Departures);
        assert_eq!(payload.flights[0].flight.callsign, "EZY1");
        assert_eq!(payload.flights[0].flight.duration_secs(), 60);
        assert_eq!(payload.flights[0].flight.route_label(), "EGKK → ????");
    }
}
