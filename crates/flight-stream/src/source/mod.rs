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

//! Data sources for live flights, history, airport movements and tracks.
//!
//! [`FlightSource`] is the seam between the Stream Controller (and the detail
//! views) and the network. Two implementations ship with the crate:
//!
//! - [`ProxyClient`] talks to the Data Proxy JSON contract
//! - [`OpenSkySource`] talks to the upstream REST API anonymously
//!
//! [`FeedSource`] picks one at runtime.

mod opensky;
mod proxy;

pub use opensky::OpenSkySource;
pub use proxy::ProxyClient;

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::flight::{
    decode_flight_objects, AirportPayload, FlightTrack, FlightsPayload, HistoryPayload,
    MovementKind, StateVectorResponse,
};
use crate::geo::GeoBounds;

const DAY_SECS: i64 = 24 * 60 * 60;
const ERROR_BODY_LIMIT: usize = 200;

/// Errors raised by sources and the Stream Controller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    /// Connection failure, abort or other transport fault.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response.
    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Malformed JSON or unexpected response shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Data was delivered together with a fault marker.
    #[error("serving cached data: {0}")]
    Degraded(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),
}

impl FeedError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Degraded(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Cancelled | Self::Unsupported(_) => false,
        }
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Epoch-second interval `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub begin: i64,
    pub end: i64,
}

impl TimeWindow {
    /// The `days` days ending at `now`.
    #[must_use]
    pub fn last_days(days: i64, now: i64) -> Self {
        Self {
            begin: now - days * DAY_SECS,
            end: now,
        }
    }

    /// The day ending one day before `now`.
    #[must_use]
    pub fn yesterday(now: i64) -> Self {
        Self {
            begin: now - 2 * DAY_SECS,
            end: now - DAY_SECS,
        }
    }

    /// Clamp to data the upstream has already processed.
    ///
    /// Movement data lags by about a day, so a window ending later than
    /// `now - 1d` is replaced by `[now - 2d, now - 1d]`.
    #[must_use]
    pub fn historical(self, now: i64) -> Self {
        if self.end > now - DAY_SECS {
            Self::yesterday(now)
        } else {
            self
        }
    }
}

/// Arrivals or departures at one airport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirportQuery {
    /// ICAO airport code, e.g. `EGLL`.
    pub airport: String,
    pub kind: MovementKind,
    pub window: TimeWindow,
}

impl AirportQuery {
    /// Query for yesterday's movements, the default airport search window.
    #[must_use]
    pub fn yesterday(airport: &str, kind: MovementKind) -> Self {
        Self {
            airport: airport.trim().to_uppercase(),
            kind,
            window: TimeWindow::yesterday(Utc::now().timestamp()),
        }
    }
}

/// Receiving end of a server-push flight stream.
///
/// Dropping the stream stops the reader task.
#[derive(Debug)]
pub struct PushStream {
    rx: mpsc::Receiver<Result<FlightsPayload, FeedError>>,
    cancel_token: CancellationToken,
}

impl PushStream {
    #[must_use]
    pub fn new(
        rx: mpsc::Receiver<Result<FlightsPayload, FeedError>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self { rx, cancel_token }
    }

    /// Next payload, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<FlightsPayload, FeedError>> {
        self.rx.recv().await
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Contract every data source fulfils.
pub trait FlightSource: Send + Sync + 'static {
    /// Current state vectors, optionally limited to `bounds`.
    fn fetch_flights(
        &self,
        bounds: Option<GeoBounds>,
    ) -> impl Future<Output = Result<FlightsPayload, FeedError>> + Send;

    /// Past flights of one aircraft.
    fn fetch_history(
        &self,
        icao24: &str,
        window: TimeWindow,
    ) -> impl Future<Output = Result<HistoryPayload, FeedError>> + Send;

    fn fetch_airport(
        &self,
        query: &AirportQuery,
    ) -> impl Future<Output = Result<AirportPayload, FeedError>> + Send;

    /// Recent ground track of one aircraft.
    fn fetch_track(&self, icao24: &str) -> impl Future<Output = Result<FlightTrack, FeedError>> + Send;

    /// Open a server-push stream of flight snapshots.
    fn open_push_stream(&self) -> impl Future<Output = Result<PushStream, FeedError>> + Send {
        async { Err(FeedError::Unsupported("server push")) }
    }
}

/// Runtime choice between the proxy and the direct upstream.
#[derive(Debug, Clone)]
pub enum FeedSource {
    Proxy(ProxyClient),
    OpenSky(OpenSkySource),
}

impl FlightSource for FeedSource {
    async fn fetch_flights(&self, bounds: Option<GeoBounds>) -> Result<FlightsPayload, FeedError> {
        match self {
            Self::Proxy(s) => s.fetch_flights(bounds).await,
            Self::OpenSky(s) => s.fetch_flights(bounds).await,
        }
    }

    async fn fetch_history(&self, icao24: &str, window: TimeWindow) -> Result<HistoryPayload, FeedError> {
        match self {
            Self::Proxy(s) => s.fetch_history(icao24, window).await,
            Self::OpenSky(s) => s.fetch_history(icao24, window).await,
        }
    }

    async fn fetch_airport(&self, query: &AirportQuery) -> Result<AirportPayload, FeedError> {
        match self {
            Self::Proxy(s) => s.fetch_airport(query).await,
            Self::OpenSky(s) => s.fetch_airport(query).await,
        }
    }

    async fn fetch_track(&self, icao24: &str) -> Result<FlightTrack, FeedError> {
        match self {
            Self::Proxy(s) => s.fetch_track(icao24).await,
            Self::OpenSky(s) => s.fetch_track(icao24).await,
        }
    }

    async fn open_push_stream(&self) -> Result<PushStream, FeedError> {
        match self {
            Self::Proxy(s) => s.open_push_stream().await,
            Self::OpenSky(s) => s.open_push_stream().await,
        }
    }
}

/// GET `url` with a per-request timeout, returning the body of a 2xx response.
pub(crate) async fn http_get(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
    timeout: Duration,
) -> Result<Vec<u8>, FeedError> {
    let response = client
        .get(url)
        .query(query)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FeedError::from_reqwest(&e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FeedError::Upstream {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FeedError::from_reqwest(&e, timeout))?;
    Ok(bytes.to_vec())
}

#[derive(Debug, Deserialize)]
struct FlightsEnvelope {
    #[serde(default)]
    flights: Option<Vec<Value>>,
    #[serde(default)]
    states: Option<Vec<Value>>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a live-flights body in either shape: proxy-normalized
/// `{flights, time, cached?, error?}` or raw `{time, states}`.
///
/// A body carrying only an error is reported as a network failure.
pub fn decode_flights_body(body: &[u8]) -> Result<FlightsPayload, FeedError> {
    let envelope: FlightsEnvelope =
        serde_json::from_slice(body).map_err(|e| FeedError::Decode(e.to_string()))?;

    if let Some(records) = envelope.flights {
        let (flights, skipped) = decode_flight_objects(records);
        return Ok(FlightsPayload {
            flights,
            time: envelope.time,
            cached: envelope.cached,
            error: envelope.error,
            skipped,
        });
    }

    match (envelope.states, envelope.error) {
        (None, Some(error)) => Err(FeedError::Network(error)),
        (states, error) => {
            let mut payload = FlightsPayload::from_state_vectors(&StateVectorResponse {
                time: envelope.time,
                states,
            });
            payload.cached = envelope.cached;
            payload.error = error;
            Ok(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_window_clamp() {
        let now = 1_700_000_000;
        let recent = TimeWindow { begin: now - 3600, end: now };
        assert_eq!(
            recent.historical(now),
            TimeWindow { begin: now - 2 * DAY_SECS, end: now - DAY_SECS }
        );
        let old = TimeWindow { begin: now - 5 * DAY_SECS, end: now - 4 * DAY_SECS };
        assert_eq!(old.historical(now), old);
    }

    #[test]
    fn test_last_days() {
        let w = TimeWindow::last_days(2, 1000 + 2 * DAY_SECS);
        assert_eq!(w.begin, 1000);
        assert_eq!(w.end, 1000 + 2 * DAY_SECS);
    }

    #[test]
    fn test_decode_proxy_body_with_cache_marker() {
        let body = br#"{"flights":[{"icao24":"abc123","latitude":51.5,"longitude":-0.1}],
                        "time":1700000000,"cached":true,"error":"upstream down"}"#;
        let payload = decode_flights_body(body).unwrap();
        assert_eq!(payload.flights.len(), 1);
        assert!(payload.cached);
        assert!(payload.is_degraded());
        assert_eq!(payload.time, Some(1_700_000_000));
    }

    #[test]
    fn test_decode_raw_states_body() {
        let body = br#"{"time":5,"states":[["abc123","BAW1",null,null,null,-0.1,51.5,null,false,null,null,null,null,null,null,false,0]]}"#;
        let payload = decode_flights_body(body).unwrap();
        assert_eq!(payload.flights[0].icao24, "abc123");
        assert!(!payload.cached);
    }

    #[test]
    fn test_decode_null_states_is_empty() {
        let payload = decode_flights_body(br#"{"time":5,"states":null}"#).unwrap();
        assert!(payload.flights.is_empty());
    }

    #[test]
    fn test_decode_error_only_body() {
        assert!(matches!(
            decode_flights_body(br#"{"error":"rate limited"}"#),
            Err(FeedError::Network(_))
        ));
        assert!(matches!(decode_flights_body(b"not json"), Err(FeedError::Decode(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(FeedError::Upstream { status: 503, body: String::new() }.is_transient());
        assert!(FeedError::Upstream { status: 429, body: String::new() }.is_transient());
        assert!(!FeedError::Upstream { status: 404, body: String::new() }.is_transient());
        assert!(!FeedError::Decode("x".into()).is_transient());
    }
}
