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

//! Anonymous client for the upstream REST API.
//!
//! Used when no Data Proxy is configured. It applies the proxy's fallback
//! rules itself: the last good state-vector snapshot is kept in a TTL cache
//! and served with `cached = true` when the upstream fails, and a 404 from the
//! history and airport endpoints means "no flights".

use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;

use super::{http_get, AirportQuery, FeedError, FlightSource, TimeWindow};
use crate::cache::TtlCache;
use crate::flight::{
    AirportMovement, AirportPayload, FlightHistoryItem, FlightTrack, FlightsPayload,
    HistoryPayload, StateVectorResponse,
};
use crate::geo::GeoBounds;

const DEFAULT_BASE_URL: &str = "https://opensky-network.org/api";
const LAST_GOOD_TTL: Duration = Duration::from_secs(10 * 60);
const LAST_GOOD_KEY: &str = "states";

/// Direct upstream source.
#[derive(Clone)]
pub struct OpenSkySource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    last_good: TtlCache<String, FlightsPayload>,
}

impl std::fmt::Debug for OpenSkySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSkySource")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenSkySource {
    pub fn new() -> Result<Self, FeedError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flight-stream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(15),
            last_good: TtlCache::new(LAST_GOOD_TTL),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an injected cache for the last good snapshot.
    #[must_use]
    pub fn with_cache(mut self, cache: TtlCache<String, FlightsPayload>) -> Self {
        self.last_good = cache;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a JSON array, treating 404 as empty.
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, FeedError> {
        match http_get(&self.client, &self.url(path), query, self.timeout).await {
            Ok(body) => serde_json::from_slice(&body).map_err(|e| FeedError::Decode(e.to_string())),
            Err(FeedError::Upstream { status: 404, .. }) => {
                debug!("{path} returned 404, treating as no flights");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Serve the last good snapshot, if any, marked as cached.
fn fallback(cache: &TtlCache<String, FlightsPayload>, error: &FeedError) -> Option<FlightsPayload> {
    let mut payload = cache.get(&LAST_GOOD_KEY.to_string())?;
    payload.cached = true;
    payload.error = Some(error.to_string());
    Some(payload)
}

impl FlightSource for OpenSkySource {
    async fn fetch_flights(&self, bounds: Option<GeoBounds>) -> Result<FlightsPayload, FeedError> {
        let query: Vec<(&str, String)> = bounds.map(|b| b.query_pairs().to_vec()).unwrap_or_default();
        let result = match http_get(&self.client, &self.url("/states/all"), &query, self.timeout).await {
            Ok(body) => serde_json::from_slice::<StateVectorResponse>(&body)
                .map_err(|e| FeedError::Decode(e.to_string())),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                let payload = FlightsPayload::from_state_vectors(&response);
                self.last_good.set(LAST_GOOD_KEY.to_string(), payload.clone());
                Ok(payload)
            }
            Err(e) => match fallback(&self.last_good, &e) {
                Some(cached) => {
                    warn!("Upstream states failed ({e}), serving {} cached flights", cached.flights.len());
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    async fn fetch_history(&self, icao24: &str, window: TimeWindow) -> Result<HistoryPayload, FeedError> {
        let icao24 = icao24.trim().to_lowercase();
        let query = [
            ("icao24", icao24.clone()),
            ("begin", window.begin.to_string()),
            ("end", window.end.to_string()),
        ];
        let flights: Vec<FlightHistoryItem> = self.get_list("/flights/aircraft", &query).await?;
        Ok(HistoryPayload { flights, icao24 })
    }

    async fn fetch_airport(&self, query: &AirportQuery) -> Result<AirportPayload, FeedError> {
        let window = query.window.historical(Utc::now().timestamp());
        let params = [
            ("airport", query.airport.clone()),
            ("begin", window.begin.to_string()),
            ("end", window.end.to_string()),
        ];
        let path = format!("/flights/{}", query.kind.upstream_path());
        let flights: Vec<AirportMovement> = self.get_list(&path, &params).await?;
        Ok(AirportPayload {
            flights,
            kind: query.kind,
            airport: query.airport.clone(),
            begin: window.begin,
            end: window.end,
        })
    }

    async fn fetch_track(&self, icao24: &str) -> Result<FlightTrack, FeedError> {
        let icao24 = icao24.trim().to_lowercase();
        let query = [("icao24", icao24.clone()), ("time", "0".to_string())];
        let body = http_get(&self.client, &self.url("/tracks/all"), &query, self.timeout).await?;
        FlightTrack::from_json(&body, &icao24).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::Flight;

    #[test]
    fn test_fallback_marks_cached() {
        let cache: TtlCache<String, FlightsPayload> = TtlCache::new(LAST_GOOD_TTL);
        let err = FeedError::Timeout(Duration::from_secs(15));
        assert!(fallback(&cache, &err).is_none());

        cache.set(
            LAST_GOOD_KEY.to_string(),
            FlightsPayload {
                flights: vec![Flight::new("abc123")],
                time: Some(1),
                ..Default::default()
            },
        );
        let served = fallback(&cache, &err).unwrap();
        assert!(served.cached);
        assert_eq!(served.flights.len(), 1);
        assert!(served.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_without_cache_errors() {
        let source = OpenSkySource::with_base_url("http://127.0.0.1:9")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let result = source.fetch_flights(None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_serves_last_good() {
        let cache: TtlCache<String, FlightsPayload> = TtlCache::new(LAST_GOOD_TTL);
        cache.set(
            LAST_GOOD_KEY.to_string(),
            FlightsPayload {
                flights: vec![Flight::new("abc123")],
                ..Default::default()
            },
        );
        let source = OpenSkySource::with_base_url("http://127.0.0.1:9")
            .unwrap()
            .with_timeout(Duration::from_secs(2))
            .with_cache(cache);
        let payload = source.fetch_flights(None).await.unwrap();
        assert!(payload.cached);
        assert!(payload.error.is_some());
    }
}
