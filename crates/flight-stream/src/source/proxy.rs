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

//! Client for the Data Proxy JSON contract.
//!
//! | Request | Response |
//! |---|---|
//! | `GET /flights` | `{flights, time, cached?, error?}` |
//! | `GET /flights?type=&airport=&begin=&end=` | `{flights, type, airport, begin, end}` |
//! | `GET /flights/history?icao24=&begin=&end=` | `{flights, icao24}` |
//! | `GET /flights/stream` | `text/event-stream` of `{time, states}` |
//!
//! The proxy has no track endpoint; tracks come from the upstream directly.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    decode_flights_body, http_get, AirportQuery, FeedError, FlightSource, PushStream, TimeWindow,
};
use crate::cache::TtlCache;
use crate::flight::{AirportPayload, FlightTrack, FlightsPayload, HistoryPayload};
use crate::geo::GeoBounds;
use crate::sse::EventStreamDecoder;

const DEFAULT_UPSTREAM: &str = "https://opensky-network.org/api";
const HISTORY_TTL: Duration = Duration::from_secs(5 * 60);
const PUSH_BUFFER: usize = 8;

type HistoryKey = (String, i64, i64);

/// HTTP client for the Data Proxy.
#[derive(Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
    upstream_url: String,
    timeout: Duration,
    history_cache: TtlCache<HistoryKey, HistoryPayload>,
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProxyClient {
    /// Create a client for the proxy at `base_url` (e.g. `http://host/api`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flight-stream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upstream_url: DEFAULT_UPSTREAM.to_string(),
            timeout: Duration::from_secs(15),
            history_cache: TtlCache::new(HISTORY_TTL),
        })
    }

    /// Per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upstream base URL used for track requests.
    #[must_use]
    pub fn with_upstream(mut self, upstream_url: impl Into<String>) -> Self {
        self.upstream_url = upstream_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Share a history cache with other clients.
    #[must_use]
    pub fn with_history_cache(mut self, cache: TtlCache<HistoryKey, HistoryPayload>) -> Self {
        self.history_cache = cache;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl FlightSource for ProxyClient {
    async fn fetch_flights(&self, bounds: Option<GeoBounds>) -> Result<FlightsPayload, FeedError> {
        let query: Vec<(&str, String)> = bounds.map(|b| b.query_pairs().to_vec()).unwrap_or_default();
        let body = http_get(&self.client, &self.url("/flights"), &query, self.timeout).await?;
        let payload = decode_flights_body(&body)?;
        debug!(
            "Proxy returned {} flights (cached: {}, skipped: {})",
            payload.flights.len(),
            payload.cached,
            payload.skipped
        );
        Ok(payload)
    }

    async fn fetch_history(&self, icao24: &str, window: TimeWindow) -> Result<HistoryPayload, FeedError> {
        let icao24 = icao24.trim().to_lowercase();
        let key = (icao24.clone(), window.begin, window.end);
        if let Some(cached) = self.history_cache.get(&key) {
            debug!("History for {icao24} served from cache");
            return Ok(cached);
        }

        let query = [
            ("icao24", icao24.clone()),
            ("begin", window.begin.to_string()),
            ("end", window.end.to_string()),
        ];
        let body = http_get(&self.client, &self.url("/flights/history"), &query, self.timeout).await?;
        let payload: HistoryPayload =
            serde_json::from_slice(&body).map_err(|e| FeedError::Decode(e.to_string()))?;
        self.history_cache.set(key, payload.clone());
        Ok(payload)
    }

    async fn fetch_airport(&self, query: &AirportQuery) -> Result<AirportPayload, FeedError> {
        let params = [
            ("type", query.kind.as_str().to_string()),
            ("airport", query.airport.clone()),
            ("begin", query.window.begin.to_string()),
            ("end", query.window.end.to_string()),
        ];
        let body = http_get(&self.client, &self.url("/flights"), &params, self.timeout).await?;
        serde_json::from_slice(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }

    async fn fetch_track(&self, icao24: &str) -> Result<FlightTrack, FeedError> {
        let icao24 = icao24.trim().to_lowercase();
        let query = [("icao24", icao24.clone()), ("time", "0".to_string())];
        let url = format!("{}/tracks/all", self.upstream_url);
        let body = http_get(&self.client, &url, &query, self.timeout).await?;
        FlightTrack::from_json(&body, &icao24).map_err(|e| FeedError::Decode(e.to_string()))
    }

    async fn open_push_stream(&self) -> Result<PushStream, FeedError> {
        let url = self.url("/flights/stream");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .timeout(Duration::from_secs(24 * 60 * 60))
            .send();
        let mut response = tokio::time::timeout(self.timeout, response)
            .await
            .map_err(|_elapsed| FeedError::Timeout(self.timeout))?
            .map_err(|e| FeedError::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Upstream {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        info!("Server-push stream opened at {url}");

        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        let cancel_token = CancellationToken::new();
        let task_cancel = cancel_token.clone();
        // Upstream pushes every ~15s; allow two missed events before giving up.
        let idle_timeout = self.timeout.max(Duration::from_secs(15)) * 2;

        tokio::spawn(async move {
            let mut decoder = EventStreamDecoder::new();
            loop {
                let chunk = tokio::select! {
                    () = task_cancel.cancelled() => return,
                    chunk = tokio::time::timeout(idle_timeout, response.chunk()) => chunk,
                };
                let chunk = match chunk {
                    Ok(Ok(Some(chunk))) => chunk,
                    Ok(Ok(None)) => {
                        info!("Server-push stream closed by server");
                        return;
                    }
                    Ok(Err(e)) => {
                        let _ = tx.send(Err(FeedError::from_reqwest(&e, idle_timeout))).await;
                        return;
                    }
                    Err(_elapsed) => {
                        warn!("Server-push stream idle for {idle_timeout:?}");
                        let _ = tx.send(Err(FeedError::Timeout(idle_timeout))).await;
                        return;
                    }
                };
                let events = match decoder.feed(&chunk) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Dropping server-push connection: {e}");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                for data in events {
                    if tx.send(decode_flights_body(data.as_bytes())).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(PushStream::new(rx, cancel_token))
    }
}
