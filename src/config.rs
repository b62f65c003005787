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

//! Application configuration management.
//!
//! Settings are persisted as TOML through `confy`. Every field carries a serde
//! default so older or hand-edited files load without error, and the library
//! policy types are built from them here.

use std::time::Duration;

use flight_stream::{
    FeedError, FeedSource, OpenSkySource, ProxyClient, RetentionPolicy, RetryPolicy,
    SceneConfig, StreamConfig, Transport,
};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "livesky-desktop";
const CONFIG_NAME: &str = "config";

/// Default upstream REST API.
pub const DEFAULT_UPSTREAM_URL: &str = "https://opensky-network.org/api";

/// Map tile and marker palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

/// How live snapshots are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FeedTransport {
    #[default]
    Poll,
    EventStream,
}

impl From<FeedTransport> for Transport {
    fn from(value: FeedTransport) -> Self {
        match value {
            FeedTransport::Poll => Transport::Poll,
            FeedTransport::EventStream => Transport::EventStream,
        }
    }
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Data Proxy base URL; the upstream is queried directly when unset
    #[serde(default)]
    pub proxy_base_url: Option<String>,

    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Random spread added to each retry delay (0.0 - 1.0)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// How long an aircraft missing from the feed stays on the map; 0 removes it at once
    #[serde(default = "default_marker_retention_secs")]
    pub marker_retention_secs: u64,

    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Initial map center as (lat, lon)
    #[serde(default = "default_center")]
    pub default_center: (f64, f64),

    #[serde(default)]
    pub theme: Theme,

    #[serde(default)]
    pub transport: FeedTransport,

    /// Rows added per "show more" in the flight list
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Restrict polling to the visible map area
    #[serde(default)]
    pub bounded_polling: bool,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_marker_retention_secs() -> u64 {
    30
}

fn default_zoom() -> f64 {
    3.0
}

fn default_center() -> (f64, f64) {
    (20.0, 0.0)
}

fn default_list_page_size() -> usize {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            proxy_base_url: None,
            upstream_base_url: default_upstream_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: default_retry_jitter(),
            marker_retention_secs: default_marker_retention_secs(),
            default_zoom: default_zoom(),
            default_center: default_center(),
            theme: Theme::default(),
            transport: FeedTransport::default(),
            list_page_size: default_list_page_size(),
            bounded_polling: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1_000))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1_000))
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier.max(1.0),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            poll_interval: self.poll_interval(),
            request_timeout: self.request_timeout(),
            retry: self.retry_policy(),
            transport: self.transport.into(),
            bounds: None,
        }
    }

    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention: Duration::from_secs(self.marker_retention_secs),
        }
    }

    /// Scene settings; the marker glide follows the poll interval.
    #[must_use]
    pub fn scene_config(&self) -> SceneConfig {
        let mut scene = SceneConfig {
            retention: self.retention(),
            ..SceneConfig::default()
        };
        scene.animation.glide = self.poll_interval();
        scene
    }

    /// Build the configured data source.
    pub fn feed_source(&self) -> Result<FeedSource, FeedError> {
        let timeout = self.request_timeout();
        match self.proxy_base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(FeedSource::Proxy(
                ProxyClient::new(url)?
                    .with_timeout(timeout)
                    .with_upstream(self.upstream_base_url.clone()),
            )),
            _ => Ok(FeedSource::OpenSky(
                OpenSkySource::with_base_url(self.upstream_base_url.clone())?.with_timeout(timeout),
            )),
        }
    }
}
