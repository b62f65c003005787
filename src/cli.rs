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

use clap::Parser;
use log::LevelFilter;

use crate::config::{AppConfig, FeedTransport, Theme};

/// Command-line overrides for the persisted configuration.
#[derive(Debug, Parser)]
#[command(name = "livesky")]
#[command(about = "Live flight tracker with smooth aircraft markers")]
#[command(version)]
pub struct Cli {
    /// Data Proxy base URL (e.g. http://localhost:3000/api)
    #[arg(long)]
    pub proxy_url: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Live data transport
    #[arg(long, value_enum)]
    pub transport: Option<FeedTransport>,

    #[arg(long, value_enum)]
    pub theme: Option<Theme>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG applies otherwise
    #[arg(long)]
    pub log_level: Option<LevelFilter>,

    /// Print the configuration file path and exit
    #[arg(long)]
    pub print_config_path: bool,
}

impl Cli {
    /// Apply overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.proxy_url {
            config.proxy_base_url = Some(url.clone());
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(theme) = self.theme {
            config.theme = theme;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "livesky",
            "--proxy-url",
            "http://localhost:3000/api",
            "--poll-interval-ms",
            "15000",
            "--transport",
            "event-stream",
            "--theme",
            "light",
            "--log-level",
            "debug",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.proxy_base_url.as_deref(), Some("http://localhost:3000/api"));
        assert_eq!(config.poll_interval_ms, 15_000);
        assert_eq!(config.transport, FeedTransport::EventStream);
        assert_eq!(config.theme, Theme::Light);
        assert_eq!(cli.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["livesky"]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, AppConfig::default());
        assert!(!cli.print_config_path);
    }
}
