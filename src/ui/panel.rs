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

//! Detail panel for the selected flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use egui::{Color32, RichText};
use flight_stream::{
    FeedError, FeedSource, Flight, FlightHistoryItem, FlightSource, HistoryPayload, TimeWindow,
    TrackState,
};
use log::warn;

use crate::tasks::TaskSlot;

const HISTORY_DAYS: i64 = 2;

/// Flight history request status.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    Idle,
    Loading,
    Loaded(Vec<FlightHistoryItem>),
    Failed(String),
}

/// Button pressed in the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Close,
}

/// Detail panel state for the selected aircraft.
#[derive(Debug)]
pub struct DetailPanel {
    icao24: Option<String>,
    history: HistoryState,
    request: TaskSlot<(String, Result<HistoryPayload, FeedError>)>,
}

impl Default for DetailPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl DetailPanel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            icao24: None,
            history: HistoryState::Idle,
            request: TaskSlot::new("history"),
        }
    }

    #[must_use]
    pub fn icao24(&self) -> Option<&str> {
        self.icao24.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &HistoryState {
        &self.history
    }

    /// Show `icao24` and fetch its recent history.
    pub fn open(&mut self, ctx: &egui::Context, icao24: &str, source: Arc<FeedSource>) {
        if self.icao24.as_deref() == Some(icao24) {
            return;
        }
        self.icao24 = Some(icao24.to_string());
        self.history = HistoryState::Loading;

        let icao = icao24.to_string();
        let window = TimeWindow::last_days(HISTORY_DAYS, Utc::now().timestamp());
        self.request.spawn(ctx, async move {
            let result = source.fetch_history(&icao, window).await;
            (icao, result)
        });
    }

    pub fn close(&mut self) {
        self.request.cancel();
        self.icao24 = None;
        self.history = HistoryState::Idle;
    }

    /// Collect a finished history request.
    pub fn poll(&mut self) {
        if let Some((icao, result)) = self.request.poll() {
            self.accept(&icao, result);
        }
    }

    /// Apply a history result. Results for another aircraft are ignored.
    pub fn accept(&mut self, icao24: &str, result: Result<HistoryPayload, FeedError>) -> bool {
        if self.icao24.as_deref() != Some(icao24) {
            return false;
        }
        self.history = match result {
            Ok(payload) => HistoryState::Loaded(payload.flights),
            Err(e) => {
                warn!("History for {icao24} failed: {e}");
                HistoryState::Failed(e.to_string())
            }
        };
        true
    }

    /// Render the panel body.
    pub fn show(&self, ui: &mut egui::Ui, flight: Option<&Flight>, track: &TrackState) -> Option<PanelAction> {
        let icao24 = self.icao24.as_deref()?;
        let mut action = None;

        ui.horizontal(|ui| {
            let title = flight.map_or(icao24, Flight::label);
            ui.label(RichText::new(format!("◈ {title}"))
                .color(Color32::from_rgb(100, 180, 220))
                .size(14.0)
                .strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button(RichText::new("✕").color(Color32::from_rgb(200, 100, 100)))
                    .on_hover_text("Clear selection")
                    .clicked()
                {
                    action = Some(PanelAction::Close);
                }
            });
        });
        ui.separator();

        match flight {
            Some(flight) => flight_details(ui, flight),
            None => {
                ui.label(RichText::new("No longer in the live feed").italics());
            }
        }

        ui.add_space(6.0);
        section_header(ui, "TRACK");
        match track {
            TrackState::Loading { .. } => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Loading track...");
                });
            }
            TrackState::Ready(track) => {
                ui.label(format!("{} points", track.path.len()));
            }
            TrackState::Failed { error, .. } => {
                ui.label(RichText::new(format!("No track: {error}")).color(Color32::from_rgb(255, 120, 120)));
            }
            TrackState::None => {}
        }

        ui.add_space(6.0);
        section_header(ui, "HISTORY (2 DAYS)");
        match &self.history {
            HistoryState::Idle => {}
            HistoryState::Loading => {
                ui.spinner();
            }
            HistoryState::Failed(error) => {
                ui.label(RichText::new(error).color(Color32::from_rgb(255, 120, 120)));
            }
            HistoryState::Loaded(items) if items.is_empty() => {
                ui.label(RichText::new("No recent flights").italics());
            }
            HistoryState::Loaded(items) => {
                egui::ScrollArea::vertical().max_height(220.0).show(ui, |ui| {
                    for item in items {
                        history_row(ui, item);
                    }
                });
            }
        }

        ui.add_space(6.0);
        if ui.link("View on OpenSky").clicked() {
            let url = format!("https://opensky-network.org/aircraft-profile?icao24={icao24}");
            if let Err(e) = webbrowser::open(&url) {
                warn!("Failed to open browser: {e}");
            }
        }

        action
    }
}

fn section_header(ui: &mut egui::Ui, text: &str) {
    ui.label(RichText::new(text)
        .color(Color32::from_rgb(150, 150, 150))
        .size(9.0)
        .strong());
}

fn detail_row(ui: &mut egui::Ui, label: &str, value: String) {
    ui.horizontal(|ui| {
        ui.label(RichText::new(label).color(Color32::from_rgb(130, 130, 130)).size(10.0));
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            ui.label(RichText::new(value).color(Color32::from_rgb(210, 210, 210)).size(10.0).monospace());
        });
    });
}

fn flight_details(ui: &mut egui::Ui, flight: &Flight) {
    detail_row(ui, "ICAO24", flight.icao24.clone());
    detail_row(ui, "Country", flight.origin_country.clone().unwrap_or_else(|| "-".to_string()));
    detail_row(ui, "Altitude", format!("{} ft", flight.altitude_feet()));
    detail_row(ui, "Speed", format!("{} kt", flight.speed_knots()));
    detail_row(ui, "Heading", format!("{:.0}°", flight.heading_or_zero()));
    detail_row(ui, "Vertical rate", format!("{} fpm", flight.vertical_rate_fpm()));
    detail_row(ui, "Squawk", flight.squawk.clone().unwrap_or_else(|| "-".to_string()));
    detail_row(ui, "Status", if flight.on_ground { "On ground" } else { "Airborne" }.to_string());
    if let Some(contact) = flight.last_contact {
        detail_row(ui, "Last contact", format_epoch(contact));
    }
}

fn history_row(ui: &mut egui::Ui, item: &FlightHistoryItem) {
    egui::Frame::group(ui.style()).show(ui, |ui| {
        ui.horizontal(|ui| {
            ui.label(RichText::new(item.route_label()).monospace().strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(RichText::new(format_duration(item.duration_secs())).size(9.0).monospace());
            });
        });
        ui.label(RichText::new(format!("{} → {}", format_epoch(item.first_seen), format_epoch(item.last_seen)))
            .color(Color32::from_rgb(150, 150, 150))
            .size(9.0));
    });
}

/// `HH:MM` UTC with the date, or the raw number when out of range.
fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.format("%d %b %H:%M UTC").to_string())
}

fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(icao: &str) -> HistoryPayload {
        HistoryPayload {
            flights: Vec::new(),
            icao24: icao.to_string(),
        }
    }

    #[test]
    fn test_result_for_other_aircraft_is_ignored() {
        let mut panel = DetailPanel::new();
        panel.icao24 = Some("abc123".to_string());
        panel.history = HistoryState::Loading;

        assert!(!panel.accept("def456", Ok(payload("def456"))));
        assert_eq!(panel.history(), &HistoryState::Loading);

        assert!(panel.accept("abc123", Ok(payload("abc123"))));
        assert_eq!(panel.history(), &HistoryState::Loaded(Vec::new()));
    }

    #[test]
    fn test_history_failure_is_scoped_to_panel() {
        let mut panel = DetailPanel::new();
        panel.icao24 = Some("abc123".to_string());
        panel.accept("abc123", Err(FeedError::Upstream { status: 503, body: String::new() }));
        assert!(matches!(panel.history(), HistoryState::Failed(e) if e.contains("503")));

        panel.close();
        assert_eq!(panel.history(), &HistoryState::Idle);
        assert!(panel.icao24().is_none());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(3 * 3600 + 5 * 60), "3h 05m");
        assert_eq!(format_duration(-5), "0h 00m");
        assert_eq!(format_epoch(0), "01 Jan 00:00 UTC");
    }
}
