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

//! Airport arrivals/departures search over yesterday's window.

use std::sync::Arc;

use egui::{Color32, RichText};
use flight_stream::{
    AirportPayload, AirportQuery, FeedError, FeedSource, FlightSource, MovementKind,
};

use super::list::NO_FLIGHTS;
use crate::tasks::TaskSlot;

#[derive(Debug, Clone, PartialEq)]
pub enum AirportResults {
    Idle,
    Loading,
    Loaded(AirportPayload),
    Failed(String),
}

/// Airport search window.
#[derive(Debug)]
pub struct AirportSearch {
    pub open: bool,
    code: String,
    kind: MovementKind,
    results: AirportResults,
    request: TaskSlot<Result<AirportPayload, FeedError>>,
}

impl Default for AirportSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize user input to an ICAO airport code (4 alphanumerics).
#[must_use]
pub fn normalize_code(input: &str) -> Option<String> {
    let code = input.trim().to_uppercase();
    (code.len() == 4 && code.chars().all(|c| c.is_ascii_alphanumeric())).then_some(code)
}

impl AirportSearch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: false,
            code: String::new(),
            kind: MovementKind::Arrivals,
            results: AirportResults::Idle,
            request: TaskSlot::new("airport"),
        }
    }

    #[must_use]
    pub fn results(&self) -> &AirportResults {
        &self.results
    }

    /// Start a search for the current input. Returns `false` for an invalid code.
    pub fn search(&mut self, ctx: &egui::Context, source: Arc<FeedSource>) -> bool {
        let Some(code) = normalize_code(&self.code) else {
            self.results = AirportResults::Failed("Enter a 4-letter ICAO code".to_string());
            return false;
        };
        self.code.clone_from(&code);
        let query = AirportQuery::yesterday(&code, self.kind);
        self.results = AirportResults::Loading;
        self.request.spawn(ctx, async move { source.fetch_airport(&query).await });
        true
    }

    /// Collect a finished search.
    pub fn poll(&mut self) {
        if let Some(result) = self.request.poll() {
            self.results = match result {
                Ok(payload) => AirportResults::Loaded(payload),
                Err(e) => AirportResults::Failed(e.to_string()),
            };
        }
    }

    /// Render the search window.
    pub fn show(&mut self, ctx: &egui::Context, source: &Arc<FeedSource>) {
        let mut open = self.open;
        let mut submit = false;

        egui::Window::new("Airport Search")
            .open(&mut open)
            .default_width(340.0)
            .resizable(true)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let edit = ui.add(egui::TextEdit::singleline(&mut self.code)
                        .hint_text("ICAO, e.g. EGLL")
                        .desired_width(90.0));
                    if edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                        submit = true;
                    }
                    ui.selectable_value(&mut self.kind, MovementKind::Arrivals, "Arrivals");
                    ui.selectable_value(&mut self.kind, MovementKind::Departures, "Departures");
                    if ui.button("Search").clicked() {
                        submit = true;
                    }
                });
                ui.label(RichText::new("Showing yesterday's movements")
                    .color(Color32::from_rgb(130, 130, 130))
                    .size(9.0));
                ui.separator();

                match &self.results {
                    AirportResults::Idle => {}
                    AirportResults::Loading => {
                        ui.spinner();
                    }
                    AirportResults::Failed(error) => {
                        ui.label(RichText::new(error).color(Color32::from_rgb(255, 120, 120)));
                    }
                    AirportResults::Loaded(payload) if payload.flights.is_empty() => {
                        ui.label(RichText::new(NO_FLIGHTS).italics());
                    }
                    AirportResults::Loaded(payload) => {
                        ui.label(format!("{} {} at {}", payload.flights.len(), payload.kind.as_str(), payload.airport));
                        egui::ScrollArea::vertical().max_height(360.0).show(ui, |ui| {
                            egui::Grid::new("airport_results").striped(true).show(ui, |ui| {
                                for movement in &payload.flights {
                                    let flight = &movement.flight;
                                    let callsign = if flight.callsign.trim().is_empty() {
                                        flight.icao24.as_str()
                                    } else {
                                        flight.callsign.trim()
                                    };
                                    ui.label(RichText::new(callsign).monospace().strong());
                                    ui.label(RichText::new(flight.route_label()).monospace());
                                    ui.label(RichText::new(&flight.icao24).size(9.0).monospace());
                                    ui.end_row();
                                }
                            });
                        });
                    }
                }
            });

        self.open = open;
        if submit {
            self.search(ctx, source.clone());
        }
    }
}
