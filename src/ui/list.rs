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

use egui::{Color32, RichText};
use flight_stream::{Flight, FlightRegistry, ListQuery};

pub const NO_FLIGHTS: &str = "No flights found";

/// Searchable, paginated flight list.
#[derive(Debug)]
pub struct FlightList {
    search: String,
    page_size: usize,
    limit: usize,
}

impl FlightList {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            search: String::new(),
            page_size,
            limit: page_size,
        }
    }

    #[must_use]
    pub fn query(&self) -> ListQuery {
        ListQuery {
            search: self.search.clone(),
            limit: self.limit,
        }
    }

    /// Replace the search text; a new search starts from the first page.
    pub fn set_search(&mut self, text: &str) {
        if self.search != text {
            self.search = text.to_string();
            self.limit = self.page_size;
        }
    }

    pub fn show_more(&mut self) {
        self.limit += self.page_size;
    }

    /// Render the list. Returns the icao24 of a clicked row.
    pub fn show(&mut self, ui: &mut egui::Ui, registry: &FlightRegistry, selected: Option<&str>) -> Option<String> {
        let mut clicked = None;

        ui.vertical(|ui| {
            ui.label(RichText::new("◈ FLIGHTS")
                .color(Color32::from_rgb(100, 200, 100))
                .size(14.0)
                .strong());

            let mut search = self.search.clone();
            ui.add(egui::TextEdit::singleline(&mut search)
                .hint_text("Search callsign or country")
                .desired_width(f32::INFINITY));
            self.set_search(&search);
        });

        let page = registry.query(&self.query());
        ui.label(RichText::new(format!("SHOWING {} OF {}", page.flights.len(), page.total_matches))
            .color(Color32::from_rgb(150, 150, 150))
            .size(10.0)
            .monospace());
        ui.add_space(4.0);

        if page.flights.is_empty() {
            ui.label(RichText::new(NO_FLIGHTS).color(Color32::from_rgb(160, 160, 160)).italics());
            return None;
        }

        let has_more = page.has_more;
        egui::ScrollArea::vertical().show(ui, |ui| {
            ui.push_id("flight_list", |ui| {
                for flight in page.flights {
                    let is_selected = selected == Some(flight.icao24.as_str());
                    if flight_row(ui, flight, is_selected) {
                        clicked = Some(flight.icao24.clone());
                    }
                    ui.add_space(3.0);
                }

                if has_more && ui.button("Show more").clicked() {
                    self.show_more();
                }
            });
        });

        clicked
    }
}

fn flight_row(ui: &mut egui::Ui, flight: &Flight, is_selected: bool) -> bool {
    let (status_color, status_symbol) = if flight.on_ground {
        (Color32::from_rgb(150, 150, 150), "○")
    } else {
        (Color32::from_rgb(100, 255, 100), "●")
    };

    let frame = if is_selected {
        egui::Frame::group(ui.style()).fill(Color32::from_rgba_unmultiplied(100, 140, 180, 220))
    } else {
        egui::Frame::group(ui.style())
    };

    let response = frame.show(ui, |ui| {
        ui.horizontal(|ui| {
            ui.label(RichText::new(status_symbol).color(status_color).size(12.0));
            let callsign_color = if is_selected {
                Color32::from_rgb(255, 50, 50)
            } else {
                Color32::from_rgb(150, 220, 150)
            };
            ui.label(RichText::new(flight.label()).color(callsign_color).size(11.0).strong());
            ui.label(RichText::new(&flight.icao24)
                .color(Color32::from_rgb(200, 220, 255))
                .size(10.0)
                .monospace());

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let altitude = if flight.on_ground {
                    "GND".to_string()
                } else {
                    format!("FL{:03}", flight.altitude_feet() / 100)
                };
                ui.label(RichText::new(altitude)
                    .color(Color32::from_rgb(200, 200, 100))
                    .size(10.0)
                    .monospace());
            });
        });

        ui.horizontal(|ui| {
            ui.spacing_mut().item_spacing.x = 8.0;
            let dim = Color32::from_rgb(180, 180, 180);
            ui.label(RichText::new(format!("SPD {:03}kt", flight.speed_knots())).color(dim).size(9.0).monospace());
            ui.label(RichText::new(format!("HDG {:03.0}°", flight.heading_or_zero())).color(dim).size(9.0).monospace());
            if let Some(country) = &flight.origin_country {
                ui.label(RichText::new(country).color(Color32::from_rgb(130, 130, 130)).size(9.0));
            }
        });
    });

    response.response.interact(egui::Sense::click()).clicked()
}
