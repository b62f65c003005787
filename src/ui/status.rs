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

use chrono::{DateTime, Utc};
use egui::{Color32, RichText};
use flight_stream::StreamSnapshot;

use crate::config::Theme;

/// Connection indicator shown in the status pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Live,
    Cached,
    Offline,
}

impl FeedStatus {
    #[must_use]
    pub fn from_snapshot(snapshot: &StreamSnapshot) -> Self {
        if snapshot.initial_loading {
            Self::Connecting
        } else if snapshot.is_connected {
            Self::Live
        } else if snapshot.cached {
            Self::Cached
        } else {
            Self::Offline
        }
    }

    fn style(self) -> (Color32, &'static str, &'static str) {
        match self {
            Self::Connecting => (Color32::from_rgb(255, 200, 100), "CONNECTING", "◐"),
            Self::Live => (Color32::from_rgb(100, 255, 100), "LIVE", "●"),
            Self::Cached => (Color32::from_rgb(255, 170, 60), "CACHED", "◑"),
            Self::Offline => (Color32::from_rgb(255, 100, 100), "OFFLINE", "○"),
        }
    }
}

/// Button pressed in the status pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Reconnect,
    ToggleTheme,
    OpenAirportSearch,
}

/// Figures shown besides the feed snapshot.
#[derive(Debug, Clone, Copy)]
pub struct MapStats {
    pub markers: usize,
    pub retained: usize,
    pub theme: Theme,
}

pub struct StatusPane {
    pub visible: bool,
    pub collapsed: bool,
}

impl std::fmt::Debug for StatusPane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPane")
            .field("visible", &self.visible)
            .field("collapsed", &self.collapsed)
            .finish()
    }
}

impl Default for StatusPane {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPane {
    #[must_use]
    pub fn new() -> Self {
        Self {
            visible: true,
            collapsed: false,
        }
    }

    /// Render the status pane as a floating window
    pub fn render(&mut self, ctx: &egui::Context, snapshot: &StreamSnapshot, stats: MapStats) -> Option<StatusAction> {
        let mut action = None;

        if !self.visible {
            // Show a small button to re-open the status pane when hidden
            egui::Window::new("show_status")
                .title_bar(false)
                .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(10.0, -10.0))
                .fixed_size(egui::vec2(140.0, 35.0))
                .resizable(false)
                .frame(pane_frame(ctx, 200))
                .show(ctx, |ui| {
                    if ui.button(RichText::new("📊 Show Status")
                        .color(Color32::from_rgb(150, 200, 220))
                        .size(11.0))
                        .clicked() {
                        self.visible = true;
                    }
                });
            return None;
        }

        egui::Window::new("Feed Status")
            .title_bar(false)
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(10.0, -10.0))
            .fixed_size(egui::vec2(260.0, if self.collapsed { 30.0 } else { 220.0 }))
            .resizable(false)
            .collapsible(false)
            .frame(pane_frame(ctx, 230))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(RichText::new("◈ STATUS")
                        .color(Color32::from_rgb(100, 180, 220))
                        .size(12.0)
                        .strong());

                    let (color, text, icon) = FeedStatus::from_snapshot(snapshot).style();
                    ui.label(RichText::new(format!("{icon} {text}")).color(color).size(10.0).monospace().strong());

                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button(RichText::new("✕")
                            .size(12.0)
                            .color(Color32::from_rgb(200, 100, 100)))
                            .on_hover_text("Hide status pane")
                            .clicked() {
                            self.visible = false;
                        }

                        let collapse_icon = if self.collapsed { "▲" } else { "▼" };
                        if ui.button(RichText::new(collapse_icon).size(10.0))
                            .on_hover_text(if self.collapsed { "Expand" } else { "Collapse" })
                            .clicked() {
                            self.collapsed = !self.collapsed;
                        }
                    });
                });

                if self.collapsed {
                    return;
                }
                ui.separator();

                metric(ui, "UTC", Utc::now().format("%H:%M:%S").to_string());
                metric(ui, "Aircraft", format!(
                    "{} total / {} airborne",
                    snapshot.flights.count(),
                    snapshot.flights.airborne_count()
                ));
                metric(ui, "On map", format!("{} markers ({} retained)", stats.markers, stats.retained));
                metric(ui, "Updated", last_update_text(snapshot.last_update, Utc::now()));
                if snapshot.retry_attempt > 0 {
                    metric(ui, "Retry", format!("attempt {}", snapshot.retry_attempt));
                }
                if snapshot.is_loading {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(RichText::new("Fetching...").size(9.0));
                    });
                }
                if let Some(error) = &snapshot.error {
                    ui.label(RichText::new(error.to_string())
                        .color(Color32::from_rgb(255, 120, 120))
                        .size(9.0));
                }

                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    if ui.button("Reconnect").clicked() {
                        action = Some(StatusAction::Reconnect);
                    }
                    let theme_label = match stats.theme {
                        Theme::Dark => "☀ Light",
                        Theme::Light => "🌙 Dark",
                    };
                    if ui.button(theme_label).clicked() {
                        action = Some(StatusAction::ToggleTheme);
                    }
                    if ui.button("✈ Airports").clicked() {
                        action = Some(StatusAction::OpenAirportSearch);
                    }
                });
            });

        action
    }
}

fn pane_frame(ctx: &egui::Context, alpha: u8) -> egui::Frame {
    egui::Frame::window(&ctx.style())
        .fill(Color32::from_rgba_unmultiplied(25, 30, 35, alpha))
        .stroke(egui::Stroke::new(1.0, Color32::from_rgb(60, 80, 100)))
        .corner_radius(6.0)
}

fn metric(ui: &mut egui::Ui, label: &str, value: String) {
    ui.horizontal(|ui| {
        ui.label(RichText::new(format!("{label}:"))
            .color(Color32::from_rgb(130, 130, 130))
            .size(9.0));
        ui.label(RichText::new(value)
            .color(Color32::from_rgb(200, 200, 200))
            .size(9.0)
            .monospace());
    });
}

fn last_update_text(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_update {
        None => "never".to_string(),
        Some(at) => {
            let secs = (now - at).num_seconds().max(0);
            if secs < 60 {
                format!("{secs}s ago")
            } else {
                format!("{}m {:02}s ago", secs / 60, secs % 60)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_from_snapshot() {
        let mut snapshot = StreamSnapshot::default();
        assert_eq!(FeedStatus::from_snapshot(&snapshot), FeedStatus::Connecting);

        snapshot.initial_loading = false;
        assert_eq!(FeedStatus::from_snapshot(&snapshot), FeedStatus::Offline);

        snapshot.cached = true;
        assert_eq!(FeedStatus::from_snapshot(&snapshot), FeedStatus::Cached);

        snapshot.is_connected = true;
        snapshot.cached = false;
        assert_eq!(FeedStatus::from_snapshot(&snapshot), FeedStatus::Live);
    }

    #[test]
    fn test_last_update_text() {
        let now = Utc::now();
        assert_eq!(last_update_text(None, now), "never");
        assert_eq!(last_update_text(Some(now - Duration::seconds(12)), now), "12s ago");
        assert_eq!(last_update_text(Some(now - Duration::seconds(125)), now), "2m 05s ago");
    }
}
