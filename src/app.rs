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

//! Top-level eframe application.
//!
//! Owns the Stream Controller handle and the map scene. Each frame pulls the
//! latest snapshot from the controller's watch channel, applies it to the
//! scene when the registry generation changed, collects finished requests,
//! then draws the panels and the map.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flight_stream::{
    ChangeType, FeedError, FeedSource, FlightRegistry, FlightSource, FlightTrack, MapScene,
    StreamController, StreamHandle, StreamSnapshot, Viewport,
};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::config::{AppConfig, Theme};
use crate::map::{MapEvent, MapView, TileManager};
use crate::tasks::TaskSlot;
use crate::ui::{AirportSearch, DetailPanel, FlightList, MapStats, PanelAction, StatusAction, StatusPane};

const IDLE_REPAINT: Duration = Duration::from_secs(1);

pub struct LiveSkyApp {
    config: AppConfig,
    source: Arc<FeedSource>,
    stream: StreamHandle,
    updates: watch::Receiver<StreamSnapshot>,
    snapshot: StreamSnapshot,
    applied_generation: u64,
    retained: usize,
    scene: MapScene,
    tiles: TileManager,
    map: MapView,
    list: FlightList,
    panel: DetailPanel,
    airport: AirportSearch,
    status: StatusPane,
    track: TaskSlot<(u64, Result<FlightTrack, FeedError>)>,
}

impl std::fmt::Debug for LiveSkyApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSkyApp")
            .field("source", &self.source)
            .field("generation", &self.applied_generation)
            .finish_non_exhaustive()
    }
}

impl LiveSkyApp {
    /// Build the app and start the Stream Controller.
    ///
    /// Must be called within a tokio runtime context.
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Result<Self, FeedError> {
        apply_visuals(&cc.egui_ctx, config.theme);

        let source = Arc::new(config.feed_source()?);
        info!("Using data source {source:?}");

        let controller = StreamController::with_shared_source(source.clone(), config.stream_config());
        let updates = controller.subscribe();
        let stream = controller.start();

        // Wake the UI whenever the controller publishes
        let ctx = cc.egui_ctx.clone();
        let mut wake = updates.clone();
        tokio::spawn(async move {
            while wake.changed().await.is_ok() {
                ctx.request_repaint();
            }
        });

        let viewport = Viewport::new(config.default_center, config.default_zoom, 1280.0, 800.0);
        Ok(Self {
            scene: MapScene::new(config.scene_config(), viewport),
            tiles: TileManager::new(config.theme),
            map: MapView::new(config.theme),
            list: FlightList::new(config.list_page_size),
            panel: DetailPanel::new(),
            airport: AirportSearch::new(),
            status: StatusPane::new(),
            track: TaskSlot::new("track"),
            snapshot: StreamSnapshot::default(),
            applied_generation: 0,
            retained: 0,
            config,
            source,
            stream,
            updates,
        })
    }

    /// Adopt the latest controller snapshot.
    fn pull_snapshot(&mut self, now: Instant) {
        if !self.updates.has_changed().unwrap_or(false) {
            return;
        }
        let snapshot = self.updates.borrow_and_update().clone();
        let previous = std::mem::replace(&mut self.snapshot, snapshot);
        if self.snapshot.generation == self.applied_generation {
            return;
        }
        self.applied_generation = self.snapshot.generation;

        log_changes(&previous.flights, &self.snapshot.flights);
        let report = self.scene.apply_registry(&self.snapshot.flights, now);
        self.retained = self
            .scene
            .known_count()
            .saturating_sub(self.snapshot.flights.map_eligible().count());
        debug!(
            "Applied generation {}: {:?}, {} retained",
            self.applied_generation, report, self.retained
        );
    }

    fn collect_results(&mut self) {
        if let Some((request, result)) = self.track.poll() {
            self.scene.complete_track(request, result);
        }
        self.panel.poll();
        self.airport.poll();
    }

    fn select(&mut self, ctx: &egui::Context, icao24: &str, now: Instant) {
        if let Some(request) = self.scene.select(icao24, now) {
            let source = self.source.clone();
            let icao = icao24.to_string();
            self.track.spawn(ctx, async move {
                let result = source.fetch_track(&icao).await;
                (request, result)
            });
        } else {
            // Listed but without a position: details only.
            self.scene.clear_selection();
            self.track.cancel();
        }
        self.panel.open(ctx, icao24, self.source.clone());
    }

    fn deselect(&mut self) {
        self.scene.clear_selection();
        self.track.cancel();
        self.panel.close();
    }

    fn toggle_theme(&mut self, ctx: &egui::Context) {
        let theme = self.config.theme.toggled();
        self.config.theme = theme;
        self.tiles.set_theme(theme);
        self.map.set_theme(theme);
        apply_visuals(ctx, theme);
        if let Err(e) = self.config.save() {
            warn!("Failed to save configuration: {e}");
        }
    }

    fn handle_map_event(&mut self, ctx: &egui::Context, event: MapEvent, now: Instant) {
        match event {
            MapEvent::Select(icao) => self.select(ctx, &icao, now),
            MapEvent::ClearSelection => self.deselect(),
            MapEvent::ZoomToCluster(key) => {
                self.scene.click_cluster(&key, now);
            }
            MapEvent::ViewportSettled(viewport) => {
                if self.config.bounded_polling {
                    self.stream.set_bounds(Some(viewport.bounds()));
                }
            }
        }
    }

    fn side_panel(&mut self, ctx: &egui::Context, now: Instant) {
        let mut clicked = None;
        let mut close = false;

        egui::SidePanel::right("flights")
            .default_width(340.0)
            .resizable(true)
            .show(ctx, |ui| {
                if let Some(icao) = self.panel.icao24() {
                    let flight = self
                        .snapshot
                        .flights
                        .by_id(icao)
                        .or_else(|| self.scene.known_flight(icao));
                    if self.panel.show(ui, flight, self.scene.track()) == Some(PanelAction::Close) {
                        close = true;
                    }
                    ui.separator();
                }
                clicked = self.list.show(ui, &self.snapshot.flights, self.panel.icao24());
            });

        if close {
            self.deselect();
        } else if let Some(icao) = clicked {
            self.select(ctx, &icao, now);
        }
    }
}

impl eframe::App for LiveSkyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.pull_snapshot(now);
        self.collect_results();

        let stats = MapStats {
            markers: self.scene.markers().len(),
            retained: self.retained,
            theme: self.config.theme,
        };
        match self.status.render(ctx, &self.snapshot, stats) {
            Some(StatusAction::Reconnect) => {
                info!("Reconnect requested");
                self.stream.reconnect();
            }
            Some(StatusAction::ToggleTheme) => self.toggle_theme(ctx),
            Some(StatusAction::OpenAirportSearch) => self.airport.open = true,
            None => {}
        }

        self.airport.show(ctx, &self.source);
        self.side_panel(ctx, now);

        let events = egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| self.map.show(ui, &mut self.scene, &self.tiles, now))
            .inner;
        for event in events {
            self.handle_map_event(ctx, event, now);
        }

        if self.scene.is_animating(now) || self.map.is_interacting() {
            ctx.request_repaint();
        } else {
            // Keep the UTC clock ticking
            ctx.request_repaint_after(IDLE_REPAINT);
        }
    }
}

fn apply_visuals(ctx: &egui::Context, theme: Theme) {
    ctx.set_visuals(match theme {
        Theme::Dark => egui::Visuals::dark(),
        Theme::Light => egui::Visuals::light(),
    });
}

fn log_changes(previous: &FlightRegistry, current: &FlightRegistry) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let changes = current.changes_since(previous);
    let moved = changes.values().filter(|c| **c == ChangeType::PositionChanged).count();
    let other = changes.values().filter(|c| **c == ChangeType::OtherChanged).count();
    debug!(
        "Refresh: {} flights, {} moved or new, {} other changes, {} unchanged",
        current.count(),
        moved,
        other,
        changes.len() - moved - other
    );
}
