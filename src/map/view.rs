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

//! Painter-based map widget.
//!
//! Pan and zoom gestures move a local viewport that is drawn immediately;
//! the scene only receives it once the gesture has settled, so decluttering
//! runs on move end rather than on every frame.

use std::time::{Duration, Instant};

use egui::{Color32, FontId, Pos2, Rect, Sense, Shape, Stroke, Vec2};
use flight_stream::{MapScene, MarkerKey, RenderedMarker, Viewport};

use super::tiles::{tiles_for_viewport, TileManager};
use crate::config::Theme;
use crate::tasks::Debounce;

const SETTLE_DELAY: Duration = Duration::from_millis(250);
const SCROLL_ZOOM_PER_PIXEL: f64 = 1.0 / 200.0;
const MIN_HIT_RADIUS: f32 = 8.0;

/// What the user did on the map this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Select(String),
    ClearSelection,
    ZoomToCluster(MarkerKey),
    /// A pan or zoom gesture finished and the scene adopted this viewport.
    ViewportSettled(Viewport),
}

/// Colors for one theme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub background: Color32,
    pub airborne: Color32,
    pub ground: Color32,
    pub selected: Color32,
    pub outline: Color32,
    pub cluster_fill: Color32,
    pub cluster_text: Color32,
    pub track: Color32,
    pub label_bg: Color32,
    pub label_text: Color32,
    pub overlay_text: Color32,
}

impl Palette {
    #[must_use]
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                background: Color32::from_rgb(20, 24, 28),
                airborne: Color32::from_rgb(255, 200, 60),
                ground: Color32::from_rgb(140, 140, 140),
                selected: Color32::from_rgb(255, 70, 70),
                outline: Color32::from_black_alpha(200),
                cluster_fill: Color32::from_rgba_unmultiplied(60, 130, 200, 220),
                cluster_text: Color32::WHITE,
                track: Color32::from_rgb(255, 120, 60),
                label_bg: Color32::from_rgba_unmultiplied(0, 0, 0, 180),
                label_text: Color32::WHITE,
                overlay_text: Color32::from_white_alpha(170),
            },
            Theme::Light => Self {
                background: Color32::from_rgb(235, 238, 240),
                airborne: Color32::from_rgb(20, 90, 200),
                ground: Color32::from_rgb(130, 130, 130),
                selected: Color32::from_rgb(220, 40, 40),
                outline: Color32::from_white_alpha(220),
                cluster_fill: Color32::from_rgba_unmultiplied(30, 100, 180, 220),
                cluster_text: Color32::WHITE,
                track: Color32::from_rgb(230, 90, 30),
                label_bg: Color32::from_rgba_unmultiplied(255, 255, 255, 220),
                label_text: Color32::BLACK,
                overlay_text: Color32::from_black_alpha(180),
            },
        }
    }

    /// Fill color for an aircraft marker.
    #[must_use]
    pub fn marker_color(&self, marker: &RenderedMarker) -> Color32 {
        if marker.selected {
            self.selected
        } else if marker.on_ground {
            self.ground
        } else {
            self.airborne
        }
    }
}

/// Map widget state that lives across frames.
#[derive(Debug)]
pub struct MapView {
    live: Option<Viewport>,
    settle: Debounce,
    palette: Palette,
}

impl MapView {
    #[must_use]
    pub fn new(theme: Theme) -> Self {
        Self {
            live: None,
            settle: Debounce::new(SETTLE_DELAY),
            palette: Palette::for_theme(theme),
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.palette = Palette::for_theme(theme);
    }

    /// Whether a gesture is still waiting to be handed to the scene.
    #[must_use]
    pub fn is_interacting(&self) -> bool {
        self.live.is_some()
    }

    /// Draw the map and handle gestures.
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        scene: &mut MapScene,
        tiles: &TileManager,
        now: Instant,
    ) -> Vec<MapEvent> {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        let mut events = Vec::new();

        scene.resize(f64::from(rect.width()), f64::from(rect.height()));
        if self.live.is_none() {
            scene.advance_camera(now);
        }

        let mut viewport = self.live.unwrap_or(*scene.viewport());
        viewport.width = f64::from(rect.width());
        viewport.height = f64::from(rect.height());
        let mut moved = false;

        if response.dragged() {
            let delta = response.drag_delta();
            if delta != Vec2::ZERO {
                viewport.pan_by(f64::from(delta.x), f64::from(delta.y));
                moved = true;
            }
        }

        if response.hovered() {
            let (zoom_delta, scroll) = ui.input(|i| (i.zoom_delta(), i.smooth_scroll_delta.y));
            let change = f64::from(zoom_delta.log2()) + f64::from(scroll) * SCROLL_ZOOM_PER_PIXEL;
            if change.abs() > 1e-3 {
                let anchor = response.hover_pos().map_or(
                    (viewport.width / 2.0, viewport.height / 2.0),
                    |p| (f64::from(p.x - rect.min.x), f64::from(p.y - rect.min.y)),
                );
                viewport.zoom_around(viewport.zoom + change, anchor);
                moved = true;
            }
        }

        if moved {
            self.live = Some(viewport);
            self.settle.touch(now);
        }
        if let Some(live) = self.live {
            if !response.dragged() && self.settle.ready(now) {
                self.live = None;
                scene.set_viewport(live);
                events.push(MapEvent::ViewportSettled(live));
            } else {
                ui.ctx().request_repaint_after(SETTLE_DELAY);
            }
        }

        let view = self.live.unwrap_or(*scene.viewport());
        let to_screen = |lat: f64, lon: f64| -> Pos2 {
            let (x, y) = view.to_screen(lat, lon);
            rect.min + Vec2::new(x as f32, y as f32)
        };

        painter.rect_filled(rect, 0.0, self.palette.background);
        for tile in tiles_for_viewport(&view) {
            if let Some(texture) = tiles.get_tile(tile.coord, ui.ctx()) {
                let tile_rect = Rect::from_min_size(
                    rect.min + Vec2::new(tile.min.0, tile.min.1),
                    Vec2::splat(tile.size),
                );
                painter.image(
                    texture.id(),
                    tile_rect,
                    Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                    Color32::WHITE,
                );
            }
        }

        if let Some(track) = scene.track().path() {
            let points: Vec<Pos2> = track
                .path
                .iter()
                .map(|p| to_screen(p.latitude, p.longitude))
                .collect();
            painter.extend(Shape::dashed_line(
                &points,
                Stroke::new(2.5, self.palette.track),
                8.0,
                6.0,
            ));
        }

        let frame = scene.frame(now);
        let placed: Vec<(Pos2, &RenderedMarker)> = frame
            .iter()
            .map(|m| (to_screen(m.position.lat, m.position.lng), m))
            .filter(|(pos, m)| rect.expand(m.size).contains(*pos))
            .collect();

        for (pos, marker) in &placed {
            match marker.key {
                MarkerKey::Aircraft(_) => self.draw_aircraft(&painter, *pos, marker),
                MarkerKey::Cluster(_) => self.draw_cluster(&painter, *pos, marker),
            }
        }

        let pointer = response.hover_pos();
        let hovered = pointer.and_then(|p| hit_test(&placed, p));
        for (pos, marker) in &placed {
            let is_hovered = hovered.is_some_and(|h| h.key == marker.key);
            if marker.selected || is_hovered {
                if let Some(tooltip) = &marker.tooltip {
                    self.draw_label(&painter, *pos + Vec2::new(marker.size * 0.6 + 4.0, 0.0), tooltip);
                }
            }
        }

        if response.clicked() {
            if let Some(click) = response.interact_pointer_pos() {
                events.push(match hit_test(&placed, click) {
                    Some(marker) => match &marker.key {
                        MarkerKey::Aircraft(icao) => MapEvent::Select(icao.clone()),
                        MarkerKey::Cluster(_) => MapEvent::ZoomToCluster(marker.key.clone()),
                    },
                    None => MapEvent::ClearSelection,
                });
            }
        }

        self.draw_overlays(&painter, rect, tiles);
        events
    }

    fn draw_aircraft(&self, painter: &egui::Painter, pos: Pos2, marker: &RenderedMarker) {
        let fill = self.palette.marker_color(marker);
        let stroke = Stroke::new(1.0, self.palette.outline);
        let [fuselage, wings] = plane_outline(pos, marker.heading, marker.size / 2.0);
        painter.add(Shape::convex_polygon(wings.to_vec(), fill, stroke));
        painter.add(Shape::convex_polygon(fuselage.to_vec(), fill, stroke));
        if marker.selected {
            painter.circle_stroke(pos, marker.size * 0.75, Stroke::new(1.5, self.palette.selected));
        }
    }

    fn draw_cluster(&self, painter: &egui::Painter, pos: Pos2, marker: &RenderedMarker) {
        let radius = marker.size / 2.0;
        painter.circle(pos, radius, self.palette.cluster_fill, Stroke::new(1.0, self.palette.outline));

        // Heading tick on the rim
        let angle = marker.heading.to_radians() as f32;
        let dir = Vec2::new(angle.sin(), -angle.cos());
        painter.line_segment(
            [pos + dir * radius, pos + dir * (radius + 5.0)],
            Stroke::new(2.0, self.palette.cluster_fill),
        );

        if let Some(count) = marker.count {
            painter.text(
                pos,
                egui::Align2::CENTER_CENTER,
                count.to_string(),
                FontId::proportional(10.0),
                self.palette.cluster_text,
            );
        }
    }

    fn draw_label(&self, painter: &egui::Painter, text_pos: Pos2, text: &str) {
        let font = FontId::proportional(11.0);
        let galley = painter.layout_no_wrap(text.to_string(), font.clone(), self.palette.label_text);

        let padding = Vec2::new(3.0, 2.0);
        let box_rect = Rect::from_min_size(
            text_pos - Vec2::new(padding.x, galley.size().y / 2.0 + padding.y),
            galley.size() + padding * 2.0,
        );
        painter.rect_filled(box_rect, 2.0, self.palette.label_bg);
        painter.text(text_pos, egui::Align2::LEFT_CENTER, text, font, self.palette.label_text);
    }

    fn draw_overlays(&self, painter: &egui::Painter, rect: Rect, tiles: &TileManager) {
        painter.text(
            rect.left_top() + Vec2::new(10.0, 10.0),
            egui::Align2::LEFT_TOP,
            "Drag to pan | Scroll to zoom",
            FontId::proportional(12.0),
            self.palette.overlay_text,
        );

        // Attribution (required by Carto)
        painter.text(
            rect.right_bottom() + Vec2::new(-10.0, -10.0),
            egui::Align2::RIGHT_BOTTOM,
            "© OpenStreetMap contributors © CARTO",
            FontId::proportional(10.0),
            self.palette.overlay_text,
        );

        let failed = tiles.error_count();
        let message = if failed > 0 {
            Some((format!("Failed to load {failed} tiles"), Color32::from_rgb(220, 50, 50)))
        } else if tiles.has_loading_tiles() {
            Some(("Loading map tiles...".to_string(), Color32::from_rgb(255, 200, 100)))
        } else {
            None
        };
        if let Some((text, bg_color)) = message {
            let pos = rect.center_top() + Vec2::new(0.0, 20.0);
            let galley = painter.layout_no_wrap(text.clone(), FontId::proportional(12.0), Color32::WHITE);
            let bubble = Rect::from_center_size(pos, galley.size() + Vec2::new(24.0, 12.0));
            painter.rect_filled(bubble, 5.0, bg_color);
            painter.text(pos, egui::Align2::CENTER_CENTER, text, FontId::proportional(12.0), Color32::WHITE);
        }
    }
}

/// Fuselage and wing triangles of a plane icon centred on `pos`, nose along
/// `heading` degrees clockwise from north.
#[must_use]
pub fn plane_outline(pos: Pos2, heading: f64, half_size: f32) -> [[Pos2; 3]; 2] {
    let angle = heading.to_radians() as f32;
    let (sin, cos) = angle.sin_cos();
    let rotate = |x: f32, y: f32| pos + Vec2::new(x * cos - y * sin, x * sin + y * cos) * half_size;
    [
        [rotate(0.0, -1.0), rotate(0.28, 0.8), rotate(-0.28, 0.8)],
        [rotate(0.0, -0.3), rotate(0.95, 0.3), rotate(-0.95, 0.3)],
    ]
}

/// Topmost marker under `pointer`. Later entries draw on top.
#[must_use]
pub fn hit_test<'a>(placed: &[(Pos2, &'a RenderedMarker)], pointer: Pos2) -> Option<&'a RenderedMarker> {
    placed
        .iter()
        .rev()
        .find(|(pos, marker)| pos.distance(pointer) <= (marker.size * 0.7).max(MIN_HIT_RADIUS))
        .map(|(_, marker)| *marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flight_stream::{CellKey, LatLng};

    fn aircraft(icao: &str, selected: bool, on_ground: bool) -> RenderedMarker {
        RenderedMarker {
            key: MarkerKey::Aircraft(icao.to_string()),
            id: 1,
            position: LatLng::new(0.0, 0.0),
            heading: 0.0,
            selected,
            on_ground,
            size: 16.0,
            tooltip: None,
            count: None,
        }
    }

    #[test]
    fn test_marker_colors() {
        let palette = Palette::for_theme(Theme::Dark);
        assert_eq!(palette.marker_color(&aircraft("a", false, false)), palette.airborne);
        assert_eq!(palette.marker_color(&aircraft("a", false, true)), palette.ground);
        assert_eq!(palette.marker_color(&aircraft("a", true, true)), palette.selected);
        assert_ne!(Palette::for_theme(Theme::Light).airborne, palette.airborne);
    }

    #[test]
    fn test_plane_nose_follows_heading() {
        let center = Pos2::new(100.0, 100.0);
        let north = plane_outline(center, 0.0, 10.0);
        assert!((north[0][0].x - 100.0).abs() < 1e-3 && north[0][0].y < 100.0);

        let east = plane_outline(center, 90.0, 10.0);
        assert!((east[0][0].x - 110.0).abs() < 1e-3);
        assert!((east[0][0].y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_hit_test_prefers_topmost() {
        let below = aircraft("below", false, false);
        let above = aircraft("above", true, false);
        let cluster = RenderedMarker {
            key: MarkerKey::Cluster(CellKey { size: 48, x: 1, y: 1 }),
            count: Some(5),
            ..aircraft("c", false, false)
        };
        let placed = vec![
            (Pos2::new(10.0, 10.0), &below),
            (Pos2::new(12.0, 10.0), &above),
            (Pos2::new(200.0, 200.0), &cluster),
        ];

        assert_eq!(hit_test(&placed, Pos2::new(11.0, 10.0)).map(|m| &m.key), Some(&above.key));
        assert_eq!(hit_test(&placed, Pos2::new(203.0, 198.0)).map(|m| &m.key), Some(&cluster.key));
        assert!(hit_test(&placed, Pos2::new(100.0, 100.0)).is_none());
    }
}
