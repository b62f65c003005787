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

//! Map scene: the renderer-side state for one map view.
//!
//! The scene owns the animation states, the marker layer, the last-known copy
//! of every aircraft still on the map, the selection and its track, and the
//! camera. It is driven from two directions:
//!
//! - registry updates and viewport move-ends recompute the visible marker set
//! - every frame samples interpolated marker positions with [`MapScene::frame`]
//!
//! Aircraft missing from the latest registry stay on the map at their last
//! target for the retention period, then their marker and animation state are
//! dropped together.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::animation::{AnimationBook, AnimationConfig, LatLng, Transition};
use crate::declutter::{cluster_zoom_target, declutter, DeclutterPolicy};
use crate::flight::{Flight, FlightTrack};
use crate::geo::{wrap_lon, Viewport};
use crate::markers::{MarkerKey, MarkerLayer, MarkerSpec, ReconcileReport};
use crate::registry::FlightRegistry;
use crate::source::FeedError;

/// How long an aircraft absent from the feed keeps its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Zero removes absent aircraft on the next update.
    pub retention: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30),
        }
    }
}

/// Scene tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub animation: AnimationConfig,
    pub declutter: DeclutterPolicy,
    pub retention: RetentionPolicy,
    /// Minimum zoom used when flying to a selected aircraft.
    pub fly_to_zoom: f64,
    pub fly_to_duration: Duration,
    /// Tooltips are attached only at or above this zoom.
    pub tooltip_min_zoom: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            animation: AnimationConfig::default(),
            declutter: DeclutterPolicy::default(),
            retention: RetentionPolicy::default(),
            fly_to_zoom: 8.0,
            fly_to_duration: Duration::from_secs(1),
            tooltip_min_zoom: 4.0,
        }
    }
}

/// Selected-flight track status.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackState {
    None,
    Loading { icao24: String, request: u64 },
    Ready(FlightTrack),
    Failed { icao24: String, error: String },
}

impl TrackState {
    /// Path to draw, if any.
    #[must_use]
    pub fn path(&self) -> Option<&FlightTrack> {
        match self {
            Self::Ready(track) => Some(track),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A marker as it should be drawn at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMarker {
    pub key: MarkerKey,
    pub id: u64,
    pub position: LatLng,
    pub heading: f64,
    pub selected: bool,
    pub on_ground: bool,
    pub size: f32,
    pub tooltip: Option<String>,
    pub count: Option<usize>,
}

/// Marker icon size in pixels at `zoom`.
#[must_use]
pub fn marker_size(zoom: f64, selected: bool) -> f32 {
    let base = if zoom < 4.0 {
        12.0
    } else if zoom < 6.0 {
        16.0
    } else {
        20.0
    };
    if selected {
        base + 8.0
    } else {
        base
    }
}

fn tooltip_for(flight: &Flight) -> String {
    let mut text = format!("{}\n{} ft", flight.label(), flight.altitude_feet());
    if flight.velocity.is_some() {
        text.push_str(&format!(" · {} kts", flight.speed_knots()));
    }
    if flight.on_ground {
        text.push_str("\nOn ground");
    }
    text
}

/// Renderer state for one map view.
#[derive(Debug)]
pub struct MapScene {
    config: SceneConfig,
    viewport: Viewport,
    animations: AnimationBook,
    markers: MarkerLayer,
    known: HashMap<String, Flight>,
    selected: Option<String>,
    track: TrackState,
    next_request: u64,
    camera: Option<Transition>,
}

impl MapScene {
    #[must_use]
    pub fn new(config: SceneConfig, viewport: Viewport) -> Self {
        Self {
            animations: AnimationBook::new(config.animation),
            config,
            viewport,
            markers: MarkerLayer::new(),
            known: HashMap::new(),
            selected: None,
            track: TrackState::None,
            next_request: 0,
            camera: None,
        }
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    #[must_use]
    pub fn track(&self) -> &TrackState {
        &self.track
    }

    #[must_use]
    pub fn markers(&self) -> &MarkerLayer {
        &self.markers
    }

    /// Last-known copy of an aircraft on the map, including retained ones.
    #[must_use]
    pub fn known_flight(&self, icao24: &str) -> Option<&Flight> {
        self.known.get(icao24)
    }

    #[must_use]
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Glide duration for new observations, normally the poll interval.
    pub fn set_glide(&mut self, glide: Duration) {
        self.animations.set_glide(glide);
    }

    pub fn set_retention(&mut self, retention: RetentionPolicy) {
        self.config.retention = retention;
    }

    /// Absorb a new registry snapshot and recompute the marker set.
    pub fn apply_registry(&mut self, registry: &FlightRegistry, now: Instant) -> ReconcileReport {
        let mut moved = 0usize;
        for flight in registry.map_eligible() {
            if let Some((lat, lon)) = flight.position() {
                if self.animations.observe(&flight.icao24, LatLng::new(lat, lon), now) {
                    moved += 1;
                }
                self.known.insert(flight.icao24.clone(), flight.clone());
            }
        }

        let expired = self.animations.expire(now, self.config.retention.retention);
        for icao in &expired {
            self.known.remove(icao);
        }
        // Aircraft that never had a valid position have no animation entry.
        let animations = &self.animations;
        self.known.retain(|icao, _| animations.state(icao).is_some());

        debug!(
            "Scene update: {} in registry, {} on map, {} moved, {} expired",
            registry.count(),
            self.known.len(),
            moved,
            expired.len()
        );
        self.recompute()
    }

    /// Replace the viewport (move or zoom end) and recompute.
    pub fn set_viewport(&mut self, viewport: Viewport) -> ReconcileReport {
        self.viewport = viewport;
        self.camera = None;
        self.recompute()
    }

    /// Recompute the visible set and reconcile markers against it.
    pub fn recompute(&mut self) -> ReconcileReport {
        let zoom = self.viewport.zoom;
        let show_tooltips = zoom >= self.config.tooltip_min_zoom;
        let visible = declutter(
            self.known.values(),
            &self.viewport,
            self.selected.as_deref(),
            &self.config.declutter,
        );

        let mut specs = Vec::with_capacity(visible.aircraft.len() + visible.clusters.len());
        for flight in &visible.aircraft {
            let Some(state) = self.animations.state(&flight.icao24) else {
                continue;
            };
            let selected = self.selected.as_deref() == Some(flight.icao24.as_str());
            specs.push(MarkerSpec {
                key: MarkerKey::Aircraft(flight.icao24.clone()),
                anchor: (state.target.lat, state.target.lng),
                heading: flight.heading_or_zero(),
                selected,
                on_ground: flight.on_ground,
                size: marker_size(zoom, selected),
                tooltip: show_tooltips.then(|| tooltip_for(flight)),
                count: None,
            });
        }
        for cluster in &visible.clusters {
            specs.push(MarkerSpec {
                key: MarkerKey::Cluster(cluster.key),
                anchor: cluster.centroid,
                heading: cluster.heading.unwrap_or(0.0),
                selected: false,
                on_ground: false,
                size: marker_size(zoom, false) + 6.0,
                tooltip: show_tooltips.then(|| format!("{} aircraft", cluster.count)),
                count: Some(cluster.count),
            });
        }

        let report = self.markers.reconcile(specs);
        debug!(
            "Recompute at zoom {:.1}: {} aircraft, {} clusters ({:?})",
            zoom,
            visible.aircraft.len(),
            visible.clusters.len(),
            report
        );
        report
    }

    /// Markers with their interpolated positions at `now`.
    ///
    /// The selected aircraft is last so it draws on top.
    #[must_use]
    pub fn frame(&self, now: Instant) -> Vec<RenderedMarker> {
        let mut out: Vec<RenderedMarker> = self
            .markers
            .iter()
            .filter_map(|marker| {
                let position = match &marker.spec.key {
                    MarkerKey::Aircraft(icao) => self.animations.position(icao, now)?,
                    MarkerKey::Cluster(_) => LatLng::new(marker.spec.anchor.0, marker.spec.anchor.1),
                };
                Some(RenderedMarker {
                    key: marker.spec.key.clone(),
                    id: marker.id,
                    position,
                    heading: marker.spec.heading,
                    selected: marker.spec.selected,
                    on_ground: marker.spec.on_ground,
                    size: marker.spec.size,
                    tooltip: marker.spec.tooltip.clone(),
                    count: marker.spec.count,
                })
            })
            .collect();
        out.sort_by(|a, b| a.selected.cmp(&b.selected).then_with(|| a.key.cmp(&b.key)));
        out
    }

    /// Whether anything is still moving at `now`.
    #[must_use]
    pub fn is_animating(&self, now: Instant) -> bool {
        self.camera.is_some() || self.animations.is_animating(now)
    }

    /// Select an aircraft: fly to it and start a track request.
    ///
    /// Returns the request id the track result must be completed with, or
    /// `None` when the aircraft is not on the map.
    pub fn select(&mut self, icao24: &str, now: Instant) -> Option<u64> {
        let position = self.animations.position(icao24, now)?;
        self.next_request += 1;
        let request = self.next_request;
        info!("Selected {icao24}, requesting track #{request}");

        self.selected = Some(icao24.to_string());
        self.track = TrackState::Loading {
            icao24: icao24.to_string(),
            request,
        };
        let zoom = self.viewport.zoom.max(self.config.fly_to_zoom);
        self.fly_to(position, zoom, now);
        self.recompute();
        Some(request)
    }

    /// Clear the selection and its track.
    pub fn clear_selection(&mut self) {
        if self.selected.take().is_some() {
            self.track = TrackState::None;
            self.recompute();
        }
    }

    /// Deliver a track result. Results for superseded requests are ignored.
    pub fn complete_track(&mut self, request: u64, result: Result<FlightTrack, FeedError>) -> bool {
        let icao24 = match &self.track {
            TrackState::Loading { icao24, request: pending } if *pending == request => icao24.clone(),
            _ => {
                debug!("Discarding stale track response #{request}");
                return false;
            }
        };
        self.track = match result {
            Ok(track) if track.is_drawable() => TrackState::Ready(track),
            Ok(track) => {
                warn!("Track for {icao24} has {} points, not drawing", track.path.len());
                TrackState::Failed {
                    icao24,
                    error: "Track has fewer than 2 points".to_string(),
                }
            }
            Err(e) => {
                warn!("Track fetch for {icao24} failed: {e}");
                TrackState::Failed {
                    icao24,
                    error: e.to_string(),
                }
            }
        };
        true
    }

    /// Zoom in around an aggregate marker. Returns `false` for unknown keys.
    pub fn click_cluster(&mut self, key: &MarkerKey, now: Instant) -> bool {
        let Some(marker) = self.markers.get(key) else {
            return false;
        };
        let MarkerKey::Cluster(_) = key else {
            return false;
        };
        let (lat, lon) = marker.spec.anchor;
        self.fly_to(LatLng::new(lat, lon), cluster_zoom_target(self.viewport.zoom), now);
        true
    }

    /// Start an eased camera move.
    pub fn fly_to(&mut self, center: LatLng, zoom: f64, now: Instant) {
        let (from_lat, from_lng) = self.viewport.center;
        // Take the short way round; the viewport wraps the result.
        let to_lng = from_lng + wrap_lon(center.lng - from_lng);
        self.camera = Some(Transition {
            from_center: LatLng::new(from_lat, from_lng),
            from_zoom: self.viewport.zoom,
            to_center: LatLng::new(center.lat, to_lng),
            to_zoom: zoom,
            started: now,
            duration: self.config.fly_to_duration,
        });
    }

    /// Advance the camera. Returns `true` while a move is in progress; the
    /// move's last step recomputes the marker set.
    pub fn advance_camera(&mut self, now: Instant) -> bool {
        let Some(transition) = self.camera else {
            return false;
        };
        let (center, zoom) = transition.sample(now);
        self.viewport = Viewport::new((center.lat, center.lng), zoom, self.viewport.width, self.viewport.height);
        if transition.is_finished(now) {
            self.camera = None;
            self.recompute();
            return false;
        }
        true
    }

    /// Resize without recomputing unless the size actually changed.
    pub fn resize(&mut self, width: f64, height: f64) {
        if (self.viewport.width - width).abs() > 0.5 || (self.viewport.height - height).abs() > 0.5 {
            self.viewport.width = width;
            self.viewport.height = height;
            self.recompute();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::TrackPoint;

    fn flight(icao: &str, lat: f64, lon: f64) -> Flight {
        let mut f = Flight::new(icao);
        f.callsign = icao.to_uppercase();
        f.latitude = Some(lat);
        f.longitude = Some(lon);
        f.altitude = Some(10_000.0);
        f.heading = Some(45.0);
        f
    }

    fn scene() -> MapScene {
        MapScene::new(SceneConfig::default(), Viewport::new((51.5, -0.1), 6.0, 1024.0, 768.0))
    }

    fn track(n: usize) -> FlightTrack {
        FlightTrack {
            icao24: "abc123".to_string(),
            callsign: None,
            start_time: None,
            end_time: None,
            path: (0..n)
                .map(|i| TrackPoint {
                    time: i as i64,
                    latitude: 51.0 + i as f64 * 0.1,
                    longitude: -0.1,
                    baro_altitude: None,
                    true_track: None,
                    on_ground: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_registry_creates_markers_at_observed_position() {
        let mut scene = scene();
        let now = Instant::now();
        let report = scene.apply_registry(&FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1)]), now);
        assert_eq!(report.created, 1);
        let frame = scene.frame(now);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].position, LatLng::new(51.5, -0.1));
        assert!(frame[0].tooltip.is_some());
    }

    #[test]
    fn test_identical_registry_keeps_targets() {
        let mut scene = scene();
        let t0 = Instant::now();
        let registry = FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1)]);
        scene.apply_registry(&registry, t0);
        let before = *scene.animations.state("abc123").unwrap();
        let report = scene.apply_registry(&registry, t0 + Duration::from_secs(10));
        assert_eq!(report.unchanged, 1);
        assert_eq!(*scene.animations.state("abc123").unwrap(), before);
    }

    #[test]
    fn test_moves_glide_between_updates() {
        let mut scene = scene();
        scene.set_glide(Duration::from_secs(10));
        let t0 = Instant::now();
        scene.apply_registry(&FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1)]), t0);
        scene.apply_registry(&FlightRegistry::from_flights(vec![flight("abc123", 51.6, -0.1)]), t0);
        let mid = scene.frame(t0 + Duration::from_secs(5))[0].position;
        assert!((mid.lat - 51.55).abs() < 1e-9);
        let end = scene.frame(t0 + Duration::from_secs(10))[0].position;
        assert!((end.lat - 51.6).abs() < 1e-9);
    }

    #[test]
    fn test_list_only_flights_are_not_drawn() {
        let mut scene = scene();
        let mut no_pos = Flight::new("def456");
        no_pos.latitude = None;
        let now = Instant::now();
        scene.apply_registry(&FlightRegistry::from_flights(vec![no_pos]), now);
        assert!(scene.frame(now).is_empty());
        assert_eq!(scene.known_count(), 0);
    }

    #[test]
    fn test_stale_track_response_ignored() {
        let mut scene = scene();
        let now = Instant::now();
        scene.apply_registry(
            &FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1), flight("def456", 51.6, 0.0)]),
            now,
        );
        let first = scene.select("abc123", now).unwrap();
        let second = scene.select("def456", now).unwrap();
        assert!(!scene.complete_track(first, Ok(track(5))));
        assert!(matches!(scene.track(), TrackState::Loading { request, .. } if *request == second));
        assert!(scene.complete_track(second, Ok(track(5))));
        assert!(scene.track().path().is_some());
    }

    #[test]
    fn test_short_track_is_an_error() {
        let mut scene = scene();
        let now = Instant::now();
        scene.apply_registry(&FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1)]), now);
        let request = scene.select("abc123", now).unwrap();
        scene.complete_track(request, Ok(track(1)));
        assert!(scene.track().path().is_none());
        assert!(scene.track().error().is_some());
    }

    #[test]
    fn test_select_flies_to_aircraft() {
        let mut scene = MapScene::new(SceneConfig::default(), Viewport::new((20.0, 0.0), 3.0, 1024.0, 768.0));
        let now = Instant::now();
        scene.apply_registry(&FlightRegistry::from_flights(vec![flight("abc123", 51.5, -0.1)]), now);
        assert!(scene.select("abc123", now).is_some());
        assert!(scene.advance_camera(now + Duration::from_millis(500)));
        assert!(!scene.advance_camera(now + Duration::from_secs(1)));
        assert!((scene.viewport().zoom - 8.0).abs() < 1e-9);
        assert!((scene.viewport().center.0 - 51.5).abs() < 1e-6);
        let frame = scene.frame(now + Duration::from_secs(1));
        assert!(frame.iter().any(|m| m.selected && (m.size - 28.0).abs() < f32::EPSILON));
    }

    #[test]
    fn test_fly_to_takes_short_way_across_antimeridian() {
        let mut scene = MapScene::new(SceneConfig::default(), Viewport::new((0.0, 179.0), 5.0, 1024.0, 768.0));
        let now = Instant::now();
        scene.fly_to(LatLng::new(0.0, -179.0), 5.0, now);
        scene.advance_camera(now + Duration::from_millis(300));
        assert!(scene.viewport().center.1.abs() > 178.9, "center {:?}", scene.viewport().center);
        scene.advance_camera(now + Duration::from_secs(2));
        assert!((scene.viewport().center.1 + 179.0).abs() < 1e-6);
    }

    #[test]
    fn test_select_unknown_returns_none() {
        let mut scene = scene();
        assert_eq!(scene.select("nope", Instant::now()), None);
        assert!(scene.selected().is_none());
    }

    #[test]
    fn test_marker_sizes() {
        assert!((marker_size(3.0, false) - 12.0).abs() < f32::EPSILON);
        assert!((marker_size(5.0, false) - 16.0).abs() < f32::EPSILON);
        assert!((marker_size(9.0, true) - 28.0).abs() < f32::EPSILON);
    }
}
