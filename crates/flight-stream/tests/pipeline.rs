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

//! End-to-end scenarios: raw state vectors through the registry into the map scene.

use std::time::{Duration, Instant};

use flight_stream::{
    FeedError, FlightRegistry, FlightTrack, LatLng, ListQuery, MapScene, MarkerKey,
    RetentionPolicy, SceneConfig, TrackPoint, TrackState, Viewport,
};
use serde_json::{json, Value};

fn state_vector(icao: &str, lat: f64, lon: f64, on_ground: bool) -> Value {
    json!([
        icao, "BAW123 ", "United Kingdom", 1_700_000_000, 1_700_000_000,
        lon, lat, 11_000.0, on_ground, 240.0, 270.0, 0.0, null, 11_100.0,
        "2000", false, 0
    ])
}

fn london_scene(retention: Duration) -> MapScene {
    let config = SceneConfig {
        retention: RetentionPolicy { retention },
        ..Default::default()
    };
    MapScene::new(config, Viewport::new((51.5, -0.1), 7.0, 1280.0, 800.0))
}

fn abc_key() -> MarkerKey {
    MarkerKey::Aircraft("abc123".to_string())
}

fn track_with(points: usize) -> FlightTrack {
    FlightTrack {
        icao24: "abc123".to_string(),
        callsign: Some("BAW123".to_string()),
        start_time: Some(1_700_000_000),
        end_time: Some(1_700_000_600),
        path: (0..points)
            .map(|i| TrackPoint {
                time: 1_700_000_000 + i as i64 * 60,
                latitude: 51.0 + i as f64 * 0.05,
                longitude: -0.5 + i as f64 * 0.05,
                baro_altitude: Some(10_000.0),
                true_track: Some(45.0),
                on_ground: false,
            })
            .collect(),
    }
}

#[test]
fn empty_upstream_yields_no_markers_and_empty_list() {
    let registry = FlightRegistry::from_state_vectors(&[]);
    let mut scene = london_scene(Duration::from_secs(30));
    let now = Instant::now();
    scene.apply_registry(&registry, now);

    assert_eq!(registry.count(), 0);
    assert!(scene.frame(now).is_empty());
    let page = registry.query(&ListQuery { search: String::new(), limit: 50 });
    assert!(page.flights.is_empty());
    assert_eq!(page.total_matches, 0);
}

#[test]
fn absent_aircraft_is_retained_within_window() {
    let mut scene = london_scene(Duration::from_secs(30));
    let t0 = Instant::now();

    let with_abc = FlightRegistry::from_state_vectors(&[state_vector("abc123", 51.5, -0.1, false)]);
    scene.apply_registry(&with_abc, t0);
    let id = scene.markers().get(&abc_key()).unwrap().id;

    let without = FlightRegistry::from_state_vectors(&[state_vector("def456", 51.4, -0.2, false)]);
    scene.apply_registry(&without, t0 + Duration::from_secs(10));

    let marker = scene.markers().get(&abc_key()).expect("abc123 retained");
    assert_eq!(marker.id, id);
    let frame = scene.frame(t0 + Duration::from_secs(15));
    let abc = frame.iter().find(|m| m.key == abc_key()).unwrap();
    assert_eq!(abc.position, LatLng::new(51.5, -0.1));

    scene.apply_registry(&without, t0 + Duration::from_secs(45));
    assert!(scene.markers().get(&abc_key()).is_none());
    assert!(scene.known_flight("abc123").is_none());
}

#[test]
fn absent_aircraft_is_removed_without_retention() {
    let mut scene = london_scene(Duration::ZERO);
    let t0 = Instant::now();

    scene.apply_registry(
        &FlightRegistry::from_state_vectors(&[state_vector("abc123", 51.5, -0.1, false)]),
        t0,
    );
    assert!(scene.markers().get(&abc_key()).is_some());

    scene.apply_registry(&FlightRegistry::from_state_vectors(&[]), t0 + Duration::from_secs(10));
    assert!(scene.markers().get(&abc_key()).is_none());
    assert!(scene.frame(t0 + Duration::from_secs(10)).is_empty());
}

#[test]
fn invalid_coordinates_are_listed_but_not_drawn() {
    let mut bad = state_vector("bad001", 0.0, 0.0, false);
    bad[5] = Value::Null;
    let registry = FlightRegistry::from_state_vectors(&[bad, state_vector("abc123", 51.5, -0.1, false)]);
    let mut scene = london_scene(Duration::from_secs(30));
    let now = Instant::now();
    scene.apply_registry(&registry, now);

    assert_eq!(registry.count(), 2);
    assert_eq!(registry.query(&ListQuery { search: "kingdom".into(), limit: 50 }).total_matches, 2);
    let frame = scene.frame(now);
    assert_eq!(frame.len(), 1);
    assert_eq!(frame[0].key, abc_key());
}

#[test]
fn select_draws_track_and_deselect_removes_it() {
    let mut scene = london_scene(Duration::from_secs(30));
    let now = Instant::now();
    scene.apply_registry(
        &FlightRegistry::from_state_vectors(&[state_vector("abc123", 51.5, -0.1, false)]),
        now,
    );

    let request = scene.select("abc123", now).unwrap();
    assert!(matches!(scene.track(), TrackState::Loading { .. }));
    assert!(scene.complete_track(request, Ok(track_with(6))));
    assert_eq!(scene.track().path().map(|t| t.path.len()), Some(6));
    assert!(scene.markers().get(&abc_key()).unwrap().spec.selected);

    scene.clear_selection();
    assert_eq!(scene.track(), &TrackState::None);
    assert!(!scene.markers().get(&abc_key()).unwrap().spec.selected);
}

#[test]
fn reselect_replaces_previous_track() {
    let mut scene = london_scene(Duration::from_secs(30));
    let now = Instant::now();
    scene.apply_registry(
        &FlightRegistry::from_state_vectors(&[
            state_vector("abc123", 51.5, -0.1, false),
            state_vector("def456", 51.6, 0.1, false),
        ]),
        now,
    );
    let first = scene.select("abc123", now).unwrap();
    scene.complete_track(first, Ok(track_with(4)));
    let second = scene.select("def456", now).unwrap();
    assert!(scene.track().path().is_none());
    let mut other = track_with(3);
    other.icao24 = "def456".to_string();
    scene.complete_track(second, Ok(other));
    assert_eq!(scene.track().path().map(|t| t.icao24.as_str()), Some("def456"));
}

#[test]
fn track_failure_leaves_markers_untouched() {
    let mut scene = london_scene(Duration::from_secs(30));
    let now = Instant::now();
    scene.apply_registry(
        &FlightRegistry::from_state_vectors(&[
            state_vector("abc123", 51.5, -0.1, false),
            state_vector("def456", 51.6, 0.1, true),
        ]),
        now,
    );
    let request = scene.select("abc123", now).unwrap();
    let before = scene.frame(now);

    scene.complete_track(request, Err(FeedError::Upstream { status: 404, body: String::new() }));

    assert!(scene.track().path().is_none());
    assert!(scene.track().error().unwrap().contains("404"));
    assert_eq!(scene.frame(now), before);
}
