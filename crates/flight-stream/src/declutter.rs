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

//! Viewport declutter: which aircraft get their own marker and which are
//! folded into aggregate markers.
//!
//! [`declutter`] is a pure function of the flights, the viewport and the
//! selection. Aircraft are ranked by altitude (highest first, unknown counts
//! as zero) with `icao24` as tie-break, so the same input always produces the
//! same visible set regardless of input order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::flight::Flight;
use crate::geo::Viewport;

/// Grid cell identifier, in cell units of world pixels at a given cell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub size: u32,
    pub x: i64,
    pub y: i64,
}

/// Aggregate marker for aircraft hidden in one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub key: CellKey,
    /// Centroid of the hidden members as `(lat, lon)`.
    pub centroid: (f64, f64),
    pub count: usize,
    /// Circular mean of the members' known headings.
    pub heading: Option<f64>,
}

/// Zoom level to fly to when an aggregate marker is clicked.
#[must_use]
pub fn cluster_zoom_target(current_zoom: f64) -> f64 {
    (current_zoom.floor() + 2.0).min(crate::geo::MAX_ZOOM)
}

/// Result of a declutter pass.
#[derive(Debug, Clone, Default)]
pub struct VisibleSet<'a> {
    /// Aircraft drawn individually, in rank order.
    pub aircraft: Vec<&'a Flight>,
    pub clusters: Vec<Cluster>,
}

impl VisibleSet<'_> {
    /// Total aircraft represented, individually or aggregated.
    #[must_use]
    pub fn represented(&self) -> usize {
        self.aircraft.len() + self.clusters.iter().map(|c| c.count).sum::<usize>()
    }
}

/// Zoom-dependent thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclutterPolicy {
    /// Below this zoom only airborne aircraft compete for the budget.
    pub low_zoom: f64,
    /// Share of the budget given to airborne aircraft above `low_zoom`.
    pub airborne_share: f64,
}

impl Default for DeclutterPolicy {
    fn default() -> Self {
        Self {
            low_zoom: 5.0,
            airborne_share: 0.85,
        }
    }
}

impl DeclutterPolicy {
    /// Maximum number of individual markers.
    #[must_use]
    pub fn budget(&self, zoom: f64) -> usize {
        if zoom < 3.0 {
            300
        } else if zoom < 5.0 {
            500
        } else if zoom < 7.0 {
            800
        } else {
            1200
        }
    }

    /// Grid cell size in screen pixels.
    #[must_use]
    pub fn cell_size(&self, zoom: f64) -> u32 {
        if zoom < 4.0 {
            64
        } else if zoom < 7.0 {
            48
        } else if zoom < 10.0 {
            40
        } else {
            32
        }
    }

    /// Individual markers allowed per cell.
    #[must_use]
    pub fn per_cell_cap(&self, zoom: f64) -> usize {
        if zoom < 6.0 {
            2
        } else {
            1
        }
    }

    #[must_use]
    pub fn is_low_zoom(&self, zoom: f64) -> bool {
        zoom < self.low_zoom
    }
}

/// Rank order: altitude descending, then `icao24` ascending.
#[must_use]
pub fn rank(a: &Flight, b: &Flight) -> Ordering {
    let alt_a = a.altitude.unwrap_or(0.0);
    let alt_b = b.altitude.unwrap_or(0.0);
    alt_b
        .partial_cmp(&alt_a)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.icao24.cmp(&b.icao24))
}

fn cell_of(viewport: &Viewport, lat: f64, lon: f64, size: u32) -> CellKey {
    let (x, y) = viewport.project(lat, lon);
    let size_f = f64::from(size);
    CellKey {
        size,
        x: (x / size_f).floor() as i64,
        y: (y / size_f).floor() as i64,
    }
}

/// Circular mean of headings in degrees, normalized to `[0, 360)`.
#[must_use]
pub fn mean_heading(headings: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (mut sin, mut cos, mut n) = (0.0, 0.0, 0usize);
    for h in headings.into_iter().filter(|h| h.is_finite()) {
        sin += h.to_radians().sin();
        cos += h.to_radians().cos();
        n += 1;
    }
    if n == 0 || (sin.abs() < 1e-12 && cos.abs() < 1e-12) {
        return None;
    }
    Some(sin.atan2(cos).to_degrees().rem_euclid(360.0))
}

/// Compute the visible marker set for a viewport.
pub fn declutter<'a>(
    flights: impl IntoIterator<Item = &'a Flight>,
    viewport: &Viewport,
    selected: Option<&str>,
    policy: &DeclutterPolicy,
) -> VisibleSet<'a> {
    let bounds = viewport.bounds();
    let mut candidates: Vec<&Flight> = flights
        .into_iter()
        .filter(|f| f.position().is_some_and(|(lat, lon)| bounds.contains(lat, lon)))
        .collect();
    candidates.sort_by(|a, b| rank(a, b));
    candidates.dedup_by(|a, b| a.icao24 == b.icao24);

    let budget = policy.budget(viewport.zoom);
    if candidates.len() <= budget {
        return VisibleSet {
            aircraft: candidates,
            clusters: Vec::new(),
        };
    }

    let is_selected = |f: &Flight| selected.is_some_and(|s| s == f.icao24);
    let size = policy.cell_size(viewport.zoom);
    let cap = policy.per_cell_cap(viewport.zoom).max(1);

    // Bucket in rank order so each cell's members are already sorted.
    let mut cells: BTreeMap<CellKey, Vec<&Flight>> = BTreeMap::new();
    for &flight in &candidates {
        if let Some((lat, lon)) = flight.position() {
            cells.entry(cell_of(viewport, lat, lon, size)).or_default().push(flight);
        }
    }

    let mut shown: Vec<&Flight> = Vec::new();
    let mut hidden: BTreeMap<CellKey, Vec<&Flight>> = BTreeMap::new();
    for (key, members) in cells {
        let mut keep: Vec<&Flight> = members.iter().take(cap).copied().collect();
        if let Some(sel) = members.iter().skip(cap).find(|f| is_selected(**f)) {
            keep.pop();
            keep.push(*sel);
        }
        for member in members {
            if keep.iter().any(|k| k.icao24 == member.icao24) {
                continue;
            }
            hidden.entry(key).or_default().push(member);
        }
        shown.extend(keep);
    }
    shown.sort_by(|a, b| rank(a, b));

    if shown.len() > budget {
        let (kept, dropped) = apply_budget(shown, budget, viewport.zoom, policy, &is_selected);
        for flight in dropped {
            if let Some((lat, lon)) = flight.position() {
                hidden.entry(cell_of(viewport, lat, lon, size)).or_default().push(flight);
            }
        }
        shown = kept;
    }

    let clusters = hidden
        .into_iter()
        .map(|(key, members)| {
            let n = members.len() as f64;
            let (lat_sum, lon_sum) = members
                .iter()
                .filter_map(|f| f.position())
                .fold((0.0, 0.0), |(a, b), (lat, lon)| (a + lat, b + lon));
            Cluster {
                key,
                centroid: (lat_sum / n, lon_sum / n),
                count: members.len(),
                heading: mean_heading(members.iter().filter_map(|f| f.heading)),
            }
        })
        .collect();

    VisibleSet {
        aircraft: shown,
        clusters,
    }
}

/// Trim a ranked list to `budget`, preferring airborne aircraft.
///
/// At low zoom ground aircraft only fill what airborne ones leave over. Above
/// it, airborne aircraft get `airborne_share` of the budget and ground aircraft
/// the rest, with unused share flowing to the other group. The selected
/// aircraft is always kept.
fn apply_budget<'a>(
    ranked: Vec<&'a Flight>,
    budget: usize,
    zoom: f64,
    policy: &DeclutterPolicy,
    is_selected: &dyn Fn(&Flight) -> bool,
) -> (Vec<&'a Flight>, Vec<&'a Flight>) {
    let (airborne, ground): (Vec<&Flight>, Vec<&Flight>) =
        ranked.into_iter().partition(|f| !f.on_ground);

    let (air_quota, ground_quota) = if policy.is_low_zoom(zoom) {
        let air = airborne.len().min(budget);
        (air, budget - air)
    } else {
        let share = (budget as f64 * policy.airborne_share).ceil() as usize;
        let ground_room = budget - share.min(budget);
        let ground_take = ground.len().min(ground_room);
        let air_take = airborne.len().min(budget - ground_take);
        let ground_take = ground.len().min(budget - air_take);
        (air_take, ground_take)
    };

    let mut kept = Vec::with_capacity(budget);
    let mut dropped = Vec::new();
    for (group, quota) in [(airborne, air_quota), (ground, ground_quota)] {
        for (i, flight) in group.into_iter().enumerate() {
            if i < quota {
                kept.push(flight);
            } else {
                dropped.push(flight);
            }
        }
    }

    if let Some(pos) = dropped.iter().position(|f| is_selected(*f)) {
        let selected = dropped.remove(pos);
        // Make room by evicting the lowest ranked kept aircraft of the same kind.
        let evict = kept
            .iter()
            .rposition(|f| f.on_ground == selected.on_ground)
            .or_else(|| kept.len().checked_sub(1));
        if let Some(i) = evict {
            dropped.push(kept.remove(i));
        }
        kept.push(selected);
    }

    kept.sort_by(|a, b| rank(a, b));
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight(icao: &str, lat: f64, lon: f64, alt: Option<f64>, on_ground: bool) -> Flight {
        let mut f = Flight::new(icao);
        f.latitude = Some(lat);
        f.longitude = Some(lon);
        f.altitude = alt;
        f.on_ground = on_ground;
        f
    }

    fn grid(n: usize, on_ground: bool, prefix: &str) -> Vec<Flight> {
        (0..n)
            .map(|i| {
                let lat = -40.0 + (i % 80) as f64;
                let lon = -150.0 + (i / 80) as f64 * 3.0;
                flight(&format!("{prefix}{i:05}"), lat, lon, Some((i % 37) as f64 * 100.0), on_ground)
            })
            .collect()
    }

    fn world_view(zoom: f64) -> Viewport {
        Viewport::new((0.0, 0.0), zoom, 4096.0, 4096.0)
    }

    #[test]
    fn test_under_budget_shows_all_in_viewport() {
        let flights = vec![
            flight("a", 10.0, 10.0, Some(1000.0), false),
            flight("b", 11.0, 10.0, None, true),
            flight("c", 80.0, 170.0, Some(1000.0), false),
        ];
        let vp = Viewport::new((10.0, 10.0), 6.0, 800.0, 600.0);
        let set = declutter(&flights, &vp, None, &DeclutterPolicy::default());
        let ids: Vec<&str> = set.aircraft.iter().map(|f| f.icao24.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(set.clusters.is_empty());
    }

    #[test]
    fn test_aircraft_across_antimeridian_are_visible() {
        let flights = vec![
            flight("east", 0.0, -179.5, Some(1000.0), false),
            flight("west", 0.0, 178.0, Some(1000.0), false),
            flight("far", 0.0, -150.0, Some(1000.0), false),
        ];
        let vp = Viewport::new((0.0, 179.0), 5.0, 1024.0, 768.0);
        let set = declutter(&flights, &vp, None, &DeclutterPolicy::default());
        let ids: Vec<&str> = set.aircraft.iter().map(|f| f.icao24.as_str()).collect();
        assert_eq!(ids, vec!["east", "west"]);
    }

    #[test]
    fn test_cluster_zoom_target() {
        assert!((cluster_zoom_target(3.6) - 5.0).abs() < 1e-9);
        assert!((cluster_zoom_target(17.2) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_coordinates_excluded() {
        let mut bad = Flight::new("bad");
        bad.latitude = Some(f64::NAN);
        bad.longitude = Some(0.0);
        let flights = vec![bad, flight("ok", 0.0, 0.0, None, false)];
        let set = declutter(&flights, &world_view(3.0), None, &DeclutterPolicy::default());
        assert_eq!(set.aircraft.len(), 1);
        assert_eq!(set.aircraft[0].icao24, "ok");
    }

    #[test]
    fn test_rank_altitude_then_icao() {
        let flights = vec![
            flight("b", 0.0, 0.0, Some(500.0), false),
            flight("a", 0.0, 0.0, Some(500.0), false),
            flight("c", 0.0, 0.0, Some(900.0), false),
            flight("d", 0.0, 0.0, None, false),
        ];
        let set = declutter(&flights, &world_view(3.0), None, &DeclutterPolicy::default());
        let ids: Vec<&str> = set.aircraft.iter().map(|f| f.icao24.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_over_budget_respects_budget_and_conserves_count() {
        let flights = grid(2000, false, "a");
        let policy = DeclutterPolicy::default();
        let vp = world_view(4.0);
        let set = declutter(&flights, &vp, None, &policy);
        assert!(set.aircraft.len() <= policy.budget(vp.zoom));
        assert!(!set.clusters.is_empty());
        let in_view = flights
            .iter()
            .filter(|f| f.position().is_some_and(|(lat, lon)| vp.bounds().contains(lat, lon)))
            .count();
        assert_eq!(set.represented(), in_view);
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let flights = grid(1500, false, "a");
        let mut reversed = flights.clone();
        reversed.reverse();
        let vp = world_view(4.0);
        let policy = DeclutterPolicy::default();
        let a = declutter(&flights, &vp, None, &policy);
        let b = declutter(&reversed, &vp, None, &policy);
        let ids_a: Vec<&str> = a.aircraft.iter().map(|f| f.icao24.as_str()).collect();
        let ids_b: Vec<&str> = b.aircraft.iter().map(|f| f.icao24.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(a.clusters, b.clusters);
    }

    #[test]
    fn test_selected_always_kept() {
        let mut flights = grid(2000, false, "a");
        // Lowest possible rank, sharing a crowded cell.
        flights.push(flight("zzzzzz", -40.0, -150.0, None, true));
        let vp = world_view(3.5);
        let set = declutter(&flights, &vp, Some("zzzzzz"), &DeclutterPolicy::default());
        assert!(set.aircraft.iter().any(|f| f.icao24 == "zzzzzz"));
        let without = declutter(&flights, &vp, None, &DeclutterPolicy::default());
        assert!(!without.aircraft.iter().any(|f| f.icao24 == "zzzzzz"));
    }

    #[test]
    fn test_low_zoom_drops_ground_first() {
        let policy = DeclutterPolicy::default();
        let shown: Vec<Flight> = (0..400)
            .map(|i| flight(&format!("g{i:04}"), 0.0, 0.0, Some(0.0), i % 2 == 0))
            .collect();
        let ranked: Vec<&Flight> = shown.iter().collect();
        let (kept, dropped) = apply_budget(ranked, 300, 2.0, &policy, &|_| false);
        assert_eq!(kept.len(), 300);
        assert_eq!(kept.iter().filter(|f| !f.on_ground).count(), 200);
        assert_eq!(dropped.len(), 100);
        assert!(dropped.iter().all(|f| f.on_ground));
    }

    #[test]
    fn test_high_zoom_splits_budget() {
        let policy = DeclutterPolicy::default();
        let shown: Vec<Flight> = (0..3000)
            .map(|i| flight(&format!("h{i:04}"), 0.0, 0.0, Some(0.0), i % 4 == 0))
            .collect();
        let ranked: Vec<&Flight> = shown.iter().collect();
        let (kept, _) = apply_budget(ranked, 1200, 8.0, &policy, &|_| false);
        assert_eq!(kept.len(), 1200);
        assert_eq!(kept.iter().filter(|f| !f.on_ground).count(), 1020);
        assert_eq!(kept.iter().filter(|f| f.on_ground).count(), 180);
    }

    #[test]
    fn test_mean_heading_wraps() {
        let mean = mean_heading([350.0, 10.0]).unwrap();
        assert!(mean < 1e-9 || (mean - 360.0).abs() < 1e-9);
        assert!((mean_heading([80.0, 100.0]).unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(mean_heading(std::iter::empty()), None);
    }

    #[test]
    fn test_thresholds() {
        let policy = DeclutterPolicy::default();
        assert_eq!(policy.budget(2.0), 300);
        assert_eq!(policy.budget(4.0), 500);
        assert_eq!(policy.budget(6.0), 800);
        assert_eq!(policy.budget(12.0), 1200);
        assert!(policy.cell_size(3.0) > policy.cell_size(12.0));
        assert_eq!(policy.per_cell_cap(3.0), 2);
        assert_eq!(policy.per_cell_cap(8.0), 1);
    }
}
