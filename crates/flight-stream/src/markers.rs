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

//! Keyed marker lifecycle.
//!
//! Markers live in a side map keyed by aircraft or grid cell. Reconciling
//! against a new visible set removes keys that disappeared, creates new keys
//! and updates surviving markers in place. A marker keeps its id for as long
//! as its key stays visible, whatever its visual attributes do.

use std::collections::{HashMap, HashSet};

use crate::declutter::CellKey;

/// Identity of a marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerKey {
    Aircraft(String),
    Cluster(CellKey),
}

/// Desired visual state of one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub key: MarkerKey,
    /// Anchor position `(lat, lon)`.
    pub anchor: (f64, f64),
    /// Icon rotation in degrees clockwise from north.
    pub heading: f64,
    pub selected: bool,
    pub on_ground: bool,
    /// Icon size in pixels.
    pub size: f32,
    /// Hover text, `None` when tooltips are off at this zoom.
    pub tooltip: Option<String>,
    /// Member count for aggregate markers.
    pub count: Option<usize>,
}

/// A live marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: u64,
    pub spec: MarkerSpec,
    /// Bumped on every in-place update.
    pub revision: u64,
}

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// The set of live markers, owned by the map scene.
#[derive(Debug, Default)]
pub struct MarkerLayer {
    markers: HashMap<MarkerKey, Marker>,
    next_id: u64,
}

impl MarkerLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the layer in line with `specs`.
    ///
    /// Specs with a non-finite anchor are skipped and logged; the rest of the
    /// batch is applied.
    pub fn reconcile(&mut self, specs: Vec<MarkerSpec>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut wanted: HashSet<MarkerKey> = HashSet::with_capacity(specs.len());

        for spec in specs {
            if !(spec.anchor.0.is_finite() && spec.anchor.1.is_finite()) {
                log::warn!("Skipping marker {:?}: non-finite anchor", spec.key);
                report.skipped += 1;
                continue;
            }
            wanted.insert(spec.key.clone());
            match self.markers.get_mut(&spec.key) {
                Some(marker) if marker.spec == spec => report.unchanged += 1,
                Some(marker) => {
                    marker.spec = spec;
                    marker.revision += 1;
                    report.updated += 1;
                }
                None => {
                    self.next_id += 1;
                    self.markers.insert(
                        spec.key.clone(),
                        Marker {
                            id: self.next_id,
                            spec,
                            revision: 0,
                        },
                    );
                    report.created += 1;
                }
            }
        }

        let before = self.markers.len();
        self.markers.retain(|key, _| wanted.contains(key));
        report.removed = before - self.markers.len();
        report
    }

    #[must_use]
    pub fn get(&self, key: &MarkerKey) -> Option<&Marker> {
        self.markers.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(icao: &str, heading: f64) -> MarkerSpec {
        MarkerSpec {
            key: MarkerKey::Aircraft(icao.to_string()),
            anchor: (51.5, -0.1),
            heading,
            selected: false,
            on_ground: false,
            size: 16.0,
            tooltip: None,
            count: None,
        }
    }

    #[test]
    fn test_create_update_remove() {
        let mut layer = MarkerLayer::new();
        let report = layer.reconcile(vec![spec("a", 10.0), spec("b", 20.0)]);
        assert_eq!(report.created, 2);

        let id_a = layer.get(&MarkerKey::Aircraft("a".into())).unwrap().id;
        let report = layer.reconcile(vec![spec("a", 90.0), spec("c", 0.0)]);
        assert_eq!(report, ReconcileReport { created: 1, updated: 1, removed: 1, unchanged: 0, skipped: 0 });

        let a = layer.get(&MarkerKey::Aircraft("a".into())).unwrap();
        assert_eq!(a.id, id_a);
        assert_eq!(a.revision, 1);
        assert!((a.spec.heading - 90.0).abs() < f64::EPSILON);
        assert!(layer.get(&MarkerKey::Aircraft("b".into())).is_none());
    }

    #[test]
    fn test_selection_change_updates_in_place() {
        let mut layer = MarkerLayer::new();
        layer.reconcile(vec![spec("a", 10.0)]);
        let id = layer.get(&MarkerKey::Aircraft("a".into())).unwrap().id;

        let mut selected = spec("a", 10.0);
        selected.selected = true;
        selected.size = 24.0;
        let report = layer.reconcile(vec![selected]);
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(layer.get(&MarkerKey::Aircraft("a".into())).unwrap().id, id);
    }

    #[test]
    fn test_identical_specs_are_unchanged() {
        let mut layer = MarkerLayer::new();
        layer.reconcile(vec![spec("a", 10.0)]);
        let report = layer.reconcile(vec![spec("a", 10.0)]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(layer.get(&MarkerKey::Aircraft("a".into())).unwrap().revision, 0);
    }

    #[test]
    fn test_non_finite_anchor_skipped() {
        let mut layer = MarkerLayer::new();
        let mut bad = spec("bad", 0.0);
        bad.anchor = (f64::NAN, 0.0);
        let report = layer.reconcile(vec![bad, spec("ok", 0.0)]);
        assert_eq!(report.skipped, 1);
        assert_eq!(layer.len(), 1);
    }
}
