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

//! Keyed collection of the aircraft in one feed snapshot.
//!
//! A registry is immutable once built. Each successful fetch builds a new one
//! and the Stream Controller swaps it in behind an `Arc`, so readers always
//! see a whole snapshot and never a mix of two.

use std::collections::HashMap;

use serde_json::Value;

use crate::flight::{decode_state_vectors, Flight};

/// How a flight differs from its previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Identical record.
    None,
    /// Coordinates moved (or the aircraft is new to this snapshot).
    PositionChanged,
    /// Same coordinates, other fields differ.
    OtherChanged,
}

/// Search and page parameters for the list view.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Case-insensitive substring matched against callsign and origin country.
    pub search: String,
    /// Maximum number of rows to return.
    pub limit: usize,
}

/// One page of list results.
#[derive(Debug, Clone, Default)]
pub struct ListPage<'a> {
    pub flights: Vec<&'a Flight>,
    pub total_matches: usize,
    pub has_more: bool,
}

/// Snapshot of current aircraft keyed by `icao24`.
#[derive(Debug, Clone, Default)]
pub struct FlightRegistry {
    flights: Vec<Flight>,
    index: HashMap<String, usize>,
    airborne: usize,
}

impl PartialEq for FlightRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.flights == other.flights
    }
}

impl FlightRegistry {
    /// Build a registry from decoded flights.
    ///
    /// When the same `icao24` appears twice the later record replaces the
    /// earlier one in place, keeping the first record's position in order.
    #[must_use]
    pub fn from_flights(flights: Vec<Flight>) -> Self {
        let mut registry = Self {
            flights: Vec::with_capacity(flights.len()),
            index: HashMap::with_capacity(flights.len()),
            airborne: 0,
        };
        for flight in flights {
            if let Some(&slot) = registry.index.get(&flight.icao24) {
                log::debug!("Duplicate icao24 {} in snapshot, keeping latest", flight.icao24);
                registry.flights[slot] = flight;
            } else {
                registry.index.insert(flight.icao24.clone(), registry.flights.len());
                registry.flights.push(flight);
            }
        }
        registry.airborne = registry.flights.iter().filter(|f| !f.on_ground).count();
        registry
    }

    /// Build a registry from raw positional state vectors.
    ///
    /// Malformed records are skipped.
    #[must_use]
    pub fn from_state_vectors(states: &[Value]) -> Self {
        let (flights, _) = decode_state_vectors(states);
        Self::from_flights(flights)
    }

    /// All flights in snapshot order.
    #[must_use]
    pub fn all(&self) -> &[Flight] {
        &self.flights
    }

    #[must_use]
    pub fn by_id(&self, icao24: &str) -> Option<&Flight> {
        self.index.get(icao24).map(|&i| &self.flights[i])
    }

    #[must_use]
    pub fn contains(&self, icao24: &str) -> bool {
        self.index.contains_key(icao24)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.flights.len()
    }

    /// Number of flights not reported on the ground.
    #[must_use]
    pub fn airborne_count(&self) -> usize {
        self.airborne
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Flights with finite coordinates, eligible for map rendering.
    pub fn map_eligible(&self) -> impl Iterator<Item = &Flight> {
        self.flights.iter().filter(|f| f.is_map_eligible())
    }

    /// Filter and page the flights for the list view.
    #[must_use]
    pub fn query(&self, query: &ListQuery) -> ListPage<'_> {
        let needle = query.search.trim().to_lowercase();
        let matches: Vec<&Flight> = self
            .flights
            .iter()
            .filter(|f| needle.is_empty() || matches_search(f, &needle))
            .collect();
        let total_matches = matches.len();
        let flights: Vec<&Flight> = matches.into_iter().take(query.limit).collect();
        ListPage {
            has_more: total_matches > flights.len(),
            flights,
            total_matches,
        }
    }

    /// Classify a single flight against a previous snapshot.
    #[must_use]
    pub fn classify(&self, previous: &FlightRegistry, icao24: &str) -> Option<ChangeType> {
        let current = self.by_id(icao24)?;
        let change = match previous.by_id(icao24) {
            None => ChangeType::PositionChanged,
            Some(prev) if prev.position() != current.position() => ChangeType::PositionChanged,
            Some(prev) if prev != current => ChangeType::OtherChanged,
            Some(_) => ChangeType::None,
        };
        Some(change)
    }

    /// Classify every flight in this snapshot against a previous one.
    #[must_use]
    pub fn changes_since(&self, previous: &FlightRegistry) -> HashMap<String, ChangeType> {
        self.flights
            .iter()
            .filter_map(|f| {
                self.classify(previous, &f.icao24)
                    .map(|change| (f.icao24.clone(), change))
            })
            .collect()
    }
}

fn matches_search(flight: &Flight, needle: &str) -> bool {
    flight.callsign.to_lowercase().contains(needle)
        || flight
            .origin_country
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flight(icao: &str, callsign: &str, country: &str, on_ground: bool) -> Flight {
        let mut f = Flight::new(icao);
        f.callsign = callsign.to_string();
        f.origin_country = Some(country.to_string());
        f.on_ground = on_ground;
        f.latitude = Some(10.0);
        f.longitude = Some(20.0);
        f
    }

    #[test]
    fn test_counts_and_lookup() {
        let registry = FlightRegistry::from_flights(vec![
            flight("a1", "BAW1", "United Kingdom", false),
            flight("a2", "DLH2", "Germany", true),
            flight("a3", "", "France", false),
        ]);
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.airborne_count(), 2);
        assert_eq!(registry.by_id("a2").unwrap().callsign, "DLH2");
        assert!(registry.by_id("zz").is_none());
    }

    #[test]
    fn test_absent_on_ground_counts_as_airborne() {
        let mut unknown = Flight::new("a9");
        unknown.on_ground = false;
        let registry = FlightRegistry::from_flights(vec![unknown]);
        assert_eq!(registry.airborne_count(), 1);
    }

    #[test]
    fn test_duplicate_icao_keeps_latest() {
        let registry = FlightRegistry::from_flights(vec![
            flight("a1", "OLD", "X", false),
            flight("a1", "NEW", "X", false),
        ]);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.by_id("a1").unwrap().callsign, "NEW");
    }

    #[test]
    fn test_invalid_coordinates_stay_in_registry() {
        let states = vec![
            json!(["abc123", "BAW1", "UK", 1, 1, null, 51.5, 1000.0, false, 1.0, 1.0, 0.0, null, null, null, false, 0]),
            json!(["def456", "BAW2", "UK", 1, 1, -0.1, 51.5, 1000.0, false, 1.0, 1.0, 0.0, null, null, null, false, 0]),
        ];
        let registry = FlightRegistry::from_state_vectors(&states);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.map_eligible().count(), 1);
        assert!(registry.by_id("abc123").is_some());
    }

    #[test]
    fn test_empty_registry() {
        let registry = FlightRegistry::from_state_vectors(&[]);
        assert!(registry.is_empty());
        assert_eq!(registry.airborne_count(), 0);
        let page = registry.query(&ListQuery { search: String::new(), limit: 50 });
        assert!(page.flights.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_search_and_paginate() {
        let flights = (0..120)
            .map(|i| flight(&format!("{i:06x}"), &format!("TST{i}"), "Germany", false))
            .chain(std::iter::once(flight("ffffff", "BAW9", "United Kingdom", false)))
            .collect();
        let registry = FlightRegistry::from_flights(flights);

        let first = registry.query(&ListQuery { search: String::new(), limit: 50 });
        assert_eq!(first.flights.len(), 50);
        assert_eq!(first.total_matches, 121);
        assert!(first.has_more);

        let more = registry.query(&ListQuery { search: String::new(), limit: 150 });
        assert_eq!(more.flights.len(), 121);
        assert!(!more.has_more);

        let uk = registry.query(&ListQuery { search: "kingdom".to_string(), limit: 50 });
        assert_eq!(uk.total_matches, 1);
        assert_eq!(uk.flights[0].icao24, "ffffff");

        let by_callsign = registry.query(&ListQuery { search: "baw".to_string(), limit: 50 });
        assert_eq!(by_callsign.total_matches, 1);
    }

    #[test]
    fn test_identical_payloads_give_identical_registry() {
        let a = FlightRegistry::from_flights(vec![flight("a1", "X", "Y", false)]);
        let b = FlightRegistry::from_flights(vec![flight("a1", "X", "Y", false)]);
        assert_eq!(a, b);
        assert!(b.changes_since(&a).values().all(|c| *c == ChangeType::None));
    }

    #[test]
    fn test_change_classification() {
        let before = FlightRegistry::from_flights(vec![
            flight("a1", "X", "Y", false),
            flight("a2", "X", "Y", false),
        ]);
        let mut moved = flight("a1", "X", "Y", false);
        moved.latitude = Some(11.0);
        let mut renamed = flight("a2", "Z", "Y", false);
        renamed.velocity = Some(200.0);
        let after = FlightRegistry::from_flights(vec![moved, renamed, flight("a3", "N", "Y", false)]);

        let changes = after.changes_since(&before);
        assert_eq!(changes["a1"], ChangeType::PositionChanged);
        assert_eq!(changes["a2"], ChangeType::OtherChanged);
        assert_eq!(changes["a3"], ChangeType::PositionChanged);
    }
}
