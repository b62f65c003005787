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

//! Marker motion interpolation.
//!
//! Every aircraft on the map carries an [`AnimationState`]: a previous and a
//! target position, each stamped with a time. The displayed position at time
//! `t` is the linear interpolation between them, clamped to the segment. On
//! first sighting the previous timestamp is backdated so the marker starts out
//! already "arrived" instead of gliding in from nowhere. Each later observation
//! starts a new glide from wherever the marker is drawn at that moment.
//!
//! Camera moves use [`Transition`] with cubic ease-out instead.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Interpolate toward `other`, taking the short way across the antimeridian.
    #[must_use]
    pub fn lerp(self, other: LatLng, t: f64) -> LatLng {
        let mut dlng = other.lng - self.lng;
        if dlng > 180.0 {
            dlng -= 360.0;
        } else if dlng < -180.0 {
            dlng += 360.0;
        }
        let mut lng = self.lng + dlng * t;
        if lng > 180.0 {
            lng -= 360.0;
        } else if lng < -180.0 {
            lng += 360.0;
        }
        LatLng {
            lat: self.lat + (other.lat - self.lat) * t,
            lng,
        }
    }
}

/// Cubic ease-out: fast start, gentle arrival.
#[must_use]
pub fn ease_out_cubic(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

/// Interpolation timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationConfig {
    /// How far back the previous timestamp is set on first sighting.
    pub backdate: Duration,
    /// Duration of the glide toward a newly observed position.
    pub glide: Duration,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            backdate: Duration::from_secs(10),
            glide: Duration::from_secs(10),
        }
    }
}

/// Previous/target interpolation window for one aircraft.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationState {
    pub previous: LatLng,
    pub previous_at: Instant,
    pub target: LatLng,
    pub target_at: Instant,
}

impl AnimationState {
    /// State for an aircraft seen for the first time.
    ///
    /// `previous == target` and `previous_at = now - backdate`, so the marker is
    /// drawn at its observed position from the first frame.
    #[must_use]
    pub fn first_sighting(position: LatLng, now: Instant, backdate: Duration) -> Self {
        Self {
            previous: position,
            previous_at: now.checked_sub(backdate).unwrap_or(now),
            target: position,
            target_at: now,
        }
    }

    /// Fraction of the glide completed at `t`, clamped to `[0, 1]`.
    #[must_use]
    pub fn progress(&self, t: Instant) -> f64 {
        let span = self.target_at.saturating_duration_since(self.previous_at);
        if span.is_zero() {
            return 1.0;
        }
        let elapsed = t.saturating_duration_since(self.previous_at);
        (elapsed.as_secs_f64() / span.as_secs_f64()).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn position_at(&self, t: Instant) -> LatLng {
        let p = self.progress(t);
        if p >= 1.0 {
            self.target
        } else {
            self.previous.lerp(self.target, p)
        }
    }

    /// Install a new observation as target.
    ///
    /// Returns `false` and leaves the state untouched when the observation
    /// equals the current target.
    pub fn retarget(&mut self, observed: LatLng, now: Instant, glide: Duration) -> bool {
        if observed == self.target {
            return false;
        }
        self.previous = self.position_at(now);
        self.previous_at = now;
        self.target = observed;
        self.target_at = now + glide;
        true
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    state: AnimationState,
    last_seen: Instant,
}

/// Animation states keyed by `icao24`.
#[derive(Debug, Default)]
pub struct AnimationBook {
    config: AnimationConfig,
    entries: HashMap<String, Tracked>,
}

impl AnimationBook {
    #[must_use]
    pub fn new(config: AnimationConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> AnimationConfig {
        self.config
    }

    pub fn set_glide(&mut self, glide: Duration) {
        self.config.glide = glide;
    }

    /// Record an observation. Returns whether the target moved.
    pub fn observe(&mut self, icao24: &str, position: LatLng, now: Instant) -> bool {
        if let Some(tracked) = self.entries.get_mut(icao24) {
            tracked.last_seen = now;
            tracked.state.retarget(position, now, self.config.glide)
        } else {
            self.entries.insert(
                icao24.to_string(),
                Tracked {
                    state: AnimationState::first_sighting(position, now, self.config.backdate),
                    last_seen: now,
                },
            );
            true
        }
    }

    /// Displayed position of an aircraft at `t`.
    #[must_use]
    pub fn position(&self, icao24: &str, t: Instant) -> Option<LatLng> {
        self.entries.get(icao24).map(|e| e.state.position_at(t))
    }

    #[must_use]
    pub fn state(&self, icao24: &str) -> Option<&AnimationState> {
        self.entries.get(icao24).map(|e| &e.state)
    }

    #[must_use]
    pub fn last_seen(&self, icao24: &str) -> Option<Instant> {
        self.entries.get(icao24).map(|e| e.last_seen)
    }

    /// Whether any glide is still in progress at `t`.
    #[must_use]
    pub fn is_animating(&self, t: Instant) -> bool {
        self.entries.values().any(|e| e.state.progress(t) < 1.0)
    }

    pub fn forget(&mut self, icao24: &str) {
        self.entries.remove(icao24);
    }

    /// Drop entries not seen within `retention` of `now`. Returns the removed keys.
    pub fn expire(&mut self, now: Instant, retention: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) > retention)
            .map(|(icao, _)| icao.clone())
            .collect();
        for icao in &expired {
            self.entries.remove(icao);
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Eased move between two camera positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from_center: LatLng,
    pub from_zoom: f64,
    pub to_center: LatLng,
    pub to_zoom: f64,
    pub started: Instant,
    pub duration: Duration,
}

impl Transition {
    #[must_use]
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        ease_out_cubic(elapsed / self.duration.as_secs_f64())
    }

    /// Center and zoom at `now`.
    #[must_use]
    pub fn sample(&self, now: Instant) -> (LatLng, f64) {
        let p = self.progress(now);
        (
            self.from_center.lerp(self.to_center, p),
            self.from_zoom + (self.to_zoom - self.from_zoom) * p,
        )
    }

    #[must_use]
    pub fn is_finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}
