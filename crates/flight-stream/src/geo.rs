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

//! Web Mercator projection and viewport geometry.

use std::f64::consts::PI;

/// Side length of one map tile in pixels.
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 18.0;

/// Convert latitude to Web Mercator Y in tile units at `zoom`.
#[must_use]
pub fn lat_to_y(lat: f64, zoom: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let n = 2_f64.powf(zoom);
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    y * n
}

/// Convert longitude to Web Mercator X in tile units at `zoom`.
#[must_use]
pub fn lon_to_x(lon: f64, zoom: f64) -> f64 {
    let n = 2_f64.powf(zoom);
    ((lon + 180.0) / 360.0) * n
}

/// Convert a tile-unit Y back to latitude.
#[must_use]
pub fn y_to_lat(y: f64, zoom: f64) -> f64 {
    let n = 2_f64.powf(zoom);
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Convert a tile-unit X back to longitude.
#[must_use]
pub fn x_to_lon(x: f64, zoom: f64) -> f64 {
    let n = 2_f64.powf(zoom);
    x / n * 360.0 - 180.0
}

/// Wrap a longitude into `[-180, 180)`.
#[must_use]
pub fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Geographic rectangle in degrees.
///
/// `lon_min > lon_max` means the rectangle crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl GeoBounds {
    /// The whole projected world.
    #[must_use]
    pub fn world() -> Self {
        Self {
            lat_min: -MAX_LATITUDE,
            lon_min: -180.0,
            lat_max: MAX_LATITUDE,
            lon_max: 180.0,
        }
    }

    #[must_use]
    pub fn crosses_antimeridian(&self) -> bool {
        self.lon_min > self.lon_max
    }

    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let lat_ok = lat >= self.lat_min && lat <= self.lat_max;
        let lon_ok = if self.crosses_antimeridian() {
            lon >= self.lon_min || lon <= self.lon_max
        } else {
            lon >= self.lon_min && lon <= self.lon_max
        };
        lat_ok && lon_ok
    }

    /// Query parameters understood by the state-vector endpoints.
    ///
    /// The endpoints take a plain box, so a rectangle crossing the
    /// antimeridian is sent as a full longitude band.
    #[must_use]
    pub fn query_pairs(&self) -> [(&'static str, String); 4] {
        let (lon_min, lon_max) = if self.crosses_antimeridian() {
            (-180.0, 180.0)
        } else {
            (self.lon_min, self.lon_max)
        };
        [
            ("lamin", format!("{:.4}", self.lat_min)),
            ("lomin", format!("{lon_min:.4}")),
            ("lamax", format!("{:.4}", self.lat_max)),
            ("lomax", format!("{lon_max:.4}")),
        ]
    }
}

/// Visible map area: center, fractional zoom and pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Center as `(lat, lon)`.
    pub center: (f64, f64),
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn new(center: (f64, f64), zoom: f64, width: f64, height: f64) -> Self {
        Self {
            center: (center.0.clamp(-MAX_LATITUDE, MAX_LATITUDE), wrap_lon(center.1)),
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            width,
            height,
        }
    }

    /// Project to world pixel coordinates at the current zoom.
    #[must_use]
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        (
            lon_to_x(lon, self.zoom) * TILE_SIZE,
            lat_to_y(lat, self.zoom) * TILE_SIZE,
        )
    }

    /// Width of the world in pixels at the current zoom.
    #[must_use]
    pub fn world_px(&self) -> f64 {
        TILE_SIZE * 2_f64.powf(self.zoom)
    }

    /// Project to pixel coordinates relative to the viewport's top-left corner.
    ///
    /// Longitude is taken on the side of the center nearest to it, so points
    /// across the antimeridian land next to the center rather than a world
    /// width away.
    #[must_use]
    pub fn to_screen(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (cx, cy) = self.project(self.center.0, self.center.1);
        let (x, y) = self.project(lat, self.center.1 + wrap_lon(lon - self.center.1));
        (x - cx + self.width / 2.0, y - cy + self.height / 2.0)
    }

    /// Inverse of [`Viewport::to_screen`], as `(lat, lon)` with longitude in
    /// `[-180, 180)`.
    #[must_use]
    pub fn from_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let (cx, cy) = self.project(self.center.0, self.center.1);
        let wx = (cx + x - self.width / 2.0) / TILE_SIZE;
        let wy = (cy + y - self.height / 2.0) / TILE_SIZE;
        (y_to_lat(wy, self.zoom), wrap_lon(x_to_lon(wx, self.zoom)))
    }

    /// Geographic bounds of the visible area, clamped to the projected world.
    ///
    /// Wraps across the antimeridian when the view straddles it.
    #[must_use]
    pub fn bounds(&self) -> GeoBounds {
        let (lat_max, west) = self.from_screen(0.0, 0.0);
        let (lat_min, east) = self.from_screen(self.width, self.height);
        let (lon_min, lon_max) = if self.width >= self.world_px() {
            (-180.0, 180.0)
        } else {
            (west, east)
        };
        GeoBounds {
            lat_min: lat_min.max(-MAX_LATITUDE),
            lon_min,
            lat_max: lat_max.min(MAX_LATITUDE),
            lon_max,
        }
    }

    /// Move the center by a screen-space delta in pixels.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let (lat, lon) = self.from_screen(self.width / 2.0 - dx, self.height / 2.0 - dy);
        self.center = (lat.clamp(-MAX_LATITUDE, MAX_LATITUDE), wrap_lon(lon));
    }

    /// Change zoom keeping the geographic point under `anchor` fixed on screen.
    pub fn zoom_around(&mut self, new_zoom: f64, anchor: (f64, f64)) {
        let new_zoom = new_zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        let (lat, lon) = self.from_screen(anchor.0, anchor.1);
        self.zoom = new_zoom;
        let (ax, ay) = self.to_screen(lat, lon);
        self.pan_by(anchor.0 - ax, anchor.1 - ay);
    }
}
