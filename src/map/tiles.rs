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

//! Raster basemap tiles.
//!
//! Tiles come from the Carto CDN, are downloaded on background threads and
//! cached on disk under a SHA-256 of their URL for seven days. Failures are
//! logged and leave the tile blank.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use egui::{ColorImage, TextureHandle};
use flight_stream::geo::{lat_to_y, lon_to_x, MAX_ZOOM, MIN_ZOOM, TILE_SIZE};
use flight_stream::Viewport;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::config::Theme;

const CACHE_DURATION_DAYS: u64 = 7;
const MAX_TILE_ZOOM: u8 = 18;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    #[must_use]
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Tile URL on the Carto CDN, spread over the a-d subdomains.
    #[must_use]
    pub fn url(&self, theme: Theme) -> String {
        let subdomain = ['a', 'b', 'c', 'd'][((self.x + self.y) % 4) as usize];
        let style = match theme {
            Theme::Dark => "dark_all",
            Theme::Light => "light_all",
        };
        format!(
            "https://{}.basemaps.cartocdn.com/{}/{}/{}/{}.png",
            subdomain, style, self.zoom, self.x, self.y
        )
    }

    /// Cache file name: hex SHA-256 of the URL.
    #[must_use]
    pub fn cache_filename(&self, theme: Theme) -> String {
        let hash = Sha256::digest(self.url(theme).as_bytes());
        format!("{hash:x}.png")
    }
}

/// Tile placement for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedTile {
    pub coord: TileCoord,
    /// Top-left corner relative to the viewport origin.
    pub min: (f32, f32),
    /// Edge length in pixels; differs from 256 at fractional zoom.
    pub size: f32,
}

/// Tiles covering `viewport`, at the nearest integer zoom scaled to fit.
#[must_use]
pub fn tiles_for_viewport(viewport: &Viewport) -> Vec<PlacedTile> {
    let tile_zoom = viewport.zoom.round().clamp(MIN_ZOOM, MAX_ZOOM.min(f64::from(MAX_TILE_ZOOM)));
    let zoom = tile_zoom as u8;
    let size = TILE_SIZE * 2_f64.powf(viewport.zoom - tile_zoom);

    let center_x = lon_to_x(viewport.center.1, tile_zoom);
    let center_y = lat_to_y(viewport.center.0, tile_zoom);
    let half_w = viewport.width / 2.0 / size;
    let half_h = viewport.height / 2.0 / size;

    let first_x = (center_x - half_w).floor() as i64;
    let last_x = (center_x + half_w).floor() as i64;
    let first_y = (center_y - half_h).floor() as i64;
    let last_y = (center_y + half_h).floor() as i64;
    let max_tile = 1_i64 << zoom;

    let mut placed = Vec::new();
    for tile_y in first_y..=last_y {
        // Latitude does not wrap
        if tile_y < 0 || tile_y >= max_tile {
            continue;
        }
        for tile_x in first_x..=last_x {
            let wrapped_x = tile_x.rem_euclid(max_tile);
            let left = viewport.width / 2.0 + (tile_x as f64 - center_x) * size;
            let top = viewport.height / 2.0 + (tile_y as f64 - center_y) * size;
            placed.push(PlacedTile {
                coord: TileCoord::new(wrapped_x as u32, tile_y as u32, zoom),
                min: (left as f32, top as f32),
                size: size as f32,
            });
        }
    }
    placed
}

pub enum TileState {
    Loading,
    Loaded(TextureHandle),
    Failed,
}

type TileMap = Arc<Mutex<HashMap<(Theme, TileCoord), TileState>>>;

/// Fetches, caches and uploads basemap tiles.
pub struct TileManager {
    cache_dir: PathBuf,
    theme: Theme,
    tiles: TileMap,
    in_flight: Arc<Mutex<HashSet<(Theme, TileCoord)>>>,
    client: Option<reqwest::blocking::Client>,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("cache_dir", &self.cache_dir)
            .field("theme", &self.theme)
            .finish_non_exhaustive()
    }
}

impl TileManager {
    #[must_use]
    pub fn new(theme: Theme) -> Self {
        let cache_dir = Self::cache_dir();

        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!("Failed to create tile cache directory {}: {e}", cache_dir.display());
        }

        Self::cleanup_old_tiles(&cache_dir);

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("livesky-desktop/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| warn!("Tile HTTP client unavailable: {e}"))
            .ok();

        Self {
            cache_dir,
            theme,
            tiles: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            client,
        }
    }

    fn cache_dir() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        path.push("livesky-desktop");
        path.push("tiles");
        path
    }

    fn cleanup_old_tiles(cache_dir: &Path) {
        let now = SystemTime::now();
        let max_age = Duration::from_secs(CACHE_DURATION_DAYS * 24 * 60 * 60);
        let mut removed = 0usize;

        if let Ok(entries) = fs::read_dir(cache_dir) {
            for entry in entries.flatten() {
                let expired = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age);
                if expired && fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Removed {removed} expired tiles from cache");
        }
    }

    /// Switch tile style. Loaded tiles of the other style stay in memory.
    pub fn set_theme(&mut self, theme: Theme) {
        if self.theme != theme {
            info!("Switching basemap to {theme:?}");
            self.theme = theme;
        }
    }

    /// Get tile from memory or disk, or queue it for download.
    pub fn get_tile(&self, coord: TileCoord, ctx: &egui::Context) -> Option<TextureHandle> {
        let key = (self.theme, coord);
        let Ok(mut tiles) = self.tiles.lock() else {
            return None;
        };

        match tiles.get(&key) {
            Some(TileState::Loaded(texture)) => Some(texture.clone()),
            Some(TileState::Loading | TileState::Failed) => None,
            None => {
                let cache_path = self.cache_dir.join(coord.cache_filename(self.theme));
                if cache_path.exists() {
                    match fs::read(&cache_path)
                        .map_err(|e| e.to_string())
                        .and_then(|bytes| decode_texture(&bytes, coord, ctx))
                    {
                        Ok(texture) => {
                            tiles.insert(key, TileState::Loaded(texture.clone()));
                            return Some(texture);
                        }
                        Err(e) => warn!("Failed to load cached tile {}: {e}", cache_path.display()),
                    }
                }
                tiles.insert(key, TileState::Loading);
                drop(tiles);
                self.queue_download(coord, ctx.clone());
                None
            }
        }
    }

    fn queue_download(&self, coord: TileCoord, ctx: egui::Context) {
        let key = (self.theme, coord);
        let Some(client) = self.client.clone() else {
            self.mark(key, TileState::Failed);
            return;
        };
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if !in_flight.insert(key) {
                return;
            }
        }

        let tiles = self.tiles.clone();
        let in_flight = self.in_flight.clone();
        let cache_dir = self.cache_dir.clone();
        let theme = self.theme;

        std::thread::spawn(move || {
            let state = match download_tile(&client, coord, theme, &cache_dir, &ctx) {
                Ok(texture) => TileState::Loaded(texture),
                Err(e) => {
                    warn!("Tile {}/{}/{} failed: {e}", coord.zoom, coord.x, coord.y);
                    TileState::Failed
                }
            };
            if let Ok(mut tiles) = tiles.lock() {
                tiles.insert(key, state);
            }
            if let Ok(mut in_flight) = in_flight.lock() {
                in_flight.remove(&key);
            }
            ctx.request_repaint();
        });
    }

    fn mark(&self, key: (Theme, TileCoord), state: TileState) {
        if let Ok(mut tiles) = self.tiles.lock() {
            tiles.insert(key, state);
        }
    }

    #[must_use]
    pub fn has_loading_tiles(&self) -> bool {
        self.tiles
            .lock()
            .is_ok_and(|tiles| tiles.values().any(|state| matches!(state, TileState::Loading)))
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.tiles.lock().map_or(0, |tiles| {
            tiles.values().filter(|state| matches!(state, TileState::Failed)).count()
        })
    }
}

fn download_tile(
    client: &reqwest::blocking::Client,
    coord: TileCoord,
    theme: Theme,
    cache_dir: &Path,
    ctx: &egui::Context,
) -> Result<TextureHandle, String> {
    let url = coord.url(theme);
    debug!("Downloading tile: {url}");

    let response = client.get(&url).send().map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let bytes = response.bytes().map_err(|e| e.to_string())?;

    let cache_path = cache_dir.join(coord.cache_filename(theme));
    if let Err(e) = fs::write(&cache_path, &bytes) {
        warn!("Failed to save tile to cache: {e}");
    }
    decode_texture(&bytes, coord, ctx)
}

fn decode_texture(bytes: &[u8], coord: TileCoord, ctx: &egui::Context) -> Result<TextureHandle, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let rgba = img.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = ColorImage::from_rgba_unmultiplied(size, &rgba.into_raw());
    Ok(ctx.load_texture(
        format!("tile_{}_{}/{}", coord.zoom, coord.x, coord.y),
        color_image,
        egui::TextureOptions::default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_uses_theme_and_subdomain() {
        let coord = TileCoord::new(3, 2, 4);
        assert_eq!(
            coord.url(Theme::Dark),
            "https://b.basemaps.cartocdn.com/dark_all/4/3/2.png"
        );
        assert!(coord.url(Theme::Light).contains("/light_all/"));
    }

    #[test]
    fn test_cache_filename_is_stable_per_style() {
        let coord = TileCoord::new(10, 20, 6);
        let dark = coord.cache_filename(Theme::Dark);
        assert_eq!(dark, coord.cache_filename(Theme::Dark));
        assert_ne!(dark, coord.cache_filename(Theme::Light));
        assert_eq!(dark.len(), 64 + 4);
    }

    #[test]
    fn test_tiles_cover_viewport() {
        let viewport = Viewport::new((51.5, -0.1), 6.0, 800.0, 600.0);
        let placed = tiles_for_viewport(&viewport);
        assert!(!placed.is_empty());
        assert!(placed.iter().all(|t| t.coord.zoom == 6 && (t.size - 256.0).abs() < 1e-3));

        let left = placed.iter().map(|t| t.min.0).fold(f32::MAX, f32::min);
        let top = placed.iter().map(|t| t.min.1).fold(f32::MAX, f32::min);
        let right = placed.iter().map(|t| t.min.0 + t.size).fold(f32::MIN, f32::max);
        let bottom = placed.iter().map(|t| t.min.1 + t.size).fold(f32::MIN, f32::max);
        assert!(left <= 0.0 && top <= 0.0);
        assert!(right >= 800.0 && bottom >= 600.0);
    }

    #[test]
    fn test_tiles_wrap_longitude_and_skip_poles() {
        let viewport = Viewport::new((80.0, 179.0), 2.0, 1024.0, 1024.0);
        let placed = tiles_for_viewport(&viewport);
        assert!(placed.iter().all(|t| t.coord.x < 4 && t.coord.y < 4));
        assert!(placed.iter().any(|t| t.coord.x == 0));
    }

    #[test]
    fn test_fractional_zoom_scales_tiles() {
        let viewport = Viewport::new((0.0, 0.0), 5.3, 800.0, 600.0);
        let placed = tiles_for_viewport(&viewport);
        let expected = 256.0 * 2_f32.powf(0.3);
        assert!(placed.iter().all(|t| t.coord.zoom == 5 && (t.size - expected).abs() < 0.01));
    }
}
