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

//! Live flight feed client and map scene engine.
//!
//! This library keeps a continuously changing set of aircraft in sync with a
//! remote state-vector feed and turns it into a decluttered, animated marker
//! set for a map view. It is organized in layers that can be used on their own:
//!
//! - **Data layer**: [`Flight`] decoding from positional state vectors and the
//!   keyed [`FlightRegistry`] built from each snapshot
//! - **Source layer**: the [`FlightSource`] contract with a Data Proxy client
//!   ([`ProxyClient`]) and a direct anonymous upstream client ([`OpenSkySource`])
//! - **Stream layer**: the [`StreamController`] polling engine with timeout,
//!   retry/backoff and cached-data handling
//! - **Scene layer**: viewport declutter, keyed marker lifecycle and motion
//!   interpolation composed in [`MapScene`]
//!
//! # Quick Start
//!
//! ```no_run
//! use flight_stream::{ProxyClient, StreamConfig, StreamController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = ProxyClient::new("http://localhost:3000/api").unwrap();
//!     let handle = StreamController::new(source, StreamConfig::default()).start();
//!
//!     let mut updates = handle.subscribe();
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow_and_update().clone();
//!         println!(
//!             "{} flights, {} airborne, connected: {}",
//!             snapshot.flights.count(),
//!             snapshot.flights.airborne_count(),
//!             snapshot.is_connected
//!         );
//!     }
//! }
//! ```
//!
//! # Scene Only
//!
//! ```
//! use flight_stream::{Flight, FlightRegistry, MapScene, SceneConfig, Viewport};
//! use std::time::Instant;
//!
//! let mut abc = Flight::new("abc123");
//! abc.latitude = Some(51.5);
//! abc.longitude = Some(-0.1);
//!
//! let mut scene = MapScene::new(SceneConfig::default(), Viewport::new((51.5, -0.1), 6.0, 1024.0, 768.0));
//! let now = Instant::now();
//! scene.apply_registry(&FlightRegistry::from_flights(vec![abc]), now);
//! assert_eq!(scene.frame(now).len(), 1);
//! ```

pub mod animation;
pub mod cache;
pub mod declutter;
pub mod flight;
pub mod geo;
pub mod markers;
pub mod registry;
pub mod retry;
pub mod scene;
pub mod source;
pub mod sse;
pub mod stream;

pub use animation::{ease_out_cubic, AnimationBook, AnimationConfig, AnimationState, LatLng, Transition};
pub use cache::TtlCache;
pub use declutter::{cluster_zoom_target, declutter, CellKey, Cluster, DeclutterPolicy, VisibleSet};
pub use flight::{
    resolve_altitude, AirportMovement, AirportPayload, DecodeError, Flight, FlightHistoryItem,
    FlightTrack, FlightsPayload, HistoryPayload, MovementKind, StateVectorResponse, TrackPoint,
};
pub use geo::{GeoBounds, Viewport};
pub use markers::{Marker, MarkerKey, MarkerLayer, MarkerSpec, ReconcileReport};
pub use registry::{ChangeType, FlightRegistry, ListPage, ListQuery};
pub use retry::RetryPolicy;
pub use scene::{MapScene, RenderedMarker, RetentionPolicy, SceneConfig, TrackState};
pub use source::{
    AirportQuery, FeedError, FeedSource, FlightSource, OpenSkySource, ProxyClient, PushStream,
    TimeWindow,
};
pub use sse::EventStreamDecoder;
pub use stream::{StreamConfig, StreamController, StreamHandle, StreamSnapshot, Transport};
