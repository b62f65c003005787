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

//! UI components for LiveSky.
//!
//! Views derived from the live registry: flight list, detail panel, airport
//! search and the feed status pane.

pub mod airport;
pub mod list;
pub mod panel;
pub mod status;

pub use airport::AirportSearch;
pub use list::FlightList;
pub use panel::{DetailPanel, PanelAction};
pub use status::{MapStats, StatusAction, StatusPane};
