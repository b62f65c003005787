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

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod app;
mod cli;
mod config;
mod logging;
mod map;
mod tasks;
mod ui;

use clap::Parser;
use log::{info, warn};

use app::LiveSkyApp;
use cli::Cli;
use config::AppConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::setup_logging(cli.log_level);

    if cli.print_config_path {
        println!("{}", AppConfig::config_path()?.display());
        return Ok(());
    }

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {e}");
        AppConfig::default()
    });
    cli.apply(&mut config);

    info!("Starting LiveSky...");

    // The stream controller and request tasks run on this runtime while
    // eframe owns the main thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("livesky-worker")
        .build()?;
    let _guard = runtime.enter();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 800.0])
            .with_title("LiveSky"),
        ..Default::default()
    };

    eframe::run_native(
        "LiveSky",
        options,
        Box::new(move |cc| Ok(Box::new(LiveSkyApp::new(cc, config)?))),
    )?;

    Ok(())
}
