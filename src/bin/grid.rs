//! IPC Grid window process
//! Every running copy shows and edits the same grid
//! Usage: ipc_grid [-grid N] [-width N] [-height N] [-config PATH] [-m1..-m4]

#![windows_subsystem = "windows"]

use anyhow::{Context, Result};
use ipc_grid::app;
use ipc_grid::config::{ConfigStore, StartupFlags};
use std::env;
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = start() {
        app::report_fatal(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn start() -> Result<()> {
    let flags = StartupFlags::parse(env::args().skip(1)).context("Invalid command line")?;

    let store = flags.store()?;
    let mut config = store.load().unwrap_or_else(|e| {
        tracing::warn!("{:#}, using defaults", e);
        Default::default()
    });
    flags.apply(&mut config);

    info!(
        "Starting IPC Grid: {}x{} grid, {}x{} window",
        config.grid_size, config.grid_size, config.client_width, config.client_height
    );

    app::run(config, Box::new(store))
}
