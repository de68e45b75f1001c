//! Smashmon entry point.
//!
//! Loads `config.ron`, applies command-line overrides, then drives the event
//! bus with heartbeats, optionally as a server or a client.
//!
//! Run with: `cargo run -p smashmon-game -- --role server --max-clients 2`

mod session;
mod ticker;

use std::process::ExitCode;

use clap::Parser;
use smashmon_config::{CliArgs, Config, default_config_dir};
use tracing::{error, info, warn};

use crate::session::Session;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Logging needs the configured level, so load errors are reported after init.
    let (mut config, load_error) = match Config::load_or_create(&config_dir) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_cli_overrides(&args);

    smashmon_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    if let Some(e) = load_error {
        warn!(dir = %config_dir.display(), error = %e, "Using default config");
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    info!("Smashmon");
    info!(
        "Window: {}x{} | {} fps",
        config.window.width, config.window.height, config.game.fps
    );
    info!(
        role = ?config.network.role,
        server = %config.network.server_address,
        port = config.network.server_port,
        max_clients = ?config.network.max_clients,
        "Network"
    );

    let mut session = match Session::new(&config) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to start");
            return ExitCode::FAILURE;
        }
    };

    let result = session.run();
    let model = session.current_model().map(str::to_owned);
    session.shutdown();

    match result {
        Ok(frames) => {
            info!(frames, ?model, "Exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Game loop failed");
            ExitCode::FAILURE
        }
    }
}
