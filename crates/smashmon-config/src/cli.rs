//! Command-line argument parsing for Smashmon.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, NetRole};

/// Smashmon command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "smashmon", about = "Smashmon")]
pub struct CliArgs {
    /// Screen width (default 600).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: Option<u32>,

    /// Screen height (default 400).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: Option<u32>,

    /// Frames per second (default 60).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub fps: Option<u32>,

    /// Network role.
    #[arg(long, value_enum)]
    pub role: Option<NetRole>,

    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum number of clients (server only).
    #[arg(long)]
    pub max_clients: Option<u32>,

    /// Exit after this many frames.
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(fps) = args.fps {
            self.game.fps = fps;
        }
        if let Some(role) = args.role {
            self.network.role = role;
        }
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if args.max_clients.is_some() {
            self.network.max_clients = args.max_clients;
        }
        if args.max_frames.is_some() {
            self.game.max_frames = args.max_frames;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
