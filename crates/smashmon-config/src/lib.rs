//! Configuration for the Smashmon game.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. Every section uses `#[serde(default)]`, so files written by
//! older or newer builds still load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, GameConfig, NetRole, NetworkConfig, WindowConfig, default_config_dir};
pub use error::ConfigError;
