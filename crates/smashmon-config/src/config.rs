//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level game configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Window settings.
    pub window: WindowConfig,
    /// Driving loop settings.
    pub game: GameConfig,
    /// Network/multiplayer settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
}

/// Driving loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    /// Heartbeats per second.
    pub fps: u32,
    /// Stop after this many frames. `None` runs until `Quit`.
    pub max_frames: Option<u64>,
}

/// Which side of the network this process plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NetRole {
    /// No networking.
    #[default]
    Offline,
    /// Accept clients and broadcast to them.
    Server,
    /// Connect to a server.
    Client,
}

/// Network/multiplayer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Role of this process.
    pub role: NetRole,
    /// Server host to connect to (client only).
    pub server_address: String,
    /// Server port: listened on by a server, dialled by a client.
    pub server_port: u16,
    /// Maximum number of clients (server only). `None` is unlimited.
    pub max_clients: Option<u32>,
    /// Socket read timeout of connection reader threads, in milliseconds.
    pub read_timeout_ms: u64,
    /// Longest a send may block on a client or server that stopped reading,
    /// in milliseconds.
    pub write_timeout_ms: u64,
    /// Sleep between accept attempts, in milliseconds.
    pub accept_poll_ms: u64,
    /// Seconds between full model broadcasts (server only).
    pub broadcast_interval_secs: f64,
    /// Largest accepted frame payload in bytes.
    pub max_payload_size: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Upper bound on events delivered by a single bus drain.
    pub max_drain_events: usize,
}

// --- Default implementations ---

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            max_frames: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: NetRole::Offline,
            server_address: "127.0.0.1".to_string(),
            server_port: 32072,
            max_clients: None,
            read_timeout_ms: 100,
            write_timeout_ms: 1000,
            accept_poll_ms: 50,
            broadcast_interval_secs: 1.0,
            max_payload_size: 1_048_576,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_drain_events: 100_000,
        }
    }
}

/// Platform config directory for the game, e.g. `~/.config/smashmon`.
///
/// Falls back to `./smashmon` when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("smashmon")
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Reject settings the game cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("window.width", self.window.width),
            ("window.height", self.window.height),
            ("game.fps", self.game.fps),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if !(self.network.broadcast_interval_secs.is_finite()
            && self.network.broadcast_interval_secs >= 0.0)
        {
            return Err(ConfigError::Invalid {
                field: "network.broadcast_interval_secs",
                reason: format!("{} is not a duration", self.network.broadcast_interval_secs),
            });
        }
        if self.network.role == NetRole::Client && self.network.server_address.is_empty() {
            return Err(ConfigError::Invalid {
                field: "network.server_address",
                reason: "a client needs a server to connect to".to_string(),
            });
        }
        Ok(())
    }
}
