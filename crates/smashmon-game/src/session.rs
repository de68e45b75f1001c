//! One run of the game: bus, ticker and the network side chosen by role.

use std::rc::Rc;
use std::time::Duration;

use smashmon_config::{Config, NetRole};
use smashmon_events::{BusConfig, DispatchError, Event, EventBus};
use smashmon_multiplayer::{MultiplayerError, RemoteBridge, ServerController, ServerControllerConfig};
use smashmon_net::{
    AcceptorConfig, ChannelConfig, FrameConfig, ServerConfig, SocketConfig, default_bind_address,
};
use tracing::{debug, info, warn};

use crate::ticker::{FrameClock, HeartbeatTicker};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("event dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("network setup failed: {0}")]
    Multiplayer(#[from] MultiplayerError),
}

enum Network {
    Offline,
    Server(Rc<ServerController>),
    Client(Rc<RemoteBridge>),
}

pub struct Session {
    bus: Rc<EventBus>,
    ticker: Rc<HeartbeatTicker>,
    network: Network,
    fps: u32,
    max_frames: Option<u64>,
    current_model: Option<String>,
}

impl Session {
    /// Build the bus and attach everything `config` asks for.
    ///
    /// A client connects here; a server binds when the loop posts `Init`.
    pub fn new(config: &Config) -> Result<Self, SessionError> {
        let bus = Rc::new(EventBus::with_config(BusConfig {
            max_drain_events: config.debug.max_drain_events,
        }));
        let ticker = HeartbeatTicker::new();
        bus.register(&ticker);

        let net = &config.network;
        let channel = ChannelConfig {
            read_timeout: Duration::from_millis(net.read_timeout_ms.max(1)),
            write_timeout: Duration::from_millis(net.write_timeout_ms.max(1)),
            frame: FrameConfig {
                max_payload_size: net.max_payload_size,
            },
            ..Default::default()
        };

        let network = match net.role {
            NetRole::Offline => Network::Offline,
            NetRole::Server => {
                let server = ServerConfig {
                    bind_addr: default_bind_address(net.server_port),
                    acceptor: AcceptorConfig {
                        poll_interval: Duration::from_millis(net.accept_poll_ms),
                        socket: SocketConfig::default(),
                    },
                    channel,
                };
                let controller = ServerControllerConfig {
                    max_clients: net.max_clients.map(|n| n as usize),
                    broadcast_interval: Duration::try_from_secs_f64(net.broadcast_interval_secs)
                        .unwrap_or(Duration::from_secs(1)),
                    ..Default::default()
                };
                Network::Server(ServerController::with_server_config(&bus, server, controller))
            }
            NetRole::Client => {
                let addr = (net.server_address.as_str(), net.server_port);
                Network::Client(RemoteBridge::connect_to(&bus, addr, &channel)?)
            }
        };

        Ok(Self {
            bus,
            ticker,
            network,
            fps: config.game.fps,
            max_frames: config.game.max_frames,
            current_model: None,
        })
    }

    /// Name of the model most recently requested through `CloseCurrentModel`.
    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    /// Post `Init`, then heartbeat until `Quit`, the frame limit or a lost
    /// server. Returns the number of frames run.
    pub fn run(&mut self) -> Result<u64, SessionError> {
        self.bus.post(Event::Init)?;

        let mut clock = FrameClock::new(self.fps);
        debug!(frame_budget = ?clock.frame_budget(), max_frames = ?self.max_frames, "Entering game loop");
        while self.ticker.is_running() {
            if self.max_frames.is_some_and(|max| clock.frame_count() >= max) {
                info!(frames = clock.frame_count(), "Reached frame limit");
                break;
            }

            let elapsed_time = clock.tick();
            self.bus.post(Event::Heartbeat { elapsed_time })?;

            if let Some(next) = self.bus.take_next_model() {
                info!(from = ?self.current_model, to = %next, "Switching model");
                self.current_model = Some(next);
            }

            if let Network::Client(bridge) = &self.network
                && !bridge.is_connected()
            {
                warn!("Server connection lost; stopping");
                break;
            }
        }

        Ok(clock.frame_count())
    }

    /// Close the network side and wait for its threads.
    pub fn shutdown(self) {
        match &self.network {
            Network::Offline => {}
            Network::Server(controller) => controller.shutdown(),
            Network::Client(bridge) => bridge.shutdown(),
        }
    }
}
