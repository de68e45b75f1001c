//! Server side of the replication link.
//!
//! The controller is an ordinary listener on the server's bus:
//!
//! * `Init` starts the acceptor.
//! * Every `Heartbeat` promotes new connections, reports lost ones, injects
//!   client messages into the bus and, once per broadcast interval, asks the
//!   models for a full state broadcast.
//! * Every other event it sees is sent to the clients, either to all of them
//!   or, for `AssignPlayer`, to the one it names.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use smashmon_events::{Event, EventBus, KindSet, Listener, ListenerError, ListenerId};
use smashmon_net::{NetError, NetworkServer, ServerConfig};
use tracing::{debug, info, trace, warn};

use crate::error::MultiplayerError;
use crate::ignore::{server_post_ignore, server_send_ignore, wire_codec};

/// Configuration for [`ServerController`].
#[derive(Debug, Clone)]
pub struct ServerControllerConfig {
    /// Stop accepting after this many clients. `None` accepts until shutdown.
    pub max_clients: Option<usize>,
    /// Wall-clock time between `RequestModelBroadcast` events, measured in
    /// heartbeat elapsed time. Default: 1 s.
    pub broadcast_interval: Duration,
    /// Client messages that are dropped instead of posted locally.
    pub post_ignore: KindSet,
    /// Local events that are never sent to clients.
    pub send_ignore: KindSet,
}

impl Default for ServerControllerConfig {
    fn default() -> Self {
        Self {
            max_clients: None,
            broadcast_interval: Duration::from_secs(1),
            post_ignore: server_post_ignore(),
            send_ignore: server_send_ignore(),
        }
    }
}

/// Connects a server's local [`EventBus`] to all of its clients.
pub struct ServerController {
    local: Rc<EventBus>,
    server: RefCell<NetworkServer<Event>>,
    config: ServerControllerConfig,
    since_broadcast: Cell<f64>,
    id: Cell<Option<ListenerId>>,
}

impl ServerController {
    /// Wrap `server` and register on `local`. Accepting starts at `Init`.
    pub fn new(local: &Rc<EventBus>, server: NetworkServer<Event>, config: ServerControllerConfig) -> Rc<Self> {
        let controller = Rc::new(Self {
            local: Rc::clone(local),
            server: RefCell::new(server),
            config,
            since_broadcast: Cell::new(0.0),
            id: Cell::new(None),
        });
        controller.id.set(Some(local.register(&controller)));
        controller
    }

    /// Like [`new`](Self::new), with a server using the wire codec.
    pub fn with_server_config(
        local: &Rc<EventBus>,
        server_config: ServerConfig,
        config: ServerControllerConfig,
    ) -> Rc<Self> {
        Self::new(local, NetworkServer::new(server_config, wire_codec()), config)
    }

    pub fn num_connections(&self) -> usize {
        self.server.borrow().num_connections()
    }

    /// Whether the acceptor is still waiting for clients.
    pub fn is_accepting(&self) -> bool {
        self.server.borrow().is_accepting()
    }

    /// Bound address, once `Init` has been seen.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.borrow().local_addr()
    }

    /// Detach from the bus, stop accepting and close every connection.
    pub fn shutdown(&self) {
        if let Some(id) = self.id.take() {
            self.local.unregister(id);
        }
        self.server.borrow_mut().close_all();
        info!("Server shut down");
    }

    fn on_init(&self) -> Result<(), MultiplayerError> {
        let addr = self
            .server
            .borrow_mut()
            .start_accepting(self.config.max_clients)?;
        info!(%addr, max_clients = ?self.config.max_clients, "Server accepting clients");
        Ok(())
    }

    fn on_heartbeat(&self, elapsed_time: f64) -> Result<(), MultiplayerError> {
        // Release the server before posting; posted events come back to us.
        let (changes, inbound) = {
            let mut server = self.server.borrow_mut();
            let changes = server.update_connections()?;
            (changes, server.drain_inbound())
        };

        for addr in changes.accepted {
            self.local.post(Event::ClientAccepted {
                address: addr.to_string(),
            })?;
        }
        for addr in changes.removed {
            self.local.post(Event::ClientRemoved {
                address: addr.to_string(),
            })?;
        }
        if changes.acceptor_finished {
            info!(clients = self.num_connections(), "No longer accepting clients");
        }

        for (peer, event) in inbound {
            if self.config.post_ignore.contains(event.kind()) {
                trace!(%peer, kind = event.name(), "Ignoring client event");
                continue;
            }
            self.local.post(event)?;
        }

        let since = self.since_broadcast.get() + elapsed_time;
        if since >= self.config.broadcast_interval.as_secs_f64() {
            self.since_broadcast.set(0.0);
            self.local.post(Event::RequestModelBroadcast)?;
        } else {
            self.since_broadcast.set(since);
        }
        Ok(())
    }

    fn send(&self, event: &Event) -> Result<(), MultiplayerError> {
        let server = self.server.borrow();

        let Event::AssignPlayer { address, .. } = event else {
            let failed = server.broadcast(event);
            if !failed.is_empty() {
                debug!(kind = event.name(), ?failed, "Broadcast did not reach every client");
            }
            return Ok(());
        };

        let peer: SocketAddr = address
            .parse()
            .map_err(|_| MultiplayerError::InvalidAddress(address.clone()))?;
        match server.send_to(peer, event) {
            Ok(()) => Ok(()),
            Err(NetError::UnknownPeer(_)) => {
                warn!(%peer, kind = event.name(), "No such client; dropping event");
                Ok(())
            }
            Err(e) => {
                // The connection is reported as removed on the next heartbeat.
                debug!(%peer, error = %e, "Send failed");
                Ok(())
            }
        }
    }
}

impl Listener for ServerController {
    fn receive(&self, event: &Event) -> Result<(), ListenerError> {
        match event {
            Event::Init => self.on_init()?,
            Event::Heartbeat { elapsed_time } => self.on_heartbeat(*elapsed_time)?,
            _ => {}
        }

        if !self.config.send_ignore.contains(event.kind()) {
            self.send(event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerController")
            .field("server", &self.server)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_bridge::RemoteBridge;
    use smashmon_events::{DispatchError, EventKind};
    use smashmon_net::{AcceptorConfig, ChannelConfig, TransportChannel};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Event>>);

    impl Recorder {
        fn of_kind(&self, kind: EventKind) -> Vec<Event> {
            self.0.borrow().iter().filter(|e| e.kind() == kind).cloned().collect()
        }
    }

    impl Listener for Recorder {
        fn receive(&self, event: &Event) -> Result<(), ListenerError> {
            self.0.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            acceptor: AcceptorConfig {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
            channel: ChannelConfig::default(),
        }
    }

    /// A controller that has already seen `Init`, plus a recorder on its bus.
    fn start(max_clients: Option<usize>) -> (Rc<EventBus>, Rc<ServerController>, Rc<Recorder>, SocketAddr) {
        let local = Rc::new(EventBus::new());
        let controller = ServerController::with_server_config(
            &local,
            loopback_config(),
            ServerControllerConfig {
                max_clients,
                ..Default::default()
            },
        );
        let recorder = Rc::new(Recorder::default());
        local.register(&recorder);
        local.post(Event::Init).unwrap();
        let addr = controller.local_addr().unwrap();
        (local, controller, recorder, addr)
    }

    fn client(addr: SocketAddr) -> TransportChannel<Event> {
        TransportChannel::connect(addr, wire_codec(), &ChannelConfig::default()).unwrap()
    }

    fn heartbeat(local: &EventBus) {
        local
            .post(Event::Heartbeat {
                elapsed_time: 0.016,
            })
            .unwrap();
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_bridge_and_controller_replicate_over_loopback() {
        let (server_bus, controller, server_seen, addr) = start(None);
        let client_bus = Rc::new(EventBus::new());
        let client_seen = Rc::new(Recorder::default());
        client_bus.register(&client_seen);
        let bridge = RemoteBridge::connect_to(&client_bus, addr, &ChannelConfig::default()).unwrap();

        assert!(wait_until(|| {
            heartbeat(&server_bus);
            controller.num_connections() == 1
        }));

        // Client input reaches the server and is echoed back.
        let press = Event::ButtonPress {
            button: "start".into(),
        };
        bridge.post(press.clone()).unwrap();
        assert!(wait_until(|| {
            heartbeat(&server_bus);
            heartbeat(&client_bus);
            !client_seen.of_kind(EventKind::ButtonPress).is_empty()
        }));
        assert_eq!(server_seen.of_kind(EventKind::ButtonPress), vec![press.clone()]);
        assert_eq!(client_seen.of_kind(EventKind::ButtonPress), vec![press]);

        // A model switch decided by the server reaches the client.
        server_bus
            .post(Event::CloseCurrentModel {
                next_model_name: "stage".into(),
            })
            .unwrap();
        assert!(wait_until(|| {
            heartbeat(&server_bus);
            heartbeat(&client_bus);
            client_bus.next_model().is_some()
        }));
        assert_eq!(client_bus.next_model().as_deref(), Some("stage"));

        bridge.shutdown();
        controller.shutdown();
    }

    #[test]
    fn test_client_ping_is_posted_at_heartbeat() {
        let (local, _controller, recorder, addr) = start(None);
        let c = client(addr);
        c.send(&Event::Ping { n: 7 }).unwrap();

        assert!(wait_until(|| {
            heartbeat(&local);
            !recorder.of_kind(EventKind::Ping).is_empty()
        }));
        assert_eq!(recorder.of_kind(EventKind::Ping), vec![Event::Ping { n: 7 }]);
        assert_eq!(recorder.of_kind(EventKind::ClientAccepted).len(), 1);
    }

    #[test]
    fn test_max_two_clients() {
        let (local, controller, recorder, addr) = start(Some(2));
        let _a = TcpStream::connect(addr).unwrap();
        let _b = TcpStream::connect(addr).unwrap();

        assert!(wait_until(|| {
            heartbeat(&local);
            !controller.is_accepting()
        }));
        let _c = TcpStream::connect(addr);
        thread::sleep(Duration::from_millis(50));
        heartbeat(&local);

        assert_eq!(controller.num_connections(), 2);
        assert_eq!(recorder.of_kind(EventKind::ClientAccepted).len(), 2);
    }

    #[test]
    fn test_local_events_broadcast_but_heartbeats_never_sent() {
        let (local, controller, _recorder, addr) = start(None);
        let a = client(addr);
        let b = client(addr);
        assert!(wait_until(|| {
            heartbeat(&local);
            controller.num_connections() == 2
        }));

        local
            .post(Event::ButtonPress {
                button: "start".into(),
            })
            .unwrap();
        heartbeat(&local);

        for c in [&a, &b] {
            let mut got = Vec::new();
            assert!(wait_until(|| {
                got.extend(c.drain_inbound());
                got.iter().any(|e| e.kind() == EventKind::ButtonPress)
            }));
            assert!(c.is_connected());
            assert_eq!(got.iter().filter(|e| e.kind() == EventKind::ButtonPress).count(), 1);
            assert!(got.iter().all(|e| e.kind() != EventKind::Heartbeat));
        }
    }

    #[test]
    fn test_assign_player_reaches_one_client() {
        let (local, controller, recorder, addr) = start(None);
        let a = client(addr);
        let b = client(addr);
        assert!(wait_until(|| {
            heartbeat(&local);
            controller.num_connections() == 2
        }));

        let accepted = recorder.of_kind(EventKind::ClientAccepted);
        let Event::ClientAccepted { address } = &accepted[0] else {
            unreachable!()
        };
        local
            .post(Event::AssignPlayer {
                address: address.clone(),
                player_id: 1,
            })
            .unwrap();
        heartbeat(&local);

        let mut got = Vec::new();
        assert!(wait_until(|| {
            got.extend(a.drain_inbound());
            got.extend(b.drain_inbound());
            got.iter().any(|e| e.kind() == EventKind::AssignPlayer)
        }));
        thread::sleep(Duration::from_millis(50));
        got.extend(a.drain_inbound());
        got.extend(b.drain_inbound());
        assert_eq!(got.iter().filter(|e| e.kind() == EventKind::AssignPlayer).count(), 1);
    }

    #[test]
    fn test_invalid_assign_address_is_an_error() {
        let (local, _controller, _recorder, _addr) = start(None);
        local
            .post(Event::AssignPlayer {
                address: "nowhere".into(),
                player_id: 1,
            })
            .unwrap();
        assert!(matches!(
            local.post(Event::Heartbeat { elapsed_time: 0.0 }),
            Err(DispatchError::Listener { kind: EventKind::AssignPlayer, .. })
        ));
    }

    #[test]
    fn test_client_close_model_is_ignored() {
        let (local, _controller, recorder, addr) = start(None);
        let c = client(addr);
        c.send(&Event::CloseCurrentModel {
            next_model_name: "game".into(),
        })
        .unwrap();
        c.send(&Event::Ping { n: 1 }).unwrap();

        assert!(wait_until(|| {
            heartbeat(&local);
            !recorder.of_kind(EventKind::Ping).is_empty()
        }));
        assert!(recorder.of_kind(EventKind::CloseCurrentModel).is_empty());
        assert_eq!(local.next_model(), None);
    }

    #[test]
    fn test_disconnect_posts_client_removed() {
        let (local, controller, recorder, addr) = start(None);
        let c = client(addr);
        assert!(wait_until(|| {
            heartbeat(&local);
            controller.num_connections() == 1
        }));

        c.close();
        assert!(wait_until(|| {
            heartbeat(&local);
            !recorder.of_kind(EventKind::ClientRemoved).is_empty()
        }));
        assert_eq!(controller.num_connections(), 0);
    }

    #[test]
    fn test_model_broadcast_requested_per_interval() {
        let local = Rc::new(EventBus::new());
        let _controller = ServerController::with_server_config(
            &local,
            loopback_config(),
            ServerControllerConfig::default(),
        );
        let recorder = Rc::new(Recorder::default());
        local.register(&recorder);

        for _ in 0..5 {
            local.post(Event::Heartbeat { elapsed_time: 0.4 }).unwrap();
        }
        // Fires at 1.2 s, then again at 1.2 s after that.
        assert_eq!(recorder.of_kind(EventKind::RequestModelBroadcast).len(), 1);
        local.post(Event::Heartbeat { elapsed_time: 0.4 }).unwrap();
        assert_eq!(recorder.of_kind(EventKind::RequestModelBroadcast).len(), 2);
    }

    #[test]
    fn test_promotion_beyond_capacity_fails_the_heartbeat() {
        let (local, controller, _recorder, addr) = start(Some(1));
        let _a = TcpStream::connect(addr).unwrap();
        assert!(wait_until(|| {
            heartbeat(&local);
            !controller.is_accepting()
        }));

        // A second Init restarts the acceptor while already at capacity.
        local.post(Event::Init).unwrap();
        let second = controller.local_addr().unwrap();
        let _b = TcpStream::connect(second).unwrap();

        let mut failure = None;
        wait_until(|| match local.post(Event::Heartbeat { elapsed_time: 0.0 }) {
            Ok(()) => false,
            Err(e) => {
                failure = Some(e);
                true
            }
        });
        let Some(DispatchError::Listener { source, .. }) = failure else {
            panic!("expected a listener failure");
        };
        let error = source.downcast_ref::<MultiplayerError>().unwrap();
        assert!(matches!(error, MultiplayerError::Net(NetError::Capacity { max: 1 })));
    }

    #[test]
    fn test_shutdown_closes_clients() {
        let (local, controller, _recorder, addr) = start(None);
        let c = client(addr);
        assert!(wait_until(|| {
            heartbeat(&local);
            controller.num_connections() == 1
        }));

        controller.shutdown();
        assert_eq!(local.len(), 1);
        assert!(wait_until(|| !c.is_connected()));
    }
}
