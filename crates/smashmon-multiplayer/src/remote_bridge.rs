//! Client side of the replication link.

use std::cell::Cell;
use std::fmt;
use std::net::ToSocketAddrs;
use std::rc::Rc;

use smashmon_events::{DispatchError, Event, EventBus, KindSet, Listener, ListenerError, ListenerId};
use smashmon_net::{ChannelConfig, TransportChannel};
use tracing::{info, trace, warn};

use crate::error::MultiplayerError;
use crate::ignore::{client_inbound_ignore, client_outbound_ignore, wire_codec};

/// Connects a local [`EventBus`] to one server connection.
///
/// Registered on the local bus. Local consumers call [`post`](Self::post)
/// to reach the server; messages from the server are injected into the
/// local bus when a heartbeat passes through. Sub-listeners registered on
/// the bridge see every event the bridge receives, after any network input
/// of that heartbeat has been queued.
pub struct RemoteBridge {
    local: Rc<EventBus>,
    channel: TransportChannel<Event>,
    outbound_ignore: KindSet,
    inbound_ignore: KindSet,
    listeners: EventBus,
    id: Cell<Option<ListenerId>>,
    lost_reported: Cell<bool>,
}

impl RemoteBridge {
    /// Wrap an established channel and register on `local`.
    ///
    /// Kinds in `outbound_ignore` are delivered on the local bus instead of
    /// being sent. Kinds in `inbound_ignore` are dropped when they arrive
    /// from the server.
    pub fn connect(
        local: &Rc<EventBus>,
        channel: TransportChannel<Event>,
        outbound_ignore: KindSet,
        inbound_ignore: KindSet,
    ) -> Rc<Self> {
        let bridge = Rc::new(Self {
            local: Rc::clone(local),
            channel,
            outbound_ignore,
            inbound_ignore,
            listeners: EventBus::new(),
            id: Cell::new(None),
            lost_reported: Cell::new(false),
        });
        bridge.id.set(Some(local.register(&bridge)));
        info!(
            server = %bridge.channel.peer_addr(),
            outbound_ignore = ?bridge.outbound_ignore.sorted(),
            inbound_ignore = ?bridge.inbound_ignore.sorted(),
            "Connected to server"
        );
        bridge
    }

    /// Dial `addr` with the wire codec and the client ignore sets.
    pub fn connect_to<A: ToSocketAddrs>(
        local: &Rc<EventBus>,
        addr: A,
        config: &ChannelConfig,
    ) -> Result<Rc<Self>, MultiplayerError> {
        let channel = TransportChannel::connect(addr, wire_codec(), config)?;
        Ok(Self::connect(
            local,
            channel,
            client_outbound_ignore(),
            client_inbound_ignore(),
        ))
    }

    /// Send `event` to the server, or deliver it locally if it is ignored.
    ///
    /// `CloseCurrentModel` is always delivered locally.
    pub fn post(&self, event: Event) -> Result<(), MultiplayerError> {
        if matches!(event, Event::CloseCurrentModel { .. })
            || self.outbound_ignore.contains(event.kind())
        {
            self.local.post(event)?;
            return Ok(());
        }

        if let Err(e) = self.channel.send(&event) {
            self.report_lost();
            return Err(e.into());
        }
        trace!(kind = event.name(), "Sent to server");
        Ok(())
    }

    /// Register a sub-listener.
    pub fn register<L: Listener + 'static>(&self, listener: &Rc<L>) -> ListenerId {
        self.listeners.register(listener)
    }

    /// Remove a sub-listener. No-op if it is not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Close the connection and detach from the local bus.
    pub fn shutdown(&self) {
        if let Some(id) = self.id.take() {
            self.local.unregister(id);
        }
        self.channel.close();
        info!(server = %self.channel.peer_addr(), "Disconnected from server");
    }

    /// Inject everything received since the last heartbeat.
    fn pump(&self) -> Result<(), DispatchError> {
        for event in self.channel.drain_inbound() {
            if self.inbound_ignore.contains(event.kind()) {
                trace!(kind = event.name(), "Ignoring server event");
                continue;
            }
            self.local.post(event)?;
        }

        if !self.channel.is_connected() {
            self.report_lost();
        }
        Ok(())
    }

    fn report_lost(&self) {
        if !self.lost_reported.replace(true) {
            warn!(server = %self.channel.peer_addr(), "Lost connection to server");
        }
    }
}

impl Listener for RemoteBridge {
    fn receive(&self, event: &Event) -> Result<(), ListenerError> {
        if let Event::Heartbeat { .. } = event {
            self.pump()?;
        }
        self.listeners.notify(event)?;
        Ok(())
    }
}

impl fmt::Debug for RemoteBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBridge")
            .field("channel", &self.channel)
            .field("outbound_ignore", &self.outbound_ignore)
            .field("inbound_ignore", &self.inbound_ignore)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smashmon_events::EventKind;
    use smashmon_net::{Codec, JsonCodec, NetError};
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

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

    fn json() -> Arc<dyn Codec<Event>> {
        Arc::new(JsonCodec)
    }

    /// A bridge on `local` plus the server's end of its connection. Inbound
    /// filtering uses the client defaults.
    fn bridge_pair(local: &Rc<EventBus>, outbound_ignore: KindSet) -> (Rc<RemoteBridge>, TransportChannel<Event>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client =
            TransportChannel::connect(listener.local_addr().unwrap(), json(), &ChannelConfig::default())
                .unwrap();
        let (stream, _) = listener.accept().unwrap();
        let server = TransportChannel::from_stream(stream, json(), &ChannelConfig::default()).unwrap();
        let bridge = RemoteBridge::connect(local, client, outbound_ignore, client_inbound_ignore());
        (bridge, server)
    }

    fn heartbeat() -> Event {
        Event::Heartbeat {
            elapsed_time: 0.016,
        }
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
    fn test_heartbeat_never_sent_button_press_sent_once() {
        let local = Rc::new(EventBus::new());
        let (bridge, server) = bridge_pair(&local, KindSet::from([EventKind::Heartbeat, EventKind::Init]));

        bridge.post(heartbeat()).unwrap();
        bridge
            .post(Event::ButtonPress {
                button: "start".into(),
            })
            .unwrap();

        let mut received = Vec::new();
        assert!(wait_until(|| {
            received.extend(server.drain_inbound());
            !received.is_empty()
        }));
        thread::sleep(Duration::from_millis(50));
        received.extend(server.drain_inbound());

        assert_eq!(
            received,
            vec![Event::ButtonPress {
                button: "start".into()
            }]
        );
    }

    #[test]
    fn test_ignored_post_is_delivered_locally() {
        let local = Rc::new(EventBus::new());
        let recorder = Rc::new(Recorder::default());
        local.register(&recorder);
        let (bridge, _server) = bridge_pair(&local, client_outbound_ignore());

        bridge.post(Event::Quit).unwrap();
        bridge.post(heartbeat()).unwrap();

        assert_eq!(recorder.of_kind(EventKind::Quit).len(), 1);
        assert_eq!(recorder.of_kind(EventKind::Heartbeat).len(), 1);
    }

    #[test]
    fn test_close_model_stays_local_even_when_not_ignored() {
        let local = Rc::new(EventBus::new());
        let (bridge, server) = bridge_pair(&local, KindSet::new());

        bridge
            .post(Event::CloseCurrentModel {
                next_model_name: "game".into(),
            })
            .unwrap();

        assert_eq!(local.next_model().as_deref(), Some("game"));
        thread::sleep(Duration::from_millis(50));
        assert!(server.drain_inbound().is_empty());
    }

    #[test]
    fn test_server_events_arrive_only_at_heartbeat() {
        let local = Rc::new(EventBus::new());
        let recorder = Rc::new(Recorder::default());
        let (_bridge, server) = bridge_pair(&local, client_outbound_ignore());
        local.register(&recorder);

        server.send(&Event::Ping { n: 7 }).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(recorder.of_kind(EventKind::Ping).is_empty());

        assert!(wait_until(|| {
            local.post(heartbeat()).unwrap();
            !recorder.of_kind(EventKind::Ping).is_empty()
        }));
        assert_eq!(recorder.of_kind(EventKind::Ping), vec![Event::Ping { n: 7 }]);
    }

    #[test]
    fn test_close_model_from_server_sets_next_model() {
        let local = Rc::new(EventBus::new());
        let (_bridge, server) = bridge_pair(&local, client_outbound_ignore());

        server
            .send(&Event::CloseCurrentModel {
                next_model_name: "stage".into(),
            })
            .unwrap();
        assert_eq!(local.next_model(), None);

        assert!(wait_until(|| {
            local.post(heartbeat()).unwrap();
            local.next_model().is_some()
        }));
        assert_eq!(local.next_model().as_deref(), Some("stage"));
    }

    #[test]
    fn test_ignored_server_events_are_dropped() {
        let local = Rc::new(EventBus::new());
        let recorder = Rc::new(Recorder::default());
        let (_bridge, server) = bridge_pair(&local, client_outbound_ignore());
        local.register(&recorder);

        server.send(&Event::Quit).unwrap();
        server.send(&Event::Ping { n: 1 }).unwrap();

        assert!(wait_until(|| {
            local.post(heartbeat()).unwrap();
            !recorder.of_kind(EventKind::Ping).is_empty()
        }));
        assert!(recorder.of_kind(EventKind::Quit).is_empty());
    }

    #[test]
    fn test_sub_listeners_see_heartbeat_after_network_input_is_queued() {
        let local = Rc::new(EventBus::new());
        let (bridge, server) = bridge_pair(&local, client_outbound_ignore());
        let sub = Rc::new(Recorder::default());
        bridge.register(&sub);

        server.send(&Event::Ping { n: 3 }).unwrap();
        assert!(wait_until(|| {
            local.post(heartbeat()).unwrap();
            !sub.of_kind(EventKind::Ping).is_empty()
        }));

        let seen = sub.0.borrow();
        let ping_at = seen.iter().position(|e| e.kind() == EventKind::Ping).unwrap();
        assert_eq!(seen[ping_at - 1].kind(), EventKind::Heartbeat);
    }

    #[test]
    fn test_sub_listener_unregister() {
        let local = Rc::new(EventBus::new());
        let (bridge, _server) = bridge_pair(&local, client_outbound_ignore());
        let sub = Rc::new(Recorder::default());
        let id = bridge.register(&sub);

        assert!(bridge.unregister(id));
        assert!(!bridge.unregister(id));
        local.post(heartbeat()).unwrap();
        assert!(sub.0.borrow().is_empty());
    }

    #[test]
    fn test_lost_connection_refuses_sends() {
        let local = Rc::new(EventBus::new());
        let (bridge, server) = bridge_pair(&local, client_outbound_ignore());
        server.close();

        assert!(wait_until(|| {
            local.post(heartbeat()).unwrap();
            !bridge.is_connected()
        }));
        let result = bridge.post(Event::ButtonPress { button: "x".into() });
        assert!(matches!(result, Err(MultiplayerError::Net(NetError::Closed(_)))));
    }

    #[test]
    fn test_shutdown_detaches_and_closes() {
        let local = Rc::new(EventBus::new());
        let (bridge, _server) = bridge_pair(&local, client_outbound_ignore());
        assert_eq!(local.len(), 1);

        bridge.shutdown();
        bridge.shutdown();
        assert!(local.is_empty());
        assert!(!bridge.is_connected());
    }
}
