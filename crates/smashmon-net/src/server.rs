//! Server side of the transport: an acceptor plus the set of promoted
//! connections.
//!
//! Nothing here runs on its own. The owner calls
//! [`update_connections`](NetworkServer::update_connections) and
//! [`drain_inbound`](NetworkServer::drain_inbound) once per heartbeat, which
//! keeps every network-originated change on the owner's thread.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::acceptor::{AcceptorConfig, ConnectionAcceptor};
use crate::channel::{ChannelConfig, TransportChannel};
use crate::codec::Codec;
use crate::error::NetError;
use crate::platform::default_bind_address;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 32072;

/// Configuration for [`NetworkServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:32072`.
    pub bind_addr: SocketAddr,
    /// Accept loop settings.
    pub acceptor: AcceptorConfig,
    /// Settings for every promoted connection.
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_address(DEFAULT_PORT),
            acceptor: AcceptorConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// What changed during one [`NetworkServer::update_connections`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionChanges {
    /// Newly promoted connections.
    pub accepted: Vec<SocketAddr>,
    /// Connections that were lost and removed.
    pub removed: Vec<SocketAddr>,
    /// The acceptor reached its limit during this call and was retired.
    pub acceptor_finished: bool,
}

impl ConnectionChanges {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.removed.is_empty() && !self.acceptor_finished
    }
}

/// Accepts clients and exchanges messages of type `M` with all of them.
pub struct NetworkServer<M> {
    config: ServerConfig,
    codec: Arc<dyn Codec<M>>,
    acceptor: Option<ConnectionAcceptor>,
    max_connections: Option<usize>,
    local_addr: Option<SocketAddr>,
    channels: Vec<TransportChannel<M>>,
    /// Messages still queued on channels that were removed.
    orphaned: Vec<(SocketAddr, M)>,
}

impl<M: Send + 'static> NetworkServer<M> {
    pub fn new(config: ServerConfig, codec: Arc<dyn Codec<M>>) -> Self {
        Self {
            config,
            codec,
            acceptor: None,
            max_connections: None,
            local_addr: None,
            channels: Vec::new(),
            orphaned: Vec::new(),
        }
    }

    /// Start the accept loop. `None` accepts until the server is closed.
    ///
    /// Returns the bound address.
    pub fn start_accepting(&mut self, max_connections: Option<usize>) -> Result<SocketAddr, NetError> {
        if self.acceptor.is_some() {
            return Err(NetError::AcceptorRunning);
        }

        let acceptor =
            ConnectionAcceptor::bind(self.config.bind_addr, max_connections, &self.config.acceptor)?;
        let addr = acceptor.local_addr();
        self.acceptor = Some(acceptor);
        self.max_connections = max_connections;
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Promote accepted connections and prune lost ones.
    ///
    /// Fails with [`NetError::Capacity`] if promoting would exceed the
    /// maximum passed to [`start_accepting`](Self::start_accepting). In that
    /// case nothing from this call is promoted.
    pub fn update_connections(&mut self) -> Result<ConnectionChanges, NetError> {
        let mut changes = ConnectionChanges::default();

        if let Some(acceptor) = &mut self.acceptor {
            // Checked before draining so nothing queued by a finished loop is missed.
            let finished = acceptor.is_finished();

            let pending = acceptor.try_recv_all();
            if let Some(max) = self.max_connections
                && self.channels.len() + pending.len() > max
            {
                warn!(
                    connected = self.channels.len(),
                    pending = pending.len(),
                    max,
                    "Refusing to promote connections beyond capacity"
                );
                return Err(NetError::Capacity { max });
            }

            for (stream, addr) in pending {
                match TransportChannel::from_stream(stream, Arc::clone(&self.codec), &self.config.channel) {
                    Ok(channel) => {
                        info!(%addr, "Client connected");
                        self.channels.push(channel);
                        changes.accepted.push(addr);
                    }
                    Err(e) => warn!(%addr, error = %e, "Dropping connection that failed setup"),
                }
            }

            if finished {
                acceptor.stop();
                self.acceptor = None;
                changes.acceptor_finished = true;
                debug!("Accepted the desired number of connections");
            }
        }

        let (alive, lost): (Vec<_>, Vec<_>) = std::mem::take(&mut self.channels)
            .into_iter()
            .partition(TransportChannel::is_connected);
        self.channels = alive;
        for channel in lost {
            let addr = channel.peer_addr();
            self.orphaned
                .extend(channel.drain_inbound().into_iter().map(|m| (addr, m)));
            channel.close();
            info!(%addr, "Client disconnected");
            changes.removed.push(addr);
        }

        Ok(changes)
    }

    /// Every message received since the last call, tagged with its sender.
    ///
    /// Per-connection order is preserved.
    pub fn drain_inbound(&mut self) -> Vec<(SocketAddr, M)> {
        let mut messages = std::mem::take(&mut self.orphaned);
        for channel in &self.channels {
            let addr = channel.peer_addr();
            messages.extend(channel.drain_inbound().into_iter().map(|m| (addr, m)));
        }
        messages
    }

    /// Send `message` to every connection.
    ///
    /// Returns the peers whose send failed; those connections are torn down
    /// and reported as removed by the next `update_connections`.
    pub fn broadcast(&self, message: &M) -> Vec<SocketAddr> {
        let mut failed = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.send(message) {
                debug!(peer = %channel.peer_addr(), error = %e, "Broadcast send failed");
                failed.push(channel.peer_addr());
            }
        }
        failed
    }

    /// Send `message` to a single connection.
    pub fn send_to(&self, peer: SocketAddr, message: &M) -> Result<(), NetError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.peer_addr() == peer)
            .ok_or_else(|| NetError::UnknownPeer(peer.to_string()))?;
        channel.send(message)
    }
}

impl<M> NetworkServer<M> {
    pub fn num_connections(&self) -> usize {
        self.channels.len()
    }

    /// Peer addresses of all promoted connections.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.channels.iter().map(TransportChannel::peer_addr).collect()
    }

    /// Whether the accept loop is still running.
    pub fn is_accepting(&self) -> bool {
        self.acceptor.is_some()
    }

    /// The address of the most recently started acceptor.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting, close every connection and wait for all background
    /// threads to exit. Idempotent.
    pub fn close_all(&mut self) {
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.stop();
        }
        for channel in self.channels.drain(..) {
            channel.close();
        }
        self.orphaned.clear();
    }
}

impl<M> Drop for NetworkServer<M> {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl<M> fmt::Debug for NetworkServer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkServer")
            .field("local_addr", &self.local_addr)
            .field("accepting", &self.is_accepting())
            .field("connections", &self.peers())
            .finish()
    }
}
