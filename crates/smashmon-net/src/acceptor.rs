//! Background accept loop with cooperative shutdown and an optional
//! connection limit.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::platform::{SocketConfig, create_listener};

/// A freshly accepted, not yet promoted connection.
pub type Accepted = (TcpStream, SocketAddr);

/// Configuration for [`ConnectionAcceptor`].
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Sleep between accept attempts when nobody is connecting. Default: 50 ms.
    pub poll_interval: Duration,
    /// Listener socket options.
    pub socket: SocketConfig,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            socket: SocketConfig::default(),
        }
    }
}

/// Accepts inbound connections on a background thread and queues them.
///
/// The loop exits when [`stop`](Self::stop) is called or once
/// `max_connections` connections have been accepted; the listening socket
/// is closed when it exits.
pub struct ConnectionAcceptor {
    local_addr: SocketAddr,
    queue: Receiver<Accepted>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ConnectionAcceptor {
    /// Bind `addr` and start accepting.
    pub fn bind(
        addr: SocketAddr,
        max_connections: Option<usize>,
        config: &AcceptorConfig,
    ) -> Result<Self, NetError> {
        let listener = create_listener(addr, &config.socket)?;
        let local_addr = listener.local_addr()?;
        let (tx, queue) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let loop_stop = Arc::clone(&stop);
        let poll_interval = config.poll_interval;
        let handle = thread::Builder::new()
            .name("net-acceptor".into())
            .spawn(move || accept_loop(listener, tx, &loop_stop, max_connections, poll_interval))?;

        info!(%local_addr, ?max_connections, "Listening for connections");
        Ok(Self {
            local_addr,
            queue,
            stop,
            handle: Some(handle),
        })
    }

    /// The bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take every connection accepted since the last call.
    pub fn try_recv_all(&self) -> Vec<Accepted> {
        self.queue.try_iter().collect()
    }

    /// Whether the accept loop has exited (stopped or reached its limit).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Signal the loop to exit and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Acceptor thread panicked");
            }
        }
    }
}

impl Drop for ConnectionAcceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    queue: Sender<Accepted>,
    stop: &AtomicBool,
    max_connections: Option<usize>,
    poll_interval: Duration,
) {
    let mut count = 0usize;
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if max_connections.is_some_and(|max| count >= max) {
            debug!(count, "Accepted the desired number of connections");
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "Accepted client");
                if queue.send((stream, addr)).is_err() {
                    break;
                }
                count += 1;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll_interval),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                // e.g. EMFILE or ECONNABORTED; try again on the next poll.
                warn!(error = %e, "Accept failed");
                thread::sleep(poll_interval);
            }
        }
    }
    debug!("Acceptor stopped");
}
