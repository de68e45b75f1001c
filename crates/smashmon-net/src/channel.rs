//! One established connection: synchronous framed sends plus a background
//! reader thread that reassembles frames and queues decoded messages.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::error::{NetError, ProtocolError};
use crate::framing::{FrameConfig, FrameDecoder, encode_frame};
use crate::platform::{SocketConfig, configure_stream};

/// Configuration for [`TransportChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Read timeout of the reader thread; bounds how long `close` waits. Default: 100 ms.
    pub read_timeout: Duration,
    /// Longest a single `send` may block on a peer that stopped reading.
    /// Default: 1 s.
    pub write_timeout: Duration,
    /// Size of a single socket read. Default: 4096 bytes.
    pub read_buffer_size: usize,
    /// Framing limits.
    pub frame: FrameConfig,
    /// Socket options applied to the stream.
    pub socket: SocketConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(1),
            read_buffer_size: 4096,
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// Bidirectional, queue-backed message endpoint over one TCP connection.
///
/// Inbound messages are only ever handed out by [`drain_inbound`]; the
/// reader thread never calls back into the owner.
///
/// [`drain_inbound`]: Self::drain_inbound
pub struct TransportChannel<M> {
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
    codec: Arc<dyn Codec<M>>,
    frame: FrameConfig,
    inbound: Receiver<M>,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Send + 'static> TransportChannel<M> {
    /// Connect to a server and start the reader thread.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        codec: Arc<dyn Codec<M>>,
        config: &ChannelConfig,
    ) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr)?;
        let channel = Self::from_stream(stream, codec, config)?;
        debug!(peer = %channel.peer, "Established connection");
        Ok(channel)
    }

    /// Wrap an accepted stream and start the reader thread.
    pub fn from_stream(
        stream: TcpStream,
        codec: Arc<dyn Codec<M>>,
        config: &ChannelConfig,
    ) -> Result<Self, NetError> {
        // Accepted sockets inherit O_NONBLOCK from the listener on some platforms.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_write_timeout(Some(config.write_timeout.max(Duration::from_millis(1))))?;
        configure_stream(&stream, &config.socket)?;

        let peer = stream.peer_addr()?;
        let read_half = stream.try_clone()?;
        let (inbound_tx, inbound) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let reader = ReadLoop {
            stream: read_half,
            peer,
            codec: Arc::clone(&codec),
            decoder: FrameDecoder::new(config.frame.clone()),
            buffer: vec![0u8; config.read_buffer_size.max(1)],
            inbound: inbound_tx,
            stop: Arc::clone(&stop),
            connected: Arc::clone(&connected),
        };
        let handle = thread::Builder::new()
            .name(format!("net-reader-{peer}"))
            .spawn(move || reader.run())?;

        Ok(Self {
            peer,
            writer: Mutex::new(stream),
            codec,
            frame: config.frame.clone(),
            inbound,
            stop,
            connected,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Encode, frame and write one message.
    ///
    /// A failed or timed-out write tears the connection down and is returned
    /// as [`NetError::Transport`].
    pub fn send(&self, message: &M) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::Closed(self.peer));
        }

        let payload = self.codec.encode(message)?;
        let frame = encode_frame(&payload, &self.frame).map_err(ProtocolError::from)?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writer.write_all(&frame).and_then(|()| writer.flush());
        if let Err(e) = written {
            warn!(peer = %self.peer, error = %e, "Send failed, closing connection");
            self.stop.store(true, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            let _ = writer.shutdown(Shutdown::Both);
            return Err(NetError::Transport(e));
        }

        trace!(peer = %self.peer, bytes = frame.len(), "Sent frame");
        Ok(())
    }
}

impl<M> TransportChannel<M> {
    /// Remove and return every message received so far, oldest first.
    pub fn drain_inbound(&self) -> Vec<M> {
        self.inbound.try_iter().collect()
    }

    /// `false` once the peer disconnected, a protocol or transport error
    /// occurred, or the channel was closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Stop the reader, wait for it to exit and close the socket.
    ///
    /// Idempotent. Blocks for at most about one read timeout.
    pub fn close(&self) {
        self.stop.store(true, Ordering::Release);

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(peer = %self.peer, "Reader thread panicked");
            }
            debug!(peer = %self.peer, "Closed connection");
        }

        self.connected.store(false, Ordering::Release);
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.shutdown(Shutdown::Both);
    }
}

impl<M> Drop for TransportChannel<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M> fmt::Debug for TransportChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChannel")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("queued", &self.inbound.len())
            .finish()
    }
}

/// State owned by the reader thread.
struct ReadLoop<M> {
    stream: TcpStream,
    peer: SocketAddr,
    codec: Arc<dyn Codec<M>>,
    decoder: FrameDecoder,
    buffer: Vec<u8>,
    inbound: Sender<M>,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl<M> ReadLoop<M> {
    fn run(mut self) {
        while !self.stop.load(Ordering::Acquire) {
            match self.stream.read(&mut self.buffer) {
                Ok(0) => {
                    debug!(peer = %self.peer, "Peer closed connection");
                    break;
                }
                Ok(n) => {
                    self.decoder.extend(&self.buffer[..n]);
                    if let Err(e) = self.decode_available() {
                        warn!(peer = %self.peer, error = %e, "Protocol error, closing connection");
                        break;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "Read failed, closing connection");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn decode_available(&mut self) -> Result<(), ProtocolError> {
        while let Some(payload) = self.decoder.next_frame()? {
            let message = self.codec.decode(&payload)?;
            // The owner dropped the channel; nothing left to deliver to.
            if self.inbound.send(message).is_err() {
                break;
            }
        }
        Ok(())
    }
}
