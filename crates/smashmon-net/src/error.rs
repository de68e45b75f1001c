//! Error taxonomy for the transport layer.

use std::net::SocketAddr;

use crate::framing::FrameError;

/// A peer sent (or we tried to send) something that violates the protocol.
///
/// Fatal to the connection it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Framing is broken.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The message could not be marshalled.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a message of the shared vocabulary.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// The codec refused a message kind it is not allowed to carry.
    #[error("message kind {kind} is not allowed on this connection")]
    Rejected {
        /// Kind name of the refused message.
        kind: String,
    },
}

/// Errors surfaced by channels, the acceptor and the server.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// See [`ProtocolError`].
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket read/write failure or peer reset.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// More connections than the configured maximum were promoted.
    #[error("connection capacity of {max} exceeded")]
    Capacity {
        /// The configured maximum.
        max: usize,
    },

    /// `start_accepting` was called while an acceptor is running.
    #[error("the connection acceptor is already running")]
    AcceptorRunning,

    /// No open channel has this peer address.
    #[error("no connection to {0}")]
    UnknownPeer(String),

    /// The channel has already been closed or lost its peer.
    #[error("connection to {0} is closed")]
    Closed(SocketAddr),
}
