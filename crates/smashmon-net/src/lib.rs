//! TCP object transport: framing, pluggable marshalling, per-connection
//! reader threads and a cooperative connection acceptor.
//!
//! Every message on the wire is a frame `"<decimal length>#<payload>"`.
//! Background threads only ever talk to the caller through
//! `crossbeam-channel` queues, so the owning game loop polls for inbound
//! messages and new connections instead of being called back.

pub mod acceptor;
pub mod channel;
pub mod codec;
pub mod error;
pub mod framing;
pub mod platform;
pub mod server;

pub use acceptor::{AcceptorConfig, ConnectionAcceptor};
pub use channel::{ChannelConfig, TransportChannel};
pub use codec::{Codec, FilteredCodec, JsonCodec};
pub use error::{NetError, ProtocolError};
pub use framing::{FrameConfig, FrameDecoder, FrameError, encode_frame};
pub use platform::{SocketConfig, default_bind_address};
pub use server::{ConnectionChanges, DEFAULT_PORT, NetworkServer, ServerConfig};
