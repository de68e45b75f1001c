//! Bridges between the local event bus and the TCP object transport.
//!
//! A client attaches a [`RemoteBridge`] to its bus; a server attaches a
//! [`ServerController`]. Both only touch the network from inside a heartbeat
//! or an outbound post, so network input enters the bus at heartbeat
//! boundaries and never in the middle of an unrelated drain.

pub mod error;
pub mod ignore;
pub mod remote_bridge;
pub mod server_controller;

pub use error::MultiplayerError;
pub use ignore::{
    client_inbound_ignore, client_outbound_ignore, local_only_kinds, server_post_ignore,
    server_send_ignore, wire_codec,
};
pub use remote_bridge::RemoteBridge;
pub use server_controller::{ServerController, ServerControllerConfig};
