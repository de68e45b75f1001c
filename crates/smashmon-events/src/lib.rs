//! In-process event distribution for Smashmon.
//!
//! The [`EventBus`] serializes all game-loop communication into a single,
//! deterministic dispatch order. Listeners are held weakly, dispatch always
//! iterates a snapshot of the registry, and events posted while a drain is
//! running are appended to the same work queue instead of recursing.

pub mod bus;
pub mod error;
pub mod event;
pub mod kind;

pub use bus::{BusConfig, EventBus, Listener, ListenerId};
pub use error::{DispatchError, ListenerError};
pub use event::{ButtonSpec, Event};
pub use kind::{EventKind, KindSet, UnknownKind};
