//! Dispatch error types.

use crate::bus::ListenerId;
use crate::kind::EventKind;

/// Error type returned by a [`Listener`](crate::Listener) implementation.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`EventBus::post`](crate::EventBus::post).
///
/// The bus never swallows listener failures: the drain stops at the failing
/// delivery and the error is handed to whoever posted the trigger.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A listener failed while receiving an event.
    #[error("listener {id} failed on {kind}: {source}")]
    Listener {
        /// Registration id of the failing listener.
        id: ListenerId,
        /// Kind of the event being delivered.
        kind: EventKind,
        /// The listener's own error.
        #[source]
        source: ListenerError,
    },

    /// A single drain delivered more events than allowed.
    #[error("drain exceeded {limit} events; listeners keep producing events")]
    Runaway {
        /// The configured [`BusConfig::max_drain_events`](crate::BusConfig).
        limit: usize,
    },
}
