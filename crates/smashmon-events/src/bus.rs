//! Publish/subscribe core: listener registry, FIFO queue and drain loop.
//!
//! The bus is single-threaded and uses interior mutability so that listeners
//! can post, register and unregister while they are being dispatched to.
//! Nothing here blocks on I/O.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::{DispatchError, ListenerError};
use crate::event::Event;

/// Registration id. Dense, increasing from 0, never reused by a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that wants to observe events posted to a bus.
///
/// Receivers take `&self`; keep mutable state behind `Cell`/`RefCell`.
/// Errors are not caught by the bus.
pub trait Listener {
    /// Handle one event.
    fn receive(&self, event: &Event) -> Result<(), ListenerError>;
}

impl<F> Listener for F
where
    F: Fn(&Event) -> Result<(), ListenerError>,
{
    fn receive(&self, event: &Event) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Tunables for [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of events a single drain may deliver. Default: 100 000.
    pub max_drain_events: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_drain_events: 100_000,
        }
    }
}

/// The in-process event bus.
pub struct EventBus {
    config: BusConfig,
    listeners: RefCell<BTreeMap<ListenerId, Weak<dyn Listener>>>,
    queue: RefCell<VecDeque<Event>>,
    next_id: Cell<u64>,
    draining: Cell<bool>,
    next_model: RefCell<Option<String>>,
}

impl EventBus {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with the given configuration.
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config,
            listeners: RefCell::new(BTreeMap::new()),
            queue: RefCell::new(VecDeque::new()),
            next_id: Cell::new(0),
            draining: Cell::new(false),
            next_model: RefCell::new(None),
        }
    }

    /// Register a listener and return its id.
    ///
    /// Only a weak reference is stored: dropping the last `Rc` ends the
    /// registration as far as delivery is concerned.
    pub fn register<L: Listener + 'static>(&self, listener: &Rc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let weak = Rc::downgrade(listener);
        let weak: Weak<dyn Listener> = weak;
        self.listeners.borrow_mut().insert(id, weak);
        id
    }

    /// Remove a listener. Returns `false` (and does nothing) if it is not
    /// registered. Safe to call from inside [`Listener::receive`].
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.borrow_mut().remove(&id).is_some()
    }

    /// Whether `id` is registered and its listener is still alive.
    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.listeners
            .borrow()
            .get(&id)
            .is_some_and(|l| l.strong_count() > 0)
    }

    /// Number of live registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .borrow()
            .values()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued, undelivered events.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether a drain is in progress.
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// Queue an event, draining immediately if it is a trigger.
    ///
    /// `CloseCurrentModel` records its model name right away. A trigger
    /// posted while a drain is already running is appended to the queue
    /// and delivered by that drain.
    pub fn post(&self, event: Event) -> Result<(), DispatchError> {
        if let Event::CloseCurrentModel { next_model_name } = &event {
            *self.next_model.borrow_mut() = Some(next_model_name.clone());
        }

        let trigger = event.is_trigger();
        self.queue.borrow_mut().push_back(event);

        if trigger && !self.draining.get() {
            self.drain()
        } else {
            Ok(())
        }
    }

    /// Deliver `event` to a snapshot of the registry, bypassing the queue.
    pub fn notify(&self, event: &Event) -> Result<(), DispatchError> {
        for (id, listener) in self.snapshot() {
            // Dropped since the snapshot was taken.
            let Some(listener) = listener.upgrade() else {
                continue;
            };
            listener
                .receive(event)
                .map_err(|source| DispatchError::Listener {
                    id,
                    kind: event.kind(),
                    source,
                })?;
        }
        Ok(())
    }

    /// The model name recorded by the last `CloseCurrentModel`, if any.
    pub fn next_model(&self) -> Option<String> {
        self.next_model.borrow().clone()
    }

    /// Read and clear the next-model slot.
    pub fn take_next_model(&self) -> Option<String> {
        self.next_model.borrow_mut().take()
    }

    fn drain(&self) -> Result<(), DispatchError> {
        let _guard = DrainGuard::enter(&self.draining);
        let mut delivered = 0usize;

        while let Some(event) = self.pop_front() {
            if delivered == self.config.max_drain_events {
                self.queue.borrow_mut().push_front(event);
                warn!(
                    limit = self.config.max_drain_events,
                    pending = self.pending(),
                    "Aborting runaway drain"
                );
                return Err(DispatchError::Runaway {
                    limit: self.config.max_drain_events,
                });
            }
            delivered += 1;

            if !event.is_quiet() {
                debug!(kind = event.name(), ?event, "Event");
            }
            self.notify(&event)?;
        }

        Ok(())
    }

    fn pop_front(&self) -> Option<Event> {
        self.queue.borrow_mut().pop_front()
    }

    fn snapshot(&self) -> Vec<(ListenerId, Weak<dyn Listener>)> {
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|_, l| l.strong_count() > 0);
        listeners
            .iter()
            .map(|(id, l)| (*id, Weak::clone(l)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .field("pending", &self.pending())
            .field("draining", &self.draining.get())
            .field("next_model", &self.next_model.borrow())
            .finish()
    }
}

/// Clears the draining flag even when a listener error or panic unwinds.
struct DrainGuard<'a>(&'a Cell<bool>);

impl<'a> DrainGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
