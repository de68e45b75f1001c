//! The closed message vocabulary shared by the bus and the network layer.
//!
//! [`Event`] is internally tagged with `"__kind__"`, so the JSON encoding of
//! `Event::Ping { n: 7 }` is `{"__kind__":"Ping","n":7}`. Both ends of a
//! connection compile the same enum, which makes the vocabulary static: an
//! unrecognized kind fails to deserialize.

use serde::{Deserialize, Serialize};

use crate::kind::EventKind;

/// A single message routed through the [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "__kind__")]
pub enum Event {
    // --- Loop control ---
    /// Sent once per frame by the driving loop. Triggers a drain.
    Heartbeat {
        /// Seconds since the previous heartbeat.
        elapsed_time: f64,
    },
    /// Sent once after every listener has been registered. Triggers a drain.
    Init,
    /// Requests shutdown of the whole application.
    Quit,
    /// Closes the active model and names the one that should replace it.
    CloseCurrentModel {
        /// Name of the model the driving loop should construct next.
        next_model_name: String,
    },

    // --- Model / input ---
    /// A menu model finished building its layout.
    MenuCreated {
        /// Background image resource name.
        background: String,
        /// Buttons of the menu, in menu coordinates.
        buttons: Vec<ButtonSpec>,
    },
    /// A menu button was activated.
    ButtonPress {
        /// Name of the button.
        button: String,
    },
    /// The physics world advanced by one step.
    WorldStep {
        /// Numeric id of the stepped world.
        world_id: u32,
        /// Step counter since the world was created.
        step: u64,
        /// Simulated time of this step in seconds.
        dt: f64,
    },

    // --- Diagnostics ---
    /// Round-trip check between peers.
    Ping {
        /// Caller-chosen sequence value.
        n: i64,
    },

    // --- Server notices ---
    /// The server promoted a new client connection.
    ClientAccepted {
        /// Peer address of the client.
        address: String,
    },
    /// A client connection was closed or lost.
    ClientRemoved {
        /// Peer address of the client.
        address: String,
    },
    /// Asks every model to publish its full state to the clients.
    RequestModelBroadcast,
    /// Assigns a player slot to exactly one client.
    AssignPlayer {
        /// Peer address of the receiving client.
        address: String,
        /// Player slot for that client.
        player_id: u32,
    },
}

/// Layout of one menu button, in menu units (`0..10` on both axes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ButtonSpec {
    /// Button name, reported back in [`Event::ButtonPress`].
    pub name: String,
    /// Top-left corner.
    pub position: (f32, f32),
    /// Width and height.
    pub size: (f32, f32),
    /// Image resource shown in the idle state.
    pub image: String,
}

impl Event {
    /// The kind tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Heartbeat { .. } => EventKind::Heartbeat,
            Event::Init => EventKind::Init,
            Event::Quit => EventKind::Quit,
            Event::CloseCurrentModel { .. } => EventKind::CloseCurrentModel,
            Event::MenuCreated { .. } => EventKind::MenuCreated,
            Event::ButtonPress { .. } => EventKind::ButtonPress,
            Event::WorldStep { .. } => EventKind::WorldStep,
            Event::Ping { .. } => EventKind::Ping,
            Event::ClientAccepted { .. } => EventKind::ClientAccepted,
            Event::ClientRemoved { .. } => EventKind::ClientRemoved,
            Event::RequestModelBroadcast => EventKind::RequestModelBroadcast,
            Event::AssignPlayer { .. } => EventKind::AssignPlayer,
        }
    }

    /// Stable kind name, identical to the `"__kind__"` tag on the wire.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether posting this event drains the bus.
    pub fn is_trigger(&self) -> bool {
        matches!(self, Event::Heartbeat { .. } | Event::Init)
    }

    /// High-frequency events that are not logged on dispatch.
    pub fn is_quiet(&self) -> bool {
        matches!(self, Event::Heartbeat { .. } | Event::WorldStep { .. })
    }
}
