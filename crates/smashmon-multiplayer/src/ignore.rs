//! Which event kinds cross the network, per direction and per side.
//!
//! Heartbeats, init triggers, quit requests and physics steps are purely
//! local signals on both sides. `CloseCurrentModel` flows from server to
//! clients only, and `RequestModelBroadcast` never leaves the server.

use std::sync::Arc;

use smashmon_events::{Event, EventKind, KindSet};
use smashmon_net::{Codec, FilteredCodec, JsonCodec};

/// Kinds that are never valid on the wire in either direction.
pub fn local_only_kinds() -> KindSet {
    KindSet::from([
        EventKind::Heartbeat,
        EventKind::Init,
        EventKind::Quit,
        EventKind::WorldStep,
    ])
}

/// Kinds a client keeps on its local bus instead of sending.
pub fn client_outbound_ignore() -> KindSet {
    let mut set = local_only_kinds();
    set.insert(EventKind::CloseCurrentModel);
    set
}

/// Kinds a client drops when they arrive from the server.
pub fn client_inbound_ignore() -> KindSet {
    local_only_kinds()
}

/// Kinds the server drops when they arrive from a client.
pub fn server_post_ignore() -> KindSet {
    let mut set = local_only_kinds();
    set.insert(EventKind::CloseCurrentModel);
    set.insert(EventKind::RequestModelBroadcast);
    set
}

/// Kinds the server never broadcasts.
pub fn server_send_ignore() -> KindSet {
    let mut set = local_only_kinds();
    set.insert(EventKind::RequestModelBroadcast);
    set
}

/// JSON codec for [`Event`] that refuses [`local_only_kinds`] both ways.
///
/// A peer that sends one of them is treated as out of protocol and
/// disconnected.
pub fn wire_codec() -> Arc<dyn Codec<Event>> {
    let local = local_only_kinds();
    Arc::new(FilteredCodec::new(JsonCodec, move |event: &Event| {
        if local.contains(event.kind()) {
            Err(event.name().to_owned())
        } else {
            Ok(())
        }
    }))
}
