//! Event kind tags and kind sets.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashSet;

/// Fieldless mirror of [`Event`](crate::Event), one tag per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Heartbeat,
    Init,
    Quit,
    CloseCurrentModel,
    MenuCreated,
    ButtonPress,
    WorldStep,
    Ping,
    ClientAccepted,
    ClientRemoved,
    RequestModelBroadcast,
    AssignPlayer,
}

impl EventKind {
    /// Every kind in the vocabulary.
    pub const ALL: [EventKind; 12] = [
        EventKind::Heartbeat,
        EventKind::Init,
        EventKind::Quit,
        EventKind::CloseCurrentModel,
        EventKind::MenuCreated,
        EventKind::ButtonPress,
        EventKind::WorldStep,
        EventKind::Ping,
        EventKind::ClientAccepted,
        EventKind::ClientRemoved,
        EventKind::RequestModelBroadcast,
        EventKind::AssignPlayer,
    ];

    /// Kind name as written in the `"__kind__"` field.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Heartbeat => "Heartbeat",
            EventKind::Init => "Init",
            EventKind::Quit => "Quit",
            EventKind::CloseCurrentModel => "CloseCurrentModel",
            EventKind::MenuCreated => "MenuCreated",
            EventKind::ButtonPress => "ButtonPress",
            EventKind::WorldStep => "WorldStep",
            EventKind::Ping => "Ping",
            EventKind::ClientAccepted => "ClientAccepted",
            EventKind::ClientRemoved => "ClientRemoved",
            EventKind::RequestModelBroadcast => "RequestModelBroadcast",
            EventKind::AssignPlayer => "AssignPlayer",
        }
    }

    /// Look a kind up by name.
    pub fn from_name(name: &str) -> Option<EventKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing a name outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::from_name(s).ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A set of event kinds, used for the per-bridge ignore lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindSet {
    kinds: FxHashSet<EventKind>,
}

impl KindSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kind. Returns `false` if it was already present.
    pub fn insert(&mut self, kind: EventKind) -> bool {
        self.kinds.insert(kind)
    }

    /// Remove a kind. Returns `false` if it was absent.
    pub fn remove(&mut self, kind: EventKind) -> bool {
        self.kinds.remove(&kind)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Kinds in declaration order.
    pub fn sorted(&self) -> Vec<EventKind> {
        let mut kinds: Vec<_> = self.kinds.iter().copied().collect();
        kinds.sort();
        kinds
    }
}

impl FromIterator<EventKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[EventKind; N]> for KindSet {
    fn from(kinds: [EventKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let names: FxHashSet<_> = EventKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_name_lookup_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.name().parse::<EventKind>(), Ok(kind));
        }
        assert_eq!(EventKind::from_name("heartbeat"), None);
        assert!("Teleport".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_kind_set_membership() {
        let mut set = KindSet::from([EventKind::Heartbeat, EventKind::Init]);
        assert!(set.contains(EventKind::Heartbeat));
        assert!(!set.contains(EventKind::Ping));
        assert!(!set.insert(EventKind::Init));
        assert!(set.remove(EventKind::Init));
        assert_eq!(set.sorted(), vec![EventKind::Heartbeat]);
    }
}
