//! Observer hooks the embedding daemon attaches to its Router.

/// Connection lifecycle notifications.  At most one observer per client.
///
/// Callbacks run on the client's own tasks; implementations must not block
/// and must not call back into the Router synchronously.
pub trait ClientObserver: Send + Sync + 'static {
    /// The Registry connection came up.
    fn connect(&self) {}

    /// The Registry connection went down.  The daemon keeps operating on
    /// its cached resolutions until reconnection.
    fn disconnect(&self) {}

    /// Registration for `instance` completed and its call set is now
    /// advertised.  Fires again after each reconnection replay.
    fn ready(&self, instance: &str) {
        let _ = instance;
    }
}

/// What happened to a watched target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Arrival,
    Departure,
}

impl EventKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            sb_protocol::methods::EVENT_ARRIVAL => Some(Self::Arrival),
            sb_protocol::methods::EVENT_DEPARTURE => Some(Self::Departure),
            _ => None,
        }
    }
}

/// A watch notification pushed by the Registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEvent {
    pub kind: EventKind,
    pub class: String,
    pub instance: String,
}

/// Watch event callback.
pub type EventSink = std::sync::Arc<dyn Fn(TargetEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_parses_wire_strings() {
        assert_eq!(EventKind::parse("arrival"), Some(EventKind::Arrival));
        assert_eq!(EventKind::parse("departure"), Some(EventKind::Departure));
        assert_eq!(EventKind::parse("rebirth"), None);
    }
}
