//! Session events and the observer registry.
//!
//! Observers subscribe to one [`EventKind`] (or to everything) and receive
//! events synchronously, in emission order, on the thread that drives the
//! session.

use std::fmt;
use std::str::FromStr;

/// An event emitted by a [`SocketSession`](super::SocketSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is connected to its peer.
    Connected,
    /// The connection has been closed.
    Disconnected,
    /// Transport error, narrowed to its integer code.
    Error(i32),
    /// `peer` changed value.
    PeerChanged,
    /// Everything that was readable at one readiness notification.
    BytesReceived(Vec<u8>),
}

impl SessionEvent {
    /// The kind used for subscription filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::PeerChanged => EventKind::PeerChanged,
            Self::BytesReceived(_) => EventKind::BytesReceived,
        }
    }
}

/// Discriminant of [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`SessionEvent::Connected`].
    Connected,
    /// See [`SessionEvent::Disconnected`].
    Disconnected,
    /// See [`SessionEvent::Error`].
    Error,
    /// See [`SessionEvent::PeerChanged`].
    PeerChanged,
    /// See [`SessionEvent::BytesReceived`].
    BytesReceived,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Connected,
        Self::Disconnected,
        Self::Error,
        Self::PeerChanged,
        Self::BytesReceived,
    ];

    /// Name used by `socket:on(name, fn)`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::PeerChanged => "peer_changed",
            Self::BytesReceived => "bytes_received",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown socket event: {s}"))
    }
}

/// Handle returned by a subscription, accepted by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&SessionEvent) + Send>;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    handler: Handler,
}

/// Ordered list of event handlers.
#[derive(Default)]
pub(crate) struct Observers {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.subscribers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Observers {
    /// Adds a handler. `None` subscribes to every kind.
    pub(crate) fn subscribe(&mut self, filter: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, filter, handler });
        id
    }

    /// Removes a handler. Returns `false` for unknown ids.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub(crate) fn emit(&mut self, event: &SessionEvent) {
        let kind = event.kind();
        for subscriber in &mut self.subscribers {
            if subscriber.filter.is_none_or(|filter| filter == kind) {
                (subscriber.handler)(event);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}
