//! The socket session: one transport, one peer, many observers.
//!
//! # Peer Identity
//!
//! `peer` names the remote endpoint and may only change while the
//! transport is disconnected. Adopting a descriptor is the one exception:
//! it replaces the connection wholesale, so it also replaces the peer.
//!
//! # Event Delivery
//!
//! Observers run synchronously inside the call that produced the event:
//! `set_peer` and `adopt_descriptor` emit directly, everything the
//! transport reports is emitted from [`SocketSession::poll`].

use super::bytes;
use super::error::SessionError;
use super::events::{EventKind, Observers, SessionEvent, SubscriptionId};
use super::state::SocketState;
use super::transport::{Transport, TransportEvent};

/// A stream socket session relaying lifecycle and bytes to observers.
pub struct SocketSession<T: Transport> {
    transport: T,
    peer: String,
    observers: Observers,
    /// Events raised before any observer could subscribe (adopting constructor).
    deferred: Vec<SessionEvent>,
}

impl<T: Transport> std::fmt::Debug for SocketSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSession")
            .field("peer", &self.peer)
            .field("state", &self.transport.state())
            .field("observers", &self.observers.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SocketSession<T> {
    /// Creates a disconnected session with an empty peer.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            peer: String::new(),
            observers: Observers::default(),
            deferred: Vec::new(),
        }
    }

    /// Creates a session already attached to an accepted connection.
    ///
    /// `peer` becomes the connection's server name. The `connected` event is
    /// delivered by the first [`poll`](Self::poll), once observers exist.
    pub fn with_descriptor(transport: T, descriptor: T::Descriptor) -> Self {
        let mut session = Self::new(transport);
        if session.transport.set_socket_descriptor(descriptor) {
            session.peer = session.transport.server_name().to_string();
            session.deferred.push(SessionEvent::Connected);
        } else {
            log::warn!(
                "[socket] Could not adopt descriptor: {}",
                session.transport.error_string()
            );
        }
        session
    }

    /// Current peer name.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current transport state.
    pub fn state(&self) -> SocketState {
        self.transport.state()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Changes the peer. Only allowed while disconnected.
    ///
    /// Setting the current value is a no-op in every state. A new value
    /// emits `peer_changed` once.
    pub fn set_peer(&mut self, peer: &str) -> Result<(), SessionError> {
        if peer == self.peer {
            return Ok(());
        }

        let state = self.transport.state();
        if state != SocketState::Disconnected {
            let err = SessionError::PeerLocked(state);
            log::warn!("[socket] set_peer(): {err}");
            return Err(err);
        }

        self.peer = peer.to_string();
        self.observers.emit(&SessionEvent::PeerChanged);
        Ok(())
    }

    /// Starts connecting to `peer`. Completion arrives via `poll`.
    pub fn connect_to_host(&mut self) {
        self.transport.connect_to_server(&self.peer);
    }

    /// Starts a graceful disconnect.
    pub fn disconnect_from_host(&mut self) {
        self.transport.disconnect_from_server();
    }

    /// Replaces the current connection with an accepted one.
    ///
    /// The old connection is flushed and closed, and its `disconnected` is
    /// delivered first. The peer follows the new connection's server name
    /// (`peer_changed` only if it differs). `connected` is always emitted
    /// once when the descriptor is usable.
    pub fn adopt_descriptor(&mut self, descriptor: T::Descriptor) {
        self.transport.flush();
        self.transport.abort();
        self.dispatch_transport_events();

        if !self.transport.set_socket_descriptor(descriptor) {
            log::warn!(
                "[socket] adopt_descriptor(): {}",
                self.transport.error_string()
            );
            self.dispatch_transport_events();
            return;
        }

        let server_name = self.transport.server_name().to_string();
        if self.peer != server_name {
            self.peer = server_name;
            self.observers.emit(&SessionEvent::PeerChanged);
        }

        self.observers.emit(&SessionEvent::Connected);
    }

    /// Writes host-encoded bytes (integers in `[0, 255]`).
    ///
    /// The whole payload is validated before anything is written.
    pub fn write_ints(&mut self, values: &[i64]) -> Result<(), SessionError> {
        let data = bytes::bytes_from_ints(values)
            .inspect_err(|err| log::warn!("[socket] write_bytes(): {err}, not writing"))?;
        self.write_bytes(&data)
    }

    /// Writes every byte of `data`, then flushes.
    ///
    /// On a transport error a prefix of `data` may already be on its way.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let mut remaining = data.len();
        let mut cursor = 0;

        while remaining > 0 {
            match self.transport.write(&data[cursor..]) {
                Ok(0) => {
                    let err = SessionError::Transport("transport accepted no bytes".to_string());
                    log::warn!("[socket] write_bytes(): {err}");
                    return Err(err);
                }
                Ok(written) => {
                    let written = written.min(remaining);
                    remaining -= written;
                    cursor += written;
                }
                Err(_) => {
                    let err = SessionError::Transport(self.transport.error_string());
                    log::warn!("[socket] write_bytes(): {err}");
                    return Err(err);
                }
            }
        }

        self.transport.flush();
        Ok(())
    }

    /// Advances the transport and delivers the resulting events.
    ///
    /// Returns the number of events delivered.
    pub fn poll(&mut self) -> usize {
        let deferred = std::mem::take(&mut self.deferred);
        let mut delivered = deferred.len();
        for event in &deferred {
            self.observers.emit(event);
        }

        delivered += self.dispatch_transport_events();
        delivered
    }

    fn dispatch_transport_events(&mut self) -> usize {
        let events = self.transport.poll();
        let count = events.len();
        for event in events {
            match event {
                TransportEvent::Connected => self.observers.emit(&SessionEvent::Connected),
                TransportEvent::Disconnected => self.observers.emit(&SessionEvent::Disconnected),
                TransportEvent::Error(err) => self.observers.emit(&SessionEvent::Error(err.code())),
                TransportEvent::ReadyRead => self.read_available(),
            }
        }
        count
    }

    /// Emits everything currently readable as one `bytes_received`.
    fn read_available(&mut self) {
        let data = self.transport.read_all();
        log::trace!("[socket] {} byte(s) from '{}'", data.len(), self.peer);
        self.observers.emit(&SessionEvent::BytesReceived(data));
    }

    /// Subscribes to every event.
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.observers.subscribe(None, Box::new(handler))
    }

    /// Subscribes to one kind of event.
    pub fn subscribe_kind<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.observers.subscribe(Some(kind), Box::new(handler))
    }

    /// Removes a subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Called when the session connects.
    pub fn on_connected<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        self.subscribe_kind(EventKind::Connected, move |_| handler())
    }

    /// Called when the session disconnects.
    pub fn on_disconnected<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        self.subscribe_kind(EventKind::Disconnected, move |_| handler())
    }

    /// Called with the integer code of each transport error.
    pub fn on_error<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut(i32) + Send + 'static,
    {
        self.subscribe_kind(EventKind::Error, move |event| {
            if let SessionEvent::Error(code) = event {
                handler(*code);
            }
        })
    }

    /// Called when `peer` changes.
    pub fn on_peer_changed<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        self.subscribe_kind(EventKind::PeerChanged, move |_| handler())
    }

    /// Called with each chunk of received bytes.
    pub fn on_bytes_received<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.subscribe_kind(EventKind::BytesReceived, move |event| {
            if let SessionEvent::BytesReceived(data) = event {
                handler(data);
            }
        })
    }
}

impl<T: Transport> Drop for SocketSession<T> {
    fn drop(&mut self) {
        self.transport.flush();
    }
}
