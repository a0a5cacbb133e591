//! The transport seam under a session.

use std::io;

use super::state::{SocketError, SocketState};

/// Notification produced by [`Transport::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect attempt completed.
    Connected,
    /// The connection closed.
    Disconnected,
    /// A transport error occurred.
    Error(SocketError),
    /// Unread bytes are waiting in [`Transport::read_all`].
    ReadyRead,
}

/// A non-blocking stream socket.
///
/// Every method returns immediately. Completion of connects, disconnects
/// and arrival of data is reported by [`poll`](Self::poll), which the
/// owner calls from its event loop.
pub trait Transport {
    /// Already-accepted connection this transport can attach to.
    type Descriptor;

    /// Current lifecycle state.
    fn state(&self) -> SocketState;

    /// Name of the server this transport is (or was last) connected to.
    fn server_name(&self) -> &str;

    /// Starts connecting to `name`. Errors surface through `poll`.
    fn connect_to_server(&mut self, name: &str);

    /// Starts a graceful close; pending writes drain first.
    fn disconnect_from_server(&mut self);

    /// Closes immediately, discarding pending writes.
    fn abort(&mut self);

    /// Attaches to an accepted connection. Returns `false` if the descriptor
    /// could not be used; the reason is queued as an error event.
    fn set_socket_descriptor(&mut self, descriptor: Self::Descriptor) -> bool;

    /// Queues `data` for sending and returns how many bytes were accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Pushes queued bytes to the OS without blocking. Returns `true` if
    /// anything was written.
    fn flush(&mut self) -> bool;

    /// Takes every byte received so far.
    fn read_all(&mut self) -> Vec<u8>;

    /// Human-readable description of the last error.
    fn error_string(&self) -> String;

    /// Advances the transport and returns the events that resulted.
    fn poll(&mut self) -> Vec<TransportEvent>;
}
