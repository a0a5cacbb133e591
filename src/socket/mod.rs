//! Stream socket sessions.
//!
//! A [`SocketSession`] owns one [`Transport`] and relays its lifecycle and
//! inbound bytes to observers. [`StreamTransport`] is the real transport
//! (Unix domain or TCP); tests plug in their own `Transport`.
//!
//! # Architecture
//!
//! ```text
//! SocketServer ──accept()──► SocketDescriptor ──adopt──┐
//!                                                      ▼
//! host loop ──poll()──► SocketSession ──► StreamTransport ──► OS socket
//!                            │
//!                            └──► observers (connected, disconnected,
//!                                 error, peer_changed, bytes_received)
//! ```
//!
//! # State Machine
//!
//! Disconnected → Connecting → Connected → Disconnecting → Disconnected,
//! driven entirely by the transport. The session only rejects `peer`
//! changes outside Disconnected.

pub mod bytes;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod server;
pub mod session;
pub mod state;
pub mod stream;
pub mod transport;

pub use descriptor::SocketDescriptor;
pub use error::SessionError;
pub use events::{EventKind, SessionEvent, SubscriptionId};
pub use server::SocketServer;
pub use session::SocketSession;
pub use state::{SocketError, SocketState};
pub use stream::{StreamTransport, TransportKind};
pub use transport::{Transport, TransportEvent};
