//! Socklink - script-bindable stream socket sessions.
//!
//! This crate wraps one local-domain or TCP stream socket per
//! [`SocketSession`](socket::SocketSession), relays its lifecycle and
//! inbound bytes to registered observers, and exposes the whole thing to
//! Lua scripts as a `socket` userdata with a bindable `peer` property.
//!
//! # Architecture
//!
//! ```text
//! Lua script                     LuaRuntime::tick()
//!  socket.new() ─────────────►  SocketRegistry
//!  s.peer = "svc"                 └── SocketSession
//!  s:connect_to_host()                 └── StreamTransport (UnixStream / TcpStream)
//!  s:on_bytes_received(fn) ◄──── events (tokio mpsc) ◄── poll()
//! ```
//!
//! # Modules
//!
//! - [`socket`] - Session, transport, server and descriptor types
//! - [`lua`] - Lua runtime and primitives
//! - [`config`] - Configuration loading
//! - [`logging`] - `env_logger` setup

pub mod config;
pub mod logging;
pub mod lua;
pub mod socket;

pub use config::SocketConfig;
pub use lua::LuaRuntime;
pub use socket::{
    EventKind, SessionError, SessionEvent, SocketDescriptor, SocketError, SocketServer,
    SocketSession, SocketState, StreamTransport, SubscriptionId, Transport, TransportEvent,
    TransportKind,
};
