//! Connection state and integer-coded transport errors.

use std::fmt;
use std::io;

/// Lifecycle of the underlying stream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    /// No connection; `peer` may be changed.
    #[default]
    Disconnected,
    /// A connect attempt has been started.
    Connecting,
    /// Connected and relaying bytes.
    Connected,
    /// Graceful close in progress (pending writes draining).
    Disconnecting,
}

impl SocketState {
    /// Lowercase name used by the Lua binding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport error, narrowed to a stable integer code for script hosts.
///
/// Codes match the classic socket-error numbering, so a host that only
/// sees the integer can still tell a refused connection from a peer close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SocketError {
    /// The peer refused the connection.
    ConnectionRefused = 0,
    /// The remote side closed the connection.
    PeerClosed = 1,
    /// No server listens under the requested name.
    ServerNotFound = 2,
    /// Insufficient permissions for the socket.
    SocketAccess = 3,
    /// The OS ran out of sockets or buffers.
    SocketResource = 4,
    /// The operation timed out.
    SocketTimeout = 5,
    /// Message larger than the OS limit.
    DatagramTooLarge = 6,
    /// Generic network failure.
    Network = 7,
    /// The descriptor does not match this transport.
    UnsupportedSocketOperation = 10,
    /// Operation not allowed in the current state.
    Operation = 19,
    /// Anything else.
    Unknown = -1,
}

impl SocketError {
    /// Integer code delivered with the `error` event.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Reverse of [`code`](Self::code).
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => Self::ConnectionRefused,
            1 => Self::PeerClosed,
            2 => Self::ServerNotFound,
            3 => Self::SocketAccess,
            4 => Self::SocketResource,
            5 => Self::SocketTimeout,
            6 => Self::DatagramTooLarge,
            7 => Self::Network,
            10 => Self::UnsupportedSocketOperation,
            19 => Self::Operation,
            -1 => Self::Unknown,
            _ => return None,
        };
        Some(err)
    }

    /// Classify an I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(errno) = err.raw_os_error() {
            match errno {
                libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM => {
                    return Self::SocketResource;
                }
                libc::ENETUNREACH | libc::EHOSTUNREACH | libc::ENETDOWN => return Self::Network,
                libc::EMSGSIZE => return Self::DatagramTooLarge,
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => Self::ServerNotFound,
            io::ErrorKind::PermissionDenied => Self::SocketAccess,
            io::ErrorKind::TimedOut => Self::SocketTimeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::PeerClosed,
            io::ErrorKind::NotConnected => Self::Operation,
            io::ErrorKind::Unsupported => Self::UnsupportedSocketOperation,
            _ => Self::Unknown,
        }
    }

    /// Short snake_case name, exposed to Lua via `socket.error_name`.
    pub fn name(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::PeerClosed => "peer_closed",
            Self::ServerNotFound => "server_not_found",
            Self::SocketAccess => "socket_access",
            Self::SocketResource => "socket_resource",
            Self::SocketTimeout => "socket_timeout",
            Self::DatagramTooLarge => "datagram_too_large",
            Self::Network => "network",
            Self::UnsupportedSocketOperation => "unsupported_socket_operation",
            Self::Operation => "operation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
