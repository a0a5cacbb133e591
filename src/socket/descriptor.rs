//! Owned handles to accepted connections.

use std::net::TcpStream;
use std::os::unix::net::UnixStream;

use super::stream::TransportKind;

/// An accepted connection waiting to be adopted by a session.
///
/// Adoption takes the descriptor by value, so it can be used exactly once.
#[derive(Debug)]
pub enum SocketDescriptor {
    /// Accepted on a Unix domain listener.
    Local {
        /// The connected stream.
        stream: UnixStream,
        /// Name of the server that accepted it.
        server_name: String,
    },
    /// Accepted on a TCP listener.
    Tcp {
        /// The connected stream.
        stream: TcpStream,
        /// Address of the server that accepted it.
        server_name: String,
    },
}

impl SocketDescriptor {
    /// Wraps an accepted Unix stream.
    pub fn local(stream: UnixStream, server_name: impl Into<String>) -> Self {
        Self::Local {
            stream,
            server_name: server_name.into(),
        }
    }

    /// Wraps an accepted TCP stream.
    pub fn tcp(stream: TcpStream, server_name: impl Into<String>) -> Self {
        Self::Tcp {
            stream,
            server_name: server_name.into(),
        }
    }

    /// Server name reported for this connection.
    pub fn server_name(&self) -> &str {
        match self {
            Self::Local { server_name, .. } | Self::Tcp { server_name, .. } => server_name,
        }
    }

    /// Which transport can adopt this descriptor.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Local { .. } => TransportKind::Local,
            Self::Tcp { .. } => TransportKind::Tcp,
        }
    }
}
