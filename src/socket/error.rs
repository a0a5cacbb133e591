//! Errors for rejected session operations.

use super::state::SocketState;

/// Why a [`SocketSession`](super::SocketSession) operation was refused.
///
/// These never cross the Lua boundary as errors; the binding turns them
/// into `false` plus a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A write payload element was outside `[0, 255]`.
    InvalidByte {
        /// Position of the first offending element.
        index: usize,
        /// The offending value.
        value: i64,
    },
    /// The transport reported a write failure.
    Transport(String),
    /// `peer` cannot change unless the socket is disconnected.
    PeerLocked(SocketState),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidByte { index, value } => {
                write!(f, "Byte {value} at index {index} is not in [0x00,0xFF]")
            }
            Self::Transport(msg) => write!(f, "Bytes were not written: {msg}"),
            Self::PeerLocked(state) => {
                write!(f, "Can only set peer while disconnected (state: {state})")
            }
        }
    }
}

impl std::error::Error for SessionError {}
