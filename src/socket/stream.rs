//! Non-blocking Unix domain / TCP transport.
//!
//! Connects, reads and writes never block the caller. A local connect is
//! carried out by the next [`poll`](Transport::poll). A TCP connect (name
//! resolution included) runs on a worker thread whose result `poll` picks
//! up, failing with `SocketTimeout` once `connect_timeout_ms` has passed.
//! Writes go into a buffer that is drained as far as the OS accepts; reads
//! pull everything available until `WouldBlock`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::descriptor::SocketDescriptor;
use super::state::{SocketError, SocketState};
use super::transport::{Transport, TransportEvent};
use crate::config::SocketConfig;

/// Which kind of stream socket a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Unix domain socket; peers are server names or paths.
    #[default]
    Local,
    /// TCP; peers are `host:port`.
    Tcp,
}

impl TransportKind {
    /// Lowercase name (`"local"` / `"tcp"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("Unknown transport kind: {other} (expected \"local\" or \"tcp\")")),
        }
    }
}

#[derive(Debug)]
enum Stream {
    Local(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Local(s) => s.set_nonblocking(nonblocking),
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Self::Local(s) => s.set_write_timeout(Some(timeout)),
            Self::Tcp(s) => s.set_write_timeout(Some(timeout)),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Local(s) => s.shutdown(Shutdown::Both),
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Local(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Local(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Local(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

/// A connect that `poll` has yet to complete.
#[derive(Debug)]
enum PendingConnect {
    /// Unix domain connects complete without waiting on the peer.
    Local,
    /// Resolution and connect run on a worker thread.
    Tcp {
        result: oneshot::Receiver<io::Result<TcpStream>>,
        deadline: Instant,
    },
}

/// Resolves `name` and tries each address until one accepts.
fn connect_tcp(name: &str, timeout: Duration) -> io::Result<TcpStream> {
    let addrs = name
        .to_socket_addrs()
        .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("Host not found: {e}")))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Host resolved to no addresses")))
}

/// [`Transport`] backed by a real OS stream socket.
pub struct StreamTransport {
    kind: TransportKind,
    config: SocketConfig,
    stream: Option<Stream>,
    state: SocketState,
    server_name: String,
    /// Set by `connect_to_server`, completed by `poll`.
    connect: Option<PendingConnect>,
    read_buffer: Vec<u8>,
    /// Reused for every read; sized to `read_chunk_size` on first use.
    scratch: Vec<u8>,
    write_buffer: Vec<u8>,
    last_error: Option<String>,
    events: Vec<TransportEvent>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("server_name", &self.server_name)
            .field("unread", &self.read_buffer.len())
            .field("unwritten", &self.write_buffer.len())
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl StreamTransport {
    /// Creates a disconnected transport.
    pub fn new(kind: TransportKind, config: SocketConfig) -> Self {
        Self {
            kind,
            config,
            stream: None,
            state: SocketState::Disconnected,
            server_name: String::new(),
            connect: None,
            read_buffer: Vec::new(),
            scratch: Vec::new(),
            write_buffer: Vec::new(),
            last_error: None,
            events: Vec::new(),
        }
    }

    /// Disconnected Unix domain transport.
    pub fn local(config: SocketConfig) -> Self {
        Self::new(TransportKind::Local, config)
    }

    /// Disconnected TCP transport.
    pub fn tcp(config: SocketConfig) -> Self {
        Self::new(TransportKind::Tcp, config)
    }

    /// Which kind of socket this is.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Bytes accepted by `write` but not yet handed to the OS.
    pub fn pending_write_bytes(&self) -> usize {
        self.write_buffer.len()
    }

    fn fail(&mut self, error: SocketError, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[socket] {} error on '{}': {}", error, self.server_name, message);
        self.last_error = Some(message);
        self.events.push(TransportEvent::Error(error));
    }

    fn start_connect(&self) -> io::Result<PendingConnect> {
        match self.kind {
            TransportKind::Local => Ok(PendingConnect::Local),
            TransportKind::Tcp => {
                let (tx, rx) = oneshot::channel();
                let name = self.server_name.clone();
                let timeout = self.config.connect_timeout();
                std::thread::Builder::new()
                    .name("socklink-connect".to_string())
                    .spawn(move || {
                        // The receiver is gone if the connect was cancelled.
                        let _ = tx.send(connect_tcp(&name, timeout));
                    })?;
                Ok(PendingConnect::Tcp {
                    result: rx,
                    deadline: Instant::now() + timeout,
                })
            }
        }
    }

    /// Completes the pending connect if its outcome is known.
    fn poll_connect(&mut self) {
        let Some(pending) = self.connect.take() else {
            return;
        };

        let result = match pending {
            PendingConnect::Local => {
                let path = self.config.resolve_server_path(&self.server_name);
                UnixStream::connect(path).map(Stream::Local)
            }
            PendingConnect::Tcp { mut result, deadline } => match result.try_recv() {
                Ok(outcome) => outcome.map(Stream::Tcp),
                Err(oneshot::error::TryRecvError::Empty) if Instant::now() < deadline => {
                    self.connect = Some(PendingConnect::Tcp { result, deadline });
                    return;
                }
                Err(oneshot::error::TryRecvError::Empty) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {:?}", self.config.connect_timeout()),
                )),
                Err(oneshot::error::TryRecvError::Closed) => {
                    Err(io::Error::other("connect worker exited without a result"))
                }
            },
        };

        let result = result.and_then(|stream| {
            stream.set_nonblocking(true)?;
            Ok(stream)
        });

        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = SocketState::Connected;
                log::debug!("[socket] Connected to '{}' ({})", self.server_name, self.kind);
                self.events.push(TransportEvent::Connected);
            }
            Err(e) => {
                self.state = SocketState::Disconnected;
                let message = format!("connect to '{}': {e}", self.server_name);
                self.fail(SocketError::from_io(&e), message);
            }
        }
    }

    /// Writes as much of the buffer as the OS takes without blocking.
    fn drain_writes(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        let mut written = 0;
        let mut failure = None;
        while written < self.write_buffer.len() {
            match stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.write_buffer.drain(..written);

        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn handle_write_failure(&mut self, e: &io::Error) {
        self.fail(SocketError::from_io(e), format!("write: {e}"));
        self.close_stream();
    }

    /// Reads until `WouldBlock`, EOF or error.
    fn fill_read_buffer(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let chunk_size = self.config.read_chunk_size.max(1);
        if self.scratch.len() != chunk_size {
            self.scratch.resize(chunk_size, 0);
        }

        let before = self.read_buffer.len();
        let mut end: Option<Option<io::Error>> = None;
        loop {
            match stream.read(&mut self.scratch) {
                Ok(0) => {
                    end = Some(None);
                    break;
                }
                Ok(n) => self.read_buffer.extend_from_slice(&self.scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    end = Some(Some(e));
                    break;
                }
            }
        }

        if self.read_buffer.len() > before {
            self.events.push(TransportEvent::ReadyRead);
        }

        if let Some(reason) = end {
            match reason {
                None => self.fail(SocketError::PeerClosed, "The remote socket closed the connection"),
                Some(e) => self.fail(SocketError::from_io(&e), format!("read: {e}")),
            }
            self.close_stream();
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                log::trace!("[socket] shutdown of '{}' failed: {e}", self.server_name);
            }
        }
        self.write_buffer.clear();

        let was_open = matches!(self.state, SocketState::Connected | SocketState::Disconnecting);
        self.state = SocketState::Disconnected;
        if was_open {
            log::debug!("[socket] Disconnected from '{}'", self.server_name);
            self.events.push(TransportEvent::Disconnected);
        }
    }
}

impl Transport for StreamTransport {
    type Descriptor = SocketDescriptor;

    fn state(&self) -> SocketState {
        self.state
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn connect_to_server(&mut self, name: &str) {
        if self.state != SocketState::Disconnected {
            self.fail(
                SocketError::Operation,
                format!("Trying to connect while connection is in progress (state: {})", self.state),
            );
            return;
        }

        self.server_name = name.to_string();
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.last_error = None;

        if name.is_empty() {
            self.fail(SocketError::ServerNotFound, "connect: Invalid name");
            return;
        }

        match self.start_connect() {
            Ok(pending) => {
                self.state = SocketState::Connecting;
                self.connect = Some(pending);
                log::debug!("[socket] Connecting to '{}' ({})", name, self.kind);
            }
            Err(e) => self.fail(SocketError::from_io(&e), format!("connect to '{name}': {e}")),
        }
    }

    fn disconnect_from_server(&mut self) {
        match self.state {
            SocketState::Connecting => {
                self.connect = None;
                self.state = SocketState::Disconnected;
            }
            SocketState::Connected => {
                self.state = SocketState::Disconnecting;
                match self.drain_writes() {
                    Ok(_) if self.write_buffer.is_empty() => self.close_stream(),
                    Ok(_) => {}
                    Err(e) => self.handle_write_failure(&e),
                }
            }
            SocketState::Disconnecting | SocketState::Disconnected => {}
        }
    }

    fn abort(&mut self) {
        self.connect = None;
        self.write_buffer.clear();
        if self.stream.is_some() {
            self.close_stream();
        } else {
            self.state = SocketState::Disconnected;
        }
    }

    fn set_socket_descriptor(&mut self, descriptor: SocketDescriptor) -> bool {
        if descriptor.kind() != self.kind {
            let message = format!(
                "Cannot adopt a {} descriptor on a {} socket",
                descriptor.kind(),
                self.kind
            );
            self.fail(SocketError::UnsupportedSocketOperation, message);
            return false;
        }

        let (stream, server_name) = match descriptor {
            SocketDescriptor::Local { stream, server_name } => (Stream::Local(stream), server_name),
            SocketDescriptor::Tcp { stream, server_name } => (Stream::Tcp(stream), server_name),
        };

        if let Err(e) = stream.set_nonblocking(true) {
            self.fail(SocketError::from_io(&e), format!("adopt descriptor: {e}"));
            return false;
        }

        if self.stream.is_some() {
            self.abort();
        }

        self.stream = Some(stream);
        self.server_name = server_name;
        self.state = SocketState::Connected;
        self.connect = None;
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.last_error = None;
        log::debug!("[socket] Adopted connection on '{}' ({})", self.server_name, self.kind);
        true
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != SocketState::Connected {
            let message = format!("Socket is not connected (state: {})", self.state);
            self.last_error = Some(message.clone());
            return Err(io::Error::new(io::ErrorKind::NotConnected, message));
        }

        self.write_buffer.extend_from_slice(data);
        if let Err(e) = self.drain_writes() {
            self.handle_write_failure(&e);
            return Err(e);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> bool {
        match self.drain_writes() {
            Ok(written) => written > 0,
            Err(e) => {
                self.handle_write_failure(&e);
                false
            }
        }
    }

    fn read_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_buffer)
    }

    fn error_string(&self) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.poll_connect();

        if self.stream.is_some() {
            if let Err(e) = self.drain_writes() {
                self.handle_write_failure(&e);
            } else if self.state == SocketState::Disconnecting && self.write_buffer.is_empty() {
                self.close_stream();
            }

            if self.state == SocketState::Connected {
                self.fill_read_buffer();
            }
        }

        std::mem::take(&mut self.events)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if self.write_buffer.is_empty() {
            return;
        }
        let timeout = self.config.connect_timeout();
        if let Some(stream) = self.stream.as_mut() {
            let pending = std::mem::take(&mut self.write_buffer);
            let result = stream
                .set_nonblocking(false)
                .and_then(|()| stream.set_write_timeout(timeout))
                .and_then(|()| stream.write_all(&pending));
            if let Err(e) = result {
                log::debug!("[socket] Dropped {} unsent bytes for '{}': {e}", pending.len(), self.server_name);
            }
        }
    }
}
