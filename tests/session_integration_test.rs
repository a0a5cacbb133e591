//! Integration tests for socket sessions.
//!
//! The first half drives `SocketSession` over an in-memory loopback
//! transport; the second half runs sessions over real Unix domain sockets
//! through `StreamTransport` and `SocketServer`.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use socklink::{
    SessionEvent, SocketConfig, SocketError, SocketServer, SocketSession, SocketState,
    StreamTransport, Transport, TransportEvent,
};
use tempfile::TempDir;

// =============================================================================
// Loopback transport
// =============================================================================

/// Accepts at most `chunk` bytes per write and records everything written.
struct Loopback {
    state: SocketState,
    server_name: String,
    chunk: usize,
    sent: Arc<Mutex<Vec<u8>>>,
    inbound: VecDeque<Vec<u8>>,
    events: Vec<TransportEvent>,
}

impl Loopback {
    fn new(chunk: usize) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            state: SocketState::Disconnected,
            server_name: String::new(),
            chunk,
            sent: Arc::clone(&sent),
            inbound: VecDeque::new(),
            events: Vec::new(),
        };
        (transport, sent)
    }

    /// Queues one readiness notification; each `read_all` yields one chunk.
    fn deliver(&mut self, bytes: &[u8]) {
        self.inbound.push_back(bytes.to_vec());
        self.events.push(TransportEvent::ReadyRead);
    }
}

impl Transport for Loopback {
    type Descriptor = String;

    fn state(&self) -> SocketState {
        self.state
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn connect_to_server(&mut self, name: &str) {
        self.server_name = name.to_string();
        self.state = SocketState::Connected;
        self.events.push(TransportEvent::Connected);
    }

    fn disconnect_from_server(&mut self) {
        if self.state != SocketState::Disconnected {
            self.state = SocketState::Disconnected;
            self.events.push(TransportEvent::Disconnected);
        }
    }

    fn abort(&mut self) {
        self.disconnect_from_server();
    }

    fn set_socket_descriptor(&mut self, name: String) -> bool {
        self.server_name = name;
        self.state = SocketState::Connected;
        true
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != SocketState::Connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let n = data.len().min(self.chunk);
        self.sent.lock().unwrap().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> bool {
        false
    }

    fn read_all(&mut self) -> Vec<u8> {
        self.inbound.pop_front().unwrap_or_default()
    }

    fn error_string(&self) -> String {
        "loopback closed".to_string()
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.events)
    }
}

fn record<T: Transport>(session: &mut SocketSession<T>) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

fn connected_loopback(chunk: usize) -> (SocketSession<Loopback>, Arc<Mutex<Vec<u8>>>) {
    let (transport, sent) = Loopback::new(chunk);
    let mut session = SocketSession::new(transport);
    session.set_peer("loop").unwrap();
    session.connect_to_host();
    session.poll();
    assert_eq!(session.state(), SocketState::Connected);
    (session, sent)
}

#[test]
fn test_valid_payloads_arrive_in_order() {
    let payloads: Vec<Vec<i64>> = vec![
        vec![],
        vec![0],
        vec![255],
        (0..=255).collect(),
        (0..1000).map(|i| (i * 37) % 256).collect(),
    ];

    for chunk in [1, 3, 64, 4096] {
        for payload in &payloads {
            let (mut session, sent) = connected_loopback(chunk);
            assert!(session.write_ints(payload).is_ok(), "chunk={chunk} len={}", payload.len());

            let expected: Vec<u8> = payload.iter().map(|&v| v as u8).collect();
            assert_eq!(*sent.lock().unwrap(), expected);
        }
    }
}

#[test]
fn test_out_of_range_payloads_write_nothing() {
    let payloads: Vec<Vec<i64>> = vec![
        vec![256],
        vec![-1],
        vec![1, 2, 3, 300],
        vec![0, 255, i64::MIN],
        vec![i64::MAX, 0],
    ];

    for payload in payloads {
        let (mut session, sent) = connected_loopback(16);
        assert!(session.write_ints(&payload).is_err(), "{payload:?} should be rejected");
        assert!(sent.lock().unwrap().is_empty());
    }
}

#[test]
fn test_peer_is_frozen_while_connected() {
    let (mut session, _sent) = connected_loopback(16);
    let seen = record(&mut session);

    assert!(session.set_peer("elsewhere").is_err());
    assert_eq!(session.peer(), "loop");

    session.disconnect_from_host();
    session.poll();
    assert_eq!(session.state(), SocketState::Disconnected);

    session.set_peer("elsewhere").unwrap();
    session.set_peer("elsewhere").unwrap();
    assert_eq!(session.peer(), "elsewhere");

    let peer_changes = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == SessionEvent::PeerChanged)
        .count();
    assert_eq!(peer_changes, 1);
}

#[test]
fn test_adopt_while_connected_emits_connected_once() {
    for new_peer in ["loop", "accepted"] {
        let (mut session, _sent) = connected_loopback(16);
        let seen = record(&mut session);

        session.adopt_descriptor(new_peer.to_string());

        assert_eq!(session.peer(), new_peer);
        assert_eq!(session.state(), SocketState::Connected);

        let events = seen.lock().unwrap().clone();
        let connected = events.iter().filter(|e| **e == SessionEvent::Connected).count();
        assert_eq!(connected, 1, "peer {new_peer}: {events:?}");
        assert_eq!(events.last(), Some(&SessionEvent::Connected));
        assert_eq!(events.first(), Some(&SessionEvent::Disconnected));
    }
}

#[test]
fn test_each_chunk_is_one_event() {
    let (mut session, _sent) = connected_loopback(16);
    let seen = record(&mut session);

    let chunks: Vec<Vec<u8>> = vec![vec![0, 255, 128], vec![7], (0..=255).collect()];
    for chunk in &chunks {
        session.transport_mut().deliver(chunk);
    }
    session.poll();

    let received: Vec<Vec<u8>> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BytesReceived(data) => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(received, chunks);
}

// =============================================================================
// Real sockets
// =============================================================================

fn config(dir: &TempDir) -> SocketConfig {
    SocketConfig {
        socket_dir: dir.path().to_path_buf(),
        ..SocketConfig::default()
    }
}

fn poll_until<T, F>(session: &mut SocketSession<T>, mut done: F)
where
    T: Transport,
    F: FnMut(&SocketSession<T>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        session.poll();
        if done(session) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("session never reached the expected condition: {session:?}");
}

#[test]
fn test_local_endpoint_round_trip() {
    let tmp = TempDir::new().unwrap();
    let listener = UnixListener::bind(tmp.path().join("svc")).unwrap();

    let mut session = SocketSession::new(StreamTransport::local(config(&tmp)));
    let seen = record(&mut session);
    session.set_peer("svc").unwrap();
    session.connect_to_host();
    poll_until(&mut session, |s| s.state() == SocketState::Connected);

    let (mut remote, _) = listener.accept().unwrap();
    remote.write_all(&[0, 255, 128]).unwrap();

    poll_until(&mut session, |_| {
        seen.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::BytesReceived(_)))
    });

    let received: Vec<SessionEvent> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SessionEvent::BytesReceived(_)))
        .cloned()
        .collect();
    assert_eq!(received, vec![SessionEvent::BytesReceived(vec![0, 255, 128])]);

    assert!(session.write_ints(&[1, 2, 3]).is_ok());

    let mut buf = [0u8; 3];
    remote.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    remote.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3]);
}

#[test]
fn test_missing_endpoint_reports_server_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut session = SocketSession::new(StreamTransport::local(config(&tmp)));
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&codes);
    session.on_error(move |code| sink.lock().unwrap().push(code));

    session.set_peer("nobody-home").unwrap();
    session.connect_to_host();
    poll_until(&mut session, |_| !codes.lock().unwrap().is_empty());

    assert_eq!(codes.lock().unwrap()[0], SocketError::ServerNotFound.code());
    assert_eq!(session.state(), SocketState::Disconnected);
}

#[test]
fn test_server_accept_and_adopt() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp);
    let server = SocketServer::listen_local("svc", &cfg).unwrap();

    let mut client = SocketSession::new(StreamTransport::local(cfg.clone()));
    client.set_peer("svc").unwrap();
    client.connect_to_host();
    poll_until(&mut client, |s| s.state() == SocketState::Connected);

    let deadline = Instant::now() + Duration::from_secs(2);
    let descriptor = loop {
        if let Some(descriptor) = server.accept().unwrap() {
            break descriptor;
        }
        assert!(Instant::now() < deadline, "no connection accepted");
        std::thread::sleep(Duration::from_millis(5));
    };

    let mut accepted = SocketSession::with_descriptor(
        StreamTransport::new(descriptor.kind(), cfg.clone()),
        descriptor,
    );
    let seen = record(&mut accepted);
    assert_eq!(accepted.peer(), "svc");
    assert_eq!(accepted.state(), SocketState::Connected);

    assert!(client.write_ints(&[9, 8, 7]).is_ok());
    poll_until(&mut accepted, |_| {
        seen.lock()
            .unwrap()
            .contains(&SessionEvent::BytesReceived(vec![9, 8, 7]))
    });
    assert_eq!(seen.lock().unwrap().first(), Some(&SessionEvent::Connected));

    let client_events = record(&mut client);
    accepted.disconnect_from_host();
    poll_until(&mut accepted, |s| s.state() == SocketState::Disconnected);
    poll_until(&mut client, |s| s.state() == SocketState::Disconnected);
    assert!(client_events
        .lock()
        .unwrap()
        .contains(&SessionEvent::Disconnected));
}

#[test]
fn test_dropping_session_delivers_unsent_bytes() {
    let tmp = TempDir::new().unwrap();
    let listener = UnixListener::bind(tmp.path().join("svc")).unwrap();

    let mut session = SocketSession::new(StreamTransport::local(config(&tmp)));
    session.set_peer("svc").unwrap();
    session.connect_to_host();
    poll_until(&mut session, |s| s.state() == SocketState::Connected);
    let (mut remote, _) = listener.accept().unwrap();

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
    assert!(session.write_bytes(&payload).is_ok());
    assert!(session.transport().pending_write_bytes() > 0);

    let reader = std::thread::spawn(move || {
        let mut received = Vec::new();
        remote.read_to_end(&mut received).unwrap();
        received
    });
    drop(session);

    assert_eq!(reader.join().unwrap(), payload);
}
