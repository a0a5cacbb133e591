//! Socket primitives for Lua scripts.
//!
//! Exposes [`SocketSession`]s to Lua as userdata with a bindable `peer`
//! property, lifecycle callbacks and integer-encoded byte payloads.
//!
//! # Usage in Lua
//!
//! ```lua
//! local s = socket.new()                 -- or socket.new({ transport = "tcp" })
//! s.peer = "svc"
//!
//! s:on_connected(function() log.info("connected to " .. s.peer) end)
//! s:on_disconnected(function() log.info("gone") end)
//! s:on_error(function(code) log.warn("error " .. socket.error_name(code)) end)
//! s:on_bytes_received(function(bytes)
//!     -- bytes is a sequence of integers in [0, 255]
//!     s:write_bytes({ 1, 2, 3 })
//! end)
//!
//! s:connect_to_host()
//!
//! -- Callbacks that capture `s` keep it alive; close it explicitly
//! s:close()
//!
//! -- Server side: hand accepted connections to new sockets
//! local server = socket.listen("svc")
//! local descriptor = server:accept()     -- nil when nobody is waiting
//! if descriptor then
//!     local conn = socket.adopt(descriptor)
//! end
//! ```
//!
//! # Event Delivery
//!
//! Sessions publish their events into an mpsc channel. [`poll_socket_events`]
//! polls every session and collects events with their callbacks under the
//! registry lock, then releases the lock before invoking Lua, so callbacks
//! can call back into any socket without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use mlua::prelude::*;
use tokio::sync::mpsc;

use crate::config::SocketConfig;
use crate::socket::bytes::ints_from_bytes;
use crate::socket::{
    EventKind, SessionEvent, SocketDescriptor, SocketError, SocketServer, SocketSession,
    StreamTransport, TransportKind,
};

/// An event tagged with the socket that produced it.
#[derive(Debug)]
struct SocketEvent {
    socket_id: u64,
    event: SessionEvent,
}

/// A live session plus the Lua callbacks attached to it.
struct SocketEntry {
    session: SocketSession<StreamTransport>,
    callbacks: HashMap<EventKind, LuaRegistryKey>,
}

/// Inner state of the socket registry, protected by a mutex.
pub struct SocketRegistryInner {
    sessions: HashMap<u64, SocketEntry>,
    next_id: u64,
    config: SocketConfig,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    event_rx: mpsc::UnboundedReceiver<SocketEvent>,
}

impl std::fmt::Debug for SocketRegistryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRegistryInner")
            .field("sessions", &self.sessions.len())
            .field("next_id", &self.next_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Shared handle to every session created from Lua.
#[derive(Debug, Clone)]
pub struct SocketRegistry {
    inner: Arc<Mutex<SocketRegistryInner>>,
    /// Ids of sockets whose userdata Lua has collected. Kept outside `inner`
    /// because the garbage collector may run while `inner` is locked.
    released: Arc<Mutex<Vec<u64>>>,
}

/// Create a new shared socket registry.
#[must_use]
pub fn new_socket_registry(config: SocketConfig) -> SocketRegistry {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    SocketRegistry {
        inner: Arc::new(Mutex::new(SocketRegistryInner {
            sessions: HashMap::new(),
            next_id: 0,
            config,
            event_tx,
            event_rx,
        })),
        released: Arc::new(Mutex::new(Vec::new())),
    }
}

impl SocketRegistry {
    fn lock(&self) -> MutexGuard<'_, SocketRegistryInner> {
        self.inner.lock().expect("SocketRegistry mutex poisoned")
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Configuration new sockets are created with.
    pub fn config(&self) -> SocketConfig {
        self.lock().config.clone()
    }

    fn insert(&self, mut session: SocketSession<StreamTransport>) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let tx = inner.event_tx.clone();
        session.subscribe(move |event| {
            let _ = tx.send(SocketEvent {
                socket_id: id,
                event: event.clone(),
            });
        });

        inner.sessions.insert(
            id,
            SocketEntry {
                session,
                callbacks: HashMap::new(),
            },
        );
        ::log::debug!("[socket] Registered socket {id}");
        id
    }

    /// Removes a session and its callbacks, finishing pending writes first.
    /// Returns `false` if the session was already gone.
    fn close(&self, id: u64) -> bool {
        let entry = self.lock().sessions.remove(&id);
        let Some(mut entry) = entry else {
            return false;
        };
        // Dropped outside the lock: the transport drains pending writes on drop.
        entry.session.disconnect_from_host();
        drop(entry);
        ::log::debug!("[socket] Closed socket {id}");
        true
    }

    fn release(&self, id: u64) {
        self.released
            .lock()
            .expect("SocketRegistry released-list mutex poisoned")
            .push(id);
    }

    fn take_released(&self) -> Vec<u64> {
        std::mem::take(
            &mut *self
                .released
                .lock()
                .expect("SocketRegistry released-list mutex poisoned"),
        )
    }
}

// =============================================================================
// Userdata
// =============================================================================

/// Lua handle to one session.
#[derive(Debug)]
pub struct LuaSocket {
    id: u64,
    registry: SocketRegistry,
}

impl LuaSocket {
    fn with_session<R>(
        &self,
        f: impl FnOnce(&mut SocketSession<StreamTransport>) -> R,
    ) -> LuaResult<R> {
        let mut inner = self.registry.lock();
        let entry = inner
            .sessions
            .get_mut(&self.id)
            .ok_or_else(|| LuaError::runtime(format!("socket {} has been released", self.id)))?;
        Ok(f(&mut entry.session))
    }

    fn set_callback(&self, lua: &Lua, kind: EventKind, callback: LuaFunction) -> LuaResult<()> {
        let key = lua.create_registry_value(callback)?;
        let mut inner = self.registry.lock();
        let entry = inner
            .sessions
            .get_mut(&self.id)
            .ok_or_else(|| LuaError::runtime(format!("socket {} has been released", self.id)))?;
        entry.callbacks.insert(kind, key);
        Ok(())
    }
}

impl Drop for LuaSocket {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl LuaUserData for LuaSocket {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("peer", |_, this| {
            this.with_session(|s| s.peer().to_string())
        });
        fields.add_field_method_set("peer", |_, this, peer: String| {
            this.with_session(|s| {
                // Rejections are logged by the session; the property keeps its value.
                let _ = s.set_peer(&peer);
            })
        });
        fields.add_field_method_get("state", |_, this| {
            this.with_session(|s| s.state().as_str().to_string())
        });
        fields.add_field_method_get("transport", |_, this| {
            this.with_session(|s| s.transport().kind().as_str().to_string())
        });
        fields.add_field_method_get("id", |_, this| Ok(this.id));
    }

    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("connect_to_host", |_, this, ()| {
            this.with_session(SocketSession::connect_to_host)
        });

        methods.add_method("disconnect_from_host", |_, this, ()| {
            this.with_session(SocketSession::disconnect_from_host)
        });

        methods.add_method("close", |_, this, ()| Ok(this.registry.close(this.id)));

        methods.add_method("write_bytes", |lua, this, values: LuaTable| {
            let Some(values) = ints_from_table(lua, &values)? else {
                return Ok(false);
            };
            this.with_session(|s| s.write_ints(&values).is_ok())
        });

        methods.add_method("adopt_descriptor", |_, this, descriptor: LuaAnyUserData| {
            let descriptor = take_descriptor(&descriptor)?;
            this.with_session(|s| s.adopt_descriptor(descriptor))
        });

        for kind in EventKind::ALL {
            methods.add_method(format!("on_{}", kind.as_str()), move |lua, this, callback: LuaFunction| {
                this.set_callback(lua, kind, callback)
            });
        }

        methods.add_method("on", |lua, this, (name, callback): (String, LuaFunction)| {
            let kind = name.parse::<EventKind>().map_err(LuaError::runtime)?;
            this.set_callback(lua, kind, callback)
        });
    }
}

/// An accepted connection. Adopting it empties the userdata.
#[derive(Debug)]
pub struct LuaDescriptor {
    descriptor: Option<SocketDescriptor>,
}

impl LuaUserData for LuaDescriptor {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("server_name", |_, this| {
            Ok(this.descriptor.as_ref().map(|d| d.server_name().to_string()))
        });
        fields.add_field_method_get("consumed", |_, this| Ok(this.descriptor.is_none()));
    }
}

fn take_descriptor(userdata: &LuaAnyUserData) -> LuaResult<SocketDescriptor> {
    let mut handle = userdata.borrow_mut::<LuaDescriptor>()?;
    handle
        .descriptor
        .take()
        .ok_or_else(|| LuaError::runtime("descriptor has already been adopted"))
}

/// A listening socket.
#[derive(Debug)]
pub struct LuaServer {
    server: SocketServer,
}

impl LuaUserData for LuaServer {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("server_name", |_, this| Ok(this.server.server_name().to_string()));
        fields.add_field_method_get("transport", |_, this| Ok(this.server.kind().as_str().to_string()));
    }

    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("accept", |_, this, ()| {
            let accepted = this
                .server
                .accept()
                .map_err(|e| LuaError::runtime(format!("accept on '{}' failed: {e}", this.server.server_name())))?;
            Ok(accepted.map(|descriptor| LuaDescriptor {
                descriptor: Some(descriptor),
            }))
        });
    }
}

/// Reads a Lua sequence as integers. Returns `None` (after logging) if an
/// element is not an integer.
fn ints_from_table(lua: &Lua, table: &LuaTable) -> LuaResult<Option<Vec<i64>>> {
    let mut values = Vec::new();
    for value in table.clone().sequence_values::<LuaValue>() {
        let value = value?;
        let type_name = value.type_name();
        match lua.coerce_integer(value)? {
            Some(int) => values.push(int),
            None => {
                ::log::warn!(
                    "[socket] write_bytes(): element {} is a {}, not an integer; not writing",
                    values.len() + 1,
                    type_name
                );
                return Ok(None);
            }
        }
    }
    Ok(Some(values))
}

// =============================================================================
// Registration
// =============================================================================

/// Register the global `socket` table.
///
/// - `socket.new([opts])` - New disconnected socket (`opts.transport` = "local" | "tcp")
/// - `socket.adopt(descriptor)` - Socket attached to an accepted connection
/// - `socket.listen(name)` - Unix domain listener
/// - `socket.listen_tcp(addr)` - TCP listener
/// - `socket.error_name(code)` - Name for an error code, or nil
/// - `socket.config()` - Active configuration as a table
pub fn register(lua: &Lua, registry: &SocketRegistry) -> Result<()> {
    let socket_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create socket table: {e}"))?;

    // socket.new(opts)
    let reg = registry.clone();
    let new_fn = lua
        .create_function(move |_, opts: Option<LuaTable>| {
            let kind = match opts {
                Some(opts) => match opts.get::<Option<String>>("transport")? {
                    Some(name) => name.parse::<TransportKind>().map_err(LuaError::runtime)?,
                    None => TransportKind::default(),
                },
                None => TransportKind::default(),
            };
            let session = SocketSession::new(StreamTransport::new(kind, reg.config()));
            let id = reg.insert(session);
            Ok(LuaSocket {
                id,
                registry: reg.clone(),
            })
        })
        .map_err(|e| anyhow!("Failed to create socket.new function: {e}"))?;
    socket_table
        .set("new", new_fn)
        .map_err(|e| anyhow!("Failed to set socket.new: {e}"))?;

    // socket.adopt(descriptor)
    let reg = registry.clone();
    let adopt_fn = lua
        .create_function(move |_, descriptor: LuaAnyUserData| {
            let descriptor = take_descriptor(&descriptor)?;
            let transport = StreamTransport::new(descriptor.kind(), reg.config());
            let id = reg.insert(SocketSession::with_descriptor(transport, descriptor));
            Ok(LuaSocket {
                id,
                registry: reg.clone(),
            })
        })
        .map_err(|e| anyhow!("Failed to create socket.adopt function: {e}"))?;
    socket_table
        .set("adopt", adopt_fn)
        .map_err(|e| anyhow!("Failed to set socket.adopt: {e}"))?;

    // socket.listen(name)
    let reg = registry.clone();
    let listen_fn = lua
        .create_function(move |_, name: String| {
            let server = SocketServer::listen_local(&name, &reg.config())
                .map_err(|e| LuaError::runtime(format!("{e:#}")))?;
            Ok(LuaServer { server })
        })
        .map_err(|e| anyhow!("Failed to create socket.listen function: {e}"))?;
    socket_table
        .set("listen", listen_fn)
        .map_err(|e| anyhow!("Failed to set socket.listen: {e}"))?;

    // socket.listen_tcp(addr)
    let listen_tcp_fn = lua
        .create_function(|_, addr: String| {
            let server = SocketServer::listen_tcp(&addr).map_err(|e| LuaError::runtime(format!("{e:#}")))?;
            Ok(LuaServer { server })
        })
        .map_err(|e| anyhow!("Failed to create socket.listen_tcp function: {e}"))?;
    socket_table
        .set("listen_tcp", listen_tcp_fn)
        .map_err(|e| anyhow!("Failed to set socket.listen_tcp: {e}"))?;

    // socket.error_name(code)
    let error_name_fn = lua
        .create_function(|_, code: i32| Ok(SocketError::from_code(code).map(|e| e.name().to_string())))
        .map_err(|e| anyhow!("Failed to create socket.error_name function: {e}"))?;
    socket_table
        .set("error_name", error_name_fn)
        .map_err(|e| anyhow!("Failed to set socket.error_name: {e}"))?;

    // socket.config()
    let reg = registry.clone();
    let config_fn = lua
        .create_function(move |lua, ()| lua.to_value(&reg.config()))
        .map_err(|e| anyhow!("Failed to create socket.config function: {e}"))?;
    socket_table
        .set("config", config_fn)
        .map_err(|e| anyhow!("Failed to set socket.config: {e}"))?;

    lua.globals()
        .set("socket", socket_table)
        .map_err(|e| anyhow!("Failed to register socket table globally: {e}"))?;

    Ok(())
}

// =============================================================================
// Event dispatch
// =============================================================================

/// Poll every session and fire Lua callbacks for the resulting events.
///
/// Called from the host tick. Sockets whose userdata Lua collected since
/// the last call are dropped first (which flushes them).
///
/// # Returns
///
/// The number of events processed, including those without a callback.
pub fn poll_socket_events(lua: &Lua, registry: &SocketRegistry) -> usize {
    let released = registry.take_released();

    // Phase 1: poll and collect callbacks under the lock
    let (processed, ready) = {
        let mut inner = registry.lock();

        for id in released {
            if inner.sessions.remove(&id).is_some() {
                ::log::debug!("[socket] Released socket {id}");
            }
        }

        for entry in inner.sessions.values_mut() {
            entry.session.poll();
        }

        let mut events = Vec::new();
        while let Ok(event) = inner.event_rx.try_recv() {
            events.push(event);
        }

        let processed = events.len();
        let mut ready: Vec<(LuaFunction, SessionEvent)> = Vec::with_capacity(events.len());
        for SocketEvent { socket_id, event } in events {
            let Some(entry) = inner.sessions.get(&socket_id) else {
                continue;
            };
            let Some(key) = entry.callbacks.get(&event.kind()) else {
                continue;
            };
            match lua.registry_value::<LuaFunction>(key) {
                Ok(callback) => ready.push((callback, event)),
                Err(e) => ::log::warn!("[socket] Lost {} callback for socket {socket_id}: {e}", event.kind()),
            }
        }
        (processed, ready)
    };

    // Phase 2: invoke callbacks without the lock
    for (callback, event) in ready {
        let kind = event.kind();
        let result = match event {
            SessionEvent::Connected | SessionEvent::Disconnected | SessionEvent::PeerChanged => {
                callback.call::<()>(())
            }
            SessionEvent::Error(code) => callback.call::<()>(code),
            SessionEvent::BytesReceived(data) => lua
                .create_sequence_from(ints_from_bytes(&data))
                .and_then(|bytes| callback.call::<()>(bytes)),
        };
        if let Err(e) = result {
            ::log::warn!("[socket] {kind} callback failed: {e}");
        }
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;
    use std::time::{Duration, Instant};

    fn setup(dir: &std::path::Path) -> (Lua, SocketRegistry) {
        let lua = Lua::new();
        let registry = new_socket_registry(SocketConfig {
            socket_dir: dir.to_path_buf(),
            ..SocketConfig::default()
        });
        register(&lua, &registry).expect("Should register socket primitives");
        (lua, registry)
    }

    fn pump_until(lua: &Lua, registry: &SocketRegistry, check: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            poll_socket_events(lua, registry);
            if lua.load(check).eval::<bool>().unwrap() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never became true: {check}");
    }

    #[test]
    fn test_socket_table_created() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());

        let socket_table: LuaTable = lua.globals().get("socket").expect("socket table should exist");
        for name in ["new", "adopt", "listen", "listen_tcp", "error_name", "config"] {
            let _: LuaFunction = socket_table
                .get(name)
                .unwrap_or_else(|_| panic!("socket.{name} should exist"));
        }
    }

    #[test]
    fn test_new_socket_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());

        lua.load(r#"
            s = socket.new()
            assert(s.peer == "")
            assert(s.state == "disconnected")
            assert(s.transport == "local")
            t = socket.new({ transport = "tcp" })
            assert(t.transport == "tcp")
        "#)
            .exec()
            .expect("defaults should hold");
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_unknown_transport_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());
        let err = lua.load(r#"socket.new({ transport = "udp" })"#).exec().unwrap_err();
        assert!(err.to_string().contains("Unknown transport kind"));
    }

    #[test]
    fn test_peer_change_fires_callback_on_next_poll() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());

        lua.load(r#"
            changes = 0
            s = socket.new()
            s:on_peer_changed(function() changes = changes + 1 end)
            s.peer = "svc"
            s.peer = "svc"
        "#)
            .exec()
            .unwrap();

        assert_eq!(lua.globals().get::<i64>("changes").unwrap(), 0);
        assert_eq!(poll_socket_events(&lua, &registry), 1);
        assert_eq!(lua.globals().get::<i64>("changes").unwrap(), 1);
    }

    #[test]
    fn test_write_bytes_rejects_bad_payloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());

        let results: (bool, bool, bool) = lua
            .load(r#"
                local s = socket.new()
                return s:write_bytes({ 1, 256 }), s:write_bytes({ 1, "x" }), s:write_bytes({ 1, 2 })
            "#)
            .eval()
            .unwrap();
        // The last payload is valid but the socket is not connected.
        assert_eq!(results, (false, false, false));
    }

    #[test]
    fn test_unknown_event_name_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());
        let err = lua
            .load(r#"socket.new():on("readyRead", function() end)"#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("Unknown socket event"));
    }

    #[test]
    fn test_error_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());
        let (refused, unknown): (String, Option<String>) = lua
            .load(r#"return socket.error_name(0), socket.error_name(1234)"#)
            .eval()
            .unwrap();
        assert_eq!(refused, "connection_refused");
        assert_eq!(unknown, None);
    }

    #[test]
    fn test_config_view() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());
        let chunk: i64 = lua.load("return socket.config().read_chunk_size").eval().unwrap();
        assert_eq!(chunk, 64 * 1024);
    }

    #[test]
    fn test_connect_receive_and_reply() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());
        let listener = UnixListener::bind(tmp.path().join("svc")).unwrap();

        lua.load(r#"
            connected = false
            received = nil
            s = socket.new()
            s.peer = "svc"
            s:on_connected(function() connected = true end)
            s:on_bytes_received(function(bytes)
                received = bytes
                wrote = s:write_bytes({ 1, 2, 3 })
            end)
            s:connect_to_host()
        "#)
            .exec()
            .unwrap();

        pump_until(&lua, &registry, "return connected");
        let (mut remote, _) = listener.accept().unwrap();
        remote.write_all(&[0, 255, 128]).unwrap();

        pump_until(&lua, &registry, "return received ~= nil");
        let received: Vec<i64> = lua.load("return received").eval().unwrap();
        assert_eq!(received, vec![0, 255, 128]);
        assert!(lua.load("return wrote").eval::<bool>().unwrap());

        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_adopt_consumes_descriptor() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());

        lua.load(r#"
            server = socket.listen("svc")
        "#)
            .exec()
            .unwrap();
        let _client = std::os::unix::net::UnixStream::connect(tmp.path().join("svc")).unwrap();

        lua.load(r#"
            d = server:accept()
            assert(d ~= nil)
            assert(d.server_name == "svc")
            adopted = socket.adopt(d)
            assert(d.consumed)
            assert(d.server_name == nil)
            assert(adopted.peer == "svc")
            assert(adopted.state == "connected")
            connected = 0
            adopted:on("connected", function() connected = connected + 1 end)
        "#)
            .exec()
            .unwrap();

        poll_socket_events(&lua, &registry);
        assert_eq!(lua.globals().get::<i64>("connected").unwrap(), 1);

        let err = lua.load("socket.adopt(d)").exec().unwrap_err();
        assert!(err.to_string().contains("already been adopted"));
    }

    #[test]
    fn test_collected_sockets_are_released() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());

        lua.load(r#"
            do local s = socket.new() end
            collectgarbage("collect")
            collectgarbage("collect")
        "#)
            .exec()
            .unwrap();

        poll_socket_events(&lua, &registry);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_close_releases_self_referencing_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());

        let (first, second): (bool, bool) = lua
            .load(r#"
                local s = socket.new()
                s:on_connected(function() s:write_bytes({ 1 }) end)
                return s:close(), s:close()
            "#)
            .eval()
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(registry.session_count(), 0);

        lua.load(r#"collectgarbage("collect")"#).exec().unwrap();
        poll_socket_events(&lua, &registry);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_closed_socket_rejects_further_use() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, _registry) = setup(tmp.path());

        let err = lua
            .load(r#"
                local s = socket.new()
                s:close()
                s:connect_to_host()
            "#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("has been released"));
    }

    #[test]
    fn test_close_flushes_and_hangs_up() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (lua, registry) = setup(tmp.path());
        let listener = UnixListener::bind(tmp.path().join("svc")).unwrap();

        lua.load(r#"
            connected = false
            s = socket.new()
            s.peer = "svc"
            s:on_connected(function() connected = true end)
            s:connect_to_host()
        "#)
            .exec()
            .unwrap();
        pump_until(&lua, &registry, "return connected");
        let (mut remote, _) = listener.accept().unwrap();

        let closed: bool = lua
            .load("s:write_bytes({ 4, 5, 6 }); return s:close()")
            .eval()
            .unwrap();
        assert!(closed);

        let mut received = Vec::new();
        remote.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        remote.read_to_end(&mut received).unwrap();
        assert_eq!(received, vec![4, 5, 6]);
    }
}
