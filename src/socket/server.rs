//! Listening sockets that hand out [`SocketDescriptor`]s.
//!
//! Listeners are non-blocking: [`SocketServer::accept`] returns `Ok(None)`
//! when nobody is waiting, so a host can call it from its tick.

use std::io;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::descriptor::SocketDescriptor;
use super::stream::TransportKind;
use crate::config::SocketConfig;

/// `sun_path` is 104 bytes on macOS and 108 on Linux; use the smaller.
const MAX_SOCKET_PATH: usize = 104;

#[derive(Debug)]
enum Listener {
    Local(UnixListener),
    Tcp(TcpListener),
}

/// A listening socket.
#[derive(Debug)]
pub struct SocketServer {
    listener: Listener,
    /// Name reported by every descriptor this server accepts.
    server_name: String,
    /// Socket file to remove on drop (local only).
    socket_path: Option<PathBuf>,
}

impl SocketServer {
    /// Listens on a Unix domain socket.
    ///
    /// Relative names resolve into `config.socket_dir`. A stale socket file
    /// is removed (any other file at the path is an error), the parent directory is created, and permissions
    /// are set to 0600.
    pub fn listen_local(name: &str, config: &SocketConfig) -> Result<Self> {
        if name.is_empty() {
            anyhow::bail!("Cannot listen on an empty server name");
        }

        let socket_path = config.resolve_server_path(name);
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        remove_stale_socket(&socket_path)?;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)?;
        }

        listener.set_nonblocking(true)?;
        log::info!("[socket] Listening on {}", socket_path.display());

        Ok(Self {
            listener: Listener::Local(listener),
            server_name: name.to_string(),
            socket_path: Some(socket_path),
        })
    }

    /// Listens on a TCP address such as `127.0.0.1:0`.
    ///
    /// The server name becomes the bound address, so port 0 is replaced by
    /// the port the OS picked.
    pub fn listen_tcp(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("Failed to bind TCP address: {addr}"))?;
        listener.set_nonblocking(true)?;
        let server_name = listener.local_addr()?.to_string();
        log::info!("[socket] Listening on tcp://{}", server_name);

        Ok(Self {
            listener: Listener::Tcp(listener),
            server_name,
            socket_path: None,
        })
    }

    /// Accepts one pending connection, if any.
    pub fn accept(&self) -> io::Result<Option<SocketDescriptor>> {
        let accepted = match &self.listener {
            Listener::Local(listener) => listener
                .accept()
                .map(|(stream, _)| SocketDescriptor::local(stream, self.server_name.clone())),
            Listener::Tcp(listener) => listener
                .accept()
                .map(|(stream, _)| SocketDescriptor::tcp(stream, self.server_name.clone())),
        };

        match accepted {
            Ok(descriptor) => {
                log::debug!("[socket] Accepted connection on '{}'", self.server_name);
                Ok(Some(descriptor))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Name reported by accepted descriptors.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Kind of descriptor this server produces.
    pub fn kind(&self) -> TransportKind {
        match self.listener {
            Listener::Local(_) => TransportKind::Local,
            Listener::Tcp(_) => TransportKind::Tcp,
        }
    }

    /// Path of the socket file (local servers only).
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }
}

/// Removes a leftover socket file at `path`. Refuses to touch anything
/// that is not a socket.
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect socket path: {}", path.display()))
        }
    };

    if !metadata.file_type().is_socket() {
        anyhow::bail!("Cannot listen on {}: path exists and is not a socket", path.display());
    }

    std::fs::remove_file(path)
        .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    log::debug!("[socket] Removed stale socket {}", path.display());
    Ok(())
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if let Some(path) = &self.socket_path {
            if let Err(e) = std::fs::remove_file(path) {
                log::debug!("[socket] Could not remove {}: {e}", path.display());
            }
        }
    }
}
