//! Configuration loading.
//!
//! Settings come from an optional JSON file named by `SOCKLINK_CONFIG`,
//! followed by per-field environment variable overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default size of one non-blocking read (64KB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Configuration shared by every socket the crate creates.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SocketConfig {
    /// Directory that relative local server names resolve into.
    pub socket_dir: PathBuf,
    /// Bytes requested per non-blocking read.
    pub read_chunk_size: usize,
    /// Upper bound on a TCP connect attempt.
    pub connect_timeout_ms: u64,
    /// Propagate Lua errors instead of logging them.
    pub lua_strict: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            lua_strict: false,
        }
    }
}

impl SocketConfig {
    /// Loads the configuration file named by `SOCKLINK_CONFIG` (if any), then
    /// applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SOCKLINK_CONFIG") {
            Ok(path) => Self::load_from_path(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!("Loaded socket config from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SOCKLINK_SOCKET_DIR") {
            self.socket_dir = PathBuf::from(dir);
        }

        if let Ok(chunk) = std::env::var("SOCKLINK_READ_CHUNK_SIZE") {
            match chunk.parse::<usize>() {
                Ok(size) if size > 0 => self.read_chunk_size = size,
                _ => log::warn!("Ignoring invalid SOCKLINK_READ_CHUNK_SIZE: {chunk}"),
            }
        }

        if let Ok(timeout) = std::env::var("SOCKLINK_CONNECT_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) if ms > 0 => self.connect_timeout_ms = ms,
                _ => log::warn!("Ignoring invalid SOCKLINK_CONNECT_TIMEOUT_MS: {timeout}"),
            }
        }

        if let Ok(strict) = std::env::var("SOCKLINK_LUA_STRICT") {
            self.lua_strict = strict == "1";
        }
    }

    /// Resolves a local server name to a socket path.
    ///
    /// Absolute names are used as-is; anything else lives in `socket_dir`.
    pub fn resolve_server_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.socket_dir.join(path)
        }
    }

    /// Connect timeout as a `Duration` (never zero).
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.read_chunk_size, 64 * 1024);
        assert_eq!(config.connect_timeout_ms, 30_000);
        assert!(!config.lua_strict);
        assert_eq!(config.socket_dir, std::env::temp_dir());
    }

    #[test]
    fn test_load_from_path_fills_missing_fields() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{ "socket_dir": "/run/sockets", "lua_strict": true }"#).unwrap();

        let config = SocketConfig::load_from_path(&path).unwrap();
        assert_eq!(config.socket_dir, PathBuf::from("/run/sockets"));
        assert!(config.lua_strict);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    }

    #[test]
    fn test_load_from_path_rejects_bad_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = SocketConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_server_path() {
        let config = SocketConfig {
            socket_dir: PathBuf::from("/tmp/socks"),
            ..SocketConfig::default()
        };
        assert_eq!(config.resolve_server_path("svc"), PathBuf::from("/tmp/socks/svc"));
        assert_eq!(config.resolve_server_path("/var/run/x.sock"), PathBuf::from("/var/run/x.sock"));
    }
}
