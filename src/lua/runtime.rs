//! Lua runtime management.
//!
//! Provides the `LuaRuntime` struct which owns the Lua interpreter state and
//! the socket registry scripts create sessions in.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use mlua::{IntoLuaMulti, Lua};

use crate::config::SocketConfig;

use super::primitives;
use super::primitives::socket::{new_socket_registry, poll_socket_events, SocketRegistry};

/// Lua scripting runtime.
///
/// The Lua state is not `Send`; create and tick the runtime on one thread.
///
/// When `lua_strict` is set in the configuration, script errors are returned
/// to the caller. Otherwise they are logged and execution continues.
///
/// # Example
///
/// ```ignore
/// let runtime = LuaRuntime::new(SocketConfig::load()?)?;
/// runtime.load_file(Path::new("client.lua"))?;
///
/// loop {
///     runtime.tick();
///     std::thread::sleep(Duration::from_millis(10));
/// }
/// ```
pub struct LuaRuntime {
    lua: Lua,
    strict: bool,
    sockets: SocketRegistry,
}

impl std::fmt::Debug for LuaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaRuntime")
            .field("strict", &self.strict)
            .field("sockets", &self.sockets.session_count())
            .finish_non_exhaustive()
    }
}

impl LuaRuntime {
    /// Create a new Lua runtime with the `log` and `socket` primitives registered.
    ///
    /// # Errors
    ///
    /// Returns an error if primitive registration fails.
    pub fn new(config: SocketConfig) -> Result<Self> {
        let lua = Lua::new();
        let strict = config.lua_strict;
        let sockets = new_socket_registry(config);

        primitives::register_all(&lua, &sockets).context("Failed to register Lua primitives")?;

        log::debug!("Lua runtime created (strict={strict})");

        Ok(Self { lua, strict, sockets })
    }

    /// Load and execute a Lua file.
    ///
    /// # Errors
    ///
    /// In strict mode, returns an error if the file cannot be read or fails
    /// to execute. Otherwise the error is logged.
    pub fn load_file(&self, path: &Path) -> Result<()> {
        match self.load_file_internal(path) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.strict {
                    Err(e)
                } else {
                    log::warn!("Lua file error ({}): {e:#}", path.display());
                    Ok(())
                }
            }
        }
    }

    fn load_file_internal(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Lua file: {}", path.display()))?;
        self.load_string_internal(&path.to_string_lossy(), &source)
    }

    /// Load and execute Lua code from a string.
    ///
    /// `name` is used in error messages.
    ///
    /// # Errors
    ///
    /// In strict mode, returns an error if the code fails to parse or execute.
    pub fn load_string(&self, name: &str, source: &str) -> Result<()> {
        match self.load_string_internal(name, source) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.strict {
                    Err(e)
                } else {
                    log::warn!("Lua error ({name}): {e}");
                    Ok(())
                }
            }
        }
    }

    fn load_string_internal(&self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|e| anyhow!("Failed to execute Lua {name}: {e}"))?;

        log::debug!("Loaded Lua: {name}");
        Ok(())
    }

    /// Call a global Lua function by name.
    ///
    /// # Errors
    ///
    /// In strict mode, returns an error if the function is missing or fails.
    pub fn call_function<A>(&self, name: &str, args: A) -> Result<()>
    where
        A: IntoLuaMulti,
    {
        match self.call_function_internal(name, args) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.strict {
                    Err(e)
                } else {
                    log::warn!("Lua function error ({name}): {e}");
                    Ok(())
                }
            }
        }
    }

    fn call_function_internal<A>(&self, name: &str, args: A) -> Result<()>
    where
        A: IntoLuaMulti,
    {
        let func: mlua::Function = self
            .lua
            .globals()
            .get(name)
            .map_err(|e| anyhow!("Lua function not found '{name}': {e}"))?;

        func.call::<()>(args)
            .map_err(|e| anyhow!("Lua function '{name}' failed: {e}"))?;

        Ok(())
    }

    /// Check if a global function exists.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.lua.globals().get::<mlua::Function>(name).is_ok()
    }

    /// Poll every socket and run the callbacks for whatever happened.
    ///
    /// Returns the number of socket events processed.
    pub fn tick(&self) -> usize {
        poll_socket_events(&self.lua, &self.sockets)
    }

    /// Get a reference to the underlying Lua state.
    #[must_use]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Registry of the sessions scripts have created.
    #[must_use]
    pub fn sockets(&self) -> &SocketRegistry {
        &self.sockets
    }

    /// Whether script errors are returned instead of logged.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}
