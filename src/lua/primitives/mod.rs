//! Lua primitive functions exposed to scripts.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (trace, debug, info, warn, error)
//! - `socket` - Local/TCP socket sessions, listeners and descriptors
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua, ...) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call `foo::register(lua)?;` in `register_all`

pub mod log;
pub mod socket;

use anyhow::Result;
use mlua::Lua;

use self::socket::SocketRegistry;

/// Register every primitive on `lua`.
pub fn register_all(lua: &Lua, registry: &SocketRegistry) -> Result<()> {
    log::register(lua)?;
    socket::register(lua, registry)?;
    Ok(())
}
