//! Lua scripting host.
//!
//! Scripts drive socket sessions through the `socket` table and observe
//! them through callbacks registered on each socket userdata.
//!
//! # Architecture
//!
//! ```text
//! LuaRuntime
//!  ├── Lua state (mlua)
//!  ├── SocketRegistry (sessions + callback keys)
//!  └── Primitives
//!       ├── log (trace, debug, info, warn, error)
//!       └── socket (new, adopt, listen, listen_tcp, error_name, config)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let runtime = LuaRuntime::new(SocketConfig::load()?)?;
//! runtime.load_string("client.lua", source)?;
//! loop {
//!     runtime.tick();
//! }
//! ```

pub mod primitives;
pub mod runtime;

pub use primitives::socket::{new_socket_registry, poll_socket_events, SocketRegistry};
pub use runtime::LuaRuntime;
