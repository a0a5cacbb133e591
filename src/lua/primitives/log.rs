//! Logging primitive for Lua scripts.
//!
//! ```lua
//! log.info("connected to " .. s.peer)
//! log.warn("write rejected")
//! ```
//!
//! Messages go through Rust's `log` crate under the `lua` target, so they
//! share filters and output with the rest of the crate.

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the global `log` table (`trace`, `debug`, `info`, `warn`, `error`).
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("trace", ::log::Level::Trace),
        ("debug", ::log::Level::Debug),
        ("info", ::log::Level::Info),
        ("warn", ::log::Level::Warn),
        ("error", ::log::Level::Error),
    ];

    for (name, level) in levels {
        let func = lua
            .create_function(move |_, msg: String| {
                ::log::log!(target: "lua", level, "{}", msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Function, Table};

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        let log_table: Table = lua.globals().get("log").expect("log table should exist");
        for name in ["trace", "debug", "info", "warn", "error"] {
            let _: Function = log_table
                .get(name)
                .unwrap_or_else(|_| panic!("log.{name} should exist"));
        }
    }

    #[test]
    fn test_log_functions_callable() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        lua.load(r#"
            log.trace("t")
            log.debug("d")
            log.info("i")
            log.warn("w")
            log.error("e")
        "#)
            .exec()
            .expect("log functions should be callable");
    }
}
