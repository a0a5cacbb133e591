//! Logger initialisation.
//!
//! Everything in the crate logs through the `log` facade. Hosts that do not
//! install their own logger can call [`init`] once at startup.

/// Environment variable holding the `env_logger` filter (e.g. `socklink=debug`).
pub const LOG_ENV_VAR: &str = "SOCKLINK_LOG";

/// Install `env_logger` writing to stderr.
///
/// The filter comes from `SOCKLINK_LOG`, defaulting to `info`. Safe to call
/// more than once; later calls are ignored, which lets every test call it.
pub fn init() {
    let env = env_logger::Env::default().filter_or(LOG_ENV_VAR, "info");
    let result = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .is_test(cfg!(test))
        .try_init();

    if result.is_ok() {
        log::debug!("Logger initialised (filter env: {})", LOG_ENV_VAR);
    }
}
