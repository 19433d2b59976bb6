//! Optional `env_logger` wiring for standalone binaries embedding this crate.
//!
//! Libraries should never install a logger on behalf of their host; this
//! module exists only for examples, tests, and hosts that have no logging
//! setup of their own yet. Gated behind the `setup` feature, matching the
//! teacher's `re_log::setup_native_logging` split from its always-on `log`
//! facade usage.

/// Installs an `env_logger` subscriber reading `RUST_LOG` (defaulting to
/// `info` if unset). Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
