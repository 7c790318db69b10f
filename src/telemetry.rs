//! Optional tracing-subscriber bootstrap for binaries embedding this crate.
//!
//! The library itself never installs a global subscriber — every module logs
//! through `tracing`'s macros and leaves collection to the host process. This
//! helper exists only so a standalone binary or integration test doesn't have
//! to hand-roll the usual env-filter + fmt layer wiring.

#[cfg(feature = "telemetry")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing() {}

#[cfg(all(test, feature = "telemetry"))]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
