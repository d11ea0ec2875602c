//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Environment variable for debug mode.
pub const SCRATCH_DEBUG_ENV: &str = "SCRATCH_DEBUG";

/// Initialize logging based on the SCRATCH_DEBUG environment variable or explicit flag.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_debug_logging(force_debug: bool) {
    let debug_enabled = force_debug || std::env::var(SCRATCH_DEBUG_ENV).is_ok();

    let filter = if debug_enabled {
        EnvFilter::new("session_scratch=debug,scratchd=debug,warn")
    } else {
        EnvFilter::new("session_scratch=info,scratchd=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug_enabled)
        .with_level(true)
        .with_ansi(true)
        .try_init()
        .ok();
}
