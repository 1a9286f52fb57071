//! Initialize logging with human-readable output format.
//!
//! Uses the `RUST_LOG` environment variable if set, otherwise falls back to
//! `default_level` (e.g. "info", "vigil_cycle=debug,warn").

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_level(true)
        .try_init()
        .ok();
}
