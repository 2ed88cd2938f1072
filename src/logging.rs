//! Tracing setup shared by every binary entry point. Mirrors the teacher's
//! console logger: an `EnvFilter` seeded with a default level, falling back
//! to `RUST_LOG` when the operator wants finer-grained control.

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. `default_level` is used when
/// `RUST_LOG` is unset; any directive in `RUST_LOG` still wins.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
