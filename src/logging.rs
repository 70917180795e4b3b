//! Logging - stderr subscriber for the CLI and embedding binaries.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to whoever owns `main`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Filter from `RUST_LOG` (default `info`),
/// JSON lines when `TONCONNECT_LOG_JSON=1`. Safe to call more than once.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("TONCONNECT_LOG_JSON")
        .map(|value| value == "1")
        .unwrap_or(false);

    if use_json {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
