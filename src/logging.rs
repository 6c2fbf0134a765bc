//! Tracing setup for applications embedding the state core.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host application's choice.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directives, e.g. `statekit=debug`.
pub const LOG_FILTER_ENV: &str = "STATEKIT_LOG";
/// When set, log lines go to `{path}.{pid}` instead of stderr.
pub const LOG_FILE_ENV: &str = "STATEKIT_LOG_FILE";

/// Install a global fmt subscriber.
///
/// The filter comes from `STATEKIT_LOG`, then `RUST_LOG`, then `warn`.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let timer = fmt::time::UtcTime::rfc_3339();

    if let Ok(log_path) = std::env::var(LOG_FILE_ENV) {
        // One file per process so concurrent test binaries don't interleave.
        let unique_path = format!("{}.{}", log_path, std::process::id());
        match std::fs::File::create(&unique_path) {
            Ok(file) => {
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(timer);
                return tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .try_init()
                    .is_ok();
            }
            Err(err) => {
                eprintln!("Warning: Failed to create log file {}: {}", unique_path, err);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_timer(timer)
        .try_init()
        .is_ok()
}
