//! Diagnostic logging
//!
//! Diagnostics go to stderr through `tracing`; stdout is reserved for the banner
//! and the report so it can be piped.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "fleetstop=debug"
    } else {
        "fleetstop=warn"
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `--debug`. Calling this twice is harmless; the second
/// subscriber is simply not installed.
pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
