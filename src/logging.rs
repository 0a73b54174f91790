//! Logging setup
//!
//! Every component logs through `tracing`; the installed subscriber is the
//! sink. `init` installs the default one: human-readable lines on stderr,
//! filtered by `RUST_LOG` when set and by `default_filter` otherwise.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber
///
/// Returns false when a global subscriber was already installed (by an
/// earlier call or by the embedding application), which is not an error.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
