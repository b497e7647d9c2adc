//! Diagnostic tracing for prsmith.
//!
//! Reads `RUST_LOG` (default `warn`) and writes compact output to stderr.
//! Job progress shown to the operator goes through
//! [`ProgressSink`](crate::io::progress::ProgressSink), not through here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `verbose` raises the default level to `info`.
///
/// ```bash
/// RUST_LOG=prsmith=debug prsmith run --repo acme/web --thread t1 "add a health endpoint"
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
