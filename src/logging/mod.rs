//! Log output for the `reglib` binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary. Logs go to stderr so command output on stdout stays clean.

use tracing_subscriber::EnvFilter;

/// Default filter: `info` for this crate, `debug` when verbose. `RUST_LOG` wins when set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "reglib=debug,info" } else { "reglib=info,warn" }
}

/// Installs the global subscriber; a second call is a no-op
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
