//! Diagnostic logging setup
//!
//! Everything goes to stderr through `tracing`, leaving stdout to the
//! [`OutputManager`](crate::output::OutputManager) and `--json` output.

use tracing_subscriber::EnvFilter;

/// Default filter directive for the given verbosity flags
pub fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the flags when set.
pub fn init(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
