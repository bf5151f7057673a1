//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Backing up {}", dir.display());
//! warn!(path = %path, backend = %uri, "Failed to backup file");
//! ```

pub use tracing::{debug, error, info, warn};

/// Default filter directive when `RUST_LOG` is not set
pub fn default_directive(verbose: bool) -> &'static str {
	if verbose {
		"debug"
	} else {
		"info"
	}
}

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs go to stderr so that listing commands can print JSON on stdout.
/// `RUST_LOG` takes precedence over `verbose`:
///
/// ```bash
/// RUST_LOG=backr::backend=debug backr backup
/// ```
pub fn init_tracing(verbose: bool) {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive(verbose))),
		)
		.with_writer(std::io::stderr)
		.init();
}


// vim: ts=4
