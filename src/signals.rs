//! Termination signals

use tokio::signal;
use tracing::{debug, warn};

/// Exit status for a process stopped by `sig` (128 + signal number)
pub fn exit_code(sig: i32) -> i32 {
	128 + sig
}

/// Wait for SIGTERM or SIGINT and return the matching exit status
///
/// If the handlers cannot be installed this never resolves, leaving the
/// default signal disposition in place.
pub async fn shutdown_signal() -> i32 {
	let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
		Ok(stream) => stream,
		Err(e) => {
			warn!("Failed to setup SIGTERM handler: {}", e);
			return std::future::pending().await;
		}
	};

	let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
		Ok(stream) => stream,
		Err(e) => {
			warn!("Failed to setup SIGINT handler: {}", e);
			return std::future::pending().await;
		}
	};

	tokio::select! {
		_ = sigterm.recv() => {
			debug!("Received SIGTERM");
			exit_code(15)
		}
		_ = sigint.recv() => {
			debug!("Received SIGINT");
			exit_code(2)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exit_code() {
		assert_eq!(exit_code(15), 143);
		assert_eq!(exit_code(2), 130);
	}
}

// vim: ts=4
