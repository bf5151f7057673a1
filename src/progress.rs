//! Backup progress tracking
//!
//! The pipeline reports `Queued` and `Done` events through a
//! [`ProgressHandle`]; a coordinator task accumulates them and emits a
//! [`ProgressStatus`] to a [`ProgressReporter`] on a fixed interval. The
//! coordinator stops, after one last report, when every handle is dropped.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default interval between status reports
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
	/// A file entered the work queue
	Queued,
	/// A file left the pipeline; `failed` if any backend write failed
	Done { failed: bool },
}

/// Snapshot of a running backup
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStatus {
	pub queued: u64,
	pub done: u64,
	pub failed: u64,
	pub elapsed: Duration,
	/// Elapsed time per completed file
	pub average: Option<Duration>,
	pub remaining: Option<Duration>,
	pub eta: Option<DateTime<Local>>,
}

impl ProgressStatus {
	pub fn compute(queued: u64, done: u64, failed: u64, elapsed: Duration, now: DateTime<Local>) -> Self {
		let average = if done == 0 { None } else { Some(elapsed / done.min(u32::MAX as u64) as u32) };
		let remaining = average.map(|avg| avg.saturating_mul(queued.saturating_sub(done).min(u32::MAX as u64) as u32));
		let eta = remaining.and_then(|r| chrono::Duration::from_std(r).ok()).map(|r| now + r);

		ProgressStatus { queued, done, failed, elapsed, average, remaining, eta }
	}

	pub fn pending(&self) -> u64 {
		self.queued.saturating_sub(self.done)
	}
}

/// Receives periodic status snapshots
pub trait ProgressReporter: Send + Sync {
	fn on_status(&self, status: &ProgressStatus);
}

impl<F> ProgressReporter for F
where
	F: Fn(&ProgressStatus) + Send + Sync,
{
	fn on_status(&self, status: &ProgressStatus) {
		self(status)
	}
}

/// Reports progress through tracing
pub struct LogReporter;

impl ProgressReporter for LogReporter {
	fn on_status(&self, status: &ProgressStatus) {
		let remaining = status.remaining.map(format_duration).unwrap_or_else(|| "-".to_string());
		let eta = status.eta.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_else(|| "-".to_string());
		tracing::info!(
			queued = status.queued,
			done = status.done,
			failed = status.failed,
			remaining = %remaining,
			eta = %eta,
			"Backup progress"
		);
	}
}

/// Format a duration as `1h02m03s`, `2m03s` or `3s`
pub fn format_duration(d: Duration) -> String {
	let secs = d.as_secs();
	let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
	if h > 0 {
		format!("{}h{:02}m{:02}s", h, m, s)
	} else if m > 0 {
		format!("{}m{:02}s", m, s)
	} else {
		format!("{}s", s)
	}
}

/// Cloneable sender side used by the scanner and the workers
#[derive(Clone)]
pub struct ProgressHandle {
	tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHandle {
	pub fn queued(&self) {
		let _ = self.tx.send(ProgressEvent::Queued);
	}

	pub fn done(&self, failed: bool) {
		let _ = self.tx.send(ProgressEvent::Done { failed });
	}
}

/// Spawn the coordinator task
///
/// The returned task resolves to the final status once every
/// `ProgressHandle` clone has been dropped.
pub fn spawn(interval: Duration, reporter: Arc<dyn ProgressReporter>) -> (ProgressHandle, JoinHandle<ProgressStatus>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let task = tokio::spawn(coordinate(rx, interval, reporter));
	(ProgressHandle { tx }, task)
}

async fn coordinate(
	mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
	interval: Duration,
	reporter: Arc<dyn ProgressReporter>,
) -> ProgressStatus {
	let start = Instant::now();
	let (mut queued, mut done, mut failed) = (0u64, 0u64, 0u64);

	let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// the first tick completes immediately
	ticker.tick().await;

	loop {
		tokio::select! {
			event = rx.recv() => match event {
				Some(ProgressEvent::Queued) => queued += 1,
				Some(ProgressEvent::Done { failed: f }) => {
					done += 1;
					if f {
						failed += 1;
					}
				}
				None => break,
			},
			_ = ticker.tick() => {
				let status = ProgressStatus::compute(queued, done, failed, start.elapsed(), Local::now());
				reporter.on_status(&status);
			}
		}
	}

	let status = ProgressStatus::compute(queued, done, failed, start.elapsed(), Local::now());
	reporter.on_status(&status);
	status
}


// vim: ts=4
