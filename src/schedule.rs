//! Watch mode scheduling

use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;

/// Seconds until the next wall-clock multiple of `frequency`
///
/// A run finishing exactly on a boundary waits one full period.
pub fn next_run_delay(now_unix: i64, frequency: u64) -> Duration {
	let frequency = frequency.max(1);
	let offset = now_unix.rem_euclid(frequency.min(i64::MAX as u64) as i64) as u64;
	Duration::from_secs(frequency - offset)
}

/// Local time of the run following `now_unix`
pub fn next_run_at(now_unix: i64, frequency: u64) -> Option<DateTime<Local>> {
	let at = now_unix.checked_add(next_run_delay(now_unix, frequency).as_secs() as i64)?;
	Local.timestamp_opt(at, 0).single()
}


// vim: ts=4
