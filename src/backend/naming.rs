//! Version naming scheme shared by every backend
//!
//! A version of `path` written at Unix second `t` is stored as `<path>-<t>.gz`.
//! The suffix is split off at the last `-`, so paths may contain dashes.

use std::collections::BTreeMap;

use super::FileEntry;

const VERSION_EXT: &str = ".gz";

/// Build the stored object name for one version of `path`
pub fn format_version(path: &str, timestamp: i64) -> String {
	format!("{}-{}{}", path, timestamp, VERSION_EXT)
}

/// Recover `(path, timestamp)` from a stored object name
///
/// Returns `None` for names that are not versions (temporary files,
/// foreign objects), which callers skip.
pub fn split_version(name: &str) -> Option<(String, i64)> {
	let stem = name.strip_suffix(VERSION_EXT)?;
	let (path, unix) = stem.rsplit_once('-')?;
	if unix.is_empty() || !unix.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	let timestamp = unix.parse::<i64>().ok()?;
	Some((path.to_string(), timestamp))
}

/// Join a directory prefix and a name with a single `/`
pub fn join(dir: &str, name: &str) -> String {
	let dir = dir.trim_end_matches('/');
	let name = name.trim_start_matches('/');
	if dir.is_empty() {
		name.to_string()
	} else if name.is_empty() {
		dir.to_string()
	} else {
		format!("{}/{}", dir, name)
	}
}

/// Split a logical path into its parent directory and base name
pub fn split_parent(path: &str) -> (&str, &str) {
	let path = path.trim_matches('/');
	match path.rsplit_once('/') {
		Some((dir, name)) => (dir, name),
		None => ("", path),
	}
}

/// Raw directory entry as seen by a backend before grouping
#[derive(Debug, Clone)]
pub struct RawEntry {
	pub name: String,
	pub is_dir: bool,
}

/// Group one directory level of raw entries into logical entries
///
/// Directories are reported with no versions. Files sharing a stripped name
/// are merged, keeping versions in the order they were discovered.
pub fn group_entries<I>(raw: I) -> Vec<FileEntry>
where
	I: IntoIterator<Item = RawEntry>,
{
	let mut files: BTreeMap<(String, bool), FileEntry> = BTreeMap::new();

	for entry in raw {
		if entry.is_dir {
			files.entry((entry.name.clone(), true)).or_insert_with(|| FileEntry {
				name: entry.name,
				is_dir: true,
				versions: Vec::new(),
			});
			continue;
		}

		match split_version(&entry.name) {
			Some((name, timestamp)) => {
				files
					.entry((name.clone(), false))
					.or_insert_with(|| FileEntry { name, is_dir: false, versions: Vec::new() })
					.versions
					.push(timestamp);
			}
			None => tracing::debug!("Skipping non-version object {}", entry.name),
		}
	}

	files.into_values().collect()
}


// vim: ts=4
