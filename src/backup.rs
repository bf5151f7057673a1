//! Scan and backup pipeline
//!
//! One scanner walks the source directory and pushes stale files into a
//! bounded [`WorkQueue`]; a pool of workers pops them and writes a new
//! version to every backend whose recorded timestamp is older than the
//! file's modification time. The metadata store is only updated after a
//! backend write succeeded, so an interrupted run is safe to restart.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{BackupError, ConfigError};
use crate::ignore;
use crate::progress::{self, LogReporter, ProgressHandle, ProgressReporter, ProgressStatus};
use crate::queue::WorkQueue;
use crate::store::MetadataStore;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Settings of one backup run
#[derive(Clone)]
pub struct BackupOptions {
	pub backends: Vec<Arc<dyn Backend>>,
	pub ignore: Vec<String>,
	pub workers: usize,
	pub queue_capacity: usize,
	pub progress_interval: Duration,
	pub reporter: Arc<dyn ProgressReporter>,
}

impl BackupOptions {
	pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
		BackupOptions {
			backends,
			ignore: Vec::new(),
			workers: DEFAULT_WORKERS,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			progress_interval: progress::DEFAULT_INTERVAL,
			reporter: Arc::new(LogReporter),
		}
	}

	pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
		self.ignore = ignore;
		self
	}

	pub fn with_workers(mut self, workers: usize) -> Self {
		self.workers = workers;
		self
	}

	pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity;
		self
	}

	pub fn with_progress(mut self, interval: Duration, reporter: Arc<dyn ProgressReporter>) -> Self {
		self.progress_interval = interval;
		self.reporter = reporter;
		self
	}
}

/// A discovered source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
	/// Path relative to the source directory, `/`-separated
	pub path: String,
	/// Location on disk
	pub source: PathBuf,
	/// Modification time in Unix seconds
	pub mtime: i64,
}

/// Outcome of a backup run
#[derive(Debug)]
pub struct BackupSummary {
	pub files_scanned: u64,
	pub files_queued: u64,
	pub versions_written: u64,
	pub errors: Vec<BackupError>,
	pub progress: Option<ProgressStatus>,
}

impl BackupSummary {
	/// Turn collected non-fatal errors into one aggregate error
	pub fn into_result(self) -> Result<BackupSummary, BackupError> {
		if self.errors.is_empty() {
			Ok(self)
		} else {
			Err(BackupError::Aggregate(self.errors))
		}
	}
}

/// Modification time as Unix seconds, clamped at the epoch
pub fn unix_mtime(meta: &fs::Metadata) -> i64 {
	meta.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_secs().min(i64::MAX as u64) as i64)
		.unwrap_or(0)
}

pub fn unix_now() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn join_relative(parent: &str, name: &str) -> String {
	if parent.is_empty() {
		name.to_string()
	} else {
		format!("{}/{}", parent, name)
	}
}

/// Backends that have not yet stored the current version of `item`
fn stale_backends(store: &MetadataStore, backends: &[Arc<dyn Backend>], item: &WorkItem) -> usize {
	backends
		.iter()
		.filter(|b| match store.get_updated_time(b.uri(), &item.path) {
			Ok(stored) => stored < item.mtime,
			// let the worker report it
			Err(_) => true,
		})
		.count()
}

struct Scanner<'a> {
	store: &'a MetadataStore,
	backends: &'a [Arc<dyn Backend>],
	ignore: &'a [String],
	queue: &'a WorkQueue<WorkItem>,
	progress: &'a ProgressHandle,
	scanned: u64,
	queued: u64,
	errors: Vec<BackupError>,
	/// Set once the queue refuses items; the rest of the walk is skipped
	stopped: bool,
}

impl<'a> Scanner<'a> {
	fn walk<'b>(&'b mut self, dir: PathBuf, rel: String) -> Pin<Box<dyn Future<Output = ()> + Send + 'b>>
	where
		'a: 'b,
	{
		Box::pin(async move {
			let mut entries = match fs::read_dir(&dir).and_then(|rd| rd.collect::<Result<Vec<_>, _>>()) {
				Ok(entries) => entries,
				Err(e) => {
					warn!("Cannot read directory {}: {}", dir.display(), e);
					self.errors.push(BackupError::Scan { path: dir, source: e });
					return;
				}
			};
			entries.sort_by_key(|e| e.file_name());

			for entry in entries {
				if self.stopped {
					return;
				}
				let name = entry.file_name().to_string_lossy().into_owned();
				let rel_path = join_relative(&rel, &name);
				if ignore::matches(&rel_path, self.ignore) {
					debug!("Ignoring {}", rel_path);
					continue;
				}

				let file_type = match entry.file_type() {
					Ok(t) => t,
					Err(e) => {
						warn!("Cannot access {}: {}", entry.path().display(), e);
						continue;
					}
				};

				if file_type.is_symlink() {
					continue;
				} else if file_type.is_dir() {
					self.walk(entry.path(), rel_path).await;
				} else if file_type.is_file() {
					let meta = match entry.metadata() {
						Ok(m) => m,
						Err(e) => {
							warn!("Cannot access {}: {}", entry.path().display(), e);
							continue;
						}
					};
					self.scanned += 1;

					let item = WorkItem { path: rel_path, source: entry.path(), mtime: unix_mtime(&meta) };
					if stale_backends(self.store, self.backends, &item) == 0 {
						continue;
					}

					self.progress.queued();
					self.queued += 1;
					if self.queue.push(item).await.is_err() {
						warn!("All workers exited, stopping scan");
						self.errors.push(BackupError::Task { message: "work queue closed during scan".to_string() });
						self.stopped = true;
						return;
					}
				}
			}
		})
	}
}

/// Back up one item to every backend it is stale on
///
/// Returns the number of versions written and the per-backend failures.
pub async fn backup_item(
	store: &MetadataStore,
	backends: &[Arc<dyn Backend>],
	item: &WorkItem,
) -> (u64, Vec<BackupError>) {
	let mut written = 0;
	let mut errors = Vec::new();

	for backend in backends {
		let uri = backend.uri();
		let fail = |source: Box<dyn std::error::Error + Send + Sync>| BackupError::File {
			path: item.path.clone(),
			backend: uri.to_string(),
			source,
		};

		let stored = match store.get_updated_time(uri, &item.path) {
			Ok(t) => t,
			Err(e) => {
				errors.push(fail(Box::new(e)));
				continue;
			}
		};
		if stored >= item.mtime {
			continue;
		}

		let file = match fs::File::open(&item.source) {
			Ok(f) => f,
			Err(e) => {
				errors.push(fail(Box::new(e)));
				continue;
			}
		};

		if let Err(e) = backend.write(&item.path, item.mtime, Box::new(file)).await {
			errors.push(fail(Box::new(e)));
			continue;
		}
		if let Err(e) = store.set_updated_time(uri, &item.path, item.mtime) {
			errors.push(fail(Box::new(e)));
			continue;
		}
		debug!("Stored {} version {} on {}", item.path, item.mtime, uri);
		written += 1;
	}

	for e in &errors {
		if let BackupError::File { path, backend, source } = e {
			warn!(path = %path, backend = %backend, error = %source, "Failed to backup file");
		}
	}
	(written, errors)
}

async fn worker(
	store: Arc<MetadataStore>,
	backends: Vec<Arc<dyn Backend>>,
	queue: Arc<WorkQueue<WorkItem>>,
	progress: ProgressHandle,
) -> (u64, Vec<BackupError>) {
	let mut written = 0;
	let mut errors = Vec::new();
	while let Some(item) = queue.pop().await {
		let (n, errs) = backup_item(&store, &backends, &item).await;
		progress.done(!errs.is_empty());
		written += n;
		errors.extend(errs);
	}
	(written, errors)
}

/// Back up `dir` to every configured backend
///
/// Fails only on fatal errors (no backends, metadata store unusable); scan
/// and per-file errors are collected in the returned summary.
pub async fn run_backup(
	store: Arc<MetadataStore>,
	dir: &Path,
	options: &BackupOptions,
) -> Result<BackupSummary, BackupError> {
	if options.backends.is_empty() {
		return Err(ConfigError::NoBackends.into());
	}
	store.initialize_backends(&options.backends)?;

	info!("Backing up {} to {} backend(s)", dir.display(), options.backends.len());
	let start = std::time::Instant::now();

	let queue = Arc::new(WorkQueue::new(options.queue_capacity));
	let (progress, progress_task) = progress::spawn(options.progress_interval, Arc::clone(&options.reporter));

	let workers: Vec<_> = (0..options.workers.max(1))
		.map(|_| {
			tokio::spawn(worker(
				Arc::clone(&store),
				options.backends.clone(),
				Arc::clone(&queue),
				progress.clone(),
			))
		})
		.collect();

	let mut scanner = Scanner {
		store: &store,
		backends: &options.backends,
		ignore: &options.ignore,
		queue: &queue,
		progress: &progress,
		scanned: 0,
		queued: 0,
		errors: Vec::new(),
		stopped: false,
	};

	// a pool that exits early closes the queue and unblocks the scan
	let scan = async {
		scanner.walk(dir.to_path_buf(), String::new()).await;
		queue.finish();
	};
	let workers_done = async {
		let results = futures::future::join_all(workers).await;
		queue.close().await;
		results
	};
	let ((), results) = tokio::join!(scan, workers_done);
	let Scanner { scanned, queued, errors, .. } = scanner;
	drop(progress);

	let mut summary =
		BackupSummary { files_scanned: scanned, files_queued: queued, versions_written: 0, errors, progress: None };
	for result in results {
		match result {
			Ok((written, errs)) => {
				summary.versions_written += written;
				summary.errors.extend(errs);
			}
			Err(e) => summary.errors.push(BackupError::Task { message: e.to_string() }),
		}
	}
	match progress_task.await {
		Ok(status) => summary.progress = Some(status),
		Err(e) => summary.errors.push(BackupError::Task { message: e.to_string() }),
	}

	info!(
		"Backup finished in {}: {} scanned, {} version(s) written, {} error(s)",
		progress::format_duration(start.elapsed()),
		summary.files_scanned,
		summary.versions_written,
		summary.errors.len()
	);
	Ok(summary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::FileBackend;
	use filetime::FileTime;
	use tempfile::TempDir;

	struct Fixture {
		_tmp: TempDir,
		src: PathBuf,
		dst: PathBuf,
		store: Arc<MetadataStore>,
		backend: Arc<dyn Backend>,
	}

	fn fixture() -> Fixture {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		let dst = tmp.path().join("dst");
		fs::create_dir_all(&src).unwrap();
		let store = Arc::new(MetadataStore::open(&tmp.path().join("db.redb")).unwrap());
		let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(&dst));
		Fixture { _tmp: tmp, src, dst, store, backend }
	}

	fn write_file(path: &Path, content: &[u8], mtime: i64) {
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, content).unwrap();
		filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
	}

	#[test]
	fn test_join_relative() {
		assert_eq!(join_relative("", "a.txt"), "a.txt");
		assert_eq!(join_relative("a/b", "c"), "a/b/c");
	}

	#[tokio::test]
	async fn test_backup_item_skips_up_to_date_backend() {
		let f = fixture();
		let source = f.src.join("a.txt");
		write_file(&source, b"hello", 1_000);
		let item = WorkItem { path: "a.txt".to_string(), source, mtime: 1_000 };

		f.store.set_updated_time(f.backend.uri(), "a.txt", 1_000).unwrap();
		let (written, errors) = backup_item(&f.store, &[Arc::clone(&f.backend)], &item).await;
		assert_eq!(written, 0);
		assert!(errors.is_empty());
		assert!(!f.dst.exists());
	}

	#[tokio::test]
	async fn test_backup_item_missing_source_is_isolated() {
		let f = fixture();
		let item = WorkItem { path: "gone.txt".to_string(), source: f.src.join("gone.txt"), mtime: 5 };

		let (written, errors) = backup_item(&f.store, &[Arc::clone(&f.backend)], &item).await;
		assert_eq!(written, 0);
		assert_eq!(errors.len(), 1);
		assert!(matches!(&errors[0], BackupError::File { path, .. } if path == "gone.txt"));
		assert_eq!(f.store.get_updated_time(f.backend.uri(), "gone.txt").unwrap(), 0);
	}

	#[tokio::test]
	async fn test_run_requires_backends() {
		let f = fixture();
		let result = run_backup(Arc::clone(&f.store), &f.src, &BackupOptions::new(Vec::new())).await;
		assert!(matches!(result, Err(BackupError::Config(ConfigError::NoBackends))));
	}

	#[tokio::test]
	async fn test_run_writes_nested_files_and_counts() {
		let f = fixture();
		write_file(&f.src.join("a.txt"), b"a", 100);
		write_file(&f.src.join("sub/deep/b.txt"), b"b", 200);

		let options = BackupOptions::new(vec![Arc::clone(&f.backend)]).with_workers(2).with_queue_capacity(1);
		let summary = run_backup(Arc::clone(&f.store), &f.src, &options).await.unwrap();

		assert_eq!(summary.files_scanned, 2);
		assert_eq!(summary.files_queued, 2);
		assert_eq!(summary.versions_written, 2);
		assert!(summary.errors.is_empty());
		let progress = summary.progress.unwrap();
		assert_eq!((progress.queued, progress.done, progress.failed), (2, 2, 0));

		assert!(f.dst.join("a.txt-100.gz").exists());
		assert!(f.dst.join("sub/deep/b.txt-200.gz").exists());
		assert_eq!(f.store.get_updated_time(f.backend.uri(), "sub/deep/b.txt").unwrap(), 200);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_run_skips_symlinks() {
		let f = fixture();
		write_file(&f.src.join("real.txt"), b"r", 100);
		std::os::unix::fs::symlink(f.src.join("real.txt"), f.src.join("link.txt")).unwrap();

		let options = BackupOptions::new(vec![Arc::clone(&f.backend)]);
		let summary = run_backup(Arc::clone(&f.store), &f.src, &options).await.unwrap();

		assert_eq!(summary.files_scanned, 1);
		assert!(!f.dst.join("link.txt-100.gz").exists());
	}

	#[tokio::test]
	async fn test_unreadable_root_is_collected() {
		let f = fixture();
		let options = BackupOptions::new(vec![Arc::clone(&f.backend)]);
		let summary = run_backup(Arc::clone(&f.store), &f.src.join("missing"), &options).await.unwrap();

		assert_eq!(summary.errors.len(), 1);
		assert!(matches!(summary.errors[0], BackupError::Scan { .. }));
		assert!(summary.into_result().is_err());
	}
}

// vim: ts=4
