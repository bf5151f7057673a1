/// End-to-end backup pipeline tests
///
/// These tests back up real directories to a filesystem backend and verify
/// the stored objects and the metadata store afterwards:
/// 1. Ignored paths never reach a backend
/// 2. An unchanged tree causes zero backend writes on the next run
/// 3. A newer modification time writes exactly one version per backend
/// 4. A failing backend does not stop the others
/// 5. A run finishes even when every worker dies
use async_trait::async_trait;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use backr::backend::{Backend, BackendResult, FileBackend, FileEntry, Payload};
use backr::backup::{run_backup, BackupOptions};
use backr::error::{BackendError, BackupError};
use backr::store::MetadataStore;

const T1: i64 = 1_600_000_000;
const T2: i64 = 1_600_000_500;

/// Helper to create a file with specific content and modification time
fn create_file(dir: &Path, name: &str, content: &str, mtime: i64) {
	let path = dir.join(name);
	fs::create_dir_all(path.parent().unwrap()).unwrap();
	fs::write(&path, content).unwrap();
	filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

/// Every file below `root`, relative and sorted
fn stored_objects(root: &Path) -> Vec<String> {
	fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) {
		let Ok(entries) = fs::read_dir(dir) else { return };
		for entry in entries {
			let path = entry.unwrap().path();
			if path.is_dir() {
				walk(&path, base, out);
			} else {
				out.push(path.strip_prefix(base).unwrap().to_string_lossy().replace('\\', "/"));
			}
		}
	}
	let mut out = Vec::new();
	walk(root, root, &mut out);
	out.sort();
	out
}

/// Filesystem backend that counts writes
struct CountingBackend {
	inner: FileBackend,
	writes: AtomicUsize,
}

impl CountingBackend {
	fn new(root: PathBuf) -> Arc<Self> {
		Arc::new(CountingBackend { inner: FileBackend::new(root), writes: AtomicUsize::new(0) })
	}

	fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Backend for CountingBackend {
	fn uri(&self) -> &str {
		self.inner.uri()
	}

	async fn write(&self, path: &str, timestamp: i64, data: Payload) -> BackendResult<()> {
		self.writes.fetch_add(1, Ordering::SeqCst);
		self.inner.write(path, timestamp, data).await
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
		self.inner.list(prefix).await
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		self.inner.read(path).await
	}

	async fn data(&self, path: &str, timestamp: i64) -> BackendResult<Vec<u8>> {
		self.inner.data(path, timestamp).await
	}
}

/// Backend whose writes always fail
struct FailingBackend;

#[async_trait]
impl Backend for FailingBackend {
	fn uri(&self) -> &str {
		"failing://"
	}

	async fn write(&self, _path: &str, _timestamp: i64, _data: Payload) -> BackendResult<()> {
		Err(BackendError::Transport { backend: "failing".to_string(), message: "quota exceeded".to_string() })
	}

	async fn list(&self, _prefix: &str) -> BackendResult<Vec<FileEntry>> {
		Ok(Vec::new())
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		Err(BackendError::NotFound { path: path.to_string() })
	}

	async fn data(&self, path: &str, _timestamp: i64) -> BackendResult<Vec<u8>> {
		Err(BackendError::NotFound { path: path.to_string() })
	}
}

/// Backend whose writes panic, taking the worker task down
struct PanickingBackend;

#[async_trait]
impl Backend for PanickingBackend {
	fn uri(&self) -> &str {
		"panicking://"
	}

	async fn write(&self, path: &str, _timestamp: i64, _data: Payload) -> BackendResult<()> {
		panic!("backend crashed while writing {}", path);
	}

	async fn list(&self, _prefix: &str) -> BackendResult<Vec<FileEntry>> {
		Ok(Vec::new())
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		Err(BackendError::NotFound { path: path.to_string() })
	}

	async fn data(&self, path: &str, _timestamp: i64) -> BackendResult<Vec<u8>> {
		Err(BackendError::NotFound { path: path.to_string() })
	}
}

struct Setup {
	_root: TempDir,
	src: PathBuf,
	dst: PathBuf,
	store: Arc<MetadataStore>,
}

fn setup() -> Setup {
	let root = TempDir::new().unwrap();
	let src = root.path().join("src");
	let dst = root.path().join("dst");
	fs::create_dir_all(&src).unwrap();
	let store = Arc::new(MetadataStore::open(&root.path().join("db.redb")).unwrap());
	Setup { _root: root, src, dst, store }
}

// ===================================================================
// END-TO-END SCENARIO
// ===================================================================

#[tokio::test]
async fn test_end_to_end_with_ignore() {
	let s = setup();
	create_file(&s.src, "a.txt", "version one", T1);
	create_file(&s.src, "ignored/b.txt", "never stored", T1);

	let backend = CountingBackend::new(s.dst.clone());
	let options = BackupOptions::new(vec![backend.clone()]).with_ignore(vec!["ignored".to_string()]);

	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	assert!(summary.errors.is_empty());
	assert_eq!(stored_objects(&s.dst), vec![format!("a.txt-{}.gz", T1)]);
	assert_eq!(s.store.entries(backend.uri()).unwrap(), vec![("a.txt".to_string(), T1)]);

	// newer modification time: one new object, nothing else touched
	create_file(&s.src, "a.txt", "version two", T2);
	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	assert_eq!(summary.versions_written, 1);
	assert_eq!(stored_objects(&s.dst), vec![format!("a.txt-{}.gz", T1), format!("a.txt-{}.gz", T2)]);
	assert_eq!(s.store.get_updated_time(backend.uri(), "a.txt").unwrap(), T2);

	assert_eq!(backend.data("a.txt", T1).await.unwrap(), b"version one");
	assert_eq!(backend.data("a.txt", T2).await.unwrap(), b"version two");
}

// ===================================================================
// IDEMPOTENCE AND MONOTONICITY
// ===================================================================

#[tokio::test]
async fn test_second_run_writes_nothing() {
	let s = setup();
	create_file(&s.src, "one.txt", "1", T1);
	create_file(&s.src, "dir/two.txt", "2", T1);
	create_file(&s.src, "dir/sub/three.txt", "3", T1);

	let backend = CountingBackend::new(s.dst.clone());
	let options = BackupOptions::new(vec![backend.clone()]).with_workers(3);

	run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	assert_eq!(backend.writes(), 3);

	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	assert_eq!(backend.writes(), 3);
	assert_eq!(summary.files_scanned, 3);
	assert_eq!(summary.files_queued, 0);
	assert_eq!(summary.versions_written, 0);
}

#[tokio::test]
async fn test_older_mtime_writes_nothing() {
	let s = setup();
	create_file(&s.src, "a.txt", "current", T2);

	let backend = CountingBackend::new(s.dst.clone());
	let options = BackupOptions::new(vec![backend.clone()]);
	run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();

	create_file(&s.src, "a.txt", "restored from somewhere", T1);
	run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();

	assert_eq!(backend.writes(), 1);
	assert_eq!(s.store.get_updated_time(backend.uri(), "a.txt").unwrap(), T2);
}

#[tokio::test]
async fn test_one_version_per_backend() {
	let s = setup();
	create_file(&s.src, "a.txt", "x", T1);

	let first = CountingBackend::new(s.dst.join("first"));
	let second = CountingBackend::new(s.dst.join("second"));
	let options = BackupOptions::new(vec![first.clone(), second.clone()]);
	run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();

	create_file(&s.src, "a.txt", "y", T2);
	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();

	assert_eq!(summary.versions_written, 2);
	assert_eq!(first.writes(), 2);
	assert_eq!(second.writes(), 2);
	assert_eq!(first.read("a.txt").await.unwrap().latest(), Some(T2));
	assert_eq!(second.read("a.txt").await.unwrap().latest(), Some(T2));
}

#[tokio::test]
async fn test_only_stale_backend_is_written() {
	let s = setup();
	create_file(&s.src, "a.txt", "x", T1);

	let fresh = CountingBackend::new(s.dst.join("fresh"));
	let stale = CountingBackend::new(s.dst.join("stale"));
	// another run already stored this version on `fresh`
	s.store.set_updated_time(fresh.uri(), "a.txt", T1).unwrap();

	let options = BackupOptions::new(vec![fresh.clone(), stale.clone()]);
	run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();

	assert_eq!(fresh.writes(), 0);
	assert_eq!(stale.writes(), 1);
}

// ===================================================================
// ERROR ISOLATION
// ===================================================================

#[tokio::test]
async fn test_failing_backend_is_isolated() {
	let s = setup();
	create_file(&s.src, "a.txt", "a", T1);
	create_file(&s.src, "b.txt", "b", T1);

	let good = CountingBackend::new(s.dst.clone());
	let failing: Arc<dyn Backend> = Arc::new(FailingBackend);
	let options = BackupOptions::new(vec![failing, good.clone()]);

	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	assert_eq!(summary.versions_written, 2);
	assert_eq!(summary.errors.len(), 2);
	assert_eq!(s.store.get_updated_time("failing://", "a.txt").unwrap(), 0);
	assert_eq!(s.store.get_updated_time(good.uri(), "a.txt").unwrap(), T1);

	let progress = summary.progress.as_ref().unwrap();
	assert_eq!(progress.failed, 2);

	match summary.into_result() {
		Err(BackupError::Aggregate(errors)) => {
			let text = BackupError::Aggregate(errors).to_string();
			assert_eq!(text.lines().count(), 2);
			assert!(text.contains("quota exceeded"));
		}
		other => panic!("expected aggregate error, got {:?}", other.map(|s| s.versions_written)),
	}
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_subtree_does_not_stop_siblings() {
	use std::os::unix::fs::PermissionsExt;

	let s = setup();
	create_file(&s.src, "locked/secret.txt", "s", T1);
	create_file(&s.src, "open/visible.txt", "v", T1);
	fs::set_permissions(s.src.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();

	// root ignores permission bits
	if fs::read_dir(s.src.join("locked")).is_ok() {
		fs::set_permissions(s.src.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
		return;
	}

	let backend = CountingBackend::new(s.dst.clone());
	let options = BackupOptions::new(vec![backend.clone()]);
	let summary = run_backup(Arc::clone(&s.store), &s.src, &options).await.unwrap();
	fs::set_permissions(s.src.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

	assert_eq!(summary.versions_written, 1);
	assert_eq!(summary.errors.len(), 1);
	assert!(matches!(summary.errors[0], BackupError::Scan { .. }));
	assert_eq!(stored_objects(&s.dst), vec![format!("open/visible.txt-{}.gz", T1)]);
}

#[tokio::test]
async fn test_dead_workers_do_not_hang_the_scan() {
	let s = setup();
	for i in 0..6 {
		create_file(&s.src, &format!("f{}.txt", i), "x", T1);
	}

	let crashing: Arc<dyn Backend> = Arc::new(PanickingBackend);
	let options = BackupOptions::new(vec![crashing]).with_workers(1).with_queue_capacity(1);

	let summary = tokio::time::timeout(Duration::from_secs(10), run_backup(Arc::clone(&s.store), &s.src, &options))
		.await
		.expect("backup run hung after its workers died")
		.unwrap();

	assert_eq!(summary.versions_written, 0);
	assert!(summary.files_queued < 6);
	assert!(!summary.errors.is_empty());
	assert!(summary.errors.iter().all(|e| matches!(e, BackupError::Task { .. })));
	assert_eq!(s.store.get_updated_time("panicking://", "f0.txt").unwrap(), 0);
}
