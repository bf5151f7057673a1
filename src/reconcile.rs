//! Metadata reconciliation
//!
//! Rebuilds the metadata bucket of one backend from what the backend
//! actually holds. The backend is listed recursively first; only a complete
//! listing replaces the bucket, so a listing failure leaves the previous
//! metadata untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::backend::naming;
use crate::backend::Backend;
use crate::error::ReconcileError;
use crate::logging::*;
use crate::store::MetadataStore;

/// Every file below `prefix` with its newest version, in listing order
pub fn collect_latest<'a>(
	backend: &'a dyn Backend,
	prefix: String,
	out: &'a mut Vec<(String, i64)>,
) -> Pin<Box<dyn Future<Output = Result<(), ReconcileError>> + Send + 'a>> {
	Box::pin(async move {
		let entries = backend.list(&prefix).await.map_err(|source| ReconcileError::List {
			backend: backend.uri().to_string(),
			path: prefix.clone(),
			source,
		})?;

		for entry in entries {
			let path = naming::join(&prefix, &entry.name);
			if entry.is_dir {
				collect_latest(backend, path, out).await?;
			} else if let Some(latest) = entry.latest() {
				out.push((path, latest));
			}
		}
		Ok(())
	})
}

/// Replace the metadata of `backend` with its newest stored versions
///
/// Returns the number of recorded paths.
pub async fn reconcile(store: &MetadataStore, backend: &dyn Backend) -> Result<usize, ReconcileError> {
	info!("Reconciling metadata of {}", backend.uri());

	let mut latest = Vec::new();
	collect_latest(backend, String::new(), &mut latest).await?;

	let count = store.replace_bucket(backend.uri(), latest)?;
	info!("Recorded {} path(s) for {}", count, backend.uri());
	Ok(count)
}

/// Reconcile every backend; a failure aborts only that backend
pub async fn reconcile_all(
	store: &MetadataStore,
	backends: &[Arc<dyn Backend>],
) -> Vec<(String, Result<usize, ReconcileError>)> {
	let mut results = Vec::new();
	for backend in backends {
		let result = reconcile(store, backend.as_ref()).await;
		if let Err(e) = &result {
			warn!("Reconciliation of {} aborted: {}", backend.uri(), e);
		}
		results.push((backend.uri().to_string(), result));
	}
	results
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{BackendResult, FileBackend, FileEntry, Payload};
	use crate::error::BackendError;
	use async_trait::async_trait;
	use std::io::Cursor;
	use tempfile::TempDir;

	fn payload(bytes: &[u8]) -> Payload {
		Box::new(Cursor::new(bytes.to_vec()))
	}

	#[tokio::test]
	async fn test_records_newest_version_per_path() {
		let tmp = TempDir::new().unwrap();
		let backend = FileBackend::new(tmp.path().join("dst"));
		backend.write("a.txt", 30, payload(b"3")).await.unwrap();
		backend.write("a.txt", 10, payload(b"1")).await.unwrap();
		backend.write("x/y/z.txt", 7, payload(b"7")).await.unwrap();

		let store = MetadataStore::open(&tmp.path().join("db.redb")).unwrap();
		store.set_updated_time(backend.uri(), "stale.txt", 99).unwrap();

		let count = reconcile(&store, &backend).await.unwrap();
		assert_eq!(count, 2);
		assert_eq!(store.get_updated_time(backend.uri(), "a.txt").unwrap(), 30);
		assert_eq!(store.get_updated_time(backend.uri(), "x/y/z.txt").unwrap(), 7);
		assert_eq!(store.get_updated_time(backend.uri(), "stale.txt").unwrap(), 0);
	}

	struct BrokenBackend;

	#[async_trait]
	impl Backend for BrokenBackend {
		fn uri(&self) -> &str {
			"broken://"
		}

		async fn write(&self, _path: &str, _timestamp: i64, _data: Payload) -> BackendResult<()> {
			Ok(())
		}

		async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
			if prefix.is_empty() {
				Ok(vec![
					FileEntry { name: "ok.txt".to_string(), is_dir: false, versions: vec![1] },
					FileEntry { name: "sub".to_string(), is_dir: true, versions: Vec::new() },
				])
			} else {
				Err(BackendError::Transport { backend: "broken".to_string(), message: "connection reset".to_string() })
			}
		}

		async fn read(&self, path: &str) -> BackendResult<FileEntry> {
			Err(BackendError::NotFound { path: path.to_string() })
		}

		async fn data(&self, path: &str, _timestamp: i64) -> BackendResult<Vec<u8>> {
			Err(BackendError::NotFound { path: path.to_string() })
		}
	}

	#[tokio::test]
	async fn test_list_failure_keeps_previous_bucket() {
		let tmp = TempDir::new().unwrap();
		let store = MetadataStore::open(&tmp.path().join("db.redb")).unwrap();
		store.set_updated_time("broken://", "kept.txt", 5).unwrap();

		let err = reconcile(&store, &BrokenBackend).await.unwrap_err();
		assert!(matches!(err, ReconcileError::List { ref path, .. } if path == "sub"));
		assert_eq!(store.get_updated_time("broken://", "kept.txt").unwrap(), 5);
		assert_eq!(store.get_updated_time("broken://", "ok.txt").unwrap(), 0);
	}
}

// vim: ts=4
