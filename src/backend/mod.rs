//! Storage backend contract
//!
//! Every backend stores gzip-compressed versions of source files under
//! `<root>/<path>-<unix>.gz` and exposes the same write/list/read surface.
//! The sync engine depends only on the [`Backend`] trait; concrete backends
//! are constructed from connection strings through [`registry`].

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::error::BackendError;

pub mod file;
pub mod naming;
pub mod registry;
pub mod s3;
pub mod sftp;

pub use file::FileBackend;
pub use naming::{format_version, split_version};
pub use registry::{load, load_all, register};
pub use s3::S3Backend;
pub use sftp::SftpBackend;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Uncompressed source content handed to [`Backend::write`]
pub type Payload = Box<dyn Read + Send>;

/// One logical entry of a backend listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
	/// Name relative to the listed directory
	pub name: String,

	#[serde(rename = "isDir")]
	pub is_dir: bool,

	/// Version timestamps in discovery order (empty for directories)
	pub versions: Vec<i64>,
}

impl FileEntry {
	/// Newest version timestamp, if any
	pub fn latest(&self) -> Option<i64> {
		self.versions.iter().copied().max()
	}
}

/// Uniform capability interface implemented by every storage backend
#[async_trait]
pub trait Backend: Send + Sync {
	/// Canonical identity of the storage location, also the metadata namespace
	fn uri(&self) -> &str;

	/// Store `data` as the version of `path` written at `timestamp`
	///
	/// Writing the same path and timestamp twice overwrites the earlier object.
	async fn write(&self, path: &str, timestamp: i64, data: Payload) -> BackendResult<()>;

	/// List one directory level below `prefix`
	async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>>;

	/// Collect every version of a single logical path
	async fn read(&self, path: &str) -> BackendResult<FileEntry>;

	/// Decompressed content of one version
	async fn data(&self, path: &str, timestamp: i64) -> BackendResult<Vec<u8>>;

	/// Release live connections; a no-op for stateless backends
	async fn close(&self) -> BackendResult<()> {
		Ok(())
	}
}

/// Close every backend concurrently, returning the first failure after trying all of them
pub async fn close_all(backends: &[Arc<dyn Backend>]) -> BackendResult<()> {
	let results = futures::future::join_all(backends.iter().map(|b| b.close())).await;

	let mut first_err = None;
	for (backend, result) in backends.iter().zip(results) {
		if let Err(e) = result {
			tracing::warn!(backend = backend.uri(), error = %e, "Failed to close backend");
			first_err.get_or_insert(e);
		}
	}
	match first_err {
		Some(e) => Err(e),
		None => Ok(()),
	}
}

/// Sorted entry names, directories suffixed with `/`
pub fn display_names(entries: &[FileEntry]) -> Vec<String> {
	let mut names: Vec<String> = entries
		.iter()
		.map(|e| if e.is_dir { format!("{}/", e.name) } else { e.name.clone() })
		.collect();
	names.sort();
	names
}

/// Pick the entry named `name` out of a parent listing
pub(crate) fn find_entry(entries: Vec<FileEntry>, path: &str, name: &str) -> BackendResult<FileEntry> {
	entries
		.into_iter()
		.find(|e| !e.is_dir && e.name == name && !e.versions.is_empty())
		.map(|e| FileEntry { name: path.trim_matches('/').to_string(), ..e })
		.ok_or_else(|| BackendError::NotFound { path: path.to_string() })
}

/// Stream `data` through a gzip encoder into `out`, returning the inner writer
pub(crate) fn compress_into<W: Write>(mut data: Payload, out: W) -> io::Result<W> {
	let mut encoder = GzEncoder::new(out, Compression::default());
	io::copy(&mut data, &mut encoder)?;
	encoder.finish()
}

/// Compress a payload fully into memory
pub(crate) fn compress(data: Payload) -> io::Result<Vec<u8>> {
	compress_into(data, Vec::new())
}

/// Decompress a stored version
pub(crate) fn decompress<R: Read>(reader: R) -> io::Result<Vec<u8>> {
	let mut decoder = GzDecoder::new(reader);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out)?;
	Ok(out)
}

/// Run blocking backend work on the blocking pool
pub(crate) async fn blocking<T, F>(f: F) -> BackendResult<T>
where
	F: FnOnce() -> BackendResult<T> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(f)
		.await
		.map_err(|e| BackendError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}


// vim: ts=4
