//! Local filesystem backend (`file://<root>`)

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::naming::{self, RawEntry};
use super::{blocking, compress_into, decompress, find_entry, Backend, BackendResult, FileEntry, Payload};
use crate::error::BackendError;

/// Stores versions as gzip files below a local root directory
#[derive(Debug, Clone)]
pub struct FileBackend {
	root: PathBuf,
	uri: String,
}

impl FileBackend {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		let uri = format!("file://{}", root.display());
		FileBackend { root, uri }
	}

	/// Parse `file://<root>`; relative roots are kept relative
	pub fn from_connection(conn: &str) -> BackendResult<Self> {
		let root = conn.strip_prefix("file://").ok_or_else(|| {
			BackendError::InvalidConnectionString {
				input: conn.to_string(),
				message: "expected file://<root>".to_string(),
			}
		})?;
		if root.is_empty() {
			return Err(BackendError::InvalidConnectionString {
				input: conn.to_string(),
				message: "empty root path".to_string(),
			});
		}
		Ok(Self::new(root))
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn dir_path(&self, dir: &str) -> PathBuf {
		let dir = dir.trim_matches('/');
		if dir.is_empty() {
			self.root.clone()
		} else {
			self.root.join(dir)
		}
	}

	fn version_path(&self, path: &str, timestamp: i64) -> PathBuf {
		self.root.join(naming::format_version(path.trim_start_matches('/'), timestamp))
	}
}

/// Write to a hidden sibling and rename into place once the stream is complete
fn write_version(target: &Path, data: Payload) -> io::Result<()> {
	let parent = target.parent().unwrap_or_else(|| Path::new("."));
	fs::create_dir_all(parent)?;

	let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("version");
	let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

	let result = fs::File::create(&tmp)
		.and_then(|f| compress_into(data, f))
		.and_then(|f| f.sync_all())
		.and_then(|_| fs::rename(&tmp, target));

	if result.is_err() {
		let _ = fs::remove_file(&tmp);
	}
	result
}

fn read_level(dir: &Path) -> io::Result<Vec<RawEntry>> {
	let mut raw = Vec::new();
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let file_type = entry.file_type()?;
		let name = entry.file_name().to_string_lossy().into_owned();
		raw.push(RawEntry { name, is_dir: file_type.is_dir() });
	}
	Ok(raw)
}

#[async_trait]
impl Backend for FileBackend {
	fn uri(&self) -> &str {
		&self.uri
	}

	async fn write(&self, path: &str, timestamp: i64, data: Payload) -> BackendResult<()> {
		let target = self.version_path(path, timestamp);
		blocking(move || write_version(&target, data).map_err(BackendError::from)).await
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
		let dir = self.dir_path(prefix);
		// a root nothing was written to yet is an empty backend
		let is_root = prefix.trim_matches('/').is_empty();
		let raw = blocking(move || match read_level(&dir) {
			Err(e) if is_root && e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
			other => other.map_err(BackendError::from),
		})
		.await?;
		Ok(naming::group_entries(raw))
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		let (dir, name) = naming::split_parent(path);
		let entries = match self.list(dir).await {
			Ok(entries) => entries,
			Err(BackendError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
				return Err(BackendError::NotFound { path: path.to_string() })
			}
			Err(e) => return Err(e),
		};
		find_entry(entries, path, name)
	}

	async fn data(&self, path: &str, timestamp: i64) -> BackendResult<Vec<u8>> {
		let file = self.version_path(path, timestamp);
		let missing = path.to_string();
		blocking(move || {
			let f = fs::File::open(&file).map_err(|e| match e.kind() {
				io::ErrorKind::NotFound => BackendError::NotFound { path: missing },
				_ => BackendError::Io(e),
			})?;
			Ok(decompress(f)?)
		})
		.await
	}
}


// vim: ts=4
