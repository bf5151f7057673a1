/// Backend registry tests
///
/// Custom schemes can be registered at runtime and are then reachable
/// through `load`, next to the built-in file, s3 and sftp schemes.
use async_trait::async_trait;
use std::sync::Arc;

use backr::backend::{self, registry, Backend, BackendResult, FileEntry, Payload};
use backr::error::BackendError;

struct MemoryBackend {
	uri: String,
}

#[async_trait]
impl Backend for MemoryBackend {
	fn uri(&self) -> &str {
		&self.uri
	}

	async fn write(&self, _path: &str, _timestamp: i64, _data: Payload) -> BackendResult<()> {
		Ok(())
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

#[test]
fn test_register_custom_scheme() {
	backend::register("mem", |conn: &str| {
		Ok(Arc::new(MemoryBackend { uri: conn.to_string() }) as Arc<dyn Backend>)
	});

	assert!(registry::schemes().iter().any(|s| s == "mem"));
	let loaded = backend::load("mem://scratch").unwrap();
	assert_eq!(loaded.uri(), "mem://scratch");
}

#[test]
fn test_load_file_backend() {
	let loaded = backend::load("file:///srv/backups").unwrap();
	assert_eq!(loaded.uri(), "file:///srv/backups");
}

#[tokio::test]
async fn test_load_s3_backend_uri() {
	let loaded =
		backend::load("s3://play.min.io?bucket=photos&region=us-east-1&key-id=k&secret-key=s").unwrap();
	assert_eq!(loaded.uri(), "s3://photos.play.min.io");
}

#[test]
fn test_load_all_fails_on_first_bad_string() {
	let conns = vec!["file:///a".to_string(), "gopher://x".to_string()];
	match backend::load_all(&conns) {
		Err(BackendError::NoSupportedBackend { scheme }) => assert_eq!(scheme, "gopher"),
		Err(e) => panic!("unexpected error: {}", e),
		Ok(_) => panic!("gopher should not load"),
	}
}

#[test]
fn test_sftp_requires_user() {
	assert!(matches!(
		backend::load("sftp://host.invalid/root"),
		Err(BackendError::InvalidConnectionString { .. })
	));
}
