//! Scheme registry for backend construction
//!
//! Maps a connection-string scheme (`file`, `s3`, `sftp`) to a constructor.
//! The registry is process-wide and append-only; built-in schemes are
//! registered on first use.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::{Backend, BackendResult, FileBackend, S3Backend, SftpBackend};
use crate::error::BackendError;

/// Builds a backend from its full connection string
pub type Constructor = Arc<dyn Fn(&str) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

fn registry() -> &'static RwLock<HashMap<String, Constructor>> {
	static REGISTRY: OnceLock<RwLock<HashMap<String, Constructor>>> = OnceLock::new();
	REGISTRY.get_or_init(|| {
		let mut schemes: HashMap<String, Constructor> = HashMap::new();
		schemes.insert(
			"file".to_string(),
			Arc::new(|conn: &str| Ok(Arc::new(FileBackend::from_connection(conn)?) as Arc<dyn Backend>)),
		);
		schemes.insert(
			"s3".to_string(),
			Arc::new(|conn: &str| Ok(Arc::new(S3Backend::from_connection(conn)?) as Arc<dyn Backend>)),
		);
		schemes.insert(
			"sftp".to_string(),
			Arc::new(|conn: &str| Ok(Arc::new(SftpBackend::connect(conn)?) as Arc<dyn Backend>)),
		);
		RwLock::new(schemes)
	})
}

/// Register a constructor for `scheme`, replacing any earlier one
pub fn register<F>(scheme: &str, ctor: F)
where
	F: Fn(&str) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
{
	let mut schemes = registry().write().unwrap_or_else(|e| e.into_inner());
	schemes.insert(scheme.to_string(), Arc::new(ctor));
}

/// Registered schemes in sorted order
pub fn schemes() -> Vec<String> {
	let schemes = registry().read().unwrap_or_else(|e| e.into_inner());
	let mut v: Vec<String> = schemes.keys().cloned().collect();
	v.sort();
	v
}

/// Extract the scheme of a connection string
pub fn scheme_of(conn: &str) -> BackendResult<&str> {
	match conn.split_once("://") {
		Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
		_ => Err(BackendError::InvalidConnectionString {
			input: conn.to_string(),
			message: "expected <scheme>://...".to_string(),
		}),
	}
}

/// Construct a backend from a connection string
///
/// Construction may block (the SFTP backend connects eagerly).
pub fn load(conn: &str) -> BackendResult<Arc<dyn Backend>> {
	let scheme = scheme_of(conn)?;
	let ctor = {
		let schemes = registry().read().unwrap_or_else(|e| e.into_inner());
		schemes.get(scheme).cloned()
	};
	match ctor {
		Some(ctor) => {
			let backend = ctor(conn)?;
			tracing::debug!("Loaded backend {}", backend.uri());
			Ok(backend)
		}
		None => Err(BackendError::NoSupportedBackend { scheme: scheme.to_string() }),
	}
}

/// Construct every configured backend, failing on the first error
pub fn load_all(conns: &[String]) -> BackendResult<Vec<Arc<dyn Backend>>> {
	conns.iter().map(|conn| load(conn)).collect()
}


// vim: ts=4
