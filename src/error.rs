//! Error types for backr operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors raised by storage backends and the backend registry
#[derive(Debug)]
pub enum BackendError {
	/// No constructor registered for the connection string's scheme
	NoSupportedBackend { scheme: String },

	/// Connection string could not be parsed
	InvalidConnectionString { input: String, message: String },

	/// Requested path has no stored versions
	NotFound { path: String },

	/// Local or remote I/O failure
	Io(io::Error),

	/// Protocol-level failure reported by a remote service
	Transport { backend: String, message: String },
}

impl fmt::Display for BackendError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackendError::NoSupportedBackend { scheme } => {
				write!(f, "No supported backend for scheme '{}'", scheme)
			}
			BackendError::InvalidConnectionString { input, message } => {
				write!(f, "Invalid connection string '{}': {}", input, message)
			}
			BackendError::NotFound { path } => write!(f, "File does not exist: {}", path),
			BackendError::Io(e) => write!(f, "I/O error: {}", e),
			BackendError::Transport { backend, message } => {
				write!(f, "{}: {}", backend, message)
			}
		}
	}
}

impl Error for BackendError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			BackendError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for BackendError {
	fn from(e: io::Error) -> Self {
		BackendError::Io(e)
	}
}

impl From<ssh2::Error> for BackendError {
	fn from(e: ssh2::Error) -> Self {
		BackendError::Transport { backend: "sftp".to_string(), message: e.to_string() }
	}
}

/// Metadata store errors
#[derive(Debug)]
pub enum StoreError {
	Database(redb::DatabaseError),
	Transaction(redb::TransactionError),
	Table(redb::TableError),
	Storage(redb::StorageError),
	Commit(redb::CommitError),

	/// The database directory could not be created
	Io(io::Error),

	/// A stored timestamp is not exactly 8 bytes
	Corrupted { key: String, len: usize },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Database(e) => write!(f, "Failed to open database: {}", e),
			StoreError::Transaction(e) => write!(f, "Database transaction failed: {}", e),
			StoreError::Table(e) => write!(f, "Database bucket error: {}", e),
			StoreError::Storage(e) => write!(f, "Database storage error: {}", e),
			StoreError::Commit(e) => write!(f, "Failed to update database: {}", e),
			StoreError::Io(e) => write!(f, "Database I/O error: {}", e),
			StoreError::Corrupted { key, len } => {
				write!(f, "Corrupted timestamp for {}: expected 8 bytes, found {}", key, len)
			}
		}
	}
}

impl Error for StoreError {}

impl From<redb::DatabaseError> for StoreError {
	fn from(e: redb::DatabaseError) -> Self {
		StoreError::Database(e)
	}
}

impl From<redb::TransactionError> for StoreError {
	fn from(e: redb::TransactionError) -> Self {
		StoreError::Transaction(e)
	}
}

impl From<redb::TableError> for StoreError {
	fn from(e: redb::TableError) -> Self {
		StoreError::Table(e)
	}
}

impl From<redb::StorageError> for StoreError {
	fn from(e: redb::StorageError) -> Self {
		StoreError::Storage(e)
	}
}

impl From<redb::CommitError> for StoreError {
	fn from(e: redb::CommitError) -> Self {
		StoreError::Commit(e)
	}
}

impl From<io::Error> for StoreError {
	fn from(e: io::Error) -> Self {
		StoreError::Io(e)
	}
}

/// Configuration errors; all of them are fatal before a run starts
#[derive(Debug)]
pub enum ConfigError {
	/// No backend connection strings configured
	NoBackends,

	/// Config file could not be read
	Read { path: PathBuf, source: io::Error },

	/// Config file is not valid TOML for `Config`
	Parse { path: PathBuf, message: String },

	/// A value is out of range
	Invalid { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::NoBackends => write!(f, "No backends set"),
			ConfigError::Read { path, source } => {
				write!(f, "Cannot read config file {}: {}", path.display(), source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "Cannot parse config file {}: {}", path.display(), message)
			}
			ConfigError::Invalid { message } => write!(f, "Invalid configuration: {}", message),
		}
	}
}

impl Error for ConfigError {}

/// Main error type for backup runs
#[derive(Debug)]
pub enum BackupError {
	/// Invalid configuration (fatal)
	Config(ConfigError),

	/// Backend construction failed (fatal)
	Backend(BackendError),

	/// Metadata store failure outside of a single file
	Store(StoreError),

	/// A directory could not be read; its subtree was skipped
	Scan { path: PathBuf, source: io::Error },

	/// Backing up one file to one backend failed
	File { path: String, backend: String, source: Box<dyn Error + Send + Sync> },

	/// A pipeline task panicked or was cancelled
	Task { message: String },

	/// Every non-fatal error collected during a run
	Aggregate(Vec<BackupError>),
}

impl fmt::Display for BackupError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackupError::Config(e) => write!(f, "{}", e),
			BackupError::Backend(e) => write!(f, "{}", e),
			BackupError::Store(e) => write!(f, "{}", e),
			BackupError::Scan { path, source } => {
				write!(f, "Failed to load directory {}: {}", path.display(), source)
			}
			BackupError::File { path, backend, source } => {
				write!(f, "Failed to backup file {} to {}: {}", path, backend, source)
			}
			BackupError::Task { message } => write!(f, "Pipeline task failed: {}", message),
			BackupError::Aggregate(errors) => {
				for (i, e) in errors.iter().enumerate() {
					if i > 0 {
						writeln!(f)?;
					}
					write!(f, "{}", e)?;
				}
				Ok(())
			}
		}
	}
}

impl Error for BackupError {}

impl From<ConfigError> for BackupError {
	fn from(e: ConfigError) -> Self {
		BackupError::Config(e)
	}
}

impl From<BackendError> for BackupError {
	fn from(e: BackendError) -> Self {
		BackupError::Backend(e)
	}
}

impl From<StoreError> for BackupError {
	fn from(e: StoreError) -> Self {
		BackupError::Store(e)
	}
}

/// Reconciliation errors; any of them aborts reconciliation of that backend
#[derive(Debug)]
pub enum ReconcileError {
	/// Backend listing failed
	List { backend: String, path: String, source: BackendError },

	/// Replacing the bucket failed
	Store(StoreError),
}

impl fmt::Display for ReconcileError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReconcileError::List { backend, path, source } => {
				write!(f, "Failed to list {} on {}: {}", path, backend, source)
			}
			ReconcileError::Store(e) => write!(f, "{}", e),
		}
	}
}

impl Error for ReconcileError {}

impl From<StoreError> for ReconcileError {
	fn from(e: StoreError) -> Self {
		ReconcileError::Store(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_aggregate_joins_lines() {
		let err = BackupError::Aggregate(vec![
			BackupError::Task { message: "first".to_string() },
			BackupError::Backend(BackendError::NotFound { path: "a.txt".to_string() }),
		]);
		assert_eq!(
			err.to_string(),
			"Pipeline task failed: first\nFile does not exist: a.txt"
		);
	}

	#[test]
	fn test_no_supported_backend_message() {
		let err = BackendError::NoSupportedBackend { scheme: "ftp".to_string() };
		assert!(err.to_string().contains("'ftp'"));
	}
}

// vim: ts=4
