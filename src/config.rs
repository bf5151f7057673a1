//! Configuration for backr
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (`--config`, ~/.config/backr/config.toml or ./config.toml)
//! 3. Environment variables (BACKR_* prefix)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::error::ConfigError;

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
	/// Source directory to back up
	pub dir: PathBuf,

	/// Metadata store file
	pub database: PathBuf,

	/// Backend connection strings (file://, s3://, sftp://)
	pub backends: Vec<String>,

	/// Glob patterns excluded from the scan
	pub ignore: Vec<String>,

	// ========================================================================
	// PIPELINE
	// ========================================================================
	/// Number of backup workers
	pub workers: usize,

	/// Maximum number of files waiting for a worker
	pub queue_capacity: usize,

	/// Seconds between progress reports
	pub progress_interval_secs: u64,

	pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatchConfig {
	/// Runs are aligned to multiples of this period
	pub frequency_secs: u64,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self { frequency_secs: 3600 }
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("."),
			database: PathBuf::from("./db.redb"),
			backends: Vec::new(),
			ignore: Vec::new(),
			workers: DEFAULT_WORKERS,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			progress_interval_secs: 1,
			watch: WatchConfig::default(),
		}
	}
}

// ============================================================================
// LOADING
// ============================================================================

fn split_list(value: &str) -> Vec<String> {
	value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Default config file locations, most specific first
pub fn default_paths() -> Vec<PathBuf> {
	let mut paths = Vec::new();
	if let Ok(home) = std::env::var("HOME") {
		paths.push(PathBuf::from(home).join(".config").join("backr").join("config.toml"));
	}
	paths.push(PathBuf::from("config.toml"));
	paths
}

impl Config {
	/// Parse a TOML document
	pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
		toml::from_str(text).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
		Self::from_toml(path, &text)
	}

	/// Load the explicit file, or the first existing default file, then apply
	/// environment overrides
	pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match explicit {
			Some(path) => Self::from_file(path)?,
			None => match default_paths().into_iter().find(|p| p.is_file()) {
				Some(path) => {
					tracing::debug!("Using config file {}", path.display());
					Self::from_file(&path)?
				}
				None => Self::default(),
			},
		};
		config.apply_env(|key| std::env::var(key).ok());
		Ok(config)
	}

	/// Apply BACKR_* overrides; `lookup` returns the variable's value
	pub fn apply_env<F>(&mut self, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(dir) = lookup("BACKR_DIR") {
			self.dir = PathBuf::from(dir);
		}
		if let Some(database) = lookup("BACKR_DATABASE") {
			self.database = PathBuf::from(database);
		}
		if let Some(backends) = lookup("BACKR_BACKENDS") {
			self.backends = split_list(&backends);
		}
		if let Some(ignore) = lookup("BACKR_IGNORE") {
			self.ignore = split_list(&ignore);
		}
	}

	/// Reject configurations a run cannot start with
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.backends.is_empty() {
			return Err(ConfigError::NoBackends);
		}
		if self.workers == 0 {
			return Err(ConfigError::Invalid { message: "workers must be at least 1".to_string() });
		}
		if self.queue_capacity == 0 {
			return Err(ConfigError::Invalid { message: "queue-capacity must be at least 1".to_string() });
		}
		if self.watch.frequency_secs == 0 {
			return Err(ConfigError::Invalid { message: "watch.frequency-secs must be at least 1".to_string() });
		}
		crate::ignore::validate(&self.ignore)
			.map_err(|e| ConfigError::Invalid { message: format!("invalid ignore pattern: {}", e) })?;
		Ok(())
	}

	pub fn progress_interval(&self) -> Duration {
		Duration::from_secs(self.progress_interval_secs.max(1))
	}
}


// vim: ts=4
