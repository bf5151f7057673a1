//! # backr - Incremental Versioned Backups
//!
//! backr walks a source directory and stores a gzip-compressed, timestamped
//! version of every changed file on one or more storage backends (local
//! filesystem, S3-compatible object storage, SFTP). A local redb database
//! remembers, per backend, the modification time last written for each path,
//! so unchanged files are skipped on the next run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use backr::backup::{run_backup, BackupOptions};
//! use backr::store::MetadataStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backends = backr::backend::load_all(&["file:///mnt/backup".to_string()])?;
//!     let store = Arc::new(MetadataStore::open("./db.redb".as_ref())?);
//!     let options = BackupOptions::new(backends).with_ignore(vec!["node_modules".into()]);
//!     let summary = run_backup(store, "./documents".as_ref(), &options).await?;
//!     println!("Wrote {} versions", summary.versions_written);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod backup;
pub mod config;
pub mod error;
pub mod ignore;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod reconcile;
pub mod schedule;
pub mod signals;
pub mod store;

// Re-export commonly used types and functions
pub use backend::{Backend, FileEntry};
pub use backup::{run_backup, BackupOptions, BackupSummary};
pub use config::Config;
pub use error::{BackendError, BackupError, ConfigError, ReconcileError, StoreError};
pub use store::MetadataStore;

// vim: ts=4
