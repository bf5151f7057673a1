//! Local metadata store
//!
//! Records, per backend and source path, the Unix second at which the path
//! was last written to that backend. Backed by a redb database with one
//! table ("bucket") per backend URI. Keys are raw source-relative paths,
//! values are exactly 8 bytes: the timestamp as little-endian `i64`.

use redb::{ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::StoreError;

/// Bucket definition for one backend URI
fn bucket(uri: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
	TableDefinition::new(uri)
}

fn encode(timestamp: i64) -> [u8; 8] {
	timestamp.to_le_bytes()
}

fn decode(key: &str, bytes: &[u8]) -> Result<i64, StoreError> {
	let raw: [u8; 8] =
		bytes.try_into().map_err(|_| StoreError::Corrupted { key: key.to_string(), len: bytes.len() })?;
	Ok(i64::from_le_bytes(raw))
}

/// Metadata store backed by redb
pub struct MetadataStore {
	db: redb::Database,
}

impl MetadataStore {
	/// Open or create the store file
	pub fn open(db_path: &Path) -> Result<Self, StoreError> {
		if let Some(parent) = db_path.parent() {
			if !parent.as_os_str().is_empty() && !parent.exists() {
				std::fs::create_dir_all(parent)?;
			}
		}
		let db = redb::Database::create(db_path)?;
		Ok(MetadataStore { db })
	}

	/// Ensure a bucket exists for every backend; safe to call on every run
	pub fn initialize_backends(&self, backends: &[Arc<dyn Backend>]) -> Result<(), StoreError> {
		let uris: Vec<&str> = backends.iter().map(|b| b.uri()).collect();
		self.initialize_buckets(&uris)
	}

	/// Ensure a bucket exists for every URI
	pub fn initialize_buckets(&self, uris: &[&str]) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		for uri in uris {
			let _ = write_txn.open_table(bucket(uri))?;
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Last synchronized timestamp of `path` on `uri`, 0 if never recorded
	pub fn get_updated_time(&self, uri: &str, path: &str) -> Result<i64, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(bucket(uri)) {
			Ok(table) => table,
			Err(TableError::TableDoesNotExist(_)) => return Ok(0),
			Err(e) => return Err(e.into()),
		};

		match table.get(path)? {
			Some(entry) => decode(path, entry.value()),
			None => Ok(0),
		}
	}

	/// Record `timestamp` for `path` on `uri`, overwriting any earlier value
	pub fn set_updated_time(&self, uri: &str, path: &str, timestamp: i64) -> Result<(), StoreError> {
		let bytes = encode(timestamp);
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(bucket(uri))?;
			table.insert(path, bytes.as_slice())?;
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Drop the bucket of `uri` and refill it with `entries` in one transaction
	pub fn replace_bucket<I>(&self, uri: &str, entries: I) -> Result<usize, StoreError>
	where
		I: IntoIterator<Item = (String, i64)>,
	{
		let write_txn = self.db.begin_write()?;
		let mut count = 0;
		{
			write_txn.delete_table(bucket(uri))?;
			let mut table = write_txn.open_table(bucket(uri))?;
			for (path, timestamp) in entries {
				let bytes = encode(timestamp);
				table.insert(path.as_str(), bytes.as_slice())?;
				count += 1;
			}
		}
		write_txn.commit()?;
		Ok(count)
	}

	/// All recorded entries of `uri`, sorted by path
	pub fn entries(&self, uri: &str) -> Result<Vec<(String, i64)>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(bucket(uri)) {
			Ok(table) => table,
			Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut entries = Vec::new();
		for item in table.iter()? {
			let (key, value) = item?;
			let path = key.value().to_string();
			let timestamp = decode(&path, value.value())?;
			entries.push((path, timestamp));
		}
		Ok(entries)
	}
}


// vim: ts=4
