//! S3-compatible object storage backend
//!
//! Connection string:
//! `s3://[endpoint-host][/root]?region=<r>&bucket=<b>&key-id=<k>&secret-key=<s>`
//!
//! Optional query parameters: `multipart-threshold` and `part-size` (bytes),
//! `tls=false` to reach a plain-HTTP endpoint.
//!
//! Payloads whose compressed size reaches the threshold go through the
//! multipart protocol; an upload that fails midway is aborted, so it never
//! shows up in listings.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::ops::Range;
use tracing::{debug, warn};
use url::Url;

use super::naming::{self, RawEntry};
use super::{blocking, compress, decompress, find_entry, Backend, BackendResult, FileEntry, Payload};
use crate::error::BackendError;

/// Default size at which uploads switch to multipart
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 10_000_000;

/// Default multipart part size (the S3 minimum for non-final parts)
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

/// Settings parsed from an `s3://` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
	pub host: String,
	pub endpoint: Option<String>,
	pub root: String,
	pub region: String,
	pub bucket: String,
	pub key_id: String,
	pub secret_key: String,
	pub multipart_threshold: usize,
	pub part_size: usize,
}

impl S3Settings {
	pub fn parse(conn: &str) -> BackendResult<Self> {
		let invalid = |message: &str| BackendError::InvalidConnectionString {
			input: conn.to_string(),
			message: message.to_string(),
		};

		let u = Url::parse(conn).map_err(|e| invalid(&e.to_string()))?;
		if u.scheme() != "s3" {
			return Err(invalid("expected s3:// scheme"));
		}

		let query = |name: &str| {
			u.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
		};
		let size = |name: &str, default: usize| -> BackendResult<usize> {
			match query(name) {
				Some(v) => v
					.parse::<usize>()
					.ok()
					.filter(|n| *n > 0)
					.ok_or_else(|| invalid(&format!("{} must be a positive integer", name))),
				None => Ok(default),
			}
		};

		let bucket = query("bucket").filter(|b| !b.is_empty()).ok_or_else(|| invalid("missing bucket"))?;
		let host = u.host_str().unwrap_or("").to_string();
		let endpoint = if host.is_empty() {
			None
		} else {
			let proto = if query("tls").as_deref() == Some("false") { "http" } else { "https" };
			Some(match u.port() {
				Some(port) => format!("{}://{}:{}", proto, host, port),
				None => format!("{}://{}", proto, host),
			})
		};

		Ok(S3Settings {
			host,
			endpoint,
			root: u.path().trim_matches('/').to_string(),
			region: query("region").unwrap_or_else(|| DEFAULT_REGION.to_string()),
			bucket,
			key_id: query("key-id").unwrap_or_default(),
			secret_key: query("secret-key").unwrap_or_default(),
			multipart_threshold: size("multipart-threshold", DEFAULT_MULTIPART_THRESHOLD)?,
			part_size: size("part-size", DEFAULT_PART_SIZE)?,
		})
	}

	/// Canonical identity: `s3://<bucket>.<host>/<root>`
	pub fn uri(&self) -> String {
		let mut uri = if self.host.is_empty() {
			format!("s3://{}", self.bucket)
		} else {
			format!("s3://{}.{}", self.bucket, self.host)
		};
		if !self.root.is_empty() {
			uri.push('/');
			uri.push_str(&self.root);
		}
		uri
	}
}

/// Byte ranges of each part for a payload of `len` bytes
///
/// Every part is `part_size` long except the last, which holds the remainder
/// (or a full part when `len` divides evenly).
pub fn plan_parts(len: usize, part_size: usize) -> Vec<Range<usize>> {
	let part_size = part_size.max(1);
	(0..len).step_by(part_size).map(|start| start..(start + part_size).min(len)).collect()
}

/// Whether a compressed payload of `len` bytes goes through multipart upload
pub fn uses_multipart(len: usize, threshold: usize) -> bool {
	len >= threshold
}

/// Completion list for uploaded parts, numbered from 1 in upload order
pub fn completed_parts<I>(etags: I) -> Vec<CompletedPart>
where
	I: IntoIterator<Item = Option<String>>,
{
	etags
		.into_iter()
		.enumerate()
		.map(|(i, etag)| CompletedPart::builder().set_e_tag(etag).part_number((i + 1) as i32).build())
		.collect()
}

/// Object storage backend
pub struct S3Backend {
	settings: S3Settings,
	uri: String,
	client: S3Client,
}

impl S3Backend {
	pub fn new(settings: S3Settings) -> Self {
		let credentials =
			Credentials::new(&settings.key_id, &settings.secret_key, None, None, "backr");

		let mut builder = aws_sdk_s3::Config::builder()
			.behavior_version(BehaviorVersion::latest())
			.credentials_provider(credentials)
			.region(Region::new(settings.region.clone()));
		if let Some(endpoint) = &settings.endpoint {
			builder = builder.endpoint_url(endpoint).force_path_style(true);
		}
		let client = S3Client::from_conf(builder.build());

		let uri = settings.uri();
		S3Backend { settings, uri, client }
	}

	pub fn from_connection(conn: &str) -> BackendResult<Self> {
		Ok(Self::new(S3Settings::parse(conn)?))
	}

	pub fn settings(&self) -> &S3Settings {
		&self.settings
	}

	fn key(&self, path: &str, timestamp: i64) -> String {
		naming::join(&self.settings.root, &naming::format_version(path.trim_start_matches('/'), timestamp))
	}

	/// Key prefix of a directory, always ending in `/` unless it is the bucket root
	fn dir_prefix(&self, dir: &str) -> String {
		let prefix = naming::join(&self.settings.root, dir.trim_matches('/'));
		if prefix.is_empty() {
			prefix
		} else {
			format!("{}/", prefix)
		}
	}

	fn transport<E: std::error::Error>(&self, what: &str, e: E) -> BackendError {
		BackendError::Transport {
			backend: self.uri.clone(),
			message: format!("{}: {}", what, DisplayErrorContext(e)),
		}
	}

	async fn put_single(&self, key: &str, body: Bytes) -> BackendResult<()> {
		self.client
			.put_object()
			.bucket(&self.settings.bucket)
			.key(key)
			.body(ByteStream::from(body))
			.send()
			.await
			.map_err(|e| self.transport("put object", e))?;
		Ok(())
	}

	async fn put_multipart(&self, key: &str, body: Bytes) -> BackendResult<()> {
		let upload = self
			.client
			.create_multipart_upload()
			.bucket(&self.settings.bucket)
			.key(key)
			.send()
			.await
			.map_err(|e| self.transport("create multipart upload", e))?;

		let upload_id = upload.upload_id().map(str::to_string).ok_or_else(|| BackendError::Transport {
			backend: self.uri.clone(),
			message: "create multipart upload returned no upload id".to_string(),
		})?;

		match self.upload_parts(key, &upload_id, &body).await {
			Ok(parts) => {
				let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
				self.client
					.complete_multipart_upload()
					.bucket(&self.settings.bucket)
					.key(key)
					.upload_id(&upload_id)
					.multipart_upload(completed)
					.send()
					.await
					.map_err(|e| self.transport("complete multipart upload", e))?;
				Ok(())
			}
			Err(e) => {
				if let Err(abort_err) = self
					.client
					.abort_multipart_upload()
					.bucket(&self.settings.bucket)
					.key(key)
					.upload_id(&upload_id)
					.send()
					.await
				{
					warn!(key, error = %DisplayErrorContext(abort_err), "Failed to abort multipart upload");
				}
				Err(e)
			}
		}
	}

	/// Upload parts sequentially; the returned list is in ascending part-number order
	async fn upload_parts(
		&self,
		key: &str,
		upload_id: &str,
		body: &Bytes,
	) -> BackendResult<Vec<CompletedPart>> {
		let ranges = plan_parts(body.len(), self.settings.part_size);
		let mut etags = Vec::with_capacity(ranges.len());

		for (i, range) in ranges.into_iter().enumerate() {
			let part_number = (i + 1) as i32;
			debug!(key, part_number, len = range.len(), "Uploading part");
			let out = self
				.client
				.upload_part()
				.bucket(&self.settings.bucket)
				.key(key)
				.upload_id(upload_id)
				.part_number(part_number)
				.body(ByteStream::from(body.slice(range)))
				.send()
				.await
				.map_err(|e| self.transport("upload part", e))?;

			etags.push(out.e_tag().map(str::to_string));
		}

		Ok(completed_parts(etags))
	}

	async fn list_level(&self, prefix: &str) -> BackendResult<Vec<RawEntry>> {
		let mut raw = Vec::new();
		let mut token: Option<String> = None;

		loop {
			let out = self
				.client
				.list_objects_v2()
				.bucket(&self.settings.bucket)
				.prefix(prefix)
				.delimiter("/")
				.set_continuation_token(token.take())
				.send()
				.await
				.map_err(|e| self.transport("list objects", e))?;

			for cp in out.common_prefixes() {
				if let Some(p) = cp.prefix() {
					let name = p.strip_prefix(prefix).unwrap_or(p).trim_end_matches('/');
					if !name.is_empty() {
						raw.push(RawEntry { name: name.to_string(), is_dir: true });
					}
				}
			}
			for object in out.contents() {
				if let Some(k) = object.key() {
					let name = k.strip_prefix(prefix).unwrap_or(k);
					raw.push(RawEntry { name: name.to_string(), is_dir: false });
				}
			}

			match (out.is_truncated(), out.next_continuation_token()) {
				(Some(true), Some(next)) => token = Some(next.to_string()),
				_ => break,
			}
		}

		Ok(raw)
	}
}

#[async_trait]
impl Backend for S3Backend {
	fn uri(&self) -> &str {
		&self.uri
	}

	async fn write(&self, path: &str, timestamp: i64, data: Payload) -> BackendResult<()> {
		let body = Bytes::from(blocking(move || Ok(compress(data)?)).await?);
		let key = self.key(path, timestamp);

		if uses_multipart(body.len(), self.settings.multipart_threshold) {
			debug!(key, size = body.len(), "Using multipart upload");
			self.put_multipart(&key, body).await
		} else {
			self.put_single(&key, body).await
		}
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
		let prefix = self.dir_prefix(prefix);
		let raw = self.list_level(&prefix).await?;
		Ok(naming::group_entries(raw))
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		let (dir, name) = naming::split_parent(path);
		let entries = self.list(dir).await?;
		find_entry(entries, path, name)
	}

	async fn data(&self, path: &str, timestamp: i64) -> BackendResult<Vec<u8>> {
		let key = self.key(path, timestamp);
		let out = match self.client.get_object().bucket(&self.settings.bucket).key(&key).send().await {
			Ok(out) => out,
			Err(e) => {
				let service_error = e.into_service_error();
				if service_error.is_no_such_key() {
					return Err(BackendError::NotFound { path: path.to_string() });
				}
				return Err(self.transport("get object", service_error));
			}
		};
		let bytes = out
			.body
			.collect()
			.await
			.map_err(|e| self.transport("read object body", e))?
			.into_bytes();
		Ok(decompress(bytes.as_ref())?)
	}
}


// vim: ts=4
