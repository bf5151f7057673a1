//! SFTP backend (`sftp://<user>:<password>@<host>:<port><root>`)
//!
//! One authenticated SSH session and one SFTP channel are opened at
//! construction and shared by every call. ssh2 is blocking and a session is
//! not safe for interleaved use, so calls take the connection lock and run on
//! the blocking thread pool.

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

use super::naming::{self, RawEntry};
use super::{blocking, compress_into, decompress, find_entry, Backend, BackendResult, FileEntry, Payload};
use crate::error::BackendError;

const DEFAULT_PORT: u16 = 22;

/// Connection parameters parsed from an `sftp://` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpSettings {
	pub user: String,
	pub password: String,
	pub host: String,
	pub port: u16,
	pub root: String,
}

impl SftpSettings {
	pub fn parse(conn: &str) -> BackendResult<Self> {
		let invalid = |message: &str| BackendError::InvalidConnectionString {
			input: conn.to_string(),
			message: message.to_string(),
		};

		let u = Url::parse(conn).map_err(|e| invalid(&e.to_string()))?;
		if u.scheme() != "sftp" {
			return Err(invalid("expected sftp:// scheme"));
		}
		let host = u.host_str().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
		if u.username().is_empty() {
			return Err(invalid("missing user"));
		}

		let root = match u.path() {
			"" => "/".to_string(),
			p => p.to_string(),
		};

		Ok(SftpSettings {
			user: u.username().to_string(),
			password: u.password().unwrap_or("").to_string(),
			host: host.to_string(),
			port: u.port().unwrap_or(DEFAULT_PORT),
			root,
		})
	}

	/// Canonical identity: `sftp://<host>:<port><root>`
	pub fn uri(&self) -> String {
		format!("sftp://{}:{}{}", self.host, self.port, self.root)
	}
}

struct Connection {
	session: Session,
	sftp: Option<Sftp>,
}

impl Connection {
	fn sftp(&self) -> BackendResult<&Sftp> {
		self.sftp.as_ref().ok_or_else(|| BackendError::Transport {
			backend: "sftp".to_string(),
			message: "connection already closed".to_string(),
		})
	}
}

/// SFTP backend over a single shared session
pub struct SftpBackend {
	settings: SftpSettings,
	uri: String,
	conn: Arc<Mutex<Connection>>,
}

impl SftpBackend {
	/// Connect, authenticate with the password and open the SFTP channel
	pub fn connect(conn: &str) -> BackendResult<Self> {
		let settings = SftpSettings::parse(conn)?;
		let addr = format!("{}:{}", settings.host, settings.port);

		let tcp = TcpStream::connect(&addr)?;
		let mut session = Session::new()?;
		session.set_tcp_stream(tcp);
		session.handshake()?;
		session.userauth_password(&settings.user, &settings.password)?;
		if !session.authenticated() {
			return Err(BackendError::Transport {
				backend: addr,
				message: "SSH authentication failed".to_string(),
			});
		}
		let sftp = session.sftp()?;
		tracing::info!("Connected to sftp://{}", addr);

		let uri = settings.uri();
		Ok(SftpBackend { settings, uri, conn: Arc::new(Mutex::new(Connection { session, sftp: Some(sftp) })) })
	}

	pub fn settings(&self) -> &SftpSettings {
		&self.settings
	}

	fn remote(&self, rel: &str) -> PathBuf {
		let rel = rel.trim_matches('/');
		let root = Path::new(&self.settings.root);
		if rel.is_empty() {
			root.to_path_buf()
		} else {
			root.join(rel)
		}
	}

	/// Run `f` with exclusive access to the connection on the blocking pool
	async fn with_conn<T, F>(&self, f: F) -> BackendResult<T>
	where
		F: FnOnce(&Connection) -> BackendResult<T> + Send + 'static,
		T: Send + 'static,
	{
		let conn = Arc::clone(&self.conn);
		blocking(move || {
			let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
			f(&guard)
		})
		.await
	}
}

fn is_missing(e: &ssh2::Error) -> bool {
	matches!(e.code(), ssh2::ErrorCode::SFTP(2))
}

fn mkdir_all(sftp: &Sftp, dir: &Path) -> BackendResult<()> {
	let mut current = PathBuf::new();
	for component in dir.components() {
		current.push(component);
		match sftp.stat(&current) {
			Ok(stat) if stat.is_dir() => continue,
			Ok(_) => {
				return Err(BackendError::Io(io::Error::new(
					io::ErrorKind::AlreadyExists,
					format!("{} exists and is not a directory", current.display()),
				)))
			}
			Err(_) => sftp.mkdir(&current, 0o755)?,
		}
	}
	Ok(())
}

/// Compress `data` into `out`, then hand the finished writer to `close`
///
/// The remote handle must be closed before the temp file is renamed.
fn write_and_close<W, C>(data: Payload, out: W, close: C) -> BackendResult<()>
where
	W: io::Write,
	C: FnOnce(W) -> BackendResult<()>,
{
	let out = compress_into(data, out)?;
	close(out)
}

fn write_remote(sftp: &Sftp, target: &Path, data: Payload) -> BackendResult<()> {
	let parent = target.parent().unwrap_or_else(|| Path::new("/"));
	mkdir_all(sftp, parent)?;

	let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("version");
	let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

	let written = sftp
		.create(&tmp)
		.map_err(BackendError::from)
		.and_then(|f| write_and_close(data, f, |mut f| Ok(f.close()?)));
	if let Err(e) = written {
		let _ = sftp.unlink(&tmp);
		return Err(e);
	}

	// a rename onto an existing name fails on many servers
	if sftp.stat(target).is_ok() {
		sftp.unlink(target)?;
	}
	if let Err(e) = sftp.rename(&tmp, target, None) {
		let _ = sftp.unlink(&tmp);
		return Err(e.into());
	}
	Ok(())
}

#[async_trait]
impl Backend for SftpBackend {
	fn uri(&self) -> &str {
		&self.uri
	}

	async fn write(&self, path: &str, timestamp: i64, data: Payload) -> BackendResult<()> {
		let target = self.remote(&naming::format_version(path.trim_start_matches('/'), timestamp));
		self.with_conn(move |c| write_remote(c.sftp()?, &target, data)).await
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
		let dir = self.remote(prefix);
		let raw = self
			.with_conn(move |c| {
				let entries = c.sftp()?.readdir(&dir)?;
				Ok(entries
					.into_iter()
					.filter_map(|(path, stat)| {
						let name = path.file_name()?.to_string_lossy().into_owned();
						Some(RawEntry { name, is_dir: stat.is_dir() })
					})
					.collect::<Vec<_>>())
			})
			.await?;
		Ok(naming::group_entries(raw))
	}

	async fn read(&self, path: &str) -> BackendResult<FileEntry> {
		let (dir, name) = naming::split_parent(path);
		let dir_path = self.remote(dir);
		let raw = self
			.with_conn(move |c| match c.sftp()?.readdir(&dir_path) {
				Ok(entries) => Ok(Some(entries)),
				Err(e) if is_missing(&e) => Ok(None),
				Err(e) => Err(e.into()),
			})
			.await?;

		let entries = match raw {
			Some(entries) => naming::group_entries(entries.into_iter().filter_map(|(p, stat)| {
				let name = p.file_name()?.to_string_lossy().into_owned();
				Some(RawEntry { name, is_dir: stat.is_dir() })
			})),
			None => return Err(BackendError::NotFound { path: path.to_string() }),
		};
		find_entry(entries, path, name)
	}

	async fn data(&self, path: &str, timestamp: i64) -> BackendResult<Vec<u8>> {
		let file = self.remote(&naming::format_version(path.trim_start_matches('/'), timestamp));
		let missing = path.to_string();
		self.with_conn(move |c| {
			let f = c.sftp()?.open(&file).map_err(|e| {
				if is_missing(&e) {
					BackendError::NotFound { path: missing }
				} else {
					e.into()
				}
			})?;
			Ok(decompress(f)?)
		})
		.await
	}

	/// Close the SFTP channel and the SSH session
	async fn close(&self) -> BackendResult<()> {
		let conn = Arc::clone(&self.conn);
		blocking(move || {
			let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
			// dropping the channel handle closes it
			let channel = guard.sftp.take();
			drop(channel);
			guard.session.disconnect(None, "backr closing", None)?;
			Ok(())
		})
		.await
	}
}


// vim: ts=4
