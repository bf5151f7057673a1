use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use backr::backend::{self, Backend};
use backr::backup::{self, run_backup, BackupOptions, BackupSummary};
use backr::config::Config;
use backr::error::{BackendError, BackupError};
use backr::logging::*;
use backr::reconcile;
use backr::schedule;
use backr::signals;
use backr::store::MetadataStore;

///////////////////////
// Utility functions //
///////////////////////

fn cli() -> Command {
	let backend_arg = || {
		Arg::new("backend")
			.short('b')
			.long("backend")
			.value_name("URI")
			.help("Backend URI or connection string (defaults to the first configured)")
	};

	Command::new("backr")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilard@symbion.hu>")
		.about("Incremental versioned backups")
		.subcommand_required(true)
		.arg(Arg::new("config").short('c').long("config").value_name("FILE").help("Config file"))
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.help("Debug logging"),
		)
		.subcommand(Command::new("backup").about("Back up the source directory once"))
		.subcommand(Command::new("watch").about("Back up on every watch.frequency-secs boundary"))
		.subcommand(
			Command::new("reconcile")
				.about("Rebuild local metadata from backend contents")
				.arg(backend_arg()),
		)
		.subcommand(
			Command::new("ls")
				.about("List one directory of a backend as JSON")
				.arg(Arg::new("path"))
				.arg(backend_arg()),
		)
		.subcommand(
			Command::new("versions")
				.about("Show the stored versions of a file as JSON")
				.arg(Arg::new("path").required(true))
				.arg(backend_arg()),
		)
		.subcommand(
			Command::new("cat")
				.about("Write one stored version to stdout")
				.arg(Arg::new("path").required(true))
				.arg(
					Arg::new("version")
						.long("version")
						.value_name("UNIX")
						.required(true)
						.value_parser(clap::value_parser!(i64)),
				)
				.arg(backend_arg()),
		)
}

/// Connect every configured backend off the async runtime
async fn connect_backends(conns: &[String]) -> Result<Vec<(String, Arc<dyn Backend>)>, BackendError> {
	let conns = conns.to_vec();
	tokio::task::spawn_blocking(move || {
		conns
			.into_iter()
			.map(|conn| backend::load(&conn).map(|b| (conn, b)))
			.collect::<Result<Vec<_>, _>>()
	})
	.await
	.map_err(|e| BackendError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}

/// Backends named by `--backend`, or all of them
fn select_backends(
	backends: &[(String, Arc<dyn Backend>)],
	matches: &ArgMatches,
) -> Result<Vec<Arc<dyn Backend>>, Box<dyn Error>> {
	match matches.get_one::<String>("backend") {
		Some(wanted) => {
			let found: Vec<_> = backends
				.iter()
				.filter(|(conn, b)| conn == wanted || b.uri() == wanted.as_str())
				.map(|(_, b)| Arc::clone(b))
				.collect();
			if found.is_empty() {
				return Err(format!("No configured backend matches {}", wanted).into());
			}
			Ok(found)
		}
		None => Ok(backends.iter().map(|(_, b)| Arc::clone(b)).collect()),
	}
}

fn first_backend(
	backends: &[(String, Arc<dyn Backend>)],
	matches: &ArgMatches,
) -> Result<Arc<dyn Backend>, Box<dyn Error>> {
	select_backends(backends, matches)?.into_iter().next().ok_or_else(|| "No backends set".into())
}

async fn backup_once(
	config: &Config,
	store: &Arc<MetadataStore>,
	options: &BackupOptions,
) -> Result<BackupSummary, BackupError> {
	run_backup(Arc::clone(store), &config.dir, options).await?.into_result()
}

async fn watch(config: &Config, store: &Arc<MetadataStore>, options: &BackupOptions) -> i32 {
	let frequency = config.watch.frequency_secs;
	loop {
		if let Err(e) = backup_once(config, store, options).await {
			error!("Backup run failed:\n{}", e);
		}

		let now = backup::unix_now();
		let delay = schedule::next_run_delay(now, frequency);
		if let Some(at) = schedule::next_run_at(now, frequency) {
			info!("Next backup at {}", at.format("%Y-%m-%d %H:%M:%S"));
		}

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			code = signals::shutdown_signal() => return code,
		}
	}
}

async fn run(
	matches: &ArgMatches,
	config: &Config,
	backends: &[(String, Arc<dyn Backend>)],
) -> Result<(), Box<dyn Error>> {
	let all: Vec<Arc<dyn Backend>> = backends.iter().map(|(_, b)| Arc::clone(b)).collect();

	match matches.subcommand() {
		Some(("backup", _)) | Some(("watch", _)) => {
			let store = Arc::new(MetadataStore::open(&config.database)?);
			let options = BackupOptions::new(all)
				.with_ignore(config.ignore.clone())
				.with_workers(config.workers)
				.with_queue_capacity(config.queue_capacity)
				.with_progress(config.progress_interval(), Arc::new(backr::progress::LogReporter));

			if matches.subcommand_name() == Some("watch") {
				let code = watch(config, &store, &options).await;
				let _ = backend::close_all(&options.backends).await;
				std::process::exit(code);
			}
			backup_once(config, &store, &options).await?;
		}
		Some(("reconcile", sub)) => {
			let store = MetadataStore::open(&config.database)?;
			let selected = select_backends(backends, sub)?;
			let mut failed = 0;
			for (uri, result) in reconcile::reconcile_all(&store, &selected).await {
				match result {
					Ok(count) => println!("{}: {} path(s)", uri, count),
					Err(e) => {
						eprintln!("{}: {}", uri, e);
						failed += 1;
					}
				}
			}
			if failed > 0 {
				return Err(format!("Reconciliation failed for {} backend(s)", failed).into());
			}
		}
		Some(("ls", sub)) => {
			let target = first_backend(backends, sub)?;
			let path = sub.get_one::<String>("path").map(|s| s.as_str()).unwrap_or("");
			let entries = target.list(path).await?;
			println!("{}", serde_json::to_string(&backend::display_names(&entries))?);
		}
		Some(("versions", sub)) => {
			let target = first_backend(backends, sub)?;
			let path = sub.get_one::<String>("path").ok_or("versions: path argument required")?;
			let entry = target.read(path).await?;
			let body = serde_json::json!({ "name": entry.name, "versions": entry.versions });
			println!("{}", serde_json::to_string_pretty(&body)?);
		}
		Some(("cat", sub)) => {
			let target = first_backend(backends, sub)?;
			let path = sub.get_one::<String>("path").ok_or("cat: path argument required")?;
			let version = sub.get_one::<i64>("version").copied().ok_or("cat: --version required")?;
			let data = target.data(path, version).await?;
			io::stdout().write_all(&data)?;
		}
		_ => return Err("Unknown subcommand".into()),
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();
	init_tracing(matches.get_flag("verbose"));

	let config = Config::load(matches.get_one::<String>("config").map(Path::new))?;
	config.validate()?;

	let backends = connect_backends(&config.backends).await?;
	let all: Vec<Arc<dyn Backend>> = backends.iter().map(|(_, b)| Arc::clone(b)).collect();

	let result = run(&matches, &config, &backends).await;
	if let Err(e) = backend::close_all(&all).await {
		warn!("{}", e);
	}
	result
}

// vim: ts=4
