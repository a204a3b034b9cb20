use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_error::bail;

mod archive;
mod config;
mod db;
mod dmarc;
mod error;
mod message;
mod oauth;
mod pipeline;
mod source;
mod tlsrpt;
mod types;

use config::{AuthMethod, Config, ImapConfig};
use db::store::SqlStore;
use db::{ReportStore, Storage};
use pipeline::Pipeline;
use source::file::{FileMode, FileSource};
use source::imap::ImapSource;
use source::mbox::MboxSource;
use source::Source;

/// Stores DMARC aggregate reports and SMTP TLS reports in a database.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
	/// Configuration file; written with defaults when missing
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log debug output
	#[arg(short, long)]
	debug: bool,

	/// Replace reports that are already stored
	#[arg(short, long)]
	replace: bool,

	/// Delete items once their report is stored
	#[arg(long)]
	delete: bool,

	/// Read the IMAP accounts from the configuration
	#[arg(short, long, group = "mode")]
	imap: bool,

	/// Paths are mbox files
	#[arg(short, long, group = "mode")]
	mbox: bool,

	/// Paths are raw mail messages
	#[arg(short, long, group = "mode")]
	email: bool,

	/// Paths are DMARC XML documents
	#[arg(short = 'x', long, group = "mode")]
	xml: bool,

	/// Paths are TLS report JSON documents
	#[arg(short, long, group = "mode")]
	json: bool,

	/// Paths are zip or gzip archives
	#[arg(short, long, group = "mode")]
	zip: bool,

	/// Files or directories to read; their kind is guessed when no mode is given
	paths: Vec<PathBuf>,
}

impl Args {
	fn file_mode(&self) -> FileMode {
		if self.email {
			FileMode::Email
		} else if self.xml {
			FileMode::Xml
		} else if self.json {
			FileMode::Json
		} else if self.zip {
			FileMode::Archive
		} else {
			FileMode::Auto
		}
	}
}

fn run_source<Src: Source, S: ReportStore>(source: &mut Src, pipeline: &mut Pipeline<S>) {
	info!("reading {}", source.describe());
	if let Err(err) = source.run(pipeline) {
		error!("{}: {}", source.describe(), err);
	}
}

fn imap_source(name: &'static str, account: &ImapConfig, store: &mut SqlStore) -> Option<ImapSource> {
	if !account.enabled {
		info!("{}: disabled", name);
		return None;
	}
	let access_token = match account.auth {
		AuthMethod::Login => None,
		AuthMethod::Xoauth2 => match oauth::resolve_token(account.access_token.as_deref(), store, &account.username) {
			Ok(token) => Some(token),
			Err(err) => {
				error!("{}: {}", name, err);
				return None;
			},
		},
	};
	Some(ImapSource::new(name, account.clone(), access_token))
}

fn main() -> Result<(), Box<dyn Error>> {
	let args = Args::parse();

	env_logger::Builder::new()
		.filter_level(if args.debug { LevelFilter::Debug } else { LevelFilter::Info })
		.parse_default_env()
		.init();

	if args.imap && !args.paths.is_empty() {
		bail!("paths cannot be given when reading from IMAP");
	}
	if (args.mbox || args.email || args.xml || args.json || args.zip) && args.paths.is_empty() {
		bail!("no paths given");
	}

	let mut config = Config::load(&args.config)?;
	if args.replace {
		config.options.replace = true;
	}
	if args.delete {
		config.options.delete_reports = true;
	}

	let mut store = SqlStore::connect(&config.database)?;
	let issued = store.ensure_schema()?;
	info!("schema is current ({} statements issued)", issued);

	let mut pipeline = Pipeline::new(Storage::new(store, config.options.storage()), config.options.pipeline());

	if args.paths.is_empty() {
		let accounts = [("dmarc", &config.dmarc), ("tlsrpt", &config.tlsrpt)];
		for &(name, account) in accounts.iter() {
			let store = pipeline.storage_mut().store_mut();
			if let Some(mut source) = imap_source(name, account, store) {
				run_source(&mut source, &mut pipeline);
			}
		}
	} else if args.mbox {
		for path in &args.paths {
			run_source(&mut MboxSource::new(path.clone()), &mut pipeline);
		}
	} else {
		run_source(&mut FileSource::new(args.file_mode(), args.paths.clone()), &mut pipeline);
	}

	info!("done: {}", pipeline.summary());
	Ok(())
}
