use mm_core::{
	Config, ConfigError, DispatchMode, MirrorEngine, MountMatch, ReadFailurePolicy, Settings,
};

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal::{
	self,
	unix::{signal as unix_signal, SignalKind},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
	Rsync,
	Native,
}

impl From<Engine> for MirrorEngine {
	fn from(engine: Engine) -> Self {
		match engine {
			Engine::Rsync => Self::Rsync,
			Engine::Native => Self::Native,
		}
	}
}

#[derive(Parser, Debug)]
#[command(
	name = "mountmirror",
	version,
	about = "Mirror a directory onto removable drives whenever it changes"
)]
struct Cli {
	/// Directory to watch
	source: PathBuf,

	/// Mount points to mirror into, skipped while they aren't mounted
	#[arg(required = true)]
	destinations: Vec<PathBuf>,

	/// TOML settings file
	#[arg(short, long, env = "MOUNTMIRROR_CONFIG")]
	config: Option<PathBuf>,

	/// Mount table to check destinations against
	#[arg(long, env = "MOUNTMIRROR_MOUNT_TABLE")]
	mount_table: Option<PathBuf>,

	/// Resolve destinations (symlinks, trailing slashes) before checking mounts
	#[arg(long)]
	canonical_mounts: bool,

	/// Watch the whole source tree instead of its direct entries
	#[arg(long)]
	recursive: bool,

	/// Mirror into all destinations concurrently
	#[arg(long)]
	parallel: bool,

	/// Mirror engine
	#[arg(long, value_enum)]
	engine: Option<Engine>,

	/// rsync program to run
	#[arg(long, env = "MOUNTMIRROR_RSYNC")]
	rsync_path: Option<PathBuf>,

	/// Compare file contents instead of size and mtime (native engine)
	#[arg(long)]
	checksum: bool,

	/// Poll the mount table every MS milliseconds and sync destinations as
	/// soon as they get mounted
	#[arg(long, value_name = "MS", env = "MOUNTMIRROR_MOUNT_POLL_MS")]
	mount_poll_ms: Option<u64>,

	/// Resubscribe with backoff instead of exiting when notifications fail
	#[arg(long)]
	retry_on_read_error: bool,
}

impl Cli {
	/// Settings file (or defaults) with command line overrides applied on top
	fn settings(&self) -> Result<Settings, ConfigError> {
		let mut settings = match &self.config {
			Some(path) => Settings::load(path)?,
			None => Settings::default(),
		};

		if let Some(mount_table) = &self.mount_table {
			settings.mount_table = mount_table.clone();
		}
		if self.canonical_mounts {
			settings.mount_match = MountMatch::Canonical;
		}
		if self.recursive {
			settings.recursive = true;
		}
		if self.parallel {
			settings.dispatch = DispatchMode::Parallel;
		}
		if let Some(engine) = self.engine {
			settings.mirror.engine = engine.into();
		}
		if let Some(program) = &self.rsync_path {
			settings.mirror.program = program.clone();
		}
		if self.checksum {
			settings.mirror.checksum = true;
		}
		if let Some(period) = self.mount_poll_ms {
			settings.mount_poll_ms = Some(period);
		}
		if self.retry_on_read_error && settings.on_read_error == ReadFailurePolicy::Exit {
			settings.on_read_error = ReadFailurePolicy::Retry(Default::default());
		}

		Ok(settings)
	}
}

fn main() -> ExitCode {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(e) => {
			// Usage errors exit 1, --help and --version exit 0
			let _ = e.print();
			return if e.use_stderr() {
				ExitCode::FAILURE
			} else {
				ExitCode::SUCCESS
			};
		}
	};

	init_tracing();

	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{e:#}");
			ExitCode::FAILURE
		}
	}
}

fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout))
		.init();
}

#[tokio::main(flavor = "current_thread")]
async fn run(cli: Cli) -> anyhow::Result<()> {
	let settings = cli.settings()?;
	let config = Config::new(cli.source, cli.destinations, settings)?;

	let shutdown = CancellationToken::new();
	tokio::spawn(cancel_on_signal(shutdown.clone()));

	let summary = mm_core::run(config, shutdown)
		.await
		.context("mountmirror stopped")?;

	info!(dispatches = summary.dispatches, "Exiting;");

	Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(?e, "Failed to listen for SIGINT;");
			std::future::pending::<()>().await;
		}
	};

	let terminate = async {
		match unix_signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!(?e, "Failed to listen for SIGTERM;");
				std::future::pending::<()>().await;
			}
		}
	};

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}

	info!("Received shutdown signal, finishing current work;");
	shutdown.cancel();
}
