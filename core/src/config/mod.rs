//! Run configuration
//!
//! Built once at startup and never mutated afterwards: the source, the
//! ordered destination list and every tunable the run loop needs.

use crate::{
	controller::ReadFailurePolicy, dispatch::DispatchMode, error::FileIOError, mirror::MirrorConfig,
	mount::MountMatch,
};

use std::{path::PathBuf, time::Duration};

use mm_fs_watcher::WatchOptions;
use thiserror::Error;
use tracing::debug;

mod settings;

pub use settings::{Settings, DEFAULT_MOUNT_TABLE};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("source directory must not be empty")]
	EmptySource,
	#[error("at least one destination is required")]
	NoDestinations,
	#[error("destination paths must not be empty")]
	EmptyDestination,
	#[error("mount poll interval must be greater than zero")]
	ZeroMountPoll,
	#[error("unable to resolve source directory: {0}")]
	Source(#[source] FileIOError),
	#[error("unable to read settings file: {0}")]
	Read(#[from] FileIOError),
	#[error("invalid settings file <path='{}'>: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

#[derive(Debug, Clone)]
pub struct Config {
	/// Absolute path of the watched directory
	pub source: PathBuf,
	/// Kept byte-for-byte as given, mount lookups depend on it
	pub destinations: Vec<PathBuf>,
	pub mount_table: PathBuf,
	pub mount_match: MountMatch,
	pub watch: WatchOptions,
	pub dispatch: DispatchMode,
	pub mirror: MirrorConfig,
	pub on_read_error: ReadFailurePolicy,
	/// How often to look for destinations that got mounted, off when `None`
	pub mount_poll: Option<Duration>,
}

impl Config {
	pub fn new(
		source: impl Into<PathBuf>,
		destinations: Vec<PathBuf>,
		settings: Settings,
	) -> Result<Self, ConfigError> {
		let source = source.into();

		if source.as_os_str().is_empty() {
			return Err(ConfigError::EmptySource);
		}

		if destinations.is_empty() {
			return Err(ConfigError::NoDestinations);
		}

		if destinations.iter().any(|d| d.as_os_str().is_empty()) {
			return Err(ConfigError::EmptyDestination);
		}

		// Lexical only, symlinks in the source are left alone
		let source = std::path::absolute(&source).map_err(|e| {
			ConfigError::Source(FileIOError::from_std_io_err_with_msg(
				&source,
				e,
				"making source path absolute",
			))
		})?;

		let Settings {
			mount_table,
			mount_match,
			recursive,
			dispatch,
			mirror,
			on_read_error,
			mount_poll_ms,
		} = settings;

		if mount_poll_ms == Some(0) {
			return Err(ConfigError::ZeroMountPoll);
		}

		let config = Self {
			source,
			destinations,
			mount_table,
			mount_match,
			watch: WatchOptions { recursive },
			dispatch,
			mirror,
			on_read_error,
			mount_poll: mount_poll_ms.map(Duration::from_millis),
		};

		debug!(?config, "Configuration loaded;");

		Ok(config)
	}
}
