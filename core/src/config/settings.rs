use super::ConfigError;
use crate::{
	controller::ReadFailurePolicy, dispatch::DispatchMode, error::FileIOError, mirror::MirrorConfig,
	mount::MountMatch,
};

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

/// Live mount table exposed by the kernel for the current mount namespace
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/self/mounts";

/// Tunables loaded from an optional TOML file
///
/// Every field has a default, so an empty file (or no file at all) gives the
/// behaviour of the plain `mountmirror <source> <destination>...` invocation.
///
/// ```toml
/// mount_table = "/proc/self/mounts"
/// mount_match = "exact"
/// recursive = false
/// dispatch = "sequential"
/// mount_poll_ms = 5000
///
/// [mirror]
/// engine = "rsync"
/// program = "rsync"
/// args = ["-avz", "--delete"]
///
/// [on_read_error]
/// policy = "retry"
/// initial_interval_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
	pub mount_table: PathBuf,
	pub mount_match: MountMatch,
	pub recursive: bool,
	pub dispatch: DispatchMode,
	pub mirror: MirrorConfig,
	pub on_read_error: ReadFailurePolicy,
	/// Poll the mount table this often and sync destinations as soon as
	/// they get mounted
	pub mount_poll_ms: Option<u64>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
			mount_match: MountMatch::default(),
			recursive: false,
			dispatch: DispatchMode::default(),
			mirror: MirrorConfig::default(),
			on_read_error: ReadFailurePolicy::default(),
			mount_poll_ms: None,
		}
	}
}

impl Settings {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let raw = std::fs::read_to_string(path)
			.map_err(|e| FileIOError::from((path, e, "reading settings file")))?;

		let settings = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;

		info!(path = %path.display(), "Loaded settings file;");

		Ok(settings)
	}
}
