//! Mirroring a source directory into a destination
//!
//! The dispatcher only knows the [`Mirror`] contract. By default the work is
//! handed to `rsync`; [`NativeMirror`] does the same job in-process for hosts
//! that don't have it.

use crate::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	process::ExitStatus,
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

mod native;
mod rsync;

pub use native::NativeMirror;
pub use rsync::{RsyncMirror, DEFAULT_RSYNC_ARGS, DEFAULT_RSYNC_PROGRAM};

#[derive(Debug, Error)]
pub enum MirrorError {
	#[error("failed to spawn <program='{}'>: {source}", .program.display())]
	Spawn {
		program: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("mirror process failed ({status}): {stderr}")]
	ExitStatus { status: ExitStatus, stderr: String },
	#[error("invalid mirror source <path='{}'>: {reason}", .path.display())]
	InvalidSource { path: PathBuf, reason: &'static str },
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("mirror task failed to complete: {0}")]
	Join(#[from] tokio::task::JoinError),
}

/// What a native mirror pass did; external tools don't report this
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
	pub copied: u64,
	pub unchanged: u64,
	pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct Synced {
	pub elapsed: Duration,
	pub stats: Option<MirrorStats>,
}

/// One-way replication of `source` into `destination`, deletions included
///
/// Implementations may take as long as they need; callers never time them
/// out.
#[async_trait]
pub trait Mirror: Send + Sync {
	async fn mirror(&self, source: &Path, destination: &Path) -> Result<Synced, MirrorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorEngine {
	#[default]
	Rsync,
	Native,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
	pub engine: MirrorEngine,
	/// External program, only used by the rsync engine
	pub program: PathBuf,
	/// Arguments placed before the source and destination
	pub args: Vec<String>,
	/// Compare file contents instead of size and modification time, only used
	/// by the native engine
	pub checksum: bool,
}

impl Default for MirrorConfig {
	fn default() -> Self {
		Self {
			engine: MirrorEngine::default(),
			program: PathBuf::from(DEFAULT_RSYNC_PROGRAM),
			args: DEFAULT_RSYNC_ARGS.iter().map(ToString::to_string).collect(),
			checksum: false,
		}
	}
}

impl MirrorConfig {
	pub fn build(&self) -> Arc<dyn Mirror> {
		match self.engine {
			MirrorEngine::Rsync => Arc::new(RsyncMirror::new(&self.program, self.args.clone())),
			MirrorEngine::Native => Arc::new(NativeMirror::new(self.checksum)),
		}
	}
}

/// Where a mirror of `source` lands inside `destination`, mirroring rsync's
/// behaviour when the source is given without a trailing slash
pub fn target_dir(source: &Path, destination: &Path) -> PathBuf {
	match source.file_name() {
		Some(name) => destination.join(name),
		None => destination.to_path_buf(),
	}
}
