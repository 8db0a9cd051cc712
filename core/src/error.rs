use crate::config::ConfigError;

use std::{fmt::Display, path::Path};

use mm_fs_watcher::WatcherError;
use thiserror::Error;

/// Errors that end the run loop
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("unable to watch source directory: {0}")]
	WatchSubscription(#[source] WatcherError),
	#[error("notification stream failed: {0}")]
	NotificationStream(#[source] WatcherError),
}

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: std::io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	pub fn from_std_io_err_with_msg(
		path: impl AsRef<Path>,
		source: std::io::Error,
		msg: &'static str,
	) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(msg),
		}
	}
}

impl From<(&Path, std::io::Error)> for FileIOError {
	fn from((path, source): (&Path, std::io::Error)) -> Self {
		Self::from_std_io_err(path, source)
	}
}

impl From<(&Path, std::io::Error, &'static str)> for FileIOError {
	fn from((path, source, msg): (&Path, std::io::Error, &'static str)) -> Self {
		Self::from_std_io_err_with_msg(path, source, msg)
	}
}
