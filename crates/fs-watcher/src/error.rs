use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("failed to initialize the notification backend: {0}")]
	Init(#[source] notify::Error),
	#[error("failed to watch <path='{}'>: {source}", .path.display())]
	Subscribe {
		path: PathBuf,
		#[source]
		source: notify::Error,
	},
	#[error("failed to read from the notification stream: {0}")]
	Stream(#[source] notify::Error),
	#[error("notification stream closed unexpectedly")]
	StreamClosed,
}

impl WatcherError {
	/// Errors raised while establishing a subscription, as opposed to errors
	/// raised by an already running one
	pub fn is_subscription(&self) -> bool {
		matches!(self, Self::Init(_) | Self::Subscribe { .. })
	}
}
