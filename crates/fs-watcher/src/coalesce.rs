use crate::{ChangeEvent, RawEventKind, RawNotifyEvent, Result, WatcherError};

use std::path::PathBuf;

use tracing::trace;

/// Collapses a batch of raw notifications into at most one [`ChangeEvent`]
///
/// Scanning stops at the first qualifying event; whatever follows it in the
/// batch is dropped, since the resulting synchronization pass covers it
/// anyway.
#[derive(Debug, Clone)]
pub struct Coalescer {
	root: PathBuf,
}

impl Coalescer {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// Scans one delivered batch, in delivery order
	///
	/// A backend error is only reported if it shows up before any qualifying
	/// event.
	pub fn scan<I>(&self, batch: I) -> Result<Option<ChangeEvent>>
	where
		I: IntoIterator<Item = notify::Result<notify::Event>>,
	{
		for (index, result) in batch.into_iter().enumerate() {
			let event = RawNotifyEvent::from(result.map_err(WatcherError::Stream)?);

			if self.qualifies(&event) {
				trace!(
					index,
					kind = ?event.kind,
					path = ?event.primary_path(),
					"Qualifying event found, dropping rest of batch;",
				);
				return Ok(Some(ChangeEvent::new(event.primary_path().cloned())));
			}

			trace!(index, ?event, "Ignoring event;");
		}

		Ok(None)
	}

	fn qualifies(&self, event: &RawNotifyEvent) -> bool {
		if !event.kind.is_mutating() {
			return false;
		}

		// Overflow notices usually carry no path at all
		if event.kind == RawEventKind::Rescan {
			return true;
		}

		// Events about the watched directory itself, not an entry in it
		event.paths.iter().any(|path| path != &self.root)
	}
}
