use crate::{ChangeEvent, Coalescer, Result, WatcherError};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

type EventsRx = mpsc::UnboundedReceiver<notify::Result<notify::Event>>;

/// Anything that can tell the controller "the source changed"
#[async_trait]
pub trait ChangeSource: Send {
	/// Waits for the next coalesced change
	///
	/// Pending until at least one qualifying notification arrives; never
	/// returns two changes for the same batch. Must be cancel safe, the run
	/// loop drops a pending call whenever something else wakes it up.
	async fn next_change(&mut self) -> Result<ChangeEvent>;

	/// Drops the current subscription and establishes a new one on the same
	/// path
	async fn resubscribe(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
	/// Watch the whole tree instead of only the direct entries of the source
	pub recursive: bool,
}

impl WatchOptions {
	fn mode(self) -> RecursiveMode {
		if self.recursive {
			RecursiveMode::Recursive
		} else {
			RecursiveMode::NonRecursive
		}
	}
}

/// Notification subscription for a single source directory
#[derive(Debug)]
pub struct SourceWatcher {
	path: PathBuf,
	options: WatchOptions,
	coalescer: Coalescer,
	watcher: RecommendedWatcher,
	events_rx: EventsRx,
}

impl SourceWatcher {
	/// Subscribes to `path`; failing here is fatal for the caller since
	/// there's nothing to react to without a subscription
	pub fn subscribe(path: impl Into<PathBuf>, options: WatchOptions) -> Result<Self> {
		let path = path.into();
		let (watcher, events_rx) = establish(&path, options)?;

		info!(
			path = %path.display(),
			recursive = options.recursive,
			"Watching for changes;",
		);

		Ok(Self {
			coalescer: Coalescer::new(path.clone()),
			path,
			options,
			watcher,
			events_rx,
		})
	}

	/// Everything the backend delivered by the time we woke up
	async fn next_batch(&mut self) -> Result<Vec<notify::Result<notify::Event>>> {
		let first = self
			.events_rx
			.recv()
			.await
			.ok_or(WatcherError::StreamClosed)?;

		let mut batch = vec![first];
		while let Ok(next) = self.events_rx.try_recv() {
			batch.push(next);
		}

		Ok(batch)
	}
}

#[async_trait]
impl ChangeSource for SourceWatcher {
	async fn next_change(&mut self) -> Result<ChangeEvent> {
		loop {
			let batch = self.next_batch().await?;
			let batch_size = batch.len();

			if let Some(change) = self.coalescer.scan(batch)? {
				debug!(batch_size, trigger = ?change.trigger, "Coalesced notification batch;");
				return Ok(change);
			}

			trace!(batch_size, "Batch had no qualifying events;");
		}
	}

	async fn resubscribe(&mut self) -> Result<()> {
		if let Err(e) = self.watcher.unwatch(&self.path) {
			debug!(?e, "Failed to drop previous subscription, replacing it anyway;");
		}

		let (watcher, events_rx) = establish(&self.path, self.options)?;
		self.watcher = watcher;
		self.events_rx = events_rx;

		info!(path = %self.path.display(), "Resubscribed to source directory;");

		Ok(())
	}
}

impl Drop for SourceWatcher {
	fn drop(&mut self) {
		if let Err(e) = self.watcher.unwatch(&self.path) {
			trace!(?e, "Unable to unwatch source directory on drop;");
		}
	}
}

fn establish(path: &Path, options: WatchOptions) -> Result<(RecommendedWatcher, EventsRx)> {
	let (events_tx, events_rx) = mpsc::unbounded_channel();

	let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
		// Unbounded, so the backend thread never blocks here
		if events_tx.send(result).is_err() {
			trace!("Change receiver dropped, discarding notification;");
		}
	})
	.map_err(WatcherError::Init)?;

	watcher
		.watch(path, options.mode())
		.map_err(|source| WatcherError::Subscribe {
			path: path.to_path_buf(),
			source,
		})?;

	Ok((watcher, events_rx))
}
