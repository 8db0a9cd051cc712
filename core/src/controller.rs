//! The run loop
//!
//! One dispatch at startup, then one per coalesced change, strictly
//! alternating with waits on the watcher so dispatches never overlap. With a
//! mount poll configured, destinations that show up mounted between changes
//! get their own dispatch from the same loop.

use crate::{
	config::Config,
	dispatch::{DispatchReason, SyncDispatcher},
	error::Error,
	mount::MountRegistry,
};

use mm_fs_watcher::{ChangeSource, SourceWatcher, WatcherError};

use std::{path::PathBuf, sync::Arc, time::Duration};

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::Deserialize;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do when the notification stream fails after startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ReadFailurePolicy {
	/// Stop the loop and report the failure
	#[default]
	Exit,
	/// Resubscribe with exponential backoff, giving up once the budget runs out
	Retry(RetryConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
	pub initial_interval_ms: u64,
	pub max_interval_ms: u64,
	/// Total time spent retrying before giving up
	pub max_elapsed_secs: Option<u64>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			initial_interval_ms: 500,
			max_interval_ms: 30_000,
			max_elapsed_secs: Some(300),
		}
	}
}

impl RetryConfig {
	pub fn backoff(&self) -> ExponentialBackoff {
		let mut backoff = ExponentialBackoff {
			initial_interval: Duration::from_millis(self.initial_interval_ms),
			max_interval: Duration::from_millis(self.max_interval_ms),
			max_elapsed_time: self.max_elapsed_secs.map(Duration::from_secs),
			..ExponentialBackoff::default()
		};
		backoff.reset();
		backoff
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub dispatches: u64,
	pub resubscriptions: u64,
}

pub struct Controller<W> {
	config: Config,
	watcher: W,
	dispatcher: SyncDispatcher,
	/// Destinations found mounted by the latest dispatch or mount poll
	mounted: Vec<PathBuf>,
	summary: RunSummary,
}

impl<W: ChangeSource> Controller<W> {
	pub fn new(config: Config, watcher: W, dispatcher: SyncDispatcher) -> Self {
		Self {
			config,
			watcher,
			dispatcher,
			mounted: Vec::new(),
			summary: RunSummary::default(),
		}
	}

	/// Runs until `shutdown` is cancelled or the notification stream fails
	/// for good
	///
	/// Cancellation is only observed between dispatches, a running one is
	/// always allowed to finish. A fatal stream failure is returned, not
	/// logged, so the caller reports it once.
	pub async fn run(mut self, shutdown: CancellationToken) -> Result<RunSummary, Error> {
		let mut retrying: Option<ExponentialBackoff> = None;
		let mut mount_poll = self.config.mount_poll.map(poll_interval);

		self.dispatch(DispatchReason::Startup).await;

		loop {
			let next = tokio::select! {
				biased;

				() = shutdown.cancelled() => break,
				next = self.watcher.next_change() => next,
				() = next_mount_poll(&mut mount_poll) => {
					self.poll_mounts().await;
					continue;
				}
			};

			match next {
				Ok(change) => {
					retrying = None;
					info!("Change detected in {};", self.config.source.display());
					self.dispatch(DispatchReason::Change(change)).await;
				}

				Err(e) => {
					let ReadFailurePolicy::Retry(retry) = self.config.on_read_error else {
						return Err(Error::NotificationStream(e));
					};

					let backoff = retrying.get_or_insert_with(|| retry.backoff());

					if !self.recover(e, backoff, &shutdown).await? {
						break;
					}

					self.summary.resubscriptions += 1;
					self.dispatch(DispatchReason::Resubscribed).await;
				}
			}
		}

		info!(
			dispatches = self.summary.dispatches,
			"Shutdown requested, stopped watching {};",
			self.config.source.display()
		);

		Ok(self.summary)
	}

	/// Resubscribes until it works, the backoff budget runs out (`Err`) or
	/// shutdown is requested (`Ok(false)`)
	async fn recover(
		&mut self,
		mut last_error: WatcherError,
		backoff: &mut ExponentialBackoff,
		shutdown: &CancellationToken,
	) -> Result<bool, Error> {
		loop {
			let Some(delay) = backoff.next_backoff() else {
				return Err(Error::NotificationStream(last_error));
			};

			warn!(
				e = ?last_error,
				?delay,
				"Filesystem notifications failed, resubscribing;",
			);

			tokio::select! {
				biased;

				() = shutdown.cancelled() => return Ok(false),
				() = tokio::time::sleep(delay) => {}
			}

			match self.watcher.resubscribe().await {
				Ok(()) => return Ok(true),
				Err(e) => last_error = e,
			}
		}
	}

	/// Mirrors into destinations that became mounted since they were last
	/// seen
	async fn poll_mounts(&mut self) {
		let mounted = match self.dispatcher.mounted(&self.config.destinations).await {
			Ok(mounted) => mounted,
			Err(e) => {
				debug!(?e, "Unable to poll mount table, keeping previous mount state;");
				return;
			}
		};

		for destination in self.mounted.iter().filter(|d| !mounted.contains(d)) {
			info!("{} was unmounted;", destination.display());
		}

		let newly_mounted = mounted
			.iter()
			.filter(|d| !self.mounted.contains(d))
			.cloned()
			.collect::<Vec<_>>();

		self.mounted = mounted;

		if newly_mounted.is_empty() {
			return;
		}

		for destination in &newly_mounted {
			info!("{} was mounted;", destination.display());
		}

		self.dispatch(DispatchReason::MountChanged(newly_mounted)).await;
	}

	async fn dispatch(&mut self, reason: DispatchReason) {
		let destinations = match &reason {
			DispatchReason::MountChanged(mounted) => mounted.as_slice(),
			_ => self.config.destinations.as_slice(),
		};

		info!(%reason, "Syncing {};", self.config.source.display());

		let report = self
			.dispatcher
			.dispatch(&self.config.source, destinations)
			.await;

		self.summary.dispatches += 1;

		// A full dispatch just checked every destination
		if !matches!(reason, DispatchReason::MountChanged(_)) {
			self.mounted = report
				.outcomes
				.iter()
				.filter(|(_, outcome)| !outcome.is_skipped())
				.map(|(destination, _)| destination.clone())
				.collect();
		}

		let since_change = match &reason {
			DispatchReason::Change(change) => change.detected_at.elapsed().ok(),
			_ => None,
		};

		info!(
			synced = report.synced(),
			skipped = report.skipped(),
			failed = report.failed(),
			?since_change,
			"Dispatch complete;",
		);
	}
}

fn poll_interval(period: Duration) -> Interval {
	let mut interval = interval_at(Instant::now() + period, period);
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
	interval
}

/// Next mount poll tick, never resolves when polling is off
async fn next_mount_poll(poll: &mut Option<Interval>) {
	match poll {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending().await,
	}
}

/// Subscribes to the configured source and runs the loop with the live mount
/// table and the configured mirror engine
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<RunSummary, Error> {
	let watcher =
		SourceWatcher::subscribe(&config.source, config.watch).map_err(Error::WatchSubscription)?;

	let mounts = Arc::new(MountRegistry::new(&config.mount_table, config.mount_match));
	let dispatcher = SyncDispatcher::new(mounts, config.mirror.build(), config.dispatch);

	Controller::new(config, watcher, dispatcher)
		.run(shutdown)
		.await
}
