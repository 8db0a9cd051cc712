use crate::{
	mirror::{Mirror, MirrorError, Synced},
	mount::{MountError, MountTable},
};

use mm_fs_watcher::ChangeEvent;

use std::{
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};

use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
	/// One destination at a time, in list order
	#[default]
	Sequential,
	/// One task per distinct destination, joined before the dispatch ends
	Parallel,
}

/// What caused a dispatch, used for logging only
#[derive(Debug, Clone)]
pub enum DispatchReason {
	Startup,
	Change(ChangeEvent),
	Resubscribed,
	/// Destinations found mounted by a mount poll, the only ones synced
	MountChanged(Vec<PathBuf>),
}

impl fmt::Display for DispatchReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Startup => write!(f, "startup"),
			Self::Change(ChangeEvent {
				trigger: Some(path),
				..
			}) => write!(f, "change at {}", path.display()),
			Self::Change(_) => write!(f, "change"),
			Self::Resubscribed => write!(f, "resubscribed watch"),
			Self::MountChanged(destinations) => {
				write!(f, "newly mounted")?;
				for (i, destination) in destinations.iter().enumerate() {
					let separator = if i == 0 { " " } else { ", " };
					write!(f, "{separator}{}", destination.display())?;
				}
				Ok(())
			}
		}
	}
}

#[derive(Debug)]
pub enum DestinationOutcome {
	Synced(Synced),
	SkippedUnmounted,
	SkippedMountUnknown(MountError),
	Failed(MirrorError),
}

impl DestinationOutcome {
	pub fn is_synced(&self) -> bool {
		matches!(self, Self::Synced(_))
	}

	pub fn is_skipped(&self) -> bool {
		matches!(self, Self::SkippedUnmounted | Self::SkippedMountUnknown(_))
	}

	pub fn is_failed(&self) -> bool {
		matches!(self, Self::Failed(_))
	}
}

/// Outcomes of one dispatch, in destination list order
#[derive(Debug, Default)]
pub struct DispatchReport {
	pub outcomes: Vec<(PathBuf, DestinationOutcome)>,
}

impl DispatchReport {
	pub fn synced(&self) -> usize {
		self.count(DestinationOutcome::is_synced)
	}

	pub fn skipped(&self) -> usize {
		self.count(DestinationOutcome::is_skipped)
	}

	pub fn failed(&self) -> usize {
		self.count(DestinationOutcome::is_failed)
	}

	pub fn outcome(&self, destination: impl AsRef<Path>) -> Option<&DestinationOutcome> {
		let destination = destination.as_ref();
		self.outcomes
			.iter()
			.find(|(path, _)| path == destination)
			.map(|(_, outcome)| outcome)
	}

	fn count(&self, predicate: impl Fn(&DestinationOutcome) -> bool) -> usize {
		self.outcomes
			.iter()
			.filter(|(_, outcome)| predicate(outcome))
			.count()
	}
}

/// Checks every destination's mount state and mirrors the source into the
/// mounted ones
///
/// A failure on one destination never stops the others from being attempted.
#[derive(Clone)]
pub struct SyncDispatcher {
	mounts: Arc<dyn MountTable>,
	mirror: Arc<dyn Mirror>,
	mode: DispatchMode,
}

impl SyncDispatcher {
	pub fn new(mounts: Arc<dyn MountTable>, mirror: Arc<dyn Mirror>, mode: DispatchMode) -> Self {
		Self {
			mounts,
			mirror,
			mode,
		}
	}

	/// Destinations that are mounted right now, in list order
	pub async fn mounted(&self, destinations: &[PathBuf]) -> Result<Vec<PathBuf>, MountError> {
		let mut mounted = Vec::new();
		for destination in destinations {
			if self.mounts.is_mounted(destination).await? {
				mounted.push(destination.clone());
			}
		}
		Ok(mounted)
	}

	pub async fn dispatch(&self, source: &Path, destinations: &[PathBuf]) -> DispatchReport {
		let outcomes = match self.mode {
			DispatchMode::Sequential => {
				let mut outcomes = Vec::with_capacity(destinations.len());
				for destination in destinations {
					let outcome = self.sync_one(source, destination).await;
					outcomes.push((destination.clone(), outcome));
				}
				outcomes
			}
			DispatchMode::Parallel => self.dispatch_parallel(source, destinations).await,
		};

		let report = DispatchReport { outcomes };

		debug!(
			source = %source.display(),
			synced = report.synced(),
			skipped = report.skipped(),
			failed = report.failed(),
			"Dispatch finished;",
		);

		report
	}

	async fn dispatch_parallel(
		&self,
		source: &Path,
		destinations: &[PathBuf],
	) -> Vec<(PathBuf, DestinationOutcome)> {
		// Repeated entries share a task so the same directory is never written
		// by two mirrors at once
		let mut groups: Vec<(&PathBuf, Vec<usize>)> = Vec::new();
		for (index, destination) in destinations.iter().enumerate() {
			match groups.iter_mut().find(|(path, _)| *path == destination) {
				Some((_, indices)) => indices.push(index),
				None => groups.push((destination, vec![index])),
			}
		}

		let results = join_all(groups.into_iter().map(|(destination, indices)| async move {
			let mut outcomes = Vec::with_capacity(indices.len());
			for index in indices {
				outcomes.push((index, self.sync_one(source, destination).await));
			}
			outcomes
		}))
		.await;

		let mut indexed = results.into_iter().flatten().collect::<Vec<_>>();
		indexed.sort_by_key(|(index, _)| *index);

		indexed
			.into_iter()
			.map(|(index, outcome)| (destinations[index].clone(), outcome))
			.collect()
	}

	async fn sync_one(&self, source: &Path, destination: &Path) -> DestinationOutcome {
		match self.mounts.is_mounted(destination).await {
			Ok(true) => {}
			Ok(false) => {
				info!("{} is not mounted, skipping sync;", destination.display());
				return DestinationOutcome::SkippedUnmounted;
			}
			Err(e) => {
				warn!(
					?e,
					"Unable to determine whether {} is mounted, skipping sync;",
					destination.display()
				);
				return DestinationOutcome::SkippedMountUnknown(e);
			}
		}

		match self.mirror.mirror(source, destination).await {
			Ok(synced) => {
				match synced.stats {
					Some(stats) => info!(
						elapsed = ?synced.elapsed,
						copied = stats.copied,
						unchanged = stats.unchanged,
						deleted = stats.deleted,
						"Successfully synced {} to {};",
						source.display(),
						destination.display()
					),
					None => info!(
						elapsed = ?synced.elapsed,
						"Successfully synced {} to {};",
						source.display(),
						destination.display()
					),
				}
				DestinationOutcome::Synced(synced)
			}
			Err(e) => {
				error!(
					%e,
					"Error syncing {} to {};",
					source.display(),
					destination.display()
				);
				DestinationOutcome::Failed(e)
			}
		}
	}
}
