//! Event types produced and consumed by the watcher

use std::{path::PathBuf, time::SystemTime};

use notify::{event::ModifyKind, EventKind};

/// Raw notification kind, reduced to what coalescing needs to know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
	Create,
	Remove,
	Modify,
	Rename,
	/// Permissions, timestamps, ownership
	Metadata,
	/// Open, read and close notifications
	Access,
	/// The backend could not tell what happened
	Any,
	/// The backend dropped notifications and a full rescan is needed
	Rescan,
	Other,
}

impl RawEventKind {
	/// Whether an event of this kind means the directory contents may differ
	/// from what was last mirrored
	pub fn is_mutating(self) -> bool {
		matches!(
			self,
			Self::Create | Self::Remove | Self::Modify | Self::Rename | Self::Any | Self::Rescan
		)
	}
}

/// A single notification as delivered by the backend
#[derive(Debug, Clone)]
pub struct RawNotifyEvent {
	pub kind: RawEventKind,
	pub paths: Vec<PathBuf>,
}

impl RawNotifyEvent {
	pub fn primary_path(&self) -> Option<&PathBuf> {
		self.paths.first()
	}
}

impl From<notify::Event> for RawNotifyEvent {
	fn from(event: notify::Event) -> Self {
		let kind = if event.need_rescan() {
			RawEventKind::Rescan
		} else {
			match event.kind {
				EventKind::Create(_) => RawEventKind::Create,
				EventKind::Remove(_) => RawEventKind::Remove,
				EventKind::Modify(ModifyKind::Name(_)) => RawEventKind::Rename,
				EventKind::Modify(ModifyKind::Metadata(_)) => RawEventKind::Metadata,
				EventKind::Modify(_) => RawEventKind::Modify,
				EventKind::Access(_) => RawEventKind::Access,
				EventKind::Any => RawEventKind::Any,
				EventKind::Other => RawEventKind::Other,
			}
		};

		Self {
			kind,
			paths: event.paths,
		}
	}
}

/// "Something changed in the source directory"
///
/// Carries no information about what changed; the trigger path is kept for
/// diagnostics only.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
	pub detected_at: SystemTime,
	pub trigger: Option<PathBuf>,
}

impl ChangeEvent {
	pub fn new(trigger: Option<PathBuf>) -> Self {
		Self {
			detected_at: SystemTime::now(),
			trigger,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use notify::event::{AccessKind, CreateKind, DataChange, Flag, MetadataKind, RenameMode};

	#[test]
	fn classifies_notify_events() {
		let cases = [
			(EventKind::Create(CreateKind::File), RawEventKind::Create),
			(
				EventKind::Modify(ModifyKind::Data(DataChange::Content)),
				RawEventKind::Modify,
			),
			(
				EventKind::Modify(ModifyKind::Name(RenameMode::From)),
				RawEventKind::Rename,
			),
			(
				EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
				RawEventKind::Metadata,
			),
			(EventKind::Access(AccessKind::Read), RawEventKind::Access),
			(EventKind::Any, RawEventKind::Any),
		];

		for (kind, expected) in cases {
			let raw = RawNotifyEvent::from(notify::Event::new(kind));
			assert_eq!(raw.kind, expected, "{kind:?}");
		}
	}

	#[test]
	fn rescan_flag_wins_over_kind() {
		let event = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
		let raw = RawNotifyEvent::from(event);

		assert_eq!(raw.kind, RawEventKind::Rescan);
		assert!(raw.kind.is_mutating());
	}

	#[test]
	fn access_and_metadata_are_not_mutating() {
		assert!(!RawEventKind::Access.is_mutating());
		assert!(!RawEventKind::Metadata.is_mutating());
		assert!(!RawEventKind::Other.is_mutating());
	}
}
