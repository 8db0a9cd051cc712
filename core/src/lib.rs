//! mountmirror core
//!
//! Keeps a set of destination mount points in sync with a source directory:
//! one unconditional pass at startup, then one pass per coalesced burst of
//! filesystem changes. Destinations that aren't currently mounted are
//! skipped.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod mirror;
pub mod mount;

pub use config::{Config, ConfigError, Settings};
pub use controller::{run, Controller, ReadFailurePolicy, RetryConfig, RunSummary};
pub use dispatch::{
	DestinationOutcome, DispatchMode, DispatchReason, DispatchReport, SyncDispatcher,
};
pub use error::{Error, FileIOError};
pub use mirror::{Mirror, MirrorConfig, MirrorEngine, MirrorError, MirrorStats, Synced};
pub use mount::{MountError, MountMatch, MountRegistry, MountSnapshot, MountTable};

pub use mm_fs_watcher::{ChangeEvent, ChangeSource, WatchOptions, WatcherError};
