//! Source directory watcher
//!
//! Subscribes to filesystem notifications for a single directory and turns
//! bursts of raw notifications into one [`ChangeEvent`] per wake-up. The
//! watcher does not care *what* changed, only *that* something did; consumers
//! are expected to resynchronize the whole directory on every signal.

mod coalesce;
mod error;
mod event;
mod watcher;

pub use coalesce::Coalescer;
pub use error::WatcherError;
pub use event::{ChangeEvent, RawEventKind, RawNotifyEvent};
pub use watcher::{ChangeSource, SourceWatcher, WatchOptions};

pub type Result<T> = std::result::Result<T, WatcherError>;
