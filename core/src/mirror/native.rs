use super::{target_dir, Mirror, MirrorError, MirrorStats, Synced};
use crate::error::FileIOError;

use std::{
	collections::HashSet,
	ffi::OsString,
	fs::{self, File, Metadata},
	io,
	path::Path,
	time::Instant,
};

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use tracing::{debug, trace};

/// In-process mirror for hosts without rsync
///
/// Produces the same layout as `rsync -a --delete <source> <destination>`:
/// the source directory itself lands inside the destination. Regular files
/// are copied when their size or modification time differ (or their blake3
/// digest, with `checksum` on), symlinks are recreated as links and anything
/// not present in the source is removed. Only file permissions and
/// modification times are carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMirror {
	checksum: bool,
}

impl NativeMirror {
	pub fn new(checksum: bool) -> Self {
		Self { checksum }
	}
}

#[async_trait]
impl Mirror for NativeMirror {
	async fn mirror(&self, source: &Path, destination: &Path) -> Result<Synced, MirrorError> {
		let started = Instant::now();

		let source = source.to_path_buf();
		let target = target_dir(&source, destination);
		let checksum = self.checksum;

		let stats = spawn_blocking(move || -> Result<MirrorStats, MirrorError> {
			let metadata = fs::metadata(&source)
				.map_err(|e| FileIOError::from((source.as_path(), e, "reading mirror source")))?;

			if !metadata.is_dir() {
				return Err(MirrorError::InvalidSource {
					path: source,
					reason: "not a directory",
				});
			}

			let mut pass = Pass {
				checksum,
				stats: MirrorStats::default(),
			};
			pass.sync_dir(&source, &target)?;

			Ok(pass.stats)
		})
		.await??;

		debug!(
			destination = %destination.display(),
			copied = stats.copied,
			unchanged = stats.unchanged,
			deleted = stats.deleted,
			"Native mirror pass finished;",
		);

		Ok(Synced {
			elapsed: started.elapsed(),
			stats: Some(stats),
		})
	}
}

struct Pass {
	checksum: bool,
	stats: MirrorStats,
}

impl Pass {
	fn sync_dir(&mut self, source: &Path, target: &Path) -> Result<(), MirrorError> {
		match lstat(target)? {
			Some(existing) if existing.is_dir() => {}
			Some(_) => {
				remove_entry(target)?;
				create_dir(target)?;
			}
			None => create_dir(target)?,
		}

		let mut seen = HashSet::new();

		for entry in read_dir(source)? {
			let name = entry.file_name();
			let from = entry.path();
			let to = target.join(&name);

			let metadata = entry
				.metadata()
				.map_err(|e| FileIOError::from((from.as_path(), e, "reading source entry")))?;
			let file_type = metadata.file_type();

			if file_type.is_dir() {
				self.sync_dir(&from, &to)?;
			} else if file_type.is_symlink() {
				self.sync_symlink(&from, &to)?;
			} else if file_type.is_file() {
				self.sync_file(&from, &metadata, &to)?;
			} else {
				trace!(path = %from.display(), "Skipping special file;");
				continue;
			}

			seen.insert(name);
		}

		self.delete_extras(target, &seen)
	}

	fn sync_file(
		&mut self,
		from: &Path,
		metadata: &Metadata,
		to: &Path,
	) -> Result<(), MirrorError> {
		match lstat(to)? {
			Some(existing) if existing.is_file() => {
				if self.is_unchanged(from, metadata, to, &existing)? {
					self.stats.unchanged += 1;
					return Ok(());
				}
				remove_entry(to)?;
			}
			Some(_) => remove_entry(to)?,
			None => {}
		}

		copy_file(from, metadata, to)?;
		trace!(source = %from.display(), target = %to.display(), "Copied file;");
		self.stats.copied += 1;

		Ok(())
	}

	fn sync_symlink(&mut self, from: &Path, to: &Path) -> Result<(), MirrorError> {
		let link_target =
			fs::read_link(from).map_err(|e| FileIOError::from((from, e, "reading symlink")))?;

		if let Some(existing) = lstat(to)? {
			let current_target = existing.is_symlink().then(|| fs::read_link(to).ok()).flatten();
			if current_target.as_deref() == Some(link_target.as_path()) {
				self.stats.unchanged += 1;
				return Ok(());
			}
			remove_entry(to)?;
		}

		std::os::unix::fs::symlink(&link_target, to)
			.map_err(|e| FileIOError::from((to, e, "creating symlink")))?;
		self.stats.copied += 1;

		Ok(())
	}

	fn is_unchanged(
		&self,
		from: &Path,
		source: &Metadata,
		to: &Path,
		existing: &Metadata,
	) -> Result<bool, MirrorError> {
		if source.len() != existing.len() {
			return Ok(false);
		}

		if self.checksum {
			return Ok(digest(from)? == digest(to)?);
		}

		match (source.modified(), existing.modified()) {
			(Ok(a), Ok(b)) => Ok(a == b),
			_ => Ok(false),
		}
	}

	fn delete_extras(
		&mut self,
		target: &Path,
		keep: &HashSet<OsString>,
	) -> Result<(), MirrorError> {
		for entry in read_dir(target)? {
			if keep.contains(&entry.file_name()) {
				continue;
			}

			let path = entry.path();
			remove_entry(&path)?;
			trace!(path = %path.display(), "Deleted extraneous entry;");
			self.stats.deleted += 1;
		}

		Ok(())
	}
}

fn copy_file(from: &Path, metadata: &Metadata, to: &Path) -> Result<(), MirrorError> {
	let mut reader =
		File::open(from).map_err(|e| FileIOError::from((from, e, "opening source file")))?;
	let mut writer =
		File::create(to).map_err(|e| FileIOError::from((to, e, "creating target file")))?;

	io::copy(&mut reader, &mut writer)
		.map_err(|e| FileIOError::from((to, e, "copying file contents")))?;

	if let Ok(modified) = metadata.modified() {
		writer
			.set_modified(modified)
			.map_err(|e| FileIOError::from((to, e, "setting modification time")))?;
	}

	drop(writer);

	fs::set_permissions(to, metadata.permissions())
		.map_err(|e| FileIOError::from((to, e, "setting file permissions")))?;

	Ok(())
}

fn digest(path: &Path) -> Result<blake3::Hash, MirrorError> {
	let mut file =
		File::open(path).map_err(|e| FileIOError::from((path, e, "opening file to hash")))?;
	let mut hasher = blake3::Hasher::new();

	io::copy(&mut file, &mut hasher).map_err(|e| FileIOError::from((path, e, "hashing file")))?;

	Ok(hasher.finalize())
}

fn lstat(path: &Path) -> Result<Option<Metadata>, MirrorError> {
	match fs::symlink_metadata(path) {
		Ok(metadata) => Ok(Some(metadata)),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from((path, e, "reading target entry")).into()),
	}
}

fn read_dir(path: &Path) -> Result<Vec<fs::DirEntry>, MirrorError> {
	fs::read_dir(path)
		.and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
		.map_err(|e| FileIOError::from((path, e, "listing directory")).into())
}

fn create_dir(path: &Path) -> Result<(), MirrorError> {
	fs::create_dir_all(path)
		.map_err(|e| FileIOError::from((path, e, "creating directory")).into())
}

fn remove_entry(path: &Path) -> Result<(), MirrorError> {
	let result = match fs::symlink_metadata(path) {
		Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
		Ok(_) => fs::remove_file(path),
		Err(e) => Err(e),
	};

	result.map_err(|e| FileIOError::from((path, e, "removing target entry")).into())
}
