//! Mount state lookups
//!
//! A destination only gets mirrored to when it's an active mount point, so an
//! unplugged drive doesn't end up with its contents written to the empty
//! directory underneath.

use crate::error::FileIOError;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

mod table;

pub use table::MountSnapshot;

#[derive(Debug, Error)]
pub enum MountError {
	#[error("mount table unavailable: {0}")]
	TableUnavailable(#[from] FileIOError),
}

/// How a destination path is compared against mount table entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMatch {
	/// Byte-for-byte equality, `/mnt/ssd1/` does not match `/mnt/ssd1`
	#[default]
	Exact,
	/// Resolve the destination first (trailing slashes, `..`, symlinks)
	Canonical,
}

#[async_trait]
pub trait MountTable: Send + Sync {
	async fn is_mounted(&self, path: &Path) -> Result<bool, MountError>;
}

/// Answers mount queries from the kernel's live mount table
#[derive(Debug, Clone)]
pub struct MountRegistry {
	table_path: PathBuf,
	matching: MountMatch,
}

impl MountRegistry {
	pub fn new(table_path: impl Into<PathBuf>, matching: MountMatch) -> Self {
		Self {
			table_path: table_path.into(),
			matching,
		}
	}

	/// Reads the table as it is right now
	pub async fn snapshot(&self) -> Result<MountSnapshot, MountError> {
		let raw = fs::read(&self.table_path)
			.await
			.map_err(|e| FileIOError::from((self.table_path.as_path(), e, "reading mount table")))?;

		Ok(MountSnapshot::parse(&raw))
	}
}

#[async_trait]
impl MountTable for MountRegistry {
	async fn is_mounted(&self, path: &Path) -> Result<bool, MountError> {
		let snapshot = self.snapshot().await?;

		let mounted = match self.matching {
			MountMatch::Exact => snapshot.contains(path),
			MountMatch::Canonical => match fs::canonicalize(path).await {
				Ok(resolved) => snapshot.contains(&resolved),
				Err(e) => {
					debug!(
						path = %path.display(),
						?e,
						"Unable to resolve destination, treating it as not mounted;",
					);
					false
				}
			},
		};

		debug!(path = %path.display(), mounted, entries = snapshot.len(), "Checked mount state;");

		Ok(mounted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::{tempdir, TempDir};

	fn mount_table(dir: &TempDir, mount_dirs: &[&Path]) -> PathBuf {
		let path = dir.path().join("mounts");
		write_table(&path, mount_dirs);
		path
	}

	fn write_table(path: &Path, mount_dirs: &[&Path]) {
		let contents = mount_dirs
			.iter()
			.map(|dir| format!("/dev/sdz1 {} ext4 rw,relatime 0 0\n", dir.display()))
			.collect::<String>();
		std::fs::write(path, contents).unwrap();
	}

	#[tokio::test]
	async fn reports_listed_directories_only() {
		let dir = tempdir().unwrap();
		let table = mount_table(&dir, &[Path::new("/mnt/ssd1")]);
		let registry = MountRegistry::new(table, MountMatch::Exact);

		assert!(registry.is_mounted(Path::new("/mnt/ssd1")).await.unwrap());
		assert!(!registry.is_mounted(Path::new("/mnt/ssd2")).await.unwrap());
		assert!(!registry.is_mounted(Path::new("/mnt/ssd1/")).await.unwrap());
	}

	#[tokio::test]
	async fn never_reuses_a_snapshot() {
		let dir = tempdir().unwrap();
		let table = mount_table(&dir, &[]);
		let registry = MountRegistry::new(&table, MountMatch::Exact);

		assert!(!registry.is_mounted(Path::new("/mnt/ssd1")).await.unwrap());

		write_table(&table, &[Path::new("/mnt/ssd1")]);
		assert!(registry.is_mounted(Path::new("/mnt/ssd1")).await.unwrap());

		write_table(&table, &[]);
		assert!(!registry.is_mounted(Path::new("/mnt/ssd1")).await.unwrap());
	}

	#[tokio::test]
	async fn missing_table_is_an_error() {
		let dir = tempdir().unwrap();
		let registry = MountRegistry::new(dir.path().join("nope"), MountMatch::Exact);

		let err = registry
			.is_mounted(Path::new("/mnt/ssd1"))
			.await
			.unwrap_err();

		assert!(matches!(err, MountError::TableUnavailable(_)));
		assert!(err.to_string().contains("reading mount table"));
	}

	#[tokio::test]
	async fn canonical_matching_resolves_destination() {
		let dir = tempdir().unwrap();
		let mount_point = dir.path().join("ssd1");
		std::fs::create_dir(&mount_point).unwrap();
		let mount_point = std::fs::canonicalize(&mount_point).unwrap();

		let link = dir.path().join("ssd1-link");
		std::os::unix::fs::symlink(&mount_point, &link).unwrap();

		let table = mount_table(&dir, &[&mount_point]);
		let exact = MountRegistry::new(&table, MountMatch::Exact);
		let canonical = MountRegistry::new(&table, MountMatch::Canonical);

		let mut with_slash = mount_point.clone().into_os_string();
		with_slash.push("/");
		let with_slash = PathBuf::from(with_slash);

		assert!(!exact.is_mounted(&with_slash).await.unwrap());
		assert!(canonical.is_mounted(&with_slash).await.unwrap());

		assert!(!exact.is_mounted(&link).await.unwrap());
		assert!(canonical.is_mounted(&link).await.unwrap());
	}

	#[tokio::test]
	async fn canonical_matching_treats_missing_paths_as_unmounted() {
		let dir = tempdir().unwrap();
		let table = mount_table(&dir, &[Path::new("/")]);
		let registry = MountRegistry::new(table, MountMatch::Canonical);

		assert!(!registry
			.is_mounted(&dir.path().join("missing"))
			.await
			.unwrap());
	}
}
