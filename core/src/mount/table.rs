use std::{
	collections::HashSet,
	ffi::OsString,
	os::unix::ffi::OsStringExt,
	path::Path,
};

use tracing::trace;

/// Mount directories listed in one read of the mount table
///
/// Throwaway by construction: every lookup reads the table again, since a
/// removable drive can come and go between two checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSnapshot {
	mount_points: HashSet<OsString>,
}

impl MountSnapshot {
	/// Parses the `fstab(5)` style format used by `/proc/self/mounts` and
	/// `/etc/mtab`, skipping lines that don't have a mount directory
	pub fn parse(raw: &[u8]) -> Self {
		let mount_points = raw
			.split(|&b| b == b'\n')
			.filter_map(mount_dir)
			.inspect(|dir| trace!(mount_dir = ?dir, "Mount table entry;"))
			.collect();

		Self { mount_points }
	}

	/// Exact, byte-for-byte lookup
	pub fn contains(&self, path: &Path) -> bool {
		self.mount_points.contains(path.as_os_str())
	}

	pub fn len(&self) -> usize {
		self.mount_points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.mount_points.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Path> {
		self.mount_points.iter().map(Path::new)
	}
}

fn mount_dir(line: &[u8]) -> Option<OsString> {
	let mut fields = line
		.split(|&b| matches!(b, b' ' | b'\t'))
		.filter(|field| !field.is_empty());

	// Comments only show up in hand written tables, never in /proc
	let device = fields.next()?;
	if device.starts_with(b"#") {
		return None;
	}

	fields.next().map(|dir| OsString::from_vec(unescape(dir)))
}

/// Decodes the `\ooo` octal escapes the kernel uses for whitespace and
/// backslashes in mount directories (same rules as `getmntent(3)`)
fn unescape(field: &[u8]) -> Vec<u8> {
	let mut decoded = Vec::with_capacity(field.len());
	let mut rest = field;

	while let Some((&byte, tail)) = rest.split_first() {
		if byte == b'\\' {
			if let Some(value) = octal_byte(tail) {
				decoded.push(value);
				rest = &tail[3..];
				continue;
			}
		}

		decoded.push(byte);
		rest = tail;
	}

	decoded
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
	match digits {
		[a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', ..] => {
			Some(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'))
		}
		_ => None,
	}
}
