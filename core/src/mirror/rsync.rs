use super::{Mirror, MirrorError, Synced};

use std::{
	path::{Path, PathBuf},
	process::Stdio,
	time::Instant,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

pub const DEFAULT_RSYNC_PROGRAM: &str = "rsync";
pub const DEFAULT_RSYNC_ARGS: &[&str] = &["-avz", "--delete"];

/// How many trailing stderr lines end up in a failure diagnostic
const STDERR_TAIL_LINES: usize = 5;

/// Delegates mirroring to an external program, invoked as
/// `<program> <args>... <source> <destination>`
///
/// Only the exit status is interpreted. Arguments are passed to the process
/// directly, no shell is involved.
#[derive(Debug, Clone)]
pub struct RsyncMirror {
	program: PathBuf,
	args: Vec<String>,
}

impl RsyncMirror {
	pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
		}
	}
}

#[async_trait]
impl Mirror for RsyncMirror {
	async fn mirror(&self, source: &Path, destination: &Path) -> Result<Synced, MirrorError> {
		let started = Instant::now();

		trace!(
			program = %self.program.display(),
			args = ?self.args,
			source = %source.display(),
			destination = %destination.display(),
			"Spawning mirror process;",
		);

		let output = Command::new(&self.program)
			.args(&self.args)
			.arg(source)
			.arg(destination)
			.stdin(Stdio::null())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| MirrorError::Spawn {
				program: self.program.clone(),
				source: e,
			})?;

		for line in String::from_utf8_lossy(&output.stdout).lines() {
			debug!(destination = %destination.display(), "{line}");
		}

		if !output.status.success() {
			return Err(MirrorError::ExitStatus {
				status: output.status,
				stderr: stderr_tail(&output.stderr),
			});
		}

		Ok(Synced {
			elapsed: started.elapsed(),
			stats: None,
		})
	}
}

fn stderr_tail(stderr: &[u8]) -> String {
	let stderr = String::from_utf8_lossy(stderr);
	let lines = stderr
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.collect::<Vec<_>>();

	if lines.is_empty() {
		return "no diagnostic output".to_string();
	}

	lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("; ")
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	fn sh(script: &str) -> RsyncMirror {
		RsyncMirror::new("sh", vec!["-c".to_string(), script.to_string(), "mirror".to_string()])
	}

	#[tokio::test]
	async fn passes_source_then_destination() {
		let dir = tempdir().unwrap();
		let record = dir.path().join("args");
		let mirror = sh(&format!("echo \"$1|$2\" > '{}'", record.display()));

		mirror
			.mirror(Path::new("/data"), Path::new("/mnt/ssd1"))
			.await
			.unwrap();

		assert_eq!(
			std::fs::read_to_string(record).unwrap().trim(),
			"/data|/mnt/ssd1"
		);
	}

	#[tokio::test]
	async fn non_zero_exit_is_a_failure_with_diagnostic() {
		let mirror = sh(
			"echo 'first' >&2; echo 'rsync: write failed: No space left on device' >&2; exit 11",
		);

		let err = mirror
			.mirror(Path::new("/data"), Path::new("/mnt/ssd1"))
			.await
			.unwrap_err();

		match err {
			MirrorError::ExitStatus { status, stderr } => {
				assert_eq!(status.code(), Some(11));
				assert_eq!(stderr, "first; rsync: write failed: No space left on device");
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn missing_program_is_a_spawn_failure() {
		let mirror = RsyncMirror::new("/nonexistent/mirror-tool", vec![]);

		assert!(matches!(
			mirror.mirror(Path::new("/data"), Path::new("/mnt/ssd1")).await,
			Err(MirrorError::Spawn { .. })
		));
	}

	#[test]
	fn stderr_tail_keeps_last_lines() {
		let stderr = (1..=8).map(|i| format!("line {i}\n")).collect::<String>();

		assert_eq!(
			stderr_tail(stderr.as_bytes()),
			"line 4; line 5; line 6; line 7; line 8"
		);
		assert_eq!(stderr_tail(b"\n\n"), "no diagnostic output");
	}
}
