use mm_core::{run, Config, MirrorConfig, MirrorEngine, Settings};

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(10);

struct Layout {
	_dir: TempDir,
	source: PathBuf,
	mounted: PathBuf,
	unplugged: PathBuf,
	mount_table: PathBuf,
}

impl Layout {
	fn new() -> Self {
		let dir = tempdir().unwrap();
		let source = dir.path().join("data");
		let mounted = dir.path().join("ssd1");
		let unplugged = dir.path().join("ssd2");
		for path in [&source, &mounted, &unplugged] {
			fs::create_dir(path).unwrap();
		}

		let mount_table = dir.path().join("mounts");
		fs::write(
			&mount_table,
			format!("/dev/sdz1 {} ext4 rw,relatime 0 0\n", mounted.display()),
		)
		.unwrap();

		Self {
			_dir: dir,
			source,
			mounted,
			unplugged,
			mount_table,
		}
	}

	fn config(&self) -> Config {
		Config::new(
			&self.source,
			vec![self.mounted.clone(), self.unplugged.clone()],
			Settings {
				mount_table: self.mount_table.clone(),
				mirror: MirrorConfig {
					engine: MirrorEngine::Native,
					..MirrorConfig::default()
				},
				..Settings::default()
			},
		)
		.unwrap()
	}

	fn plug_in(&self) {
		fs::write(
			&self.mount_table,
			format!(
				"/dev/sdz1 {} ext4 rw 0 0\n/dev/sdy1 {} ext4 rw 0 0\n",
				self.mounted.display(),
				self.unplugged.display()
			),
		)
		.unwrap();
	}
}

async fn wait_for(path: &Path, contents: Option<&str>) {
	let deadline = Instant::now() + WAIT;
	loop {
		let done = match contents {
			Some(expected) => fs::read_to_string(path).is_ok_and(|found| found == expected),
			None => !path.exists(),
		};
		if done {
			return;
		}
		assert!(Instant::now() < deadline, "timed out waiting on {}", path.display());
		sleep(Duration::from_millis(50)).await;
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn mirrors_at_startup_and_after_changes() {
	let layout = Layout::new();
	fs::write(layout.source.join("before.txt"), "already here").unwrap();

	let shutdown = CancellationToken::new();
	let handle = tokio::spawn(run(layout.config(), shutdown.clone()).in_current_span());

	let mirrored = layout.mounted.join("data");
	wait_for(&mirrored.join("before.txt"), Some("already here")).await;

	fs::write(layout.source.join("after.txt"), "new").unwrap();
	wait_for(&mirrored.join("after.txt"), Some("new")).await;

	fs::remove_file(layout.source.join("before.txt")).unwrap();
	wait_for(&mirrored.join("before.txt"), None).await;

	shutdown.cancel();
	let summary = timeout(WAIT, handle).await.unwrap().unwrap().unwrap();

	assert!(summary.dispatches >= 3);
	assert!(!layout.unplugged.join("data").exists());
	assert!(logs_contain("is not mounted, skipping sync;"));
	assert!(logs_contain("Change detected in"));
}

#[tokio::test(flavor = "multi_thread")]
async fn drive_plugged_in_later_is_picked_up_on_next_change() {
	let layout = Layout::new();
	fs::write(layout.source.join("a.txt"), "alpha").unwrap();

	let shutdown = CancellationToken::new();
	let handle = tokio::spawn(run(layout.config(), shutdown.clone()).in_current_span());

	let mirrored = layout.mounted.join("data");
	wait_for(&mirrored.join("a.txt"), Some("alpha")).await;

	layout.plug_in();

	fs::write(layout.source.join("b.txt"), "beta").unwrap();
	wait_for(&layout.unplugged.join("data/a.txt"), Some("alpha")).await;
	wait_for(&layout.unplugged.join("data/b.txt"), Some("beta")).await;

	shutdown.cancel();
	timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn drive_plugged_in_later_is_synced_by_mount_poll() {
	let layout = Layout::new();
	fs::write(layout.source.join("a.txt"), "alpha").unwrap();

	let mut config = layout.config();
	config.mount_poll = Some(Duration::from_millis(100));

	let shutdown = CancellationToken::new();
	let handle = tokio::spawn(run(config, shutdown.clone()).in_current_span());

	wait_for(&layout.mounted.join("data/a.txt"), Some("alpha")).await;

	// No change in the source, only the mount table
	layout.plug_in();
	wait_for(&layout.unplugged.join("data/a.txt"), Some("alpha")).await;

	shutdown.cancel();
	let summary = timeout(WAIT, handle).await.unwrap().unwrap().unwrap();

	assert!(summary.dispatches >= 2);
	assert!(logs_contain("was mounted;"));
}

#[tokio::test]
async fn missing_source_fails_to_subscribe() {
	let layout = Layout::new();
	let mut config = layout.config();
	config.source = layout.source.join("missing");

	let err = run(config, CancellationToken::new()).await.unwrap_err();

	assert!(matches!(err, mm_core::Error::WatchSubscription(_)));
}
