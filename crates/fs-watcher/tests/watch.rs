use mm_fs_watcher::{ChangeSource, SourceWatcher, WatchOptions, WatcherError};

use std::{fs, time::Duration};

use tempfile::tempdir;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(500);

#[tokio::test]
#[traced_test]
async fn detects_file_creation() {
	let dir = tempdir().unwrap();
	let mut watcher = SourceWatcher::subscribe(dir.path(), WatchOptions::default()).unwrap();

	fs::write(dir.path().join("hello.txt"), b"hello").unwrap();

	let change = timeout(WAIT, watcher.next_change())
		.await
		.expect("no change detected")
		.unwrap();

	assert_eq!(
		change.trigger.as_deref(),
		Some(dir.path().join("hello.txt").as_path())
	);
}

#[tokio::test]
#[traced_test]
async fn burst_is_coalesced_into_one_change() {
	let dir = tempdir().unwrap();
	let mut watcher = SourceWatcher::subscribe(dir.path(), WatchOptions::default()).unwrap();

	for i in 0..32 {
		fs::write(dir.path().join(format!("file-{i}")), b"x").unwrap();
	}
	fs::remove_file(dir.path().join("file-0")).unwrap();

	// Let the backend deliver everything before we wake up
	sleep(SETTLE).await;

	timeout(WAIT, watcher.next_change())
		.await
		.expect("no change detected")
		.unwrap();

	assert!(
		timeout(SETTLE, watcher.next_change()).await.is_err(),
		"burst produced more than one change"
	);
}

#[tokio::test]
#[traced_test]
async fn nested_changes_need_recursive_mode() {
	let dir = tempdir().unwrap();
	let nested = dir.path().join("nested");
	fs::create_dir(&nested).unwrap();

	let mut watcher =
		SourceWatcher::subscribe(dir.path(), WatchOptions { recursive: true }).unwrap();

	fs::write(nested.join("deep.txt"), b"deep").unwrap();

	timeout(WAIT, watcher.next_change())
		.await
		.expect("no change detected in nested directory")
		.unwrap();
}

#[tokio::test]
#[traced_test]
async fn resubscribe_keeps_watching() {
	let dir = tempdir().unwrap();
	let mut watcher = SourceWatcher::subscribe(dir.path(), WatchOptions::default()).unwrap();

	watcher.resubscribe().await.unwrap();
	fs::write(dir.path().join("after.txt"), b"after").unwrap();

	timeout(WAIT, watcher.next_change())
		.await
		.expect("no change detected after resubscribing")
		.unwrap();
}

#[test]
fn subscribing_to_missing_directory_fails() {
	let dir = tempdir().unwrap();
	let missing = dir.path().join("does-not-exist");

	let err = SourceWatcher::subscribe(&missing, WatchOptions::default()).unwrap_err();

	assert!(err.is_subscription());
	assert!(matches!(err, WatcherError::Subscribe { ref path, .. } if path == &missing));
}
