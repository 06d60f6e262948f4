// End-to-end tests: a real directory watch feeding the orchestrator

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tidy_monster::items::{DirectoryWatch, ItemSet};
use tidy_monster::settings::{ShortcutFilter, WatchSettings};
use tidy_monster::tidy::{delete_file, file_delete_action, settings_factory, DeleteAction, ItemSetFactory};
use tidy_monster::{BackoffPolicy, RunState, TidyError, TidyOrchestrator};

use crate::eventually;

fn shared_factory(watch: &Arc<DirectoryWatch>) -> ItemSetFactory<PathBuf> {
    let watch = watch.clone();
    Box::new(move || Ok(Box::new(watch.clone()) as Box<dyn ItemSet<PathBuf>>))
}

fn fresh_factory(dir: PathBuf) -> ItemSetFactory<PathBuf> {
    Box::new(move || {
        let watch = DirectoryWatch::new(&dir, "*.desktop")?;
        Ok(Box::new(watch) as Box<dyn ItemSet<PathBuf>>)
    })
}

/// Fails `failures` times, then deletes for real. Every attempt is stamped.
fn flaky_delete(failures: usize, stamps: &Arc<Mutex<Vec<Instant>>>) -> DeleteAction<PathBuf> {
    let stamps = stamps.clone();
    Arc::new(move |path: &PathBuf| -> anyhow::Result<()> {
        let mut stamps = stamps.lock().unwrap();
        stamps.push(Instant::now());
        if stamps.len() <= failures {
            anyhow::bail!("file in use: {}", path.display());
        }
        delete_file(path)
    })
}

fn spawn_run(
    orchestrator: &Arc<TidyOrchestrator<PathBuf>>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<Result<(), TidyError>> {
    let orchestrator = orchestrator.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { orchestrator.run(cancel).await })
}

#[tokio::test]
async fn test_locked_file_is_deleted_after_two_retries() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let policy = BackoffPolicy::new(Duration::from_millis(20), Duration::from_secs(1)).unwrap();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let watch = Arc::new(DirectoryWatch::new(dir.path(), "*.desktop").unwrap());
    let orchestrator = Arc::new(TidyOrchestrator::new(
        shared_factory(&watch),
        flaky_delete(2, &stamps),
        policy,
    ));
    let cancel = CancellationToken::new();
    let task = spawn_run(&orchestrator, &cancel);
    eventually(Duration::from_secs(5), || orchestrator.state() == RunState::Running).await;

    let file = root.join("x.desktop");
    fs::write(&file, "[Desktop Entry]\n").unwrap();
    eventually(Duration::from_secs(5), || !file.exists()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stamps = stamps.lock().unwrap().clone();
    assert_eq!(stamps.len(), 3);
    assert!(stamps[1] - stamps[0] >= policy.delay(0));
    assert!(stamps[2] - stamps[1] >= policy.delay(1));

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_mid_retry_stops_attempts_and_disposes() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("stuck.desktop"), "").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let delete: DeleteAction<PathBuf> = {
        let calls = calls.clone();
        Arc::new(move |_: &PathBuf| -> anyhow::Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("access denied")
        })
    };
    let watch = Arc::new(DirectoryWatch::new(dir.path(), "*.desktop").unwrap());
    let orchestrator = Arc::new(TidyOrchestrator::new(
        shared_factory(&watch),
        delete,
        BackoffPolicy::new(Duration::from_millis(30), Duration::from_millis(30)).unwrap(),
    ));
    let cancel = CancellationToken::new();
    let task = spawn_run(&orchestrator, &cancel);

    eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) >= 2).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    // Run returned: the set is gone and nothing runs any more.
    assert!(watch.is_disposed());
    assert_eq!(orchestrator.state(), RunState::Idle);
    let after = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after);
    assert!(dir.path().join("stuck.desktop").exists());
}

#[tokio::test]
async fn test_removed_file_withdraws_pending_retry() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("held.desktop");
    fs::write(&file, "").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let delete: DeleteAction<PathBuf> = {
        let calls = calls.clone();
        Arc::new(move |_: &PathBuf| -> anyhow::Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("sharing violation")
        })
    };
    let orchestrator = Arc::new(TidyOrchestrator::new(
        fresh_factory(dir.path().to_path_buf()),
        delete,
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap(),
    ));
    let cancel = CancellationToken::new();
    let task = spawn_run(&orchestrator, &cancel);

    eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1).await;
    fs::remove_file(&file).unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_run_starts_right_after_previous_one() {
    let dir = tempdir().unwrap();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Arc::new(TidyOrchestrator::new(
        fresh_factory(dir.path().to_path_buf()),
        flaky_delete(0, &stamps),
        BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100)).unwrap(),
    ));

    for round in 0..3 {
        let file = dir.path().join(format!("round-{}.desktop", round));
        fs::write(&file, "").unwrap();

        let cancel = CancellationToken::new();
        let task = spawn_run(&orchestrator, &cancel);
        eventually(Duration::from_secs(5), || !file.exists()).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(orchestrator.state(), RunState::Idle);
    }
    assert_eq!(stamps.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_directory_fails_the_run() {
    let dir = tempdir().unwrap();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = TidyOrchestrator::new(
        fresh_factory(dir.path().join("absent")),
        flaky_delete(0, &stamps),
        BackoffPolicy::default(),
    );

    let result = orchestrator.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(TidyError::Source(_))));
    assert_eq!(orchestrator.state(), RunState::Idle);
    assert!(stamps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_only_application_entries_are_tidied() {
    let dir = tempdir().unwrap();
    let app = dir.path().join("editor.desktop");
    let link = dir.path().join("website.desktop");
    fs::write(&app, "[Desktop Entry]\nType=Application\nExec=editor\n").unwrap();
    fs::write(&link, "[Desktop Entry]\nType=Link\nURL=https://example.com\n").unwrap();

    let settings = WatchSettings {
        directories: vec![dir.path().to_path_buf()],
        shared_directories: Vec::new(),
        tidy_all_users: false,
        filter: ShortcutFilter::Apps,
        pattern: "*.desktop".to_string(),
    };
    let orchestrator = Arc::new(TidyOrchestrator::new(
        settings_factory(settings),
        file_delete_action(),
        BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100)).unwrap(),
    ));
    let cancel = CancellationToken::new();
    let task = spawn_run(&orchestrator, &cancel);

    eventually(Duration::from_secs(5), || !app.exists()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(link.exists());

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_application_entry_filled_after_creation_is_tidied() {
    let dir = tempdir().unwrap();
    let settings = WatchSettings {
        directories: vec![dir.path().to_path_buf()],
        shared_directories: Vec::new(),
        tidy_all_users: false,
        filter: ShortcutFilter::Apps,
        pattern: "*.desktop".to_string(),
    };
    let orchestrator = Arc::new(TidyOrchestrator::new(
        settings_factory(settings),
        file_delete_action(),
        BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100)).unwrap(),
    ));
    let cancel = CancellationToken::new();
    let task = spawn_run(&orchestrator, &cancel);
    eventually(Duration::from_secs(5), || orchestrator.state() == RunState::Running).await;

    // Created empty first, so the first look at it finds no application.
    let app = dir.path().join("installer.desktop");
    drop(fs::File::create(&app).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.exists());

    fs::write(&app, "[Desktop Entry]\nType=Application\nExec=installer\n").unwrap();
    eventually(Duration::from_secs(5), || !app.exists()).await;

    cancel.cancel();
    task.await.unwrap().unwrap();
}
