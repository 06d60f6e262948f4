// Tests for the retry scheduler

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tidy_monster::retry::{BackoffPolicy, RetryScheduler};

use crate::eventually;

fn policy(min_ms: u64, max_ms: u64) -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms)).unwrap()
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let policy = policy(30, 1_000);
    let scheduler = RetryScheduler::new(policy);
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let recorded = stamps.clone();
    let handle = scheduler.run("flaky", move || {
        let mut stamps = recorded.lock().unwrap();
        stamps.push(Instant::now());
        if stamps.len() < 3 {
            Err("locked")
        } else {
            Ok(())
        }
    });

    eventually(Duration::from_secs(5), || handle.is_finished()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 3);
    assert!(stamps[1] - stamps[0] >= policy.delay(0));
    assert!(stamps[2] - stamps[1] >= policy.delay(1));
}

#[tokio::test]
async fn test_always_failing_job_keeps_retrying_at_capped_delay() {
    let policy = policy(1, 8);
    let scheduler = RetryScheduler::new(policy);
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let recorded = stamps.clone();
    let handle = scheduler.run("stuck", move || {
        recorded.lock().unwrap().push(Instant::now());
        Err::<(), _>("denied")
    });

    let wanted = policy.attempts_to_max() as usize + 6;
    eventually(Duration::from_secs(10), || stamps.lock().unwrap().len() >= wanted).await;
    assert!(!handle.is_finished());

    scheduler.shutdown();
    scheduler.wait_idle().await;

    let stamps = stamps.lock().unwrap();
    for (attempt, pair) in stamps.windows(2).enumerate() {
        assert!(pair[1] - pair[0] >= policy.delay(attempt as u32));
    }
}

#[tokio::test]
async fn test_withdraw_stops_pending_retry() {
    let scheduler = RetryScheduler::new(policy(50, 50));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = scheduler.run("doomed", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("busy")
    });

    eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1).await;
    scheduler.withdraw(&handle);
    scheduler.withdraw(&handle);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handle.is_cancelled());
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_withdraw_leaves_other_jobs_alone() {
    let scheduler = RetryScheduler::new(policy(10, 10));
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    let withdrawn = scheduler.run("first", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("busy")
    });
    let counter = second.clone();
    let kept = scheduler.run("second", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("busy")
    });

    eventually(Duration::from_secs(5), || first.load(Ordering::SeqCst) >= 1).await;
    scheduler.withdraw(&withdrawn);
    let before = second.load(Ordering::SeqCst);
    eventually(Duration::from_secs(5), || second.load(Ordering::SeqCst) >= before + 3).await;
    assert!(!kept.is_cancelled());

    scheduler.shutdown();
    scheduler.wait_idle().await;
}

#[tokio::test]
async fn test_slow_job_does_not_block_others() {
    let scheduler = RetryScheduler::new(policy(5, 5));
    let release = Arc::new(std::sync::Barrier::new(2));
    let fast = Arc::new(AtomicUsize::new(0));

    let gate = release.clone();
    let slow = scheduler.run("slow", move || {
        gate.wait();
        Ok::<(), String>(())
    });
    let counter = fast.clone();
    scheduler.run("fast", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("retry")
    });

    eventually(Duration::from_secs(5), || fast.load(Ordering::SeqCst) >= 3).await;
    assert!(!slow.is_finished());

    let gate = release.clone();
    tokio::task::spawn_blocking(move || gate.wait()).await.unwrap();
    eventually(Duration::from_secs(5), || slow.is_finished()).await;

    scheduler.shutdown();
    scheduler.wait_idle().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_execution_after_shutdown_returns() {
    for round in 0..40u64 {
        let scheduler = RetryScheduler::new(policy(1, 2));
        let calls = Arc::new(AtomicUsize::new(0));
        for job in 0..4 {
            let counter = calls.clone();
            scheduler.run(format!("race-{}-{}", round, job), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("nope")
            });
        }

        tokio::time::sleep(Duration::from_micros(500 * (round % 7))).await;
        scheduler.shutdown();
        let at_shutdown = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(calls.load(Ordering::SeqCst), at_shutdown, "round {}", round);

        scheduler.shutdown();
        scheduler.wait_idle().await;
        assert_eq!(scheduler.active_jobs(), 0);
    }
}

#[tokio::test]
async fn test_parent_cancellation_shuts_down_jobs() {
    let parent = tokio_util::sync::CancellationToken::new();
    let scheduler = RetryScheduler::with_cancellation(policy(20, 20), &parent);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = scheduler.run("child", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("nope")
    });

    eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1).await;
    parent.cancel();
    eventually(Duration::from_secs(5), || handle.is_finished()).await;
    assert!(scheduler.is_shut_down());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
