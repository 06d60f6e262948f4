//! Retry scheduler.
//!
//! Every submitted job runs on its own tokio task with its own backoff
//! timeline. Attempts execute on the blocking pool so a slow delete never
//! stalls the runtime or another job. Each job owns a child of the scheduler's
//! cancellation token: withdrawing a job cancels its token, shutting down the
//! scheduler cancels the parent. A job submitted with [`RetryScheduler::run_after`]
//! does not start until an earlier job has exited, which keeps attempts on one
//! item sequential across a withdraw and a resubmit.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;

/// Identifier of a submitted job, unique per scheduler.
pub type JobId = u64;

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    token: CancellationToken,
    done: CancellationToken,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// True once the job's task has exited, for any reason.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the job's task has exited.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }

    /// True once the job was withdrawn or its scheduler shut down.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Shared {
    policy: BackoffPolicy,
    shutdown: CancellationToken,
    /// Attempts check for cancellation and execute under a read guard.
    /// `shutdown` takes the write guard, so once it returns no attempt is
    /// running and none can start.
    gate: RwLock<()>,
    tracker: TaskTracker,
    next_id: AtomicU64,
    fault: Mutex<Option<String>>,
    faulted: CancellationToken,
}

/// Runs units of work until they succeed, retrying failures with backoff.
pub struct RetryScheduler {
    shared: Arc<Shared>,
}

impl RetryScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_shutdown_token(policy, CancellationToken::new())
    }

    /// Create a scheduler that also shuts down when `parent` is cancelled.
    pub fn with_cancellation(policy: BackoffPolicy, parent: &CancellationToken) -> Self {
        Self::with_shutdown_token(policy, parent.child_token())
    }

    fn with_shutdown_token(policy: BackoffPolicy, shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                shutdown,
                gate: RwLock::new(()),
                tracker: TaskTracker::new(),
                next_id: AtomicU64::new(1),
                fault: Mutex::new(None),
                faulted: CancellationToken::new(),
            }),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.shared.policy
    }

    /// Submit `work`. It runs immediately and, on `Err`, again after
    /// `policy.delay(attempt)` until it returns `Ok`, the job is withdrawn,
    /// or the scheduler shuts down.
    ///
    /// Must be called from within a tokio runtime. After shutdown the
    /// returned handle is already cancelled and nothing runs.
    pub fn run<F, E>(&self, name: impl Into<String>, work: F) -> JobHandle
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.submit(name.into(), None, work)
    }

    /// Like [`run`](Self::run), but the first attempt waits until `previous`
    /// has exited. Withdrawing the new job while it waits cancels it.
    pub fn run_after<F, E>(&self, previous: &JobHandle, name: impl Into<String>, work: F) -> JobHandle
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.submit(name.into(), Some(previous.done.clone()), work)
    }

    fn submit<F, E>(&self, name: String, after: Option<CancellationToken>, work: F) -> JobHandle
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shared.shutdown.child_token();
        let done = CancellationToken::new();
        let handle = JobHandle {
            id,
            token: token.clone(),
            done: done.clone(),
        };

        if self.shared.shutdown.is_cancelled() {
            done.cancel();
            return handle;
        }

        let job = Job {
            id,
            name,
            token,
            shared: self.shared.clone(),
        };
        self.shared.tracker.spawn(async move {
            if let Some(previous) = after {
                tokio::select! {
                    biased;
                    _ = job.token.cancelled() => {
                        done.cancel();
                        return;
                    }
                    _ = previous.cancelled() => {}
                }
            }
            job.drive(work).await;
            done.cancel();
        });
        handle
    }

    /// Cancel one job. A pending retry never fires; an attempt already
    /// executing finishes but its result is discarded.
    pub fn withdraw(&self, handle: &JobHandle) {
        if !handle.token.is_cancelled() {
            debug!(job = handle.id, "withdrawing job");
            handle.token.cancel();
        }
    }

    /// Cancel every job. Blocks until attempts that are mid-execution have
    /// returned; after that no job of this scheduler executes again.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// [`shutdown`](Self::shutdown) from async code, then
    /// [`wait_idle`](Self::wait_idle). The wait for a mid-execution attempt
    /// happens on the blocking pool, so a hung attempt never stalls a
    /// runtime worker.
    pub async fn shutdown_and_wait(&self) {
        let shared = self.shared.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || shared.shutdown()).await {
            warn!(error = %err, "shutdown barrier did not complete, cancelling jobs");
            self.shared.shutdown.cancel();
            self.shared.tracker.close();
        }
        self.wait_idle().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Wait until every job task has exited. Only resolves after `shutdown`.
    pub async fn wait_idle(&self) {
        self.shared.tracker.wait().await;
    }

    /// Number of job tasks still alive.
    pub fn active_jobs(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Panic message of the first job whose work panicked, if any.
    pub fn fault(&self) -> Option<String> {
        self.shared
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves once a job's work has panicked, with the panic message.
    pub async fn faulted(&self) -> String {
        self.shared.faulted.cancelled().await;
        self.fault().unwrap_or_default()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.tracker.close();
    }
}

impl Shared {
    fn shutdown(&self) {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        if !self.shutdown.is_cancelled() {
            info!(active_jobs = self.tracker.len(), "shutting down retry scheduler");
        }
        self.shutdown.cancel();
        self.tracker.close();
    }
}

struct Job {
    id: JobId,
    name: String,
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl Job {
    async fn drive<F, E>(self, mut work: F)
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut attempt: u32 = 0;
        loop {
            let shared = self.shared.clone();
            let token = self.token.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let outcome = {
                    let _guard = shared.gate.read().unwrap_or_else(PoisonError::into_inner);
                    if token.is_cancelled() {
                        None
                    } else {
                        Some(work())
                    }
                };
                (work, outcome)
            })
            .await;

            let outcome = match joined {
                Ok((returned, outcome)) => {
                    work = returned;
                    outcome
                }
                Err(err) if err.is_panic() => {
                    self.record_panic(panic_message(err.into_panic()));
                    return;
                }
                Err(_) => return,
            };

            let Some(outcome) = outcome else {
                debug!(job = self.id, name = %self.name, "job cancelled before attempt");
                return;
            };
            if self.token.is_cancelled() {
                debug!(job = self.id, name = %self.name, "discarding result of cancelled job");
                return;
            }

            match outcome {
                Ok(()) => {
                    debug!(job = self.id, name = %self.name, attempts = attempt + 1, "job succeeded");
                    return;
                }
                Err(err) => {
                    let delay = self.shared.policy.delay(attempt);
                    warn!(
                        job = self.id,
                        name = %self.name,
                        attempt = attempt + 1,
                        retry_in = ?delay,
                        error = %err,
                        "job attempt failed"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn record_panic(&self, message: String) {
        error!(job = self.id, name = %self.name, panic = %message, "job work panicked");
        let mut fault = self.shared.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            *fault = Some(format!("{}: {}", self.name, message));
        }
        self.shared.faulted.cancel();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
