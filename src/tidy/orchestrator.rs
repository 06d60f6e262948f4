//! Binds an item set to a delete action through the retry scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{SourceError, TidyError};
use crate::items::{lock, EventSink, Item, ItemEvent, ItemSet};
use crate::retry::{BackoffPolicy, JobHandle, RetryScheduler};

/// Builds a fresh item set for each run.
pub type ItemSetFactory<T> = Box<dyn Fn() -> Result<Box<dyn ItemSet<T>>, SourceError> + Send + Sync>;

/// Deletes one item. Returning `Err` schedules a retry.
pub type DeleteAction<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Deletes every item its item set reports, retrying failures, for the
/// lifetime of a cancellable run.
pub struct TidyOrchestrator<T: Item> {
    factory: ItemSetFactory<T>,
    delete: DeleteAction<T>,
    policy: BackoffPolicy,
    state: Mutex<RunState>,
}

impl<T: Item> TidyOrchestrator<T> {
    pub fn new(factory: ItemSetFactory<T>, delete: DeleteAction<T>, policy: BackoffPolicy) -> Self {
        Self {
            factory,
            delete,
            policy,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    /// Run until `cancel` fires or the item set fails.
    ///
    /// Returns only after the item set is disposed and every retry job has
    /// exited, so a new run can start right away. Cancellation is a normal
    /// stop and yields `Ok(())`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), TidyError> {
        {
            let mut state = lock(&self.state);
            if *state != RunState::Idle {
                return Err(TidyError::AlreadyRunning);
            }
            *state = RunState::Running;
        }

        let result = self.run_once(&cancel).await;
        *lock(&self.state) = RunState::Idle;
        result
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<(), TidyError> {
        info!("starting tidy run");
        let set = (self.factory)()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: EventSink<T> = Arc::new(move |event: ItemEvent<T>| {
            let _ = tx.send(event);
        });
        if let Err(err) = set.subscribe(sink) {
            set.dispose();
            return Err(err.into());
        }

        let scheduler = RetryScheduler::with_cancellation(self.policy, cancel);
        let mut run = ActiveRun {
            scheduler: &scheduler,
            delete: &self.delete,
            jobs: HashMap::new(),
            withdrawn: HashMap::new(),
        };

        let outcome = match set.start() {
            Ok(()) => run.pump(cancel, &mut rx).await,
            Err(err) => {
                error!(error = %err, "item set failed to start");
                Err(err.into())
            }
        };

        *lock(&self.state) = RunState::Stopping;
        set.unsubscribe();
        set.dispose();
        drop(rx);
        scheduler.shutdown_and_wait().await;

        match &outcome {
            Ok(()) => info!("tidy run stopped"),
            Err(err) => error!(error = %err, "tidy run terminated"),
        }
        outcome
    }
}

/// Per-run bookkeeping: the live job for each item, and withdrawn jobs
/// whose last attempt may still be executing.
struct ActiveRun<'a, T: Item> {
    scheduler: &'a RetryScheduler,
    delete: &'a DeleteAction<T>,
    jobs: HashMap<T, JobHandle>,
    withdrawn: HashMap<T, JobHandle>,
}

impl<T: Item> ActiveRun<'_, T> {
    async fn pump(
        &mut self,
        cancel: &CancellationToken,
        rx: &mut mpsc::UnboundedReceiver<ItemEvent<T>>,
    ) -> Result<(), TidyError> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                message = self.scheduler.faulted() => return Err(TidyError::JobPanicked(message)),
                event = rx.recv() => match event {
                    Some(ItemEvent::Added(item)) => self.submit(item),
                    Some(ItemEvent::Removed(item)) => self.withdraw(&item),
                    Some(ItemEvent::Changed(_)) => {}
                    Some(ItemEvent::Failed(err)) => return Err(err.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    fn submit(&mut self, item: T) {
        if let Some(existing) = self.jobs.get(&item) {
            if !existing.is_finished() {
                debug!(item = ?item, "delete already pending");
                return;
            }
        }
        self.jobs.retain(|_, handle| !handle.is_finished());
        self.withdrawn.retain(|_, handle| !handle.is_finished());

        let delete = self.delete.clone();
        let target = item.clone();
        let work = move || delete(&target);
        let name = format!("{:?}", item);
        // Attempts on one item never overlap, even across a withdraw.
        let handle = match self.withdrawn.remove(&item) {
            Some(previous) => {
                debug!(item = ?item, "scheduling delete after withdrawn attempt");
                self.scheduler.run_after(&previous, name, work)
            }
            None => {
                debug!(item = ?item, "scheduling delete");
                self.scheduler.run(name, work)
            }
        };
        self.jobs.insert(item, handle);
    }

    fn withdraw(&mut self, item: &T) {
        if let Some(handle) = self.jobs.remove(item) {
            self.scheduler.withdraw(&handle);
            if !handle.is_finished() {
                debug!(item = ?item, "item removed, withdrawing delete");
                // A job still waiting on an earlier withdrawn one never ran;
                // the earlier job is the one to wait for.
                let earlier_running = self
                    .withdrawn
                    .get(item)
                    .is_some_and(|earlier| !earlier.is_finished());
                if !earlier_running {
                    self.withdrawn.insert(item.clone(), handle);
                }
            }
        }
    }
}
