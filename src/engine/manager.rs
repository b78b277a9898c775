// src/engine/manager.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::TaskEvent;
use crate::engine::dispatcher::ResultDispatcher;
use crate::engine::worker::worker_loop;
use crate::errors::SchedulingError;
use crate::scheduler::{SchedulerStep, TaskBody, TaskOptions, TaskScheduler};
use crate::types::{GroupId, Payload, StopMode, TaskId, TaskState};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`TaskManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(u64);

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manager-{}", self.0)
    }
}

/// Construction options for a [`TaskManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Number of workers; `0` picks the available parallelism.
    pub workers: usize,
    /// Whether workers may claim tasks straight away.
    pub start_processing: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            start_processing: true,
        }
    }
}

impl ManagerOptions {
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// State shared by the manager handles, the workers and the dispatcher.
pub(crate) struct Shared {
    pub(crate) id: ManagerId,
    pub(crate) scheduler: Mutex<TaskScheduler>,
    pub(crate) wakeup: Notify,
    /// Sender used by the manager itself; dropped on shutdown so the
    /// dispatcher sees the channel close once workers are gone.
    results: Mutex<Option<mpsc::UnboundedSender<TaskEvent>>>,
    stopping: AtomicBool,
    hard_stop: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn is_hard_stopped(&self) -> bool {
        self.hard_stop.load(Ordering::Acquire)
    }

    /// Forward scheduler events to the dispatcher. Must be called while the
    /// scheduler lock is held so delivery order matches scheduler order.
    fn publish(&self, step: SchedulerStep) {
        if step.events.is_empty() {
            return;
        }
        if let Some(tx) = self.results.lock().as_ref() {
            for event in step.events {
                let _ = tx.send(event);
            }
        }
    }
}

/// Cloneable handle to a scheduler plus its worker pool.
///
/// All methods are synchronous apart from [`TaskManager::shut_down`]; they
/// only take the scheduler lock briefly and never wait on task bodies.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("id", &self.shared.id)
            .field("stopping", &self.shared.is_stopping())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Spawn the worker pool and return the manager handle together with
    /// the dispatcher its results are delivered through.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(options: ManagerOptions) -> (TaskManager, ResultDispatcher) {
        let id = ManagerId(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed));
        let worker_count = options.resolved_workers();
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id,
            scheduler: Mutex::new(TaskScheduler::new(options.start_processing)),
            wakeup: Notify::new(),
            results: Mutex::new(Some(tx.clone())),
            stopping: AtomicBool::new(false),
            hard_stop: AtomicBool::new(false),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
        });

        {
            let mut workers = shared.workers.lock();
            for index in 0..worker_count {
                let handle = tokio::spawn(worker_loop(index, Arc::clone(&shared), tx.clone()));
                workers.push(handle);
            }
        }

        info!(manager = %id, workers = worker_count, processing = options.start_processing, "task manager started");

        let dispatcher = ResultDispatcher::new(rx, Arc::clone(&shared));
        (TaskManager { shared }, dispatcher)
    }

    pub fn id(&self) -> ManagerId {
        self.shared.id
    }

    /// Submit a task. Fails if an upstream id is unknown or the manager has
    /// been shut down.
    pub fn add_task(
        &self,
        body: TaskBody,
        options: TaskOptions,
    ) -> Result<TaskId, SchedulingError> {
        if self.shared.is_stopping() {
            return Err(SchedulingError::ShutDown);
        }

        let mut scheduler = self.shared.scheduler.lock();
        let (id, step) = scheduler.add_task(body, options)?;
        self.shared.publish(step);
        drop(scheduler);

        self.shared.wakeup.notify_waiters();
        Ok(id)
    }

    /// Submit a task that returns `values` merged with the object results of
    /// its upstream tasks.
    pub fn add_pass_through_task(
        &self,
        values: Payload,
        options: TaskOptions,
    ) -> Result<TaskId, SchedulingError> {
        self.add_task(TaskBody::pass_through(values), options)
    }

    pub fn next_group_id(&self) -> GroupId {
        self.shared.scheduler.lock().next_group_id()
    }

    /// Cancel every unfinished task of `group`. Returns the ids that were
    /// cancelled before running.
    pub fn cancel(&self, group: GroupId) -> Vec<TaskId> {
        let mut scheduler = self.shared.scheduler.lock();
        let step = scheduler.cancel_group(group);
        let cancelled = step.cancelled.clone();
        self.shared.publish(step);
        cancelled
    }

    /// Cancel one task and its dependents.
    pub fn cancel_task(&self, id: TaskId) -> Vec<TaskId> {
        let mut scheduler = self.shared.scheduler.lock();
        let step = scheduler.cancel_task(id);
        let cancelled = step.cancelled.clone();
        self.shared.publish(step);
        cancelled
    }

    pub fn cancel_all(&self) {
        let mut scheduler = self.shared.scheduler.lock();
        let step = scheduler.cancel_all();
        self.shared.publish(step);
    }

    pub fn start_processing(&self) {
        self.shared.scheduler.lock().set_processing(true);
        self.shared.wakeup.notify_waiters();
    }

    /// Stop claiming new tasks. Running tasks are not interrupted.
    pub fn pause_processing(&self) {
        self.shared.scheduler.lock().set_processing(false);
    }

    pub fn is_processing(&self) -> bool {
        self.shared.scheduler.lock().is_processing()
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.shared.scheduler.lock().state_of(id)
    }

    pub fn is_idle(&self) -> bool {
        self.shared.scheduler.lock().is_idle()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Stop the worker pool.
    ///
    /// Workers finish the task they are running and exit without claiming
    /// another. Once every worker has been joined the result channel is
    /// closed, so the dispatcher's `recv` returns `None` after the remaining
    /// results (`StopMode::Drain`) or immediately (`StopMode::Hard`).
    pub async fn shut_down(&self, mode: StopMode) {
        if mode == StopMode::Hard {
            self.shared.hard_stop.store(true, Ordering::Release);
        }
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            debug!(manager = %self.shared.id, "shutdown already requested");
        }
        self.shared.wakeup.notify_waiters();

        let handles = std::mem::take(&mut *self.shared.workers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(manager = %self.shared.id, error = %err, "worker ended abnormally");
            }
        }

        self.shared.results.lock().take();
        info!(manager = %self.shared.id, ?mode, "task manager shut down");
    }
}
