// src/engine/worker.rs

//! Worker loop: claim, execute on the blocking pool, report.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::TaskEvent;
use crate::engine::manager::Shared;
use crate::errors::TaskError;
use crate::scheduler::ClaimedTask;

/// Run until the manager is shut down.
///
/// The wakeup notification is armed *before* looking for work, so a task
/// submitted between the check and the wait is never missed.
pub(crate) async fn worker_loop(
    index: usize,
    shared: Arc<Shared>,
    results: mpsc::UnboundedSender<TaskEvent>,
) {
    debug!(manager = %shared.id, worker = index, "worker started");

    loop {
        let notified = shared.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if shared.is_stopping() {
            break;
        }

        let claimed = shared.scheduler.lock().claim_next();
        let Some(task) = claimed else {
            notified.await;
            continue;
        };

        let id = task.id;
        let outcome = execute(task).await;

        {
            let mut scheduler = shared.scheduler.lock();
            let step = scheduler.complete(id, outcome);
            for event in step.events {
                if results.send(event).is_err() {
                    debug!(worker = index, task = id, "result receiver dropped");
                }
            }
        }

        shared.wakeup.notify_waiters();
    }

    debug!(manager = %shared.id, worker = index, "worker stopped");
}

async fn execute(task: ClaimedTask) -> Result<Value, TaskError> {
    let ClaimedTask {
        id,
        priority,
        body,
        upstream,
        ..
    } = task;

    debug!(task = id, priority, "running task body");

    match tokio::task::spawn_blocking(move || body.execute(upstream)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::from(err)),
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            warn!(task = id, %message, "task body panicked");
            Err(TaskError::new(format!("task panicked: {message}")))
        }
        Err(join_err) => Err(TaskError::new(format!("task aborted: {join_err}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
