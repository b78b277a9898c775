// src/engine/dispatcher.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::engine::TaskEvent;
use crate::engine::manager::{ManagerId, Shared};

/// Single-consumer end of a task manager's result channel.
///
/// Events arrive in the order tasks finished. Results of tasks cancelled
/// after they finished, and everything after a hard stop, are filtered out
/// here, at delivery time.
pub struct ResultDispatcher {
    rx: mpsc::UnboundedReceiver<TaskEvent>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("manager", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl ResultDispatcher {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TaskEvent>, shared: Arc<Shared>) -> Self {
        Self { rx, shared }
    }

    /// Id of the manager this dispatcher belongs to.
    pub fn manager_id(&self) -> ManagerId {
        self.shared.id
    }

    /// Wait for the next deliverable event.
    ///
    /// Returns `None` once the manager has shut down and nothing is left to
    /// deliver.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        loop {
            if self.hard_stopped() {
                return None;
            }
            let event = self.rx.recv().await?;
            // A hard stop may have been requested while we were waiting.
            if self.hard_stopped() {
                return None;
            }
            if self.accept(&event) {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`ResultDispatcher::recv`], for consumers that
    /// poll from their own event loop.
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        loop {
            if self.hard_stopped() {
                return None;
            }
            let event = match self.rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            };
            if self.hard_stopped() {
                return None;
            }
            if self.accept(&event) {
                return Some(event);
            }
        }
    }

    /// Everything deliverable right now.
    pub fn drain_ready(&mut self) -> Vec<TaskEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Close the channel once a hard stop was requested, so nothing queued
    /// behind it is delivered either.
    fn hard_stopped(&mut self) -> bool {
        if self.shared.is_hard_stopped() {
            self.rx.close();
            return true;
        }
        false
    }

    fn accept(&self, event: &TaskEvent) -> bool {
        self.shared.scheduler.lock().take_delivery(event)
    }
}
