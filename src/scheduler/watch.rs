//! Caller-side observation of a single task.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use super::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Timed out after {0:?} waiting for task")]
    Timeout(Duration),

    #[error("Task was discarded by a scheduler reset")]
    Discarded,
}

/// Handle for waiting on a task's terminal status.
///
/// Timing out only stops the wait; the task keeps running.
#[derive(Debug, Clone)]
pub struct TaskWatch {
    id: TaskId,
    rx: watch::Receiver<TaskStatus>,
}

impl TaskWatch {
    pub(crate) fn new(id: TaskId, rx: watch::Receiver<TaskStatus>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Latest observed status.
    pub fn status(&self) -> TaskStatus {
        *self.rx.borrow()
    }

    /// Wait until the task is Completed or Failed, or `timeout` elapses.
    pub async fn wait(&mut self, timeout: Duration) -> Result<TaskStatus, WaitError> {
        let id = &self.id;
        match tokio::time::timeout(timeout, self.rx.wait_for(TaskStatus::is_terminal)).await {
            Ok(Ok(status)) => Ok(*status),
            Ok(Err(_)) => {
                tracing::debug!(task = %id, "task watch closed before completion");
                Err(WaitError::Discarded)
            }
            Err(_) => Err(WaitError::Timeout(timeout)),
        }
    }
}
