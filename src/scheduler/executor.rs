//! Execution channels for task bodies.
//!
//! The scheduler only sees a future resolving to `Result<(), TaskError>`;
//! where the body actually runs is decided here.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::future::FutureExt;
use tokio::task::JoinError;

use super::task::{TaskBody, TaskError, TaskFuture};

/// Runs a task body and reports its outcome asynchronously.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, body: TaskBody) -> TaskFuture;
}

/// Polls task bodies on the scheduler's own task.
///
/// Blocking bodies run synchronously when first polled, so this executor
/// suits short CPU work and tests. Panics are caught and reported as
/// [`TaskError::Panicked`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, body: TaskBody) -> TaskFuture {
        match body {
            TaskBody::Async(make) => async move {
                match AssertUnwindSafe(async move { make().await }).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
                }
            }
            .boxed(),
            TaskBody::Blocking(run) => async move {
                std::panic::catch_unwind(AssertUnwindSafe(run))
                    .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))))
            }
            .boxed(),
        }
    }
}

/// Spawns async bodies onto the tokio runtime and blocking bodies onto the
/// blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnExecutor;

impl TaskExecutor for SpawnExecutor {
    fn execute(&self, body: TaskBody) -> TaskFuture {
        match body {
            TaskBody::Async(make) => {
                let handle = tokio::spawn(make());
                async move { handle.await.unwrap_or_else(|e| Err(join_error(e))) }.boxed()
            }
            TaskBody::Blocking(run) => {
                let handle = tokio::task::spawn_blocking(run);
                async move { handle.await.unwrap_or_else(|e| Err(join_error(e))) }.boxed()
            }
        }
    }
}

fn join_error(err: JoinError) -> TaskError {
    if err.is_panic() {
        TaskError::Panicked(panic_message(err.into_panic().as_ref()))
    } else {
        TaskError::Cancelled
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
