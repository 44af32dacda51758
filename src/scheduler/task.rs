//! Task definitions for the dependency-aware scheduler.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;

/// Unique identifier of a task within one scheduling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle. A task only moves forward through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Errors a task body can end with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task cancelled before completion")]
    Cancelled,
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Boxed future produced by an asynchronous task body.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// Executable part of a task.
pub enum TaskBody {
    /// Suspending work (resource loads, worker round-trips).
    Async(Box<dyn FnOnce() -> TaskFuture + Send>),
    /// CPU-bound work that must not run on an async worker thread.
    Blocking(Box<dyn FnOnce() -> Result<(), TaskError> + Send>),
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("TaskBody::Async"),
            Self::Blocking(_) => f.write_str("TaskBody::Blocking"),
        }
    }
}

/// A unit of work with declared dependencies.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub estimated_time: Duration,
    pub(crate) body: TaskBody,
}

impl Task {
    /// Create an asynchronous task.
    pub fn new<F, Fut>(id: impl Into<TaskId>, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::with_body(id, TaskBody::Async(Box::new(move || body().boxed())))
    }

    /// Create a task whose body runs synchronously.
    pub fn blocking<F>(id: impl Into<TaskId>, body: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Self::with_body(id, TaskBody::Blocking(Box::new(body)))
    }

    fn with_body(id: impl Into<TaskId>, body: TaskBody) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            dependencies: Vec::new(),
            estimated_time: Duration::ZERO,
            body,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<TaskId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_dependencies<I, T>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_estimate(mut self, estimated_time: Duration) -> Self {
        self.estimated_time = estimated_time;
        self
    }
}

/// Read-only view of a task's state and timing.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub estimated_time: Duration,
    pub actual_time: Option<Duration>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<TaskError>,
}
