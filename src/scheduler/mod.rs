//! Dependency-aware task scheduling.
//!
//! Tasks declare dependencies by id; the scheduler releases them as their
//! dependencies complete and runs up to a fixed number concurrently,
//! highest priority first.

mod dag;
mod executor;
mod graph;
mod priority;
mod task;
mod watch;

pub use dag::{FailureCallback, RunSummary, SchedulerError, TaskScheduler, MAX_CONCURRENCY};
pub use executor::{InlineExecutor, SpawnExecutor, TaskExecutor};
pub(crate) use executor::panic_message;
pub use graph::{DependencyGraph, GraphError};
pub use priority::{PrioritizedItem, PriorityQueue};
pub use task::{Task, TaskBody, TaskError, TaskFuture, TaskId, TaskRecord, TaskStatus};
pub use watch::{TaskWatch, WaitError};
