//! Dependency-aware task scheduler.
//!
//! Tasks become ready when every dependency has Completed. Ready tasks
//! are dispatched highest priority first (ties in insertion order) while
//! fewer than `max_concurrent` are running. A failed task starves its
//! transitive dependents, which stay Pending after the run drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use super::executor::{InlineExecutor, TaskExecutor};
use super::graph::{DependencyGraph, GraphError};
use super::priority::PriorityQueue;
use super::task::{Task, TaskBody, TaskError, TaskId, TaskRecord, TaskStatus};
use super::watch::TaskWatch;

/// Hard ceiling on concurrently running tasks.
pub const MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("Invalid task graph: {0}")]
    InvalidGraph(#[from] GraphError),
}

/// Called once per failed task.
pub type FailureCallback = Arc<dyn Fn(&TaskId, &TaskError) + Send + Sync>;

/// Outcome of one `run()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Tasks left Pending because a dependency failed or never existed.
    pub blocked: usize,
    pub elapsed: Duration,
    pub peak_concurrency: usize,
}

struct TaskSlot {
    record: TaskRecord,
    sequence: u64,
    body: Option<TaskBody>,
    status_tx: watch::Sender<TaskStatus>,
}

type Finished = (TaskId, Result<(), TaskError>, Duration);

pub struct TaskScheduler {
    max_concurrent: usize,
    executor: Arc<dyn TaskExecutor>,
    tasks: HashMap<TaskId, TaskSlot>,
    order: Vec<TaskId>,
    graph: DependencyGraph,
    ready: PriorityQueue<TaskId>,
    next_sequence: u64,
    on_failure: Option<FailureCallback>,
}

impl TaskScheduler {
    /// Scheduler polling task bodies inline.
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_executor(max_concurrent, Arc::new(InlineExecutor))
    }

    pub fn with_executor(max_concurrent: usize, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            max_concurrent: clamp_concurrency(max_concurrent),
            executor,
            tasks: HashMap::new(),
            order: Vec::new(),
            graph: DependencyGraph::new(),
            ready: PriorityQueue::new(),
            next_sequence: 0,
            on_failure: None,
        }
    }

    pub fn on_task_failed<F>(&mut self, callback: F)
    where
        F: Fn(&TaskId, &TaskError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(callback));
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Set the concurrency cap, clamped to `[1, MAX_CONCURRENCY]`.
    pub fn set_max_concurrent(&mut self, max_concurrent: usize) {
        self.max_concurrent = clamp_concurrency(max_concurrent);
    }

    /// Register a task. Dependencies that already Completed in this session
    /// are treated as met.
    pub fn add_task(&mut self, task: Task) -> Result<(), SchedulerError> {
        if self.tasks.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }

        let Task {
            id,
            priority,
            dependencies,
            estimated_time,
            body,
        } = task;

        let tasks = &self.tasks;
        let degree = self.graph.add_node(&id, &dependencies, |dep| {
            tasks
                .get(dep)
                .is_some_and(|slot| slot.record.status == TaskStatus::Completed)
        });

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if degree == 0 {
            self.ready.push_with_sequence(id.clone(), priority, sequence);
        }

        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        self.order.push(id.clone());
        self.tasks.insert(
            id.clone(),
            TaskSlot {
                record: TaskRecord {
                    id,
                    priority,
                    dependencies,
                    status: TaskStatus::Pending,
                    estimated_time,
                    actual_time: None,
                    started_at: None,
                    finished_at: None,
                    error: None,
                },
                sequence,
                body: Some(body),
                status_tx,
            },
        );
        Ok(())
    }

    /// Report unknown dependencies and cycles before running.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.graph.validate().map_err(SchedulerError::from)
    }

    /// Run until nothing is running and nothing is ready.
    pub async fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        let mut running: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();
        let mut summary = RunSummary::default();

        loop {
            while running.len() < self.max_concurrent {
                let Some(id) = self.ready.pop() else { break };
                if let Some(fut) = self.dispatch(id) {
                    running.push(fut);
                }
            }
            summary.peak_concurrency = summary.peak_concurrency.max(running.len());

            let Some((id, result, elapsed)) = running.next().await else {
                break;
            };
            match self.finish(&id, result, elapsed) {
                TaskStatus::Completed => summary.completed += 1,
                _ => summary.failed += 1,
            }
        }

        summary.blocked = self
            .tasks
            .values()
            .filter(|slot| slot.record.status == TaskStatus::Pending)
            .count();
        summary.elapsed = started.elapsed();

        if summary.blocked > 0 {
            tracing::debug!(
                blocked = summary.blocked,
                failed = summary.failed,
                "scheduler drained with blocked tasks"
            );
        }
        summary
    }

    fn dispatch(&mut self, id: TaskId) -> Option<BoxFuture<'static, Finished>> {
        let slot = self.tasks.get_mut(&id)?;
        let body = slot.body.take()?;

        slot.record.status = TaskStatus::Running;
        slot.record.started_at = Some(Instant::now());
        slot.status_tx.send_replace(TaskStatus::Running);

        let fut = self.executor.execute(body);
        Some(
            async move {
                let start = Instant::now();
                let result = fut.await;
                (id, result, start.elapsed())
            }
            .boxed(),
        )
    }

    fn finish(&mut self, id: &TaskId, result: Result<(), TaskError>, elapsed: Duration) -> TaskStatus {
        let Some(slot) = self.tasks.get_mut(id) else {
            return TaskStatus::Failed;
        };
        slot.record.actual_time = Some(elapsed);
        slot.record.finished_at = Some(Instant::now());

        match result {
            Ok(()) => {
                slot.record.status = TaskStatus::Completed;
                slot.status_tx.send_replace(TaskStatus::Completed);
                for dependent in self.graph.complete(id) {
                    if let Some(next) = self.tasks.get(&dependent) {
                        if next.record.status == TaskStatus::Pending && next.body.is_some() {
                            self.ready
                                .push_with_sequence(dependent, next.record.priority, next.sequence);
                        }
                    }
                }
                TaskStatus::Completed
            }
            Err(err) => {
                tracing::warn!(task = %id, error = %err, "task failed");
                slot.record.status = TaskStatus::Failed;
                slot.record.error = Some(err.clone());
                slot.status_tx.send_replace(TaskStatus::Failed);
                if let Some(callback) = &self.on_failure {
                    callback(id, &err);
                }
                TaskStatus::Failed
            }
        }
    }

    /// Discard all tasks and state. Outstanding watches resolve as discarded.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.order.clear();
        self.graph.clear();
        self.ready.clear();
        self.next_sequence = 0;
    }

    pub fn watch(&self, id: &TaskId) -> Option<TaskWatch> {
        self.tasks
            .get(id)
            .map(|slot| TaskWatch::new(id.clone(), slot.status_tx.subscribe()))
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(id).map(|slot| slot.record.status)
    }

    pub fn record(&self, id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(id).map(|slot| slot.record.clone())
    }

    /// Records in insertion order.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub fn in_degree(&self, id: &TaskId) -> Option<usize> {
        self.graph.in_degree(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("max_concurrent", &self.max_concurrent)
            .field("tasks", &self.tasks.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

fn clamp_concurrency(n: usize) -> usize {
    n.clamp(1, MAX_CONCURRENCY)
}

#[cfg(test)]
#[path = "dag_tests.rs"]
mod tests;
