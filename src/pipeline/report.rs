//! Per-frame results and frame side-jobs.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use super::budget::{BudgetViolation, OptimizationAction};
use super::phase::{PhaseError, PhaseReport, RenderPhase};
use crate::scheduler::{Task, TaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    /// Optional phase failed and was skipped.
    Skipped,
    /// Phase failed and a previous result was reused.
    Degraded,
    Failed,
    /// Never started because an earlier phase failed.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub status: PhaseStatus,
    pub report: PhaseReport,
    pub elapsed: Duration,
    pub error: Option<PhaseError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Complete,
    Degraded,
    Failed,
}

/// Everything measured and decided for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub status: FrameStatus,
    pub frame_time_ms: f64,
    pub draw_calls: u64,
    pub triangles: u64,
    pub memory_bytes: u64,
    pub phase_times_ms: BTreeMap<RenderPhase, f64>,
    pub phase_status: BTreeMap<RenderPhase, PhaseStatus>,
    pub disabled_phases: Vec<RenderPhase>,
    pub violations: Vec<BudgetViolation>,
    /// Applied to the settings of the next frame.
    pub actions: Vec<OptimizationAction>,
    pub concurrency: usize,
    pub quality: f64,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
}

impl FrameReport {
    pub fn over_budget(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn phases_with(&self, status: PhaseStatus) -> Vec<RenderPhase> {
        self.phase_status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(p, _)| *p)
            .collect()
    }
}

/// Extra work that joins the next frame's DAG after a given phase.
///
/// If that phase is disabled, the job hangs off the closest enabled phase
/// before it. Jobs are leaves: no phase waits for them.
#[derive(Debug)]
pub struct FrameJob {
    pub(crate) after: RenderPhase,
    pub(crate) task: Task,
}

impl FrameJob {
    pub fn new<F, Fut>(name: &str, after: RenderPhase, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            after,
            task: Task::new(job_task_id(name), body),
        }
    }

    pub fn blocking<F>(name: &str, after: RenderPhase, body: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            after,
            task: Task::blocking(job_task_id(name), body),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task = self.task.with_priority(priority);
        self
    }

    pub fn after(&self) -> RenderPhase {
        self.after
    }
}

fn job_task_id(name: &str) -> String {
    format!("job:{name}")
}
