//! Frame loop driver: one DAG of render phases per frame.
//!
//! Each enabled phase is a task depending only on the previous enabled
//! phase. After the DAG drains the frame is timed and checked against the
//! performance budget; corrective actions change the next frame's
//! settings, never the current one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::Instrument;

use super::budget::{FrameMeasurement, OptimizationAction, PerformanceBudget};
use super::phase::{FrameContext, PhaseError, PhaseExecutor, PhaseReport, RenderPhase};
use super::report::{FrameJob, FrameReport, FrameStatus, PhaseOutcome, PhaseStatus};
use super::settings::RenderSettings;
use crate::quality::{AdaptiveQualityController, QualityConfig};
use crate::scheduler::{
    SchedulerError, Task, TaskError, TaskExecutor, TaskId, TaskScheduler, TaskStatus, MAX_CONCURRENCY,
};
use crate::telemetry::{FrameSpan, MetricsSink, SpanExt};

/// Phases outrank side jobs when both are ready.
const PHASE_PRIORITY: i32 = 100;

/// Raise concurrency when the frame took less than this share of the budget.
const HEADROOM_RATIO: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub budget: PerformanceBudget,
    pub settings: RenderSettings,
    /// Initial task concurrency, clamped to `[1, 8]`.
    pub max_concurrent: usize,
    /// Frames between concurrency adaptation ticks.
    pub analysis_interval: u64,
    pub quality: QualityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: PerformanceBudget::default(),
            settings: RenderSettings::default(),
            max_concurrent: num_cpus::get().clamp(1, MAX_CONCURRENCY),
            analysis_interval: 1,
            quality: QualityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Frame {frame_index} aborted: {source}")]
    Fatal {
        frame_index: u64,
        #[source]
        source: PhaseError,
    },

    #[error("Failed to build frame graph: {0}")]
    Scheduler(#[from] SchedulerError),
}

pub struct RenderPipelineScheduler {
    budget: PerformanceBudget,
    analysis_interval: u64,
    base_settings: RenderSettings,
    settings: RenderSettings,
    executor: Arc<dyn PhaseExecutor>,
    tasks: TaskScheduler,
    quality: AdaptiveQualityController,
    sink: Option<Arc<dyn MetricsSink>>,
    jobs: Vec<FrameJob>,
    frame_index: u64,
    last_good_batch: Option<PhaseReport>,
    last_report: Option<FrameReport>,
    interval_frames: u64,
    interval_time_ms: f64,
}

impl RenderPipelineScheduler {
    pub fn new(config: PipelineConfig, executor: Arc<dyn PhaseExecutor>) -> Self {
        Self {
            budget: config.budget,
            analysis_interval: config.analysis_interval.max(1),
            base_settings: config.settings.clone(),
            settings: config.settings,
            executor,
            tasks: TaskScheduler::new(config.max_concurrent),
            quality: AdaptiveQualityController::new(config.quality),
            sink: None,
            jobs: Vec::new(),
            frame_index: 0,
            last_good_batch: None,
            last_report: None,
            interval_frames: 0,
            interval_time_ms: 0.0,
        }
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run phase and job bodies through `executor` instead of inline.
    pub fn with_task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.tasks = TaskScheduler::with_executor(self.tasks.max_concurrent(), executor);
        self
    }

    /// Queue a side job for the next frame.
    pub fn submit_job(&mut self, job: FrameJob) {
        self.jobs.push(job);
    }

    /// Build, run and analyze one frame. `memory_bytes` is the GPU memory
    /// in use, checked against the memory budget.
    ///
    /// Phase failures degrade the frame; only unrecoverable ones are
    /// returned as errors.
    pub async fn run_frame(&mut self, memory_bytes: u64) -> Result<FrameReport, PipelineError> {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let span = FrameSpan::new(frame_index);
        let result = self
            .run_frame_inner(frame_index, memory_bytes)
            .instrument(span.clone())
            .await;
        match &result {
            Ok(report) => FrameSpan::record_report(&span, report),
            Err(_) => span.record_result(&result),
        }
        result
    }

    async fn run_frame_inner(&mut self, frame_index: u64, memory_bytes: u64) -> Result<FrameReport, PipelineError> {
        self.tasks.reset();
        let ctx = Arc::new(FrameContext {
            frame_index,
            settings: self.settings.clone(),
            quality: self.quality.settings(),
            budget: self.budget,
        });
        let outcomes: Arc<DashMap<RenderPhase, PhaseOutcome>> = Arc::new(DashMap::new());

        let (disabled, anchors) = self.build_phases(&ctx, &outcomes)?;
        let job_ids = self.attach_jobs(&anchors);
        let concurrency = self.tasks.max_concurrent();

        let started = Instant::now();
        self.tasks.run().await;
        let frame_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut phase_status = BTreeMap::new();
        let mut phase_times_ms = BTreeMap::new();
        let mut draw_calls = 0;
        let mut triangles = 0;
        let mut fatal: Option<PhaseError> = None;

        for phase in ctx.settings.enabled_phases() {
            let Some(outcome) = outcomes.get(&phase).map(|o| o.value().clone()) else {
                phase_status.insert(phase, PhaseStatus::Blocked);
                continue;
            };
            phase_status.insert(phase, outcome.status);
            phase_times_ms.insert(phase, duration_ms(outcome.elapsed));
            if matches!(outcome.status, PhaseStatus::Completed | PhaseStatus::Degraded) {
                draw_calls += outcome.report.draw_calls;
                triangles += outcome.report.triangles;
            }
            if phase == RenderPhase::Batch && outcome.status == PhaseStatus::Completed {
                self.last_good_batch = Some(outcome.report);
            }
            if let Some(err) = outcome.error.filter(PhaseError::is_fatal) {
                fatal.get_or_insert(err);
            }
        }

        let status = frame_status(phase_status.values());
        let (jobs_completed, jobs_failed) = self.job_results(&job_ids);

        let measurement = FrameMeasurement {
            frame_time_ms,
            draw_calls,
            triangles,
            memory_bytes,
        };
        let violations = self.budget.check(&measurement);
        let mut actions: Vec<OptimizationAction> = Vec::new();
        for violation in &violations {
            for action in violation.actions() {
                action.apply(&mut self.settings);
                tracing::debug!(violation = violation.name(), action = ?action, "budget correction");
                if !actions.contains(action) {
                    actions.push(*action);
                }
            }
        }

        self.interval_frames += 1;
        self.interval_time_ms += frame_time_ms;
        if self.interval_frames >= self.analysis_interval {
            let average = self.interval_time_ms / self.interval_frames as f64;
            self.adapt_concurrency(average);
            self.interval_frames = 0;
            self.interval_time_ms = 0.0;
        }

        self.quality.record_frame(frame_time_ms);

        let report = FrameReport {
            frame_index,
            status,
            frame_time_ms,
            draw_calls,
            triangles,
            memory_bytes,
            phase_times_ms,
            phase_status,
            disabled_phases: disabled,
            violations,
            actions,
            concurrency,
            quality: ctx.quality.quality,
            jobs_completed,
            jobs_failed,
        };

        if let Some(sink) = &self.sink {
            sink.record_frame(&report);
        }
        self.last_report = Some(report.clone());

        match fatal {
            Some(source) => {
                tracing::error!(frame = frame_index, error = %source, "unrecoverable phase failure");
                Err(PipelineError::Fatal { frame_index, source })
            }
            None => Ok(report),
        }
    }

    /// Add one task per enabled phase, chained to the previous enabled
    /// phase. Returns the disabled phases and, for every phase, the task a
    /// job scheduled "after" it should depend on.
    fn build_phases(
        &mut self,
        ctx: &Arc<FrameContext>,
        outcomes: &Arc<DashMap<RenderPhase, PhaseOutcome>>,
    ) -> Result<(Vec<RenderPhase>, HashMap<RenderPhase, TaskId>), SchedulerError> {
        let mut disabled = Vec::new();
        let mut anchors = HashMap::new();
        let mut previous: Option<TaskId> = None;

        for phase in RenderPhase::ALL {
            if !self.settings.is_enabled(phase) {
                disabled.push(phase);
                if let Some(prev) = &previous {
                    anchors.insert(phase, prev.clone());
                }
                continue;
            }
            let id = phase_task_id(phase);
            let mut task = self.phase_task(phase, id.clone(), ctx, outcomes);
            if let Some(prev) = previous.take() {
                task = task.depends_on(prev);
            }
            self.tasks.add_task(task)?;
            anchors.insert(phase, id.clone());
            previous = Some(id);
        }
        Ok((disabled, anchors))
    }

    fn phase_task(
        &self,
        phase: RenderPhase,
        id: TaskId,
        ctx: &Arc<FrameContext>,
        outcomes: &Arc<DashMap<RenderPhase, PhaseOutcome>>,
    ) -> Task {
        let executor = Arc::clone(&self.executor);
        let ctx = Arc::clone(ctx);
        let outcomes = Arc::clone(outcomes);
        let fallback = match phase {
            RenderPhase::Batch => self.last_good_batch,
            _ => None,
        };

        Task::new(id, move || async move {
            let started = Instant::now();
            let result = executor.execute(phase, &ctx).await;
            let outcome = resolve_phase(phase, result, fallback, started.elapsed());
            let ret = match (&outcome.status, &outcome.error) {
                (PhaseStatus::Failed, Some(err)) => Err(TaskError::failed(err.to_string())),
                _ => Ok(()),
            };
            outcomes.insert(phase, outcome);
            ret
        })
        .with_priority(PHASE_PRIORITY)
    }

    fn attach_jobs(&mut self, anchors: &HashMap<RenderPhase, TaskId>) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(self.jobs.len());
        for job in std::mem::take(&mut self.jobs) {
            let mut task = job.task;
            if let Some(anchor) = anchors.get(&job.after) {
                task = task.depends_on(anchor.clone());
            }
            let id = task.id.clone();
            match self.tasks.add_task(task) {
                Ok(()) => ids.push(id),
                Err(e) => tracing::warn!(job = %id, error = %e, "dropping frame job"),
            }
        }
        ids
    }

    fn job_results(&self, ids: &[TaskId]) -> (usize, usize) {
        let mut completed = 0;
        let mut failed = 0;
        for id in ids {
            match self.tasks.status(id) {
                Some(TaskStatus::Completed) => completed += 1,
                Some(TaskStatus::Failed) => failed += 1,
                _ => tracing::debug!(job = %id, "frame job never ran"),
            }
        }
        (completed, failed)
    }

    fn adapt_concurrency(&mut self, frame_time_ms: f64) {
        let current = self.tasks.max_concurrent();
        let limit = self.budget.max_frame_time_ms;
        let next = if frame_time_ms > limit {
            current.saturating_sub(1)
        } else if frame_time_ms < limit * HEADROOM_RATIO {
            current + 1
        } else {
            current
        };
        self.tasks.set_max_concurrent(next);
        let applied = self.tasks.max_concurrent();
        if applied != current {
            tracing::info!(from = current, to = applied, frame_time_ms, "task concurrency adjusted");
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Clear the cache trim request once caches have been trimmed.
    pub fn acknowledge_cache_trim(&mut self) {
        self.settings.cache_trim_requested = false;
    }

    /// Drop accumulated corrections and return to the configured settings.
    pub fn reset_settings(&mut self) {
        self.settings = self.base_settings.clone();
    }

    pub fn budget(&self) -> &PerformanceBudget {
        &self.budget
    }

    pub fn set_budget(&mut self, budget: PerformanceBudget) {
        self.budget = budget;
    }

    pub fn concurrency(&self) -> usize {
        self.tasks.max_concurrent()
    }

    pub fn quality(&self) -> &AdaptiveQualityController {
        &self.quality
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    pub fn frames_run(&self) -> u64 {
        self.frame_index
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }
}

fn phase_task_id(phase: RenderPhase) -> TaskId {
    TaskId::from(format!("phase:{}", phase.as_str()))
}

fn resolve_phase(
    phase: RenderPhase,
    result: Result<PhaseReport, PhaseError>,
    fallback: Option<PhaseReport>,
    elapsed: Duration,
) -> PhaseOutcome {
    let (status, report, error) = match result {
        Ok(report) => (PhaseStatus::Completed, report, None),
        Err(err) if err.is_fatal() => (PhaseStatus::Failed, PhaseReport::default(), Some(err)),
        Err(err) if phase.is_optional() => {
            tracing::warn!(phase = %phase, error = %err, "optional phase failed; skipping");
            (PhaseStatus::Skipped, PhaseReport::default(), Some(err))
        }
        Err(err) => match fallback {
            Some(report) => {
                tracing::warn!(phase = %phase, error = %err, "phase failed; reusing last good result");
                (PhaseStatus::Degraded, report, Some(err))
            }
            None => (PhaseStatus::Failed, PhaseReport::default(), Some(err)),
        },
    };
    PhaseOutcome {
        status,
        report,
        elapsed,
        error,
    }
}

fn frame_status<'a>(statuses: impl Iterator<Item = &'a PhaseStatus>) -> FrameStatus {
    let mut status = FrameStatus::Complete;
    for s in statuses {
        match s {
            PhaseStatus::Failed | PhaseStatus::Blocked => return FrameStatus::Failed,
            PhaseStatus::Skipped | PhaseStatus::Degraded => status = FrameStatus::Degraded,
            PhaseStatus::Completed => {}
        }
    }
    status
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
