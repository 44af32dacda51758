//! Integration tests for the render pipeline scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use render_core::pipeline::{
    BudgetViolation, FrameContext, FrameJob, FrameStatus, OptimizationAction, PerformanceBudget, PhaseError,
    PhaseExecutor, PhaseReport, PhaseStatus, PipelineConfig, PipelineError, RenderPhase,
    RenderPipelineScheduler, RenderSettings,
};
use render_core::scheduler::TaskError;
use render_core::telemetry::MetricsStore;

#[derive(Clone, Copy)]
enum Fault {
    Fail,
    DeviceLost,
}

#[derive(Default)]
struct ScriptedPhases {
    reports: HashMap<RenderPhase, PhaseReport>,
    faults: Mutex<HashMap<RenderPhase, Fault>>,
    delay: Duration,
    calls: Mutex<Vec<(RenderPhase, Instant, Instant)>>,
    seen_settings: Mutex<Vec<RenderSettings>>,
}

impl ScriptedPhases {
    fn with_report(mut self, phase: RenderPhase, draw_calls: u64, triangles: u64) -> Self {
        self.reports.insert(phase, PhaseReport::new(draw_calls, triangles));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fault(&self, phase: RenderPhase, fault: Option<Fault>) {
        let mut faults = self.faults.lock();
        match fault {
            Some(f) => faults.insert(phase, f),
            None => faults.remove(&phase),
        };
    }

    fn phases_called(&self) -> Vec<RenderPhase> {
        self.calls.lock().iter().map(|(p, _, _)| *p).collect()
    }

    fn clear(&self) {
        self.calls.lock().clear();
        self.seen_settings.lock().clear();
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedPhases {
    async fn execute(&self, phase: RenderPhase, ctx: &FrameContext) -> Result<PhaseReport, PhaseError> {
        let started = Instant::now();
        if phase == RenderPhase::Setup {
            self.seen_settings.lock().push(ctx.settings.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fault = self.faults.lock().get(&phase).copied();
        self.calls.lock().push((phase, started, Instant::now()));
        match fault {
            Some(Fault::Fail) => Err(PhaseError::failed(phase, "scripted failure")),
            Some(Fault::DeviceLost) => Err(PhaseError::DeviceLost {
                phase,
                reason: "adapter removed".into(),
            }),
            None => Ok(self.reports.get(&phase).copied().unwrap_or_default()),
        }
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        max_concurrent: 2,
        ..PipelineConfig::default()
    }
}

fn pipeline(phases: &Arc<ScriptedPhases>, config: PipelineConfig) -> RenderPipelineScheduler {
    RenderPipelineScheduler::new(config, phases.clone())
}

#[tokio::test]
async fn phases_run_in_dependency_order() {
    let phases = Arc::new(
        ScriptedPhases::default()
            .with_report(RenderPhase::Batch, 0, 0)
            .with_report(RenderPhase::Render, 40, 9000)
            .with_report(RenderPhase::PostProcess, 2, 4)
            .with_delay(Duration::from_millis(1)),
    );
    let mut pipeline = pipeline(&phases, config());

    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(phases.phases_called(), RenderPhase::ALL.to_vec());
    let calls = phases.calls.lock().clone();
    for pair in calls.windows(2) {
        assert!(pair[1].1 >= pair[0].2, "{:?} started before {:?} finished", pair[1].0, pair[0].0);
    }
    assert_eq!(report.status, FrameStatus::Complete);
    assert_eq!(report.draw_calls, 42);
    assert_eq!(report.triangles, 9004);
    assert_eq!(report.phase_times_ms.len(), 7);
    assert!(report.phases_with(PhaseStatus::Completed).len() == 7);
    assert_eq!(report.frame_index, 0);
    assert_eq!(pipeline.frames_run(), 1);
}

#[tokio::test]
async fn disabled_phases_are_skipped_and_chain_rewired() {
    let phases = Arc::new(ScriptedPhases::default());
    let mut pipeline = pipeline(
        &phases,
        PipelineConfig {
            settings: RenderSettings {
                culling_enabled: false,
                post_process_enabled: false,
                ..RenderSettings::default()
            },
            ..config()
        },
    );

    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(
        phases.phases_called(),
        vec![
            RenderPhase::Setup,
            RenderPhase::Sort,
            RenderPhase::Batch,
            RenderPhase::Render,
            RenderPhase::Present
        ]
    );
    assert_eq!(report.disabled_phases, vec![RenderPhase::Cull, RenderPhase::PostProcess]);
    assert!(!report.phase_status.contains_key(&RenderPhase::Cull));
    assert_eq!(report.status, FrameStatus::Complete);
}

#[tokio::test]
async fn optional_phase_failure_is_skipped() {
    let phases = Arc::new(ScriptedPhases::default());
    phases.fault(RenderPhase::Sort, Some(Fault::Fail));
    let mut pipeline = pipeline(&phases, config());

    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(report.status, FrameStatus::Degraded);
    assert_eq!(report.phase_status[&RenderPhase::Sort], PhaseStatus::Skipped);
    assert_eq!(report.phase_status[&RenderPhase::Present], PhaseStatus::Completed);
    assert_eq!(phases.phases_called().len(), 7);
}

#[tokio::test]
async fn failed_batch_reuses_last_good_result() {
    let phases = Arc::new(ScriptedPhases::default().with_report(RenderPhase::Batch, 12, 300));
    let mut pipeline = pipeline(&phases, config());

    pipeline.run_frame(0).await.unwrap();
    phases.fault(RenderPhase::Batch, Some(Fault::Fail));
    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(report.status, FrameStatus::Degraded);
    assert_eq!(report.phase_status[&RenderPhase::Batch], PhaseStatus::Degraded);
    assert_eq!(report.phase_status[&RenderPhase::Present], PhaseStatus::Completed);
    assert_eq!(report.draw_calls, 12);
    assert_eq!(report.triangles, 300);
}

#[tokio::test]
async fn required_failure_without_fallback_blocks_the_rest() {
    let phases = Arc::new(ScriptedPhases::default());
    phases.fault(RenderPhase::Batch, Some(Fault::Fail));
    let mut pipeline = pipeline(&phases, config());

    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(report.status, FrameStatus::Failed);
    assert_eq!(report.phase_status[&RenderPhase::Batch], PhaseStatus::Failed);
    for phase in [RenderPhase::Render, RenderPhase::PostProcess, RenderPhase::Present] {
        assert_eq!(report.phase_status[&phase], PhaseStatus::Blocked);
    }
    assert_eq!(phases.phases_called().len(), 4);

    // The next frame is independent of this one.
    phases.fault(RenderPhase::Batch, None);
    assert_eq!(pipeline.run_frame(0).await.unwrap().status, FrameStatus::Complete);
}

#[tokio::test]
async fn device_loss_surfaces_as_fatal_error() {
    let phases = Arc::new(ScriptedPhases::default());
    phases.fault(RenderPhase::Render, Some(Fault::DeviceLost));
    let mut pipeline = pipeline(&phases, config());

    let err = pipeline.run_frame(0).await.unwrap_err();
    match err {
        PipelineError::Fatal { frame_index, source } => {
            assert_eq!(frame_index, 0);
            assert_eq!(source.phase(), RenderPhase::Render);
            assert!(source.is_fatal());
        }
        other => panic!("unexpected error: {other}"),
    }
    let last = pipeline.last_report().unwrap();
    assert_eq!(last.status, FrameStatus::Failed);
}

#[tokio::test]
async fn corrections_apply_to_the_next_frame_only() {
    let phases = Arc::new(ScriptedPhases::default().with_report(RenderPhase::Render, 2500, 10));
    let mut pipeline = pipeline(&phases, config());

    let report = pipeline.run_frame(0).await.unwrap();
    assert!(matches!(
        report.violations.as_slice(),
        [BudgetViolation::DrawCalls { actual: 2500, limit: 1000 }]
    ));
    assert_eq!(
        report.actions,
        vec![OptimizationAction::GrowBatchSize, OptimizationAction::EnableInstancing]
    );
    // This frame ran with the original settings.
    assert_eq!(phases.seen_settings.lock()[0], RenderSettings::default());

    assert_eq!(pipeline.settings().batch_size, 256);
    assert!(pipeline.settings().instancing);

    phases.clear();
    pipeline.run_frame(0).await.unwrap();
    let seen = phases.seen_settings.lock()[0].clone();
    assert_eq!(seen.batch_size, 256);
    assert!(seen.instancing);

    pipeline.reset_settings();
    assert_eq!(pipeline.settings(), &RenderSettings::default());
}

#[tokio::test]
async fn memory_violation_requests_cache_trim() {
    let phases = Arc::new(ScriptedPhases::default());
    let mut pipeline = pipeline(&phases, config());
    let limit = pipeline.budget().max_memory_bytes;

    let report = pipeline.run_frame(limit + 1).await.unwrap();

    assert!(report.actions.contains(&OptimizationAction::TrimCaches));
    assert!(report.actions.contains(&OptimizationAction::ShrinkMaxTextureSize));
    assert!(pipeline.settings().cache_trim_requested);
    assert_eq!(pipeline.settings().max_texture_size, 2048);

    pipeline.acknowledge_cache_trim();
    assert!(!pipeline.settings().cache_trim_requested);
}

#[tokio::test]
async fn concurrency_rises_with_headroom_and_falls_when_over_budget() {
    let phases = Arc::new(ScriptedPhases::default());
    let mut pipeline = pipeline(
        &phases,
        PipelineConfig {
            max_concurrent: 1,
            ..config()
        },
    );

    for _ in 0..10 {
        pipeline.run_frame(0).await.unwrap();
    }
    assert_eq!(pipeline.concurrency(), 8);

    // Every frame now takes several milliseconds against a 0.5 ms budget.
    let slow = Arc::new(ScriptedPhases::default().with_delay(Duration::from_millis(1)));
    let mut slow_pipeline = RenderPipelineScheduler::new(
        PipelineConfig {
            max_concurrent: 8,
            budget: PerformanceBudget {
                max_frame_time_ms: 0.5,
                ..PerformanceBudget::default()
            },
            ..config()
        },
        slow,
    );
    for _ in 0..10 {
        slow_pipeline.run_frame(0).await.unwrap();
    }
    assert_eq!(slow_pipeline.concurrency(), 1);
}

#[tokio::test]
async fn analysis_interval_spaces_out_adjustments() {
    let phases = Arc::new(ScriptedPhases::default());
    let mut pipeline = pipeline(
        &phases,
        PipelineConfig {
            max_concurrent: 1,
            analysis_interval: 3,
            ..config()
        },
    );

    pipeline.run_frame(0).await.unwrap();
    pipeline.run_frame(0).await.unwrap();
    assert_eq!(pipeline.concurrency(), 1);
    pipeline.run_frame(0).await.unwrap();
    assert_eq!(pipeline.concurrency(), 2);
}

#[tokio::test]
async fn frame_jobs_join_after_their_phase() {
    let phases = Arc::new(ScriptedPhases::default().with_delay(Duration::from_millis(2)));
    let mut pipeline = pipeline(
        &phases,
        PipelineConfig {
            settings: RenderSettings {
                culling_enabled: false,
                ..RenderSettings::default()
            },
            ..config()
        },
    );

    let ran_at = Arc::new(Mutex::new(None));
    let stamp = Arc::clone(&ran_at);
    pipeline.submit_job(FrameJob::blocking("upload", RenderPhase::Batch, move || {
        *stamp.lock() = Some(Instant::now());
        Ok(())
    }));
    let culled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&culled);
    pipeline.submit_job(FrameJob::new("visibility", RenderPhase::Cull, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    pipeline.submit_job(FrameJob::blocking("broken", RenderPhase::Setup, || {
        Err(TaskError::failed("no staging buffer"))
    }));
    assert_eq!(pipeline.pending_jobs(), 3);

    let report = pipeline.run_frame(0).await.unwrap();

    assert_eq!(pipeline.pending_jobs(), 0);
    assert_eq!(report.jobs_completed, 2);
    assert_eq!(report.jobs_failed, 1);
    assert_eq!(report.status, FrameStatus::Complete);
    assert_eq!(culled.load(Ordering::SeqCst), 1);

    let batch_end = phases
        .calls
        .lock()
        .iter()
        .find(|(p, _, _)| *p == RenderPhase::Batch)
        .map(|(_, _, end)| *end)
        .unwrap();
    assert!(ran_at.lock().unwrap() >= batch_end);
}

#[tokio::test]
async fn metrics_sink_sees_every_frame() {
    let phases = Arc::new(ScriptedPhases::default().with_report(RenderPhase::Render, 7, 70));
    let store = Arc::new(MetricsStore::new());
    let mut pipeline = pipeline(&phases, config()).with_metrics_sink(store.clone());

    for _ in 0..3 {
        pipeline.run_frame(1024).await.unwrap();
    }

    assert_eq!(store.counter("frames"), Some(3));
    assert_eq!(store.gauge("draw_calls"), Some(7.0));
    assert_eq!(store.gauge("memory_bytes"), Some(1024.0));
    let snapshot = store.snapshot();
    assert_eq!(snapshot.histograms["frame_time_ms"].count, 3);
    assert!(snapshot.histograms.contains_key("phase_time_ms.render"));
}
