//! End-to-end tests for the engine wiring: cache, allocator, pipeline,
//! GC task and metrics sink together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use render_core::diagnostics::HealthState;
use render_core::pipeline::{
    FrameContext, FrameStatus, PerformanceBudget, PhaseError, PhaseExecutor, PhaseReport, PipelineConfig,
    RenderPhase,
};
use render_core::resources::{CacheConfig, LoadError, Resource, ResourceId, ResourceKind, ResourceState};
use render_core::telemetry::MetricsStore;
use render_core::{Engine, EngineConfig};

struct QuietPhases;

#[async_trait]
impl PhaseExecutor for QuietPhases {
    async fn execute(&self, _phase: RenderPhase, _ctx: &FrameContext) -> Result<PhaseReport, PhaseError> {
        Ok(PhaseReport::new(1, 100))
    }
}

struct DeviceLoss;

#[async_trait]
impl PhaseExecutor for DeviceLoss {
    async fn execute(&self, phase: RenderPhase, _ctx: &FrameContext) -> Result<PhaseReport, PhaseError> {
        match phase {
            RenderPhase::Present => Err(PhaseError::DeviceLost {
                phase,
                reason: "surface lost".into(),
            }),
            _ => Ok(PhaseReport::default()),
        }
    }
}

struct Texture {
    size: u64,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl Resource for Texture {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Texture
    }

    fn byte_size(&self) -> u64 {
        self.size
    }

    async fn load(&self) -> Result<(), LoadError> {
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn small_engine_config() -> EngineConfig {
    EngineConfig {
        cache: CacheConfig {
            gpu_budget: 1000,
            ..CacheConfig::default()
        },
        pipeline: PipelineConfig {
            max_concurrent: 2,
            budget: PerformanceBudget {
                max_memory_bytes: 500,
                ..PerformanceBudget::default()
            },
            ..PipelineConfig::default()
        },
    }
}

#[tokio::test]
async fn memory_violation_trims_cache_before_next_frame() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new(small_engine_config(), Arc::new(QuietPhases));

    let counter = disposed.clone();
    engine
        .cache()
        .acquire("backdrop", move || Texture { size: 800, disposed: counter }, 0)
        .await
        .unwrap();
    engine.cache().release(&ResourceId::from("backdrop"));
    assert_eq!(engine.cache().placement(&"backdrop".into()).map(|b| b.offset), Some(0));

    let first = engine.render_frame().await.unwrap();
    assert_eq!(first.memory_bytes, 800);
    assert!(engine.pipeline().settings().cache_trim_requested);

    let second = engine.render_frame().await.unwrap();
    assert_eq!(second.memory_bytes, 0);
    assert!(!engine.pipeline().settings().cache_trim_requested);
    assert_eq!(engine.cache().state(&"backdrop".into()), None);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn referenced_resources_survive_trimming() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new(small_engine_config(), Arc::new(QuietPhases));

    let counter = disposed.clone();
    engine
        .cache()
        .acquire("hud", move || Texture { size: 600, disposed: counter }, 0)
        .await
        .unwrap();

    engine.render_frame().await.unwrap();
    let report = engine.render_frame().await.unwrap();

    assert_eq!(engine.cache().state(&"hud".into()), Some(ResourceState::Loaded));
    assert_eq!(report.memory_bytes, 600);
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    let cache = engine.cache().clone();
    engine.shutdown().await;
    assert!(cache.is_empty());
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn diagnostics_and_metrics_reflect_engine_state() {
    let store = Arc::new(MetricsStore::new());
    let mut engine = Engine::with_metrics_sink(EngineConfig::default(), Arc::new(QuietPhases), store.clone());

    let fresh = engine.diagnostics();
    assert_eq!(fresh.state, HealthState::Healthy);
    assert_eq!(fresh.frames_rendered, 0);
    assert_eq!(fresh.last_frame_ms, None);

    for _ in 0..3 {
        engine.render_frame().await.unwrap();
    }

    let report = engine.diagnostics();
    assert_eq!(report.frames_rendered, 3);
    assert_eq!(report.last_frame_status, Some(FrameStatus::Complete));
    assert_eq!(report.gpu_budget, CacheConfig::default().gpu_budget);
    assert_eq!(report.fragmentation_ratio, 0.0);
    assert_eq!(report.state, HealthState::Healthy);

    assert_eq!(store.counter("frames"), Some(3));
    assert_eq!(store.gauge("cache.entries"), Some(0.0));
    assert_eq!(store.gauge("allocator.free"), Some(CacheConfig::default().gpu_budget as f64));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["state"], "Healthy");

    engine.shutdown().await;
}

#[tokio::test]
async fn device_loss_reaches_the_caller() {
    let mut engine = Engine::new(EngineConfig::default(), Arc::new(DeviceLoss));

    let err = engine.render_frame().await.unwrap_err();
    assert!(err.to_string().contains("surface lost"));
    assert_eq!(engine.diagnostics().state, HealthState::Unhealthy);

    engine.shutdown().await;
}

#[tokio::test]
async fn engine_gc_task_collects_idle_resources() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let config = EngineConfig {
        cache: CacheConfig {
            gc_interval: Duration::from_millis(20),
            max_unused_time: Duration::from_millis(5),
            ..CacheConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(QuietPhases));

    let counter = disposed.clone();
    engine
        .cache()
        .acquire("splash", move || Texture { size: 64, disposed: counter }, 0)
        .await
        .unwrap();
    engine.cache().release(&ResourceId::from("splash"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.cache().is_empty());
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    engine.shutdown().await;
}
