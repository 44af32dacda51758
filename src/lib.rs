//! render-core
//!
//! Scheduling and resource core for a GPU-accelerated 2D render engine.
//! The core decides what runs when and what lives in GPU memory; drawing
//! itself is supplied by the host through [`pipeline::PhaseExecutor`] and
//! [`resources::Resource`].
//!
//! # Components
//!
//! - **memory**: first-fit free-list allocator over a fixed GPU byte budget
//! - **resources**: reference-counted resource cache with LRU eviction,
//!   bounded concurrent loading and periodic GC
//! - **scheduler**: priority-ordered DAG task scheduler with a concurrency cap
//! - **pipeline**: per-frame phase DAG, budget checks and corrective actions
//! - **quality**: frame-time driven quality factor in `[0.5, 1.0]`
//! - **telemetry**: logging, spans and write-only metrics sinks

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod memory;
pub mod pipeline;
pub mod quality;
pub mod resources;
pub mod scheduler;
pub mod telemetry;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use diagnostics::{Diagnostics, DiagnosticsReport};
use memory::FreeListAllocator;
use pipeline::{FrameReport, PhaseExecutor, PipelineConfig, PipelineError, RenderPipelineScheduler};
use resources::{spawn_gc, CacheConfig, ResourceCache};
use telemetry::{MetricsSink, NoopSink};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
}

/// The render core: resource cache, GPU allocator, frame pipeline and the
/// background GC task.
pub struct Engine {
    cache: ResourceCache,
    pipeline: RenderPipelineScheduler,
    sink: Arc<dyn MetricsSink>,
    diagnostics: Diagnostics,
    gc_shutdown: CancellationToken,
    gc_handle: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build the engine and start the GC loop. Must be called from within a
    /// tokio runtime.
    pub fn new(config: EngineConfig, executor: Arc<dyn PhaseExecutor>) -> Self {
        Self::with_metrics_sink(config, executor, Arc::new(NoopSink))
    }

    pub fn with_metrics_sink(
        config: EngineConfig,
        executor: Arc<dyn PhaseExecutor>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let allocator = FreeListAllocator::new(config.cache.gpu_budget);
        let cache = ResourceCache::with_allocator(config.cache, Box::new(allocator));
        let pipeline = RenderPipelineScheduler::new(config.pipeline, executor).with_metrics_sink(Arc::clone(&sink));
        let gc_shutdown = CancellationToken::new();
        let gc_handle = spawn_gc(cache.clone(), gc_shutdown.clone());

        tracing::info!(
            gpu_budget = cache.config().gpu_budget,
            concurrency = pipeline.concurrency(),
            "render core started"
        );

        Self {
            cache,
            pipeline,
            sink,
            diagnostics: Diagnostics::default(),
            gc_shutdown,
            gc_handle: Some(gc_handle),
        }
    }

    /// Run one frame.
    ///
    /// A cache trim requested by the previous frame's memory violation is
    /// carried out first, so the frame is measured against trimmed usage.
    pub async fn render_frame(&mut self) -> Result<FrameReport, PipelineError> {
        if self.pipeline.settings().cache_trim_requested {
            let evicted = self.cache.evict_unused();
            tracing::debug!(evicted, "cache trimmed for memory budget");
            self.pipeline.acknowledge_cache_trim();
        }

        let result = self.pipeline.run_frame(self.cache.gpu_usage()).await;

        self.sink.record_cache(&self.cache.stats());
        if let Some(stats) = self.cache.allocator_stats() {
            self.sink.record_allocator(&stats);
        }
        result
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn pipeline(&self) -> &RenderPipelineScheduler {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut RenderPipelineScheduler {
        &mut self.pipeline
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        let allocator = self.cache.allocator_stats();
        self.diagnostics
            .report(&self.cache.stats(), allocator.as_ref(), &self.pipeline)
    }

    /// Stop the GC loop and dispose every cached resource.
    pub async fn shutdown(mut self) {
        self.gc_shutdown.cancel();
        if let Some(handle) = self.gc_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "gc task ended abnormally");
            }
        }
        self.cache.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.gc_shutdown.cancel();
    }
}
