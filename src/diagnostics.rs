//! Health and diagnostics reporting for the render core.
//!
//! Aggregates cache, allocator, pipeline and quality state into one
//! serializable report for dashboards and the CLI.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::memory::AllocatorStats;
use crate::pipeline::{FrameStatus, RenderPipelineScheduler};
use crate::resources::CacheStats;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time engine report.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub state: HealthState,
    pub quality: f64,
    pub fragmentation_ratio: f64,
    pub gpu_usage: u64,
    pub gpu_budget: u64,
    /// `None` until the first frame has run.
    pub last_frame_ms: Option<f64>,
    pub last_frame_status: Option<FrameStatus>,
    pub concurrency: usize,
    pub frames_rendered: u64,
    pub cache_entries: usize,
    pub uptime_secs: u64,
}

/// Thresholds for the degraded state.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Allocator fragmentation above this is degraded.
    pub max_fragmentation: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { max_fragmentation: 0.5 }
    }
}

pub struct Diagnostics {
    config: DiagnosticsConfig,
    start_time: Instant,
}

impl Diagnostics {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    pub fn report(
        &self,
        cache: &CacheStats,
        allocator: Option<&AllocatorStats>,
        pipeline: &RenderPipelineScheduler,
    ) -> DiagnosticsReport {
        let last = pipeline.last_report();
        let quality = pipeline.quality().quality();
        let fragmentation_ratio = allocator.map_or(0.0, |a| a.fragmentation_ratio);

        let mut report = DiagnosticsReport {
            state: HealthState::Healthy,
            quality,
            fragmentation_ratio,
            gpu_usage: cache.gpu_usage,
            gpu_budget: cache.gpu_budget,
            last_frame_ms: last.map(|r| r.frame_time_ms),
            last_frame_status: last.map(|r| r.status),
            concurrency: pipeline.concurrency(),
            frames_rendered: pipeline.frames_run(),
            cache_entries: cache.entries,
            uptime_secs: self.start_time.elapsed().as_secs(),
        };
        let over_budget = last.is_some_and(|r| r.over_budget());
        report.state = self.compute_state(&report, pipeline.quality().config().max_quality, over_budget);
        report
    }

    fn compute_state(&self, report: &DiagnosticsReport, max_quality: f64, over_budget: bool) -> HealthState {
        if report.last_frame_status == Some(FrameStatus::Failed) {
            return HealthState::Unhealthy;
        }
        if report.gpu_usage > report.gpu_budget {
            return HealthState::Unhealthy;
        }
        if report.last_frame_status == Some(FrameStatus::Degraded) || over_budget {
            return HealthState::Degraded;
        }
        if report.quality < max_quality {
            return HealthState::Degraded;
        }
        if report.fragmentation_ratio > self.config.max_fragmentation {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticsConfig::default())
    }
}
