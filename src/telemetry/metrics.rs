//! Write-only metrics sinks.
//!
//! The pipeline and engine push frame, cache and allocator figures into a
//! [`MetricsSink`]; nothing in the core reads them back.

use crate::memory::AllocatorStats;
use crate::pipeline::FrameReport;
use crate::resources::CacheStats;

use super::store::MetricsStore;

/// Observer for engine measurements.
pub trait MetricsSink: Send + Sync {
    fn record_frame(&self, report: &FrameReport);
    fn record_cache(&self, stats: &CacheStats);
    fn record_allocator(&self, stats: &AllocatorStats);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_frame(&self, _report: &FrameReport) {}
    fn record_cache(&self, _stats: &CacheStats) {}
    fn record_allocator(&self, _stats: &AllocatorStats) {}
}

/// Forwards to the `metrics` facade so any installed recorder sees values.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

impl MetricsSink for FacadeSink {
    fn record_frame(&self, report: &FrameReport) {
        metrics::counter!("render_core_frames_total").increment(1);
        metrics::histogram!("render_core_frame_time_ms").record(report.frame_time_ms);
        metrics::gauge!("render_core_draw_calls").set(report.draw_calls as f64);
        metrics::gauge!("render_core_triangles").set(report.triangles as f64);
        metrics::gauge!("render_core_task_concurrency").set(report.concurrency as f64);
        metrics::gauge!("render_core_quality").set(report.quality);
        if report.over_budget() {
            metrics::counter!("render_core_budget_violations_total").increment(report.violations.len() as u64);
        }
        for (phase, ms) in &report.phase_times_ms {
            metrics::histogram!("render_core_phase_time_ms", "phase" => phase.as_str()).record(*ms);
        }
    }

    fn record_cache(&self, stats: &CacheStats) {
        metrics::gauge!("render_core_cache_entries").set(stats.entries as f64);
        metrics::gauge!("render_core_gpu_usage_bytes").set(stats.gpu_usage as f64);
        metrics::gauge!("render_core_pending_loads").set(stats.pending_loads as f64);
        metrics::gauge!("render_core_in_flight_loads").set(stats.in_flight_loads as f64);
    }

    fn record_allocator(&self, stats: &AllocatorStats) {
        metrics::gauge!("render_core_allocator_free_bytes").set(stats.free as f64);
        metrics::gauge!("render_core_allocator_fragmentation").set(stats.fragmentation_ratio);
    }
}

impl MetricsSink for MetricsStore {
    fn record_frame(&self, report: &FrameReport) {
        self.increment_counter("frames", 1);
        self.record_histogram("frame_time_ms", report.frame_time_ms);
        self.set_gauge("draw_calls", report.draw_calls as f64);
        self.set_gauge("triangles", report.triangles as f64);
        self.set_gauge("memory_bytes", report.memory_bytes as f64);
        self.set_gauge("concurrency", report.concurrency as f64);
        self.set_gauge("quality", report.quality);
        if report.over_budget() {
            self.increment_counter("budget_violations", report.violations.len() as u64);
        }
        if report.jobs_failed > 0 {
            self.increment_counter("jobs_failed", report.jobs_failed as u64);
        }
        for (phase, ms) in &report.phase_times_ms {
            self.record_histogram(&format!("phase_time_ms.{phase}"), *ms);
        }
    }

    fn record_cache(&self, stats: &CacheStats) {
        self.set_gauge("cache.entries", stats.entries as f64);
        self.set_gauge("cache.gpu_usage", stats.gpu_usage as f64);
        self.set_gauge("cache.hits", stats.hits as f64);
        self.set_gauge("cache.misses", stats.misses as f64);
        self.set_gauge("cache.evictions", stats.evictions as f64);
    }

    fn record_allocator(&self, stats: &AllocatorStats) {
        self.set_gauge("allocator.free", stats.free as f64);
        self.set_gauge("allocator.fragmentation", stats.fragmentation_ratio);
        self.set_gauge("allocator.free_blocks", stats.free_blocks as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::pipeline::{BudgetViolation, FrameStatus, RenderPhase};

    fn report(violations: Vec<BudgetViolation>, jobs_failed: usize) -> FrameReport {
        let mut phase_times_ms = BTreeMap::new();
        phase_times_ms.insert(RenderPhase::Render, 4.0);
        phase_times_ms.insert(RenderPhase::Present, 1.0);
        FrameReport {
            frame_index: 0,
            status: FrameStatus::Complete,
            frame_time_ms: 5.0,
            draw_calls: 12,
            triangles: 3000,
            memory_bytes: 1024,
            phase_times_ms,
            phase_status: BTreeMap::new(),
            disabled_phases: Vec::new(),
            violations,
            actions: Vec::new(),
            concurrency: 4,
            quality: 0.9,
            jobs_completed: 0,
            jobs_failed,
        }
    }

    #[test]
    fn store_sink_records_frames() {
        let store = MetricsStore::new();
        store.record_frame(&report(Vec::new(), 0));
        store.record_frame(&report(
            vec![
                BudgetViolation::DrawCalls { actual: 12, limit: 10 },
                BudgetViolation::Memory { actual: 1024, limit: 512 },
            ],
            1,
        ));

        assert_eq!(store.counter("frames"), Some(2));
        assert_eq!(store.counter("budget_violations"), Some(2));
        assert_eq!(store.counter("jobs_failed"), Some(1));
        assert_eq!(store.gauge("draw_calls"), Some(12.0));
        assert_eq!(store.gauge("quality"), Some(0.9));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.histograms["frame_time_ms"].count, 2);
        assert_eq!(snapshot.histograms["phase_time_ms.render"].mean, 4.0);
        assert!(snapshot.histograms.contains_key("phase_time_ms.present"));
    }

    #[test]
    fn store_sink_records_cache_and_allocator() {
        let store = MetricsStore::new();
        store.record_cache(&CacheStats {
            entries: 3,
            gpu_usage: 4096,
            hits: 7,
            ..CacheStats::default()
        });
        store.record_allocator(&AllocatorStats {
            free: 100,
            free_blocks: 2,
            fragmentation_ratio: 0.25,
            ..AllocatorStats::default()
        });

        assert_eq!(store.gauge("cache.entries"), Some(3.0));
        assert_eq!(store.gauge("cache.gpu_usage"), Some(4096.0));
        assert_eq!(store.gauge("cache.hits"), Some(7.0));
        assert_eq!(store.gauge("allocator.free"), Some(100.0));
        assert_eq!(store.gauge("allocator.free_blocks"), Some(2.0));
        assert_eq!(store.gauge("allocator.fragmentation"), Some(0.25));
    }

    #[test]
    fn facade_without_recorder_is_a_noop() {
        let sink: &dyn MetricsSink = &FacadeSink;
        sink.record_frame(&report(vec![BudgetViolation::Triangles { actual: 2, limit: 1 }], 0));
        sink.record_cache(&CacheStats::default());
        sink.record_allocator(&AllocatorStats::default());

        NoopSink.record_frame(&report(Vec::new(), 0));
    }
}
