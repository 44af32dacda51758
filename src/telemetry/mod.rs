//! Telemetry for render-core.
//!
//! Structured logging through `tracing`, frame spans, and write-only metrics
//! sinks (in-process store or the `metrics` facade).

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{FacadeSink, MetricsSink, NoopSink};
pub use spans::{load_span, FrameSpan, SpanExt};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
