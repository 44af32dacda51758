//! Span helpers for frame and load tracing.

use std::fmt::Display;

use tracing::field::{self, Empty};
use tracing::{info_span, Span};

use crate::pipeline::FrameReport;

/// Outcome recording for spans opened with an empty `status` field.
pub trait SpanExt {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>);
}

impl SpanExt for Span {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>) {
        if let Err(e) = result {
            self.record("status", "error");
            self.record("error.message", field::display(e));
        } else {
            self.record("status", "ok");
        }
    }
}

/// Per-frame span. Timing and status are filled in when the frame ends.
pub struct FrameSpan;

impl FrameSpan {
    pub fn new(frame_index: u64) -> Span {
        info_span!(
            "frame",
            frame = frame_index,
            frame_time_ms = Empty,
            draw_calls = Empty,
            status = Empty,
            error.message = Empty,
        )
    }

    /// Overwrites the generic `ok` status with the frame's own status.
    pub fn record_report(span: &Span, report: &FrameReport) {
        span.record("frame_time_ms", report.frame_time_ms);
        span.record("draw_calls", report.draw_calls);
        span.record("status", field::debug(report.status));
    }
}

/// Span for one resource load.
pub fn load_span(resource: &str, bytes: u64) -> Span {
    tracing::debug_span!("resource_load", resource = %resource, bytes, status = Empty, error.message = Empty)
}
