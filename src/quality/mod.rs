//! Adaptive quality control.
//!
//! A rolling window of frame times drives a scalar quality factor in
//! `[0.5, 1.0]`; rendering settings are derived from that factor alone.

mod controller;
mod history;

pub use controller::{AdaptiveQualityController, QualityAdjustment, QualityConfig, QualitySettings};
pub use history::FrameTimeHistory;
