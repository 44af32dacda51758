//! Closed-loop quality controller driven by measured frame time.

use serde::{Deserialize, Serialize};

use super::history::FrameTimeHistory;

/// Tuning for [`AdaptiveQualityController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub target_fps: f64,
    /// Ring buffer capacity (about one second of frames at the target rate).
    pub history_capacity: usize,
    /// Samples required before the controller reacts.
    pub min_samples: usize,
    /// Degrade when the average exceeds `target * degrade_ratio`.
    pub degrade_ratio: f64,
    /// Recover when the average falls below `target * recover_ratio`.
    pub recover_ratio: f64,
    pub degrade_step: f64,
    pub recover_step: f64,
    pub min_quality: f64,
    pub max_quality: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            history_capacity: 60,
            min_samples: 10,
            degrade_ratio: 1.2,
            recover_ratio: 0.8,
            degrade_step: 0.1,
            recover_step: 0.05,
            min_quality: 0.5,
            max_quality: 1.0,
        }
    }
}

/// Rendering settings derived from the scalar quality factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualitySettings {
    pub quality: f64,
    pub lod_bias: f64,
    pub shadow_quality: f64,
    pub texture_quality: f64,
    pub effects_quality: f64,
}

impl QualitySettings {
    pub fn from_quality(quality: f64) -> Self {
        Self {
            quality,
            lod_bias: 1.0 - quality,
            shadow_quality: quality,
            texture_quality: quality,
            effects_quality: quality,
        }
    }
}

/// Result of feeding one frame sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityAdjustment {
    Held,
    Lowered { from: f64, to: f64 },
    Raised { from: f64, to: f64 },
}

pub struct AdaptiveQualityController {
    config: QualityConfig,
    history: FrameTimeHistory,
    quality: f64,
}

impl AdaptiveQualityController {
    pub fn new(config: QualityConfig) -> Self {
        let history = FrameTimeHistory::new(config.history_capacity);
        let quality = config.max_quality;
        Self { config, history, quality }
    }

    /// Frame time the controller steers toward, in milliseconds.
    pub fn target_frame_time_ms(&self) -> f64 {
        1000.0 / self.config.target_fps.max(1.0)
    }

    pub fn set_target_fps(&mut self, fps: f64) {
        self.config.target_fps = fps.max(1.0);
    }

    /// Record one frame time and adjust quality.
    ///
    /// Steps are asymmetric: quality drops faster than it recovers.
    pub fn record_frame(&mut self, frame_time_ms: f64) -> QualityAdjustment {
        self.history.push(frame_time_ms);
        if self.history.len() < self.config.min_samples {
            return QualityAdjustment::Held;
        }
        let Some(average) = self.history.average() else {
            return QualityAdjustment::Held;
        };

        let target = self.target_frame_time_ms();
        let from = self.quality;
        let to = if average > target * self.config.degrade_ratio {
            quantize((from - self.config.degrade_step).max(self.config.min_quality))
        } else if average < target * self.config.recover_ratio {
            quantize((from + self.config.recover_step).min(self.config.max_quality))
        } else {
            from
        };

        if to == from {
            return QualityAdjustment::Held;
        }
        self.quality = to;
        tracing::info!(from, to, average_ms = average, target_ms = target, "quality adjusted");
        if to < from {
            QualityAdjustment::Lowered { from, to }
        } else {
            QualityAdjustment::Raised { from, to }
        }
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn settings(&self) -> QualitySettings {
        QualitySettings::from_quality(self.quality)
    }

    pub fn history(&self) -> &FrameTimeHistory {
        &self.history
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Forget history and return to full quality.
    pub fn reset(&mut self) {
        self.history.clear();
        self.quality = self.config.max_quality;
    }
}

impl Default for AdaptiveQualityController {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// Snap to a 1/1000 grid so repeated steps land on exact bounds.
fn quantize(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
