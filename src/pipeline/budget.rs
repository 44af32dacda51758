//! Performance budget checks and the corrective actions they trigger.

use serde::{Deserialize, Serialize};

use super::settings::RenderSettings;

/// Thresholds a frame must stay under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBudget {
    pub max_frame_time_ms: f64,
    pub max_draw_calls: u64,
    pub max_triangles: u64,
    pub max_memory_bytes: u64,
}

impl Default for PerformanceBudget {
    fn default() -> Self {
        Self {
            max_frame_time_ms: 16.67,
            max_draw_calls: 1000,
            max_triangles: 1_000_000,
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

/// What a frame actually cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameMeasurement {
    pub frame_time_ms: f64,
    pub draw_calls: u64,
    pub triangles: u64,
    pub memory_bytes: u64,
}

/// A budget line the frame went over. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetViolation {
    FrameTime { actual_ms: f64, limit_ms: f64 },
    DrawCalls { actual: u64, limit: u64 },
    Triangles { actual: u64, limit: u64 },
    Memory { actual: u64, limit: u64 },
}

impl BudgetViolation {
    /// Corrective actions, applied to the next frame's settings.
    pub fn actions(&self) -> &'static [OptimizationAction] {
        use OptimizationAction::*;
        match self {
            Self::FrameTime { .. } => &[IncreaseLodBias, ShrinkBatchSize, TightenSmallObjectCulling],
            Self::DrawCalls { .. } => &[GrowBatchSize, EnableInstancing],
            Self::Triangles { .. } => &[IncreaseLodAggressiveness, TightenSmallObjectCulling],
            Self::Memory { .. } => &[TrimCaches, ShrinkMaxTextureSize],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameTime { .. } => "frame_time",
            Self::DrawCalls { .. } => "draw_calls",
            Self::Triangles { .. } => "triangles",
            Self::Memory { .. } => "memory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAction {
    IncreaseLodBias,
    ShrinkBatchSize,
    TightenSmallObjectCulling,
    GrowBatchSize,
    EnableInstancing,
    IncreaseLodAggressiveness,
    TrimCaches,
    ShrinkMaxTextureSize,
}

const MAX_LOD_BIAS: f64 = 4.0;
const MAX_LOD_AGGRESSIVENESS: f64 = 4.0;
const MAX_CULL_PX: f64 = 16.0;
const MIN_BATCH_SIZE: usize = 16;
const MAX_BATCH_SIZE: usize = 4096;
const MIN_TEXTURE_SIZE: u32 = 256;

impl OptimizationAction {
    pub fn apply(&self, settings: &mut RenderSettings) {
        match self {
            Self::IncreaseLodBias => {
                settings.lod_distance_bias = (settings.lod_distance_bias + 0.25).min(MAX_LOD_BIAS);
            }
            Self::ShrinkBatchSize => {
                settings.batch_size = (settings.batch_size * 3 / 4).max(MIN_BATCH_SIZE);
            }
            Self::TightenSmallObjectCulling => {
                settings.small_object_cull_px = (settings.small_object_cull_px + 1.0).min(MAX_CULL_PX);
            }
            Self::GrowBatchSize => {
                settings.batch_size = (settings.batch_size * 2).min(MAX_BATCH_SIZE);
            }
            Self::EnableInstancing => settings.instancing = true,
            Self::IncreaseLodAggressiveness => {
                settings.lod_aggressiveness =
                    (settings.lod_aggressiveness + 0.25).min(MAX_LOD_AGGRESSIVENESS);
            }
            Self::TrimCaches => settings.cache_trim_requested = true,
            Self::ShrinkMaxTextureSize => {
                settings.max_texture_size = (settings.max_texture_size / 2).max(MIN_TEXTURE_SIZE);
            }
        }
    }
}

impl PerformanceBudget {
    /// Compare a frame against every budget line.
    pub fn check(&self, frame: &FrameMeasurement) -> Vec<BudgetViolation> {
        let mut violations = Vec::new();
        if frame.frame_time_ms > self.max_frame_time_ms {
            violations.push(BudgetViolation::FrameTime {
                actual_ms: frame.frame_time_ms,
                limit_ms: self.max_frame_time_ms,
            });
        }
        if frame.draw_calls > self.max_draw_calls {
            violations.push(BudgetViolation::DrawCalls {
                actual: frame.draw_calls,
                limit: self.max_draw_calls,
            });
        }
        if frame.triangles > self.max_triangles {
            violations.push(BudgetViolation::Triangles {
                actual: frame.triangles,
                limit: self.max_triangles,
            });
        }
        if frame.memory_bytes > self.max_memory_bytes {
            violations.push(BudgetViolation::Memory {
                actual: frame.memory_bytes,
                limit: self.max_memory_bytes,
            });
        }
        violations
    }
}
