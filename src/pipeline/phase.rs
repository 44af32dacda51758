//! Render phases and the executor seam that implements them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::budget::PerformanceBudget;
use super::settings::RenderSettings;
use crate::quality::QualitySettings;

/// Frame phases in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderPhase {
    Setup,
    Cull,
    Sort,
    Batch,
    Render,
    PostProcess,
    Present,
}

impl RenderPhase {
    pub const ALL: [RenderPhase; 7] = [
        RenderPhase::Setup,
        RenderPhase::Cull,
        RenderPhase::Sort,
        RenderPhase::Batch,
        RenderPhase::Render,
        RenderPhase::PostProcess,
        RenderPhase::Present,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Cull => "cull",
            Self::Sort => "sort",
            Self::Batch => "batch",
            Self::Render => "render",
            Self::PostProcess => "post_process",
            Self::Present => "present",
        }
    }

    /// Phases a frame can do without. A failure here skips the phase.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Cull | Self::Sort | Self::PostProcess)
    }
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work counts reported by a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub draw_calls: u64,
    pub triangles: u64,
}

impl PhaseReport {
    pub fn new(draw_calls: u64, triangles: u64) -> Self {
        Self { draw_calls, triangles }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Phase {phase} failed: {reason}")]
    Failed { phase: RenderPhase, reason: String },

    #[error("Graphics device lost during {phase}: {reason}")]
    DeviceLost { phase: RenderPhase, reason: String },
}

impl PhaseError {
    pub fn failed(phase: RenderPhase, reason: impl Into<String>) -> Self {
        Self::Failed { phase, reason: reason.into() }
    }

    /// Errors the frame loop cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost { .. })
    }

    pub fn phase(&self) -> RenderPhase {
        match self {
            Self::Failed { phase, .. } | Self::DeviceLost { phase, .. } => *phase,
        }
    }
}

/// Per-frame inputs handed to every phase.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_index: u64,
    pub settings: RenderSettings,
    pub quality: QualitySettings,
    pub budget: PerformanceBudget,
}

/// Implements the body of each render phase.
///
/// The pipeline only observes success, failure and duration.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, phase: RenderPhase, ctx: &FrameContext) -> Result<PhaseReport, PhaseError>;
}
