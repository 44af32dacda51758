//! Render pipeline scheduling.
//!
//! Every frame becomes a chain of phase tasks
//! (Setup, Cull, Sort, Batch, Render, PostProcess, Present) run on the task
//! scheduler, then timed and checked against a performance budget.

mod budget;
mod phase;
mod report;
mod scheduler;
mod settings;

pub use budget::{BudgetViolation, FrameMeasurement, OptimizationAction, PerformanceBudget};
pub use phase::{FrameContext, PhaseError, PhaseExecutor, PhaseReport, RenderPhase};
pub use report::{FrameJob, FrameReport, FrameStatus, PhaseOutcome, PhaseStatus};
pub use scheduler::{PipelineConfig, PipelineError, RenderPipelineScheduler};
pub use settings::RenderSettings;
