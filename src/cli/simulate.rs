// Copyright 2024-2026 render-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! `simulate` subcommand: drive the engine with synthetic phases and
//! textures and print a JSON diagnostics report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{self, EnvConfig};
use crate::diagnostics::DiagnosticsReport;
use crate::pipeline::{
    FrameContext, FrameStatus, PhaseError, PhaseExecutor, PhaseReport, PipelineError, RenderPhase,
};
use crate::resources::{LoadError, Resource, ResourceId, ResourceKind};
use crate::telemetry::{init_logging, LogError, MetricsSnapshot, MetricsStore};
use crate::Engine;

const DEFAULT_FRAMES: u64 = 120;
const TEXTURE_POOL: u64 = 16;
const TEXTURE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulateOptions {
    pub frames: u64,
    /// Scene weight; 1.0 is a scene that fits the default budget.
    pub load: f64,
    pub config_file: Option<PathBuf>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            frames: DEFAULT_FRAMES,
            load: 1.0,
            config_file: None,
        }
    }
}

impl SimulateOptions {
    /// Parse `[FRAMES] [--load FACTOR] [--config FILE]`.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut opts = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--load" => {
                    let value = args.get(i + 1).ok_or("Missing value for --load")?;
                    opts.load = value
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && *v > 0.0)
                        .ok_or_else(|| format!("Invalid load factor: {value}"))?;
                    i += 2;
                }
                "--config" => {
                    let value = args.get(i + 1).ok_or("Missing value for --config")?;
                    opts.config_file = Some(PathBuf::from(value));
                    i += 2;
                }
                other => {
                    opts.frames = other
                        .parse()
                        .map_err(|_| format!("Unknown argument: {other}"))?;
                    i += 1;
                }
            }
        }
        Ok(opts)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub frames: u64,
    pub complete: u64,
    pub degraded: u64,
    pub failed: u64,
    pub average_frame_ms: f64,
    pub diagnostics: DiagnosticsReport,
    pub metrics: MetricsSnapshot,
}

/// Phase bodies that sleep for a cost derived from scene load, quality and
/// the current render settings.
struct SyntheticPhases {
    load: f64,
}

impl SyntheticPhases {
    fn base_cost_ms(phase: RenderPhase) -> f64 {
        match phase {
            RenderPhase::Setup => 0.2,
            RenderPhase::Cull => 0.6,
            RenderPhase::Sort => 0.4,
            RenderPhase::Batch => 0.8,
            RenderPhase::Render => 3.0,
            RenderPhase::PostProcess => 1.0,
            RenderPhase::Present => 0.2,
        }
    }
}

#[async_trait]
impl PhaseExecutor for SyntheticPhases {
    async fn execute(&self, phase: RenderPhase, ctx: &FrameContext) -> Result<PhaseReport, PhaseError> {
        let detail = 0.5 + 0.5 * ctx.quality.quality;
        let cost_ms = Self::base_cost_ms(phase) * self.load * detail;
        tokio::time::sleep(Duration::from_secs_f64(cost_ms / 1000.0)).await;

        if phase != RenderPhase::Render {
            return Ok(PhaseReport::default());
        }
        let objects = (20_000.0 * self.load) as u64;
        let batch = ctx.settings.batch_size.max(1) as u64;
        let mut draw_calls = objects.div_ceil(batch);
        if ctx.settings.instancing {
            draw_calls = draw_calls.div_ceil(2);
        }
        let lod = (ctx.settings.lod_distance_bias * ctx.settings.lod_aggressiveness).max(1.0);
        let triangles = (objects as f64 * 60.0 * detail / lod) as u64;
        Ok(PhaseReport::new(draw_calls, triangles))
    }
}

struct SyntheticTexture {
    bytes: u64,
}

#[async_trait]
impl Resource for SyntheticTexture {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Texture
    }

    fn byte_size(&self) -> u64 {
        self.bytes
    }

    async fn load(&self) -> Result<(), LoadError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    fn dispose(&self) {}
}

/// Run the simulation against `config` and return the final summary.
pub async fn simulate(opts: &SimulateOptions, config: &EnvConfig) -> Result<SimulationSummary, PipelineError> {
    let store = Arc::new(MetricsStore::new());
    let mut engine = Engine::with_metrics_sink(
        config.engine_config(),
        Arc::new(SyntheticPhases { load: opts.load }),
        store.clone(),
    );

    let (mut complete, mut degraded, mut failed) = (0, 0, 0);
    let mut total_ms = 0.0;
    for frame in 0..opts.frames {
        let id = format!("texture-{}", frame % TEXTURE_POOL);
        match engine.cache().acquire(id.as_str(), || SyntheticTexture { bytes: TEXTURE_BYTES }, 0).await {
            Ok(_) => engine.cache().release(&ResourceId::from(id.as_str())),
            Err(e) => tracing::warn!(resource = %id, error = %e, "synthetic texture failed to load"),
        }

        let report = match engine.render_frame().await {
            Ok(report) => report,
            Err(e) => {
                engine.shutdown().await;
                return Err(e);
            }
        };
        match report.status {
            FrameStatus::Complete => complete += 1,
            FrameStatus::Degraded => degraded += 1,
            FrameStatus::Failed => failed += 1,
        }
        total_ms += report.frame_time_ms;
    }

    let diagnostics = engine.diagnostics();
    engine.shutdown().await;

    Ok(SimulationSummary {
        frames: opts.frames,
        complete,
        degraded,
        failed,
        average_frame_ms: if opts.frames == 0 { 0.0 } else { total_ms / opts.frames as f64 },
        diagnostics,
        metrics: store.snapshot(),
    })
}

/// CLI entry point. Returns the process exit code.
pub async fn run_simulate(args: &[String]) -> i32 {
    let opts = match SimulateOptions::from_args(args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Usage: render-core-cli simulate [FRAMES] [--load FACTOR] [--config FILE]");
            return 2;
        }
    };
    let config = match &opts.config_file {
        Some(path) => match config::load_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return 2;
            }
        },
        None => config::load(),
    };
    match init_logging(&config.log) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(e) => eprintln!("Logging disabled: {e}"),
    }

    match simulate(&opts, &config).await {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(text) => {
                println!("{text}");
                0
            }
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Err(e) => {
            eprintln!("Simulation aborted: {e}");
            1
        }
    }
}
