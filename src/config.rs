//! Engine configuration from environment variables and optional TOML files.
//!
//! Values come from `RENDER_CORE_*` environment variables. Missing or
//! invalid values fall back to defaults, and everything is clamped to a
//! safe floor, so loading never fails. A TOML file can be layered on top
//! with [`load_file`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `RENDER_CORE_GPU_BUDGET` | 268435456 | GPU byte budget (allocator + cache) |
//! | `RENDER_CORE_MAX_CONCURRENT_LOADS` | 4 | In-flight resource loads |
//! | `RENDER_CORE_GC_INTERVAL` | 30 | GC sweep interval (secs) |
//! | `RENDER_CORE_MAX_UNUSED` | 60 | Idle time before GC disposes an entry (secs) |
//! | `RENDER_CORE_MAX_CONCURRENT_TASKS` | cpus, max 8 | Task scheduler concurrency |
//! | `RENDER_CORE_TARGET_FPS` | 60 | Quality controller target |
//! | `RENDER_CORE_MAX_FRAME_TIME_MS` | 16.67 | Frame time budget |
//! | `RENDER_CORE_MAX_DRAW_CALLS` | 1000 | Draw call budget |
//! | `RENDER_CORE_MAX_TRIANGLES` | 1000000 | Triangle budget |
//! | `RENDER_CORE_MAX_MEMORY` | 268435456 | Memory budget (bytes) |
//! | `RENDER_CORE_HISTORY` | 60 | Frame-time history capacity |
//! | `RENDER_CORE_LOG_LEVEL` | info | Log filter |
//! | `RENDER_CORE_LOG_FORMAT` | json | `json`, `pretty` or `compact` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{PerformanceBudget, PipelineConfig};
use crate::quality::QualityConfig;
use crate::resources::CacheConfig;
use crate::scheduler::MAX_CONCURRENCY;
use crate::telemetry::{LogConfig, LogFormat};
use crate::EngineConfig;

const MIB: u64 = 1024 * 1024;
const DEFAULT_GPU_BUDGET: u64 = 256 * MIB;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub gpu_budget: u64,
    pub max_concurrent_loads: usize,
    pub gc_interval_secs: u64,
    pub max_unused_secs: u64,
    pub max_concurrent_tasks: usize,
    pub analysis_interval: u64,
    pub target_fps: f64,
    pub max_frame_time_ms: f64,
    pub max_draw_calls: u64,
    pub max_triangles: u64,
    pub max_memory: u64,
    pub history: usize,
    pub log_level: String,
    pub log_format: String,
}

impl EffectiveConfig {
    /// `(variable, value)` pairs in documentation order.
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RENDER_CORE_GPU_BUDGET", self.gpu_budget.to_string()),
            ("RENDER_CORE_MAX_CONCURRENT_LOADS", self.max_concurrent_loads.to_string()),
            ("RENDER_CORE_GC_INTERVAL", self.gc_interval_secs.to_string()),
            ("RENDER_CORE_MAX_UNUSED", self.max_unused_secs.to_string()),
            ("RENDER_CORE_MAX_CONCURRENT_TASKS", self.max_concurrent_tasks.to_string()),
            ("RENDER_CORE_TARGET_FPS", self.target_fps.to_string()),
            ("RENDER_CORE_MAX_FRAME_TIME_MS", self.max_frame_time_ms.to_string()),
            ("RENDER_CORE_MAX_DRAW_CALLS", self.max_draw_calls.to_string()),
            ("RENDER_CORE_MAX_TRIANGLES", self.max_triangles.to_string()),
            ("RENDER_CORE_MAX_MEMORY", self.max_memory.to_string()),
            ("RENDER_CORE_HISTORY", self.history.to_string()),
            ("RENDER_CORE_LOG_LEVEL", self.log_level.clone()),
            ("RENDER_CORE_LOG_FORMAT", self.log_format.clone()),
        ]
    }
}

/// All configuration after environment (and optional file) overrides.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub log: LogConfig,
}

fn env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse::<T>().ok()
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    env_value(key).unwrap_or(default)
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    env_value(key).unwrap_or(default)
}

/// Parse a positive, finite `f64` env var.
fn parse_f64(key: &str, default: f64) -> f64 {
    env_value::<f64>(key)
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, MAX_CONCURRENCY)
}

fn load_cache_config() -> CacheConfig {
    let gpu_budget = parse_u64("RENDER_CORE_GPU_BUDGET", DEFAULT_GPU_BUDGET).max(MIB);
    let max_concurrent_loads = parse_usize("RENDER_CORE_MAX_CONCURRENT_LOADS", 4).max(1);
    let gc_secs = parse_u64("RENDER_CORE_GC_INTERVAL", 30).max(1);
    let unused_secs = parse_u64("RENDER_CORE_MAX_UNUSED", 60).max(1);
    CacheConfig {
        gpu_budget,
        max_concurrent_loads,
        gc_interval: Duration::from_secs(gc_secs),
        max_unused_time: Duration::from_secs(unused_secs),
    }
}

fn load_budget() -> PerformanceBudget {
    PerformanceBudget {
        max_frame_time_ms: parse_f64("RENDER_CORE_MAX_FRAME_TIME_MS", 16.67),
        max_draw_calls: parse_u64("RENDER_CORE_MAX_DRAW_CALLS", 1000).max(1),
        max_triangles: parse_u64("RENDER_CORE_MAX_TRIANGLES", 1_000_000).max(1),
        max_memory_bytes: parse_u64("RENDER_CORE_MAX_MEMORY", DEFAULT_GPU_BUDGET).max(MIB),
    }
}

fn load_quality_config() -> QualityConfig {
    QualityConfig {
        target_fps: parse_f64("RENDER_CORE_TARGET_FPS", 60.0).clamp(1.0, 1000.0),
        history_capacity: parse_usize("RENDER_CORE_HISTORY", 60).max(1),
        ..QualityConfig::default()
    }
}

fn load_log_config() -> LogConfig {
    let level = std::env::var("RENDER_CORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let format = std::env::var("RENDER_CORE_LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let max_concurrent = parse_usize("RENDER_CORE_MAX_CONCURRENT_TASKS", default_concurrency());
    EnvConfig {
        cache: load_cache_config(),
        pipeline: PipelineConfig {
            budget: load_budget(),
            max_concurrent: max_concurrent.clamp(1, MAX_CONCURRENCY),
            quality: load_quality_config(),
            ..PipelineConfig::default()
        },
        log: load_log_config(),
    }
}

/// Documented defaults, ignoring the environment.
pub fn defaults() -> EnvConfig {
    EnvConfig {
        cache: CacheConfig::default(),
        pipeline: PipelineConfig::default(),
        log: LogConfig::default(),
    }
}

/// Environment configuration with a TOML file layered on top.
pub fn load_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = load();
    file.apply(&mut config);
    Ok(config)
}

/// TOML layout; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    cache: CacheSection,
    scheduler: SchedulerSection,
    budget: BudgetSection,
    quality: QualitySection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    gpu_budget: Option<u64>,
    max_concurrent_loads: Option<usize>,
    gc_interval_secs: Option<u64>,
    max_unused_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchedulerSection {
    max_concurrent_tasks: Option<usize>,
    analysis_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BudgetSection {
    max_frame_time_ms: Option<f64>,
    max_draw_calls: Option<u64>,
    max_triangles: Option<u64>,
    max_memory: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct QualitySection {
    target_fps: Option<f64>,
    history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
    format: Option<String>,
    file: Option<PathBuf>,
}

impl FileConfig {
    fn apply(self, config: &mut EnvConfig) {
        let cache = &mut config.cache;
        if let Some(v) = self.cache.gpu_budget {
            cache.gpu_budget = v.max(MIB);
        }
        if let Some(v) = self.cache.max_concurrent_loads {
            cache.max_concurrent_loads = v.max(1);
        }
        if let Some(v) = self.cache.gc_interval_secs {
            cache.gc_interval = Duration::from_secs(v.max(1));
        }
        if let Some(v) = self.cache.max_unused_secs {
            cache.max_unused_time = Duration::from_secs(v.max(1));
        }

        let pipeline = &mut config.pipeline;
        if let Some(v) = self.scheduler.max_concurrent_tasks {
            pipeline.max_concurrent = v.clamp(1, MAX_CONCURRENCY);
        }
        if let Some(v) = self.scheduler.analysis_interval {
            pipeline.analysis_interval = v.max(1);
        }
        if let Some(v) = self.budget.max_frame_time_ms.filter(|v| v.is_finite() && *v > 0.0) {
            pipeline.budget.max_frame_time_ms = v;
        }
        if let Some(v) = self.budget.max_draw_calls {
            pipeline.budget.max_draw_calls = v.max(1);
        }
        if let Some(v) = self.budget.max_triangles {
            pipeline.budget.max_triangles = v.max(1);
        }
        if let Some(v) = self.budget.max_memory {
            pipeline.budget.max_memory_bytes = v.max(MIB);
        }
        if let Some(v) = self.quality.target_fps.filter(|v| v.is_finite()) {
            pipeline.quality.target_fps = v.clamp(1.0, 1000.0);
        }
        if let Some(v) = self.quality.history {
            pipeline.quality.history_capacity = v.max(1);
        }

        if let Some(level) = self.log.level {
            config.log.level = level;
        }
        match self.log.format.as_deref().map(str::parse::<LogFormat>) {
            Some(Ok(format)) => config.log.format = format,
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring log format from config file"),
            None => {}
        }
        if self.log.file.is_some() {
            config.log.output_path = self.log.file;
        }
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let budget = &self.pipeline.budget;
        EffectiveConfig {
            gpu_budget: self.cache.gpu_budget,
            max_concurrent_loads: self.cache.max_concurrent_loads,
            gc_interval_secs: self.cache.gc_interval.as_secs(),
            max_unused_secs: self.cache.max_unused_time.as_secs(),
            max_concurrent_tasks: self.pipeline.max_concurrent,
            analysis_interval: self.pipeline.analysis_interval,
            target_fps: self.pipeline.quality.target_fps,
            max_frame_time_ms: budget.max_frame_time_ms,
            max_draw_calls: budget.max_draw_calls,
            max_triangles: budget.max_triangles,
            max_memory: budget.max_memory_bytes,
            history: self.pipeline.quality.history_capacity,
            log_level: self.log.level.clone(),
            log_format: format!("{:?}", self.log.format).to_lowercase(),
        }
    }

    /// Settings that load fine but interact badly. Empty when consistent.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let quality = &self.pipeline.quality;
        let budget = &self.pipeline.budget;

        let target_ms = 1000.0 / quality.target_fps;
        if target_ms > budget.max_frame_time_ms {
            warnings.push(format!(
                "RENDER_CORE_TARGET_FPS ({}) implies {:.2} ms frames, above RENDER_CORE_MAX_FRAME_TIME_MS ({})",
                quality.target_fps, target_ms, budget.max_frame_time_ms
            ));
        }
        if budget.max_memory_bytes > self.cache.gpu_budget {
            warnings.push(format!(
                "RENDER_CORE_MAX_MEMORY ({}) exceeds RENDER_CORE_GPU_BUDGET ({}); memory corrections will rarely fire",
                budget.max_memory_bytes, self.cache.gpu_budget
            ));
        }
        if quality.history_capacity < quality.min_samples {
            warnings.push(format!(
                "RENDER_CORE_HISTORY ({}) is below the {} samples the quality controller needs",
                quality.history_capacity, quality.min_samples
            ));
        }
        if self.cache.gc_interval > self.cache.max_unused_time {
            warnings.push(format!(
                "RENDER_CORE_GC_INTERVAL ({}s) exceeds RENDER_CORE_MAX_UNUSED ({}s)",
                self.cache.gc_interval.as_secs(),
                self.cache.max_unused_time.as_secs()
            ));
        }
        warnings
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache: self.cache.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}
