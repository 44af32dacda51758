//! Mutable per-frame render configuration.

use serde::{Deserialize, Serialize};

use super::phase::RenderPhase;

/// Configuration baked into each frame's phase tasks. Optimization actions
/// mutate it between frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub culling_enabled: bool,
    pub sorting_enabled: bool,
    pub post_process_enabled: bool,
    pub lod_distance_bias: f64,
    pub lod_aggressiveness: f64,
    pub batch_size: usize,
    pub instancing: bool,
    /// Objects smaller than this many pixels on screen are culled.
    pub small_object_cull_px: f64,
    pub max_texture_size: u32,
    /// Set by a memory violation; cleared once caches are trimmed.
    #[serde(default)]
    pub cache_trim_requested: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            culling_enabled: true,
            sorting_enabled: true,
            post_process_enabled: true,
            lod_distance_bias: 1.0,
            lod_aggressiveness: 1.0,
            batch_size: 128,
            instancing: false,
            small_object_cull_px: 1.0,
            max_texture_size: 4096,
            cache_trim_requested: false,
        }
    }
}

impl RenderSettings {
    pub fn is_enabled(&self, phase: RenderPhase) -> bool {
        match phase {
            RenderPhase::Cull => self.culling_enabled,
            RenderPhase::Sort => self.sorting_enabled,
            RenderPhase::PostProcess => self.post_process_enabled,
            _ => true,
        }
    }

    pub fn enabled_phases(&self) -> impl Iterator<Item = RenderPhase> + '_ {
        RenderPhase::ALL.into_iter().filter(|p| self.is_enabled(*p))
    }
}
