//! Runtime configuration for the material pipeline
//!
//! Mirrors the renderer console variables that steer culling and the debug
//! paths. Deserializable so the host can load it alongside its own config.

use serde::Deserialize;

use crate::constants::DEFAULT_BINDLESS_CAPACITY;

/// Per-material debug coloring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialDebugMode {
    #[default]
    None,
    /// Color materials of the depth pre-pass pack.
    Depth,
    /// Color opaque-pack materials.
    Opaque,
    /// Color opaque and translucent materials.
    OpaqueTransparent,
}

/// Profiler sub-group restriction applied during render submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilerSubGroupsMode {
    #[default]
    All,
    /// Only materials without blending.
    Opaque,
    /// Only materials with blending.
    Transparent,
}

/// Configuration of the material system.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialSystemConfig {
    /// Run the GPU frustum test in the cull shader.
    pub gpu_frustum_culling: bool,

    /// Run the hierarchical-depth occlusion test in the cull shader.
    pub gpu_occlusion_culling: bool,

    /// Latch the current view inputs and reuse them until cleared.
    pub lock_pvs: bool,

    /// Skip world rendering entirely.
    pub draw_world: bool,

    /// Draw world fog materials.
    pub world_fog: bool,

    /// Re-draw materials as lines on top of the shaded pass.
    pub show_tris: bool,

    /// Per-material debug coloring.
    pub debug_materials: MaterialDebugMode,

    /// Allocate the compute-shader scratch buffer at world load.
    pub debug_buffer: bool,

    /// Restrict submission to a profiler sub-group and mask blend state.
    pub profiler_subgroups: Option<ProfilerSubGroupsMode>,

    /// When profiling sub-groups, only submit this opaque material id.
    pub profiler_subgroups_stage: Option<u32>,

    /// Slots in the bindless texture table.
    pub bindless_capacity: usize,
}

impl Default for MaterialSystemConfig {
    fn default() -> Self {
        Self {
            gpu_frustum_culling: true,
            gpu_occlusion_culling: true,
            lock_pvs: false,
            draw_world: true,
            world_fog: true,
            show_tris: false,
            debug_materials: MaterialDebugMode::None,
            debug_buffer: false,
            profiler_subgroups: None,
            profiler_subgroups_stage: None,
            bindless_capacity: DEFAULT_BINDLESS_CAPACITY,
        }
    }
}
