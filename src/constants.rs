//! Pipeline-wide constants
//!
//! These values are part of the bit-exact contract shared with the compute
//! shaders in `src/shaders/`; the build script mirrors them into WGSL.

/// Frame slots in flight. The CPU writes slot `next_frame` while the GPU
/// reads slot `current_frame`.
pub const MAX_FRAMES: u32 = 2;

/// Maximum views per frame, including portal sub-views.
pub const MAX_VIEWS: u32 = 8;

/// Total per-(frame, view) buffer slices.
pub const MAX_VIEWFRAMES: u32 = MAX_FRAMES * MAX_VIEWS;

/// Contiguous surface commands grouped under one material batch.
pub const SURFACE_COMMANDS_PER_BATCH: u32 = 64;

/// Per-view atomic counter slots; also the cull shader workgroup size.
/// One counter per material, so this bounds the global material count.
pub const MAX_COMMAND_COUNTERS: u32 = 64;

/// Upper bound on surface-command batches across all materials. The
/// batch array lives in a UBO, so this is sized to the 64 KiB binding
/// limit.
pub const MAX_SURFACE_COMMAND_BATCHES: u32 = 4096;

/// Portal-distance lanes per cull workgroup.
pub const PORTAL_CULL_GROUP_SIZE: u32 = 64;

/// Depth-reduction workgroup dimensions (8x8).
pub const DEPTH_REDUCTION_GROUP_DIM: u32 = 8;

/// Textures referenced by a single draw command at most.
pub const MAX_DRAW_COMMAND_TEXTURES: usize = 64;

/// Words (u32) occupied by a bounding sphere in a surface descriptor.
pub const BOUNDING_SPHERE_WORDS: u32 = 4;

/// Default capacity of the bindless texture table.
pub const DEFAULT_BINDLESS_CAPACITY: usize = 4096;

/// Uniform regions handed to compute dispatches are aligned to this.
pub const UNIFORM_REGION_ALIGN: u64 = 256;
