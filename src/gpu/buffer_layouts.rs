//! Centralized GPU buffer layout definitions
//!
//! Single source of truth for the structures, strides, and binding indices
//! shared with the compute shaders in `src/shaders/`. Changing anything
//! here changes the wire contract; the shader sources index these layouts
//! by the same constants (mirrored into WGSL by the build script).

use bytemuck::{Pod, Zeroable};

use crate::constants::{
    BOUNDING_SPHERE_WORDS, MAX_COMMAND_COUNTERS, MAX_VIEWFRAMES, SURFACE_COMMANDS_PER_BATCH,
};

/// Indirect indexed draw arguments, matching the GPU's expected layout.
/// Total size: 20 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct IndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Carries the material SSBO slot; read by the vertex stage.
    pub base_instance: u32,
}

/// A per-(surface, stage, view) command toggled by the cull shader.
/// Total size: 24 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SurfaceCommand {
    /// 1 after the cull pass when the surface is visible this view.
    pub enabled: u32,
    pub draw_command: IndirectCommand,
}

/// One batch entry of the batch UBO: which material a run of
/// `SURFACE_COMMANDS_PER_BATCH` commands belongs to, and where that run
/// starts. Padded to the 16-byte UBO array stride.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SurfaceCommandBatch {
    pub material_id: u32,
    pub batch_offset: u32,
    pub _pad: [u32; 2],
}

/// Portal probe data written by the cull shader and read back on the CPU.
/// `distance == -1` means the portal was culled. Total size: 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PortalSurfaceData {
    pub origin: [f32; 3],
    pub radius: f32,
    pub distance: f32,
    pub draw_surf_id: u32,
    pub _pad: [u32; 2],
}

impl Default for PortalSurfaceData {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            radius: 0.0,
            distance: -1.0,
            draw_surf_id: 0,
            _pad: [0; 2],
        }
    }
}

/// Per-dispatch uniforms of the cull pass. One 256-byte region per view.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct CullUniforms {
    pub frustum_planes: [[f32; 4]; 6],
    pub view_matrix: [[f32; 4]; 4],
    pub camera_position: [f32; 3],
    pub frame: u32,
    pub view_id: u32,
    pub total_draw_surfs: u32,
    pub total_portals: u32,
    pub first_portal_group: u32,
    pub surface_commands_offset: u32,
    pub use_frustum_culling: u32,
    pub use_occlusion_culling: u32,
    pub view_width: u32,
    pub view_height: u32,
    pub p00: f32,
    pub p11: f32,
    /// Stride of one surface descriptor in words (4 + max stages).
    pub descriptor_words: u32,
    pub _reserved: [[f32; 4]; 2],
}

/// Per-dispatch uniforms of the depth-reduction pass, one region per
/// mip level.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct DepthReductionUniforms {
    pub view_width: u32,
    pub view_height: u32,
    pub initial_level: u32,
    pub _pad: u32,
}

/// Uniforms of the per-frame counter clear.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct ClearUniforms {
    pub frame: u32,
    pub _pad: [u32; 3],
}

pub const INDIRECT_COMMAND_SIZE: u64 = std::mem::size_of::<IndirectCommand>() as u64;
pub const SURFACE_COMMAND_SIZE: u64 = std::mem::size_of::<SurfaceCommand>() as u64;
pub const SURFACE_COMMAND_BATCH_SIZE: u64 = std::mem::size_of::<SurfaceCommandBatch>() as u64;
pub const PORTAL_SURFACE_SIZE: u64 = std::mem::size_of::<PortalSurfaceData>() as u64;

/// Words per surface descriptor for a world with `max_stages` stages.
#[inline]
pub fn descriptor_words(max_stages: u32) -> u32 {
    BOUNDING_SPHERE_WORDS + max_stages
}

/// Buffer binding indices used by the compute bind groups.
pub mod bindings {
    pub mod cull {
        pub const UNIFORMS: u32 = 0;
        pub const SURFACE_DESCRIPTORS: u32 = 1;
        pub const SURFACE_COMMANDS: u32 = 2;
        pub const PORTAL_SURFACES: u32 = 3;
        pub const DEPTH_PYRAMID: u32 = 4;
    }

    pub mod process {
        pub const UNIFORMS: u32 = 0;
        pub const SURFACE_COMMANDS: u32 = 1;
        pub const CULLED_COMMANDS: u32 = 2;
        pub const ATOMIC_COUNTERS: u32 = 3;
        pub const SURFACE_BATCHES: u32 = 4;
    }

    pub mod clear {
        pub const UNIFORMS: u32 = 0;
        pub const ATOMIC_COUNTERS: u32 = 1;
    }

    pub mod depth_reduction {
        pub const UNIFORMS: u32 = 0;
        pub const SOURCE_DEPTH: u32 = 1;
        pub const SOURCE_LEVEL: u32 = 2;
        pub const TARGET_LEVEL: u32 = 3;
    }
}

/// Helper functions for buffer sizing and per-viewframe offsets.
pub mod calculations {
    use super::*;

    /// Bytes of the surface-command buffer across all viewframes.
    #[inline]
    pub fn surface_commands_buffer_size(surface_commands_count: u32) -> u64 {
        surface_commands_count as u64 * SURFACE_COMMAND_SIZE * MAX_VIEWFRAMES as u64
    }

    /// Bytes of the culled-command buffer across all viewframes.
    #[inline]
    pub fn culled_commands_buffer_size(surface_commands_count: u32) -> u64 {
        surface_commands_count as u64 * INDIRECT_COMMAND_SIZE * MAX_VIEWFRAMES as u64
    }

    /// Bytes of the atomic-counter buffer across all viewframes.
    #[inline]
    pub fn atomic_counters_buffer_size() -> u64 {
        MAX_COMMAND_COUNTERS as u64 * MAX_VIEWFRAMES as u64 * 4
    }

    /// First surface command of a (frame, view) slice, in commands.
    #[inline]
    pub fn surface_commands_offset(surface_commands_count: u32, frame: u32, view: u32) -> u32 {
        surface_commands_count * (crate::constants::MAX_VIEWS * frame + view)
    }

    /// Byte offset of a material's culled commands within a view slice.
    #[inline]
    pub fn culled_commands_byte_offset(
        batch_offset: u32,
        surface_commands_count: u32,
        frame: u32,
        view: u32,
    ) -> u64 {
        (batch_offset * SURFACE_COMMANDS_PER_BATCH) as u64 * INDIRECT_COMMAND_SIZE
            + surface_commands_offset(surface_commands_count, frame, view) as u64
                * INDIRECT_COMMAND_SIZE
    }

    /// Byte offset of a material's counter within a view slice.
    #[inline]
    pub fn counter_byte_offset(global_id: u32, frame: u32, view: u32) -> u64 {
        (global_id + MAX_COMMAND_COUNTERS * (crate::constants::MAX_VIEWS * frame + view)) as u64
            * 4
    }

    /// Bytes of the portal buffer across all viewframes.
    #[inline]
    pub fn portal_buffer_size(total_portals: u32) -> u64 {
        total_portals as u64 * PORTAL_SURFACE_SIZE * MAX_VIEWFRAMES as u64
    }
}

/// Buffer usage patterns of the pipeline buffers.
pub mod usage {
    use wgpu::BufferUsages;

    /// CPU-written storage (materials, descriptors, commands); readable
    /// back for tests and debugging.
    pub const STORAGE_WRITE: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// GPU-compacted indirect stream.
    pub const CULLED: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::INDIRECT)
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// Atomic counters, doubling as the indirect count buffer.
    pub const COUNTERS: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::INDIRECT)
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// GPU-written, CPU-read-back portal probes.
    pub const PORTALS: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::COPY_SRC)
        .union(BufferUsages::COPY_DST);

    pub const UNIFORM: BufferUsages = BufferUsages::UNIFORM.union(BufferUsages::COPY_DST);

    pub const READBACK: BufferUsages = BufferUsages::MAP_READ.union(BufferUsages::COPY_DST);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn layout_sizes() {
        assert_eq!(mem::size_of::<IndirectCommand>(), 20);
        assert_eq!(mem::size_of::<SurfaceCommand>(), 24);
        assert_eq!(mem::size_of::<SurfaceCommandBatch>(), 16);
        assert_eq!(mem::size_of::<PortalSurfaceData>(), 32);
        assert_eq!(mem::size_of::<CullUniforms>(), 256);
        assert_eq!(mem::size_of::<DepthReductionUniforms>(), 16);
        assert_eq!(mem::size_of::<ClearUniforms>(), 16);
    }

    #[test]
    fn descriptor_words_grow_with_stages() {
        assert_eq!(descriptor_words(0), 4);
        assert_eq!(descriptor_words(3), 7);
    }

    #[test]
    fn viewframe_offsets_are_disjoint() {
        let count = 128;
        let a = calculations::surface_commands_offset(count, 0, 0);
        let b = calculations::surface_commands_offset(count, 0, 1);
        let c = calculations::surface_commands_offset(count, 1, 0);
        assert_eq!(b - a, count);
        assert!(c > b);
    }
}
