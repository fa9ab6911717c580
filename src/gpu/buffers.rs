//! The pipeline buffers
//!
//! The material system exclusively owns seven GPU buffers (materials,
//! surface descriptors, surface commands, culled commands, batch UBO,
//! atomic counters, portal probes) and the depth-reduction pyramid. All
//! are sized once per world at `generate_world_materials` time and freed
//! together on world unload.

use crate::constants::{MAX_SURFACE_COMMAND_BATCHES, MAX_VIEWS, UNIFORM_REGION_ALIGN};
use crate::error::{MaterialError, MaterialResult};
use crate::gpu::buffer_layouts::{calculations, usage, PortalSurfaceData, PORTAL_SURFACE_SIZE,
    SURFACE_COMMAND_BATCH_SIZE};

/// Extents computed from the generated world.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldBufferSizes {
    pub materials_bytes: u64,
    pub descriptor_words: u32,
    pub surface_descriptors_count: u32,
    pub surface_commands_count: u32,
    pub total_portals: u32,
    pub debug_buffer: bool,
}

/// The seven world buffers plus dispatch-uniform storage.
pub struct PipelineBuffers {
    pub materials: wgpu::Buffer,
    pub surface_descriptors: wgpu::Buffer,
    pub surface_commands: wgpu::Buffer,
    pub culled_commands: wgpu::Buffer,
    pub surface_batches: wgpu::Buffer,
    pub atomic_counters: wgpu::Buffer,
    /// Present only when the world has portals; a minimal placeholder
    /// otherwise so bind groups stay complete.
    pub portal_surfaces: wgpu::Buffer,
    pub portal_readback: wgpu::Buffer,
    /// Compute-shader scratch, allocated behind `config.debug_buffer`.
    pub debug: Option<wgpu::Buffer>,

    /// Per-view cull uniforms, 256-byte regions addressed by dynamic
    /// offset.
    pub cull_uniforms: wgpu::Buffer,
    pub clear_uniforms: wgpu::Buffer,
    pub depth_reduction_uniforms: wgpu::Buffer,

    pub surface_commands_count: u32,
    pub total_portals: u32,
}

impl PipelineBuffers {
    pub fn new(device: &wgpu::Device, sizes: &WorldBufferSizes) -> Self {
        let materials = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Materials Buffer"),
            size: sizes.materials_bytes.max(16),
            usage: usage::STORAGE_WRITE,
            mapped_at_creation: false,
        });

        let descriptor_bytes =
            sizes.surface_descriptors_count as u64 * sizes.descriptor_words as u64 * 4;
        let surface_descriptors = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Descriptors Buffer"),
            size: descriptor_bytes.max(16),
            usage: usage::STORAGE_WRITE,
            mapped_at_creation: false,
        });

        let surface_commands = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Commands Buffer"),
            size: calculations::surface_commands_buffer_size(sizes.surface_commands_count).max(16),
            usage: usage::STORAGE_WRITE,
            mapped_at_creation: false,
        });

        let culled_commands = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Culled Commands Buffer"),
            size: calculations::culled_commands_buffer_size(sizes.surface_commands_count).max(16),
            usage: usage::CULLED,
            mapped_at_creation: false,
        });

        let surface_batches = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Batches UBO"),
            size: MAX_SURFACE_COMMAND_BATCHES as u64 * SURFACE_COMMAND_BATCH_SIZE,
            usage: usage::UNIFORM,
            mapped_at_creation: false,
        });

        let atomic_counters = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Atomic Command Counters Buffer"),
            size: calculations::atomic_counters_buffer_size(),
            usage: usage::COUNTERS,
            mapped_at_creation: false,
        });

        let portal_bytes = calculations::portal_buffer_size(sizes.total_portals).max(
            PORTAL_SURFACE_SIZE,
        );
        let portal_surfaces = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Portal Surfaces Buffer"),
            size: portal_bytes,
            usage: usage::PORTALS,
            mapped_at_creation: false,
        });

        let portal_readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Portal Readback Buffer"),
            size: (sizes.total_portals as u64 * MAX_VIEWS as u64 * PORTAL_SURFACE_SIZE)
                .max(PORTAL_SURFACE_SIZE),
            usage: usage::READBACK,
            mapped_at_creation: false,
        });

        let debug = sizes.debug_buffer.then(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Material Debug Buffer"),
                size: (sizes.surface_commands_count as u64 * 20 * 4).max(16),
                usage: usage::STORAGE_WRITE,
                mapped_at_creation: false,
            })
        });

        let cull_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cull Uniforms Buffer"),
            size: MAX_VIEWS as u64 * UNIFORM_REGION_ALIGN,
            usage: usage::UNIFORM,
            mapped_at_creation: false,
        });

        let clear_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Clear Uniforms Buffer"),
            size: UNIFORM_REGION_ALIGN,
            usage: usage::UNIFORM,
            mapped_at_creation: false,
        });

        let depth_reduction_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Depth Reduction Uniforms Buffer"),
            size: 16 * UNIFORM_REGION_ALIGN,
            usage: usage::UNIFORM,
            mapped_at_creation: false,
        });

        Self {
            materials,
            surface_descriptors,
            surface_commands,
            culled_commands,
            surface_batches,
            atomic_counters,
            portal_surfaces,
            portal_readback,
            debug,
            cull_uniforms,
            clear_uniforms,
            depth_reduction_uniforms,
            surface_commands_count: sizes.surface_commands_count,
            total_portals: sizes.total_portals,
        }
    }

    /// Queue the copy of one frame's portal area into the readback buffer.
    pub fn copy_portal_area(&self, encoder: &mut wgpu::CommandEncoder, frame: u32) {
        if self.total_portals == 0 {
            return;
        }
        let area_bytes = self.total_portals as u64 * MAX_VIEWS as u64 * PORTAL_SURFACE_SIZE;
        encoder.copy_buffer_to_buffer(
            &self.portal_surfaces,
            frame as u64 * area_bytes,
            &self.portal_readback,
            0,
            area_bytes,
        );
    }

    /// Blocking read of the copied portal area.
    pub fn read_portals(&self, device: &wgpu::Device) -> MaterialResult<Vec<PortalSurfaceData>> {
        if self.total_portals == 0 {
            return Ok(Vec::new());
        }
        let slice = self.portal_readback.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver)
            .map_err(|_| MaterialError::Readback("map callback dropped".into()))?
            .map_err(|e| MaterialError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let portals: Vec<PortalSurfaceData> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        self.portal_readback.unmap();
        Ok(portals)
    }
}

/// Full-mip depth pyramid for hierarchical occlusion tests.
pub struct DepthPyramid {
    pub texture: wgpu::Texture,
    /// One view per mip level, for storage writes.
    pub level_views: Vec<wgpu::TextureView>,
    /// All-mip view, for sampling in the cull shader.
    pub full_view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

impl DepthPyramid {
    /// Dimensions below 2x2 are clamped; the reduction passes need at
    /// least two levels to keep sampled and stored views distinct.
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(2);
        let height = height.max(2);
        let levels = 32 - width.max(height).leading_zeros();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Pyramid"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let level_views = (0..levels)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Depth Pyramid Level"),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let full_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Depth Pyramid Full View"),
            ..Default::default()
        });

        Self {
            texture,
            level_views,
            full_view,
            width,
            height,
            levels,
        }
    }

    /// Mip dimensions of `level`.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn pyramid_level_count_matches_log2() {
        // 1920x1080 -> 11 levels (1024 < 1920 <= 2048)
        let levels = 32 - 1920u32.max(1080).leading_zeros();
        assert_eq!(levels, 11);
        let levels = 32 - 256u32.max(128).leading_zeros();
        assert_eq!(levels, 9);
    }

    #[test]
    fn viewframe_slices_cover_buffer() {
        use crate::constants::MAX_VIEWFRAMES;
        use crate::gpu::buffer_layouts::calculations;
        let count = 64;
        let total = calculations::surface_commands_buffer_size(count);
        let per_slice = count as u64 * crate::gpu::buffer_layouts::SURFACE_COMMAND_SIZE;
        assert_eq!(total, per_slice * MAX_VIEWFRAMES as u64);
    }
}
