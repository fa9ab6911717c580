//! Compute pipelines of the cull dispatcher
//!
//! Four pipelines: per-frame counter clear, surface/portal culling,
//! batch compaction into the culled-command stream, and the depth
//! pyramid reduction. The WGSL sources share a generated constants
//! prelude so the Rust and shader sides of the layout contract cannot
//! drift.

use std::num::NonZeroU64;

use crate::constants::UNIFORM_REGION_ALIGN;
use crate::gpu::buffer_layouts::bindings;
use crate::gpu::buffers::{DepthPyramid, PipelineBuffers};

/// WGSL constants generated by the build script from `constants.rs`.
const GPU_CONSTANTS_WGSL: &str = include_str!(concat!(env!("OUT_DIR"), "/gpu_constants.wgsl"));

fn shader_module(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(format!("{GPU_CONSTANTS_WGSL}\n{source}").into()),
    })
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

/// The compute side of the material pipeline.
pub struct CullPipelines {
    pub clear_pipeline: wgpu::ComputePipeline,
    pub cull_pipeline: wgpu::ComputePipeline,
    pub process_pipeline: wgpu::ComputePipeline,
    pub depth_reduction_pipeline: wgpu::ComputePipeline,

    clear_layout: wgpu::BindGroupLayout,
    cull_layout: wgpu::BindGroupLayout,
    process_layout: wgpu::BindGroupLayout,
    depth_reduction_layout: wgpu::BindGroupLayout,
}

impl CullPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let clear_module = shader_module(
            device,
            "Clear Counters Shader",
            include_str!("../shaders/clear_counters.wgsl"),
        );
        let cull_module =
            shader_module(device, "Cull Shader", include_str!("../shaders/cull.wgsl"));
        let process_module = shader_module(
            device,
            "Process Surfaces Shader",
            include_str!("../shaders/process_surfaces.wgsl"),
        );
        let depth_module = shader_module(
            device,
            "Depth Reduction Shader",
            include_str!("../shaders/depth_reduction.wgsl"),
        );

        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Clear Counters Bind Group Layout"),
            entries: &[
                uniform_entry(bindings::clear::UNIFORMS, false),
                storage_entry(bindings::clear::ATOMIC_COUNTERS, false),
            ],
        });

        let cull_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Bind Group Layout"),
            entries: &[
                uniform_entry(bindings::cull::UNIFORMS, true),
                storage_entry(bindings::cull::SURFACE_DESCRIPTORS, true),
                storage_entry(bindings::cull::SURFACE_COMMANDS, false),
                storage_entry(bindings::cull::PORTAL_SURFACES, false),
                wgpu::BindGroupLayoutEntry {
                    binding: bindings::cull::DEPTH_PYRAMID,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let process_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Process Surfaces Bind Group Layout"),
            entries: &[
                uniform_entry(bindings::process::UNIFORMS, true),
                storage_entry(bindings::process::SURFACE_COMMANDS, true),
                storage_entry(bindings::process::CULLED_COMMANDS, false),
                storage_entry(bindings::process::ATOMIC_COUNTERS, false),
                uniform_entry(bindings::process::SURFACE_BATCHES, false),
            ],
        });

        let depth_reduction_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Depth Reduction Bind Group Layout"),
                entries: &[
                    uniform_entry(bindings::depth_reduction::UNIFORMS, true),
                    wgpu::BindGroupLayoutEntry {
                        binding: bindings::depth_reduction::SOURCE_DEPTH,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: bindings::depth_reduction::SOURCE_LEVEL,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: bindings::depth_reduction::TARGET_LEVEL,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::R32Float,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            });

        let make_pipeline = |label: &str,
                             layout: &wgpu::BindGroupLayout,
                             module: &wgpu::ShaderModule,
                             entry_point: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point,
            })
        };

        Self {
            clear_pipeline: make_pipeline(
                "Clear Counters Pipeline",
                &clear_layout,
                &clear_module,
                "reset_counters",
            ),
            cull_pipeline: make_pipeline("Cull Pipeline", &cull_layout, &cull_module, "cull"),
            process_pipeline: make_pipeline(
                "Process Surfaces Pipeline",
                &process_layout,
                &process_module,
                "process_surfaces",
            ),
            depth_reduction_pipeline: make_pipeline(
                "Depth Reduction Pipeline",
                &depth_reduction_layout,
                &depth_module,
                "reduce_depth",
            ),
            clear_layout,
            cull_layout,
            process_layout,
            depth_reduction_layout,
        }
    }

    pub fn clear_bind_group(
        &self,
        device: &wgpu::Device,
        buffers: &PipelineBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Clear Counters Bind Group"),
            layout: &self.clear_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::clear::UNIFORMS,
                    resource: buffers.clear_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::clear::ATOMIC_COUNTERS,
                    resource: buffers.atomic_counters.as_entire_binding(),
                },
            ],
        })
    }

    pub fn cull_bind_group(
        &self,
        device: &wgpu::Device,
        buffers: &PipelineBuffers,
        pyramid: &DepthPyramid,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull Bind Group"),
            layout: &self.cull_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::cull::UNIFORMS,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffers.cull_uniforms,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_REGION_ALIGN),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::cull::SURFACE_DESCRIPTORS,
                    resource: buffers.surface_descriptors.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::cull::SURFACE_COMMANDS,
                    resource: buffers.surface_commands.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::cull::PORTAL_SURFACES,
                    resource: buffers.portal_surfaces.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::cull::DEPTH_PYRAMID,
                    resource: wgpu::BindingResource::TextureView(&pyramid.full_view),
                },
            ],
        })
    }

    pub fn process_bind_group(
        &self,
        device: &wgpu::Device,
        buffers: &PipelineBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Process Surfaces Bind Group"),
            layout: &self.process_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::process::UNIFORMS,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffers.cull_uniforms,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_REGION_ALIGN),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::process::SURFACE_COMMANDS,
                    resource: buffers.surface_commands.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::process::CULLED_COMMANDS,
                    resource: buffers.culled_commands.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::process::ATOMIC_COUNTERS,
                    resource: buffers.atomic_counters.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::process::SURFACE_BATCHES,
                    resource: buffers.surface_batches.as_entire_binding(),
                },
            ],
        })
    }

    /// Bind group reducing `level` into `level + 1`. The scene depth
    /// buffer feeds the initial level.
    pub fn depth_reduction_bind_group(
        &self,
        device: &wgpu::Device,
        buffers: &PipelineBuffers,
        scene_depth: &wgpu::TextureView,
        pyramid: &DepthPyramid,
        source_level: u32,
        target_level: u32,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Reduction Bind Group"),
            layout: &self.depth_reduction_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::depth_reduction::UNIFORMS,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffers.depth_reduction_uniforms,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_REGION_ALIGN),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::depth_reduction::SOURCE_DEPTH,
                    resource: wgpu::BindingResource::TextureView(scene_depth),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::depth_reduction::SOURCE_LEVEL,
                    resource: wgpu::BindingResource::TextureView(
                        &pyramid.level_views[source_level as usize],
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::depth_reduction::TARGET_LEVEL,
                    resource: wgpu::BindingResource::TextureView(
                        &pyramid.level_views[target_level as usize],
                    ),
                },
            ],
        })
    }
}
