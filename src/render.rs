//! Render submission
//!
//! Draws the culled indirect streams: one `multi_draw_indexed_indirect_count`
//! per material per view, in pack order, with texture residency acquired
//! up front and per-draw uniforms addressed through dynamic offsets.
//!
//! Frame protocol: `prepare_frame` (dynamic uniforms, counter clear,
//! residency, bindless rebuild) must run on an encoder before any render
//! pass; `prepare_view` writes the per-view uniform regions; then
//! `render_materials` submits into the host's pass. Heat-haze materials
//! additionally queue a foreground copy that the host draws with
//! `render_foreground_copies` after switching to the opposite main
//! target.

use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use log::warn;

use crate::config::{MaterialDebugMode, ProfilerSubGroupsMode};
use crate::constants::{MAX_COMMAND_COUNTERS, MAX_VIEWS, UNIFORM_REGION_ALIGN};
use crate::gpu::buffer_layouts::calculations;
use crate::material::system::MaterialSystem;
use crate::material::{Material, DEPTH_PACK, NUM_PACKS};
use crate::scene::{Fog, RefDef, ShaderId, WorldScene};
use crate::shader::{state_bits, CullType, FamilyPermutation, ShaderSort, StageFamily};

/// Per-view frame uniforms shared by all material draws.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub view_matrix: [[f32; 4]; 4],
    pub view_origin: [f32; 3],
    pub time: f32,
    pub view_up: [f32; 3],
    pub num_lights: u32,
}

/// Per-(material, view) uniforms written by `prepare_view`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct MaterialBindUniforms {
    pub debug_color: [f32; 4],
    pub fog_distance_vector: [f32; 4],
    pub fog_depth_vector: [f32; 4],
    pub fog_eye_t: f32,
    pub deform_enable: u32,
    pub show_tris: u32,
    pub _pad: u32,
}

/// Everything the program backend needs to compile one material's
/// pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MaterialPipelineDesc {
    pub family: StageFamily,
    pub permutation: FamilyPermutation,
    /// Masked stateful bits (blend, depth func/mask/test, color mask).
    pub state_bits: u32,
    pub cull: CullType,
    pub polygon_offset: bool,
    /// Color vertex attribute enabled.
    pub use_attr_color: bool,
    /// Line-list debug variant with depth test disabled.
    pub line_mode: bool,
}

/// Shader program compiler seam. The backend owns shader modules and
/// permutation selection; the material system owns the pipeline layout
/// and all buffers.
pub trait ProgramBackend {
    fn material_pipeline(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        desc: &MaterialPipelineDesc,
    ) -> Arc<wgpu::RenderPipeline>;
}

/// GPU resources of the draw path.
pub struct RenderResources {
    pub scene_uniforms: wgpu::Buffer,
    pub bind_uniforms: wgpu::Buffer,
    pub sampler: wgpu::Sampler,
    pub fallback_texture: wgpu::Texture,
    pub fallback_view: wgpu::TextureView,
    pub group0_layout: wgpu::BindGroupLayout,
    pub group1_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub group0: Option<wgpu::BindGroup>,
    pub group1: Option<wgpu::BindGroup>,
    pub bindless_capacity: u32,
}

/// Region index inside `bind_uniforms`: the normal draw or the
/// alternate (heat-haze copy / line debug) draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindRegion {
    Normal,
    Alternate,
}

fn bind_region_offset(region: BindRegion, view_id: u32, global_id: u32) -> u32 {
    let base = match region {
        BindRegion::Normal => 0,
        BindRegion::Alternate => MAX_VIEWS * MAX_COMMAND_COUNTERS,
    };
    (base + view_id * MAX_COMMAND_COUNTERS + global_id) * UNIFORM_REGION_ALIGN as u32
}

impl RenderResources {
    pub fn new(device: &wgpu::Device, bindless_capacity: u32) -> Self {
        let scene_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniforms Buffer"),
            size: MAX_VIEWS as u64 * UNIFORM_REGION_ALIGN,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Material Bind Uniforms Buffer"),
            size: 2 * MAX_VIEWS as u64 * MAX_COMMAND_COUNTERS as u64 * UNIFORM_REGION_ALIGN,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bindless Fallback Texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let fallback_view = fallback_texture.create_view(&Default::default());

        let group0_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Frame Bind Group Layout"),
            entries: &[
                // Scene uniforms, one region per view.
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<SceneUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                // Materials storage buffer.
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Bindless texture table.
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: NonZeroU32::new(bindless_capacity),
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let group1_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Draw Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(
                        std::mem::size_of::<MaterialBindUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Material Pipeline Layout"),
            bind_group_layouts: &[&group0_layout, &group1_layout],
            push_constant_ranges: &[],
        });

        Self {
            scene_uniforms,
            bind_uniforms,
            sampler,
            fallback_texture,
            fallback_view,
            group0_layout,
            group1_layout,
            pipeline_layout,
            group0: None,
            group1: None,
            bindless_capacity,
        }
    }
}

/// View-dependent fog vectors (world-space fog volume projected along
/// the view axes).
fn fog_vectors(fog: &Fog, refdef: &RefDef) -> ([f32; 4], [f32; 4], f32) {
    let view = refdef.view_matrix;
    let local = -refdef.view_origin;
    let forward = -Vec3::new(view.x_axis.z, view.y_axis.z, view.z_axis.z);

    let mut distance = Vec4::new(
        -view.x_axis.z,
        -view.y_axis.z,
        -view.z_axis.z,
        local.dot(forward),
    ) * fog.tc_scale;
    // Clipping epsilon so the eye plane never lands exactly on a texel
    // boundary.
    distance.w += 1.0 / 512.0;

    let (depth, eye_t) = if fog.has_surface {
        let depth = fog.surface;
        let eye = refdef.view_origin.extend(1.0).dot(depth);
        (depth, eye)
    } else {
        // Non-surface fog always has the eye inside.
        (Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0)
    };

    (distance.to_array(), depth.to_array(), eye_t)
}

/// Contrast colors of the material debug visualization.
fn material_debug_color(mode: MaterialDebugMode, material: &Material, pack_sizes: [u32; 3]) -> Vec4 {
    const COLORS: [[f32; 3]; 6] = [
        [0.75, 0.25, 0.25],
        [0.75, 0.75, 0.25],
        [0.25, 0.75, 0.25],
        [0.25, 0.75, 0.75],
        [0.25, 0.25, 0.75],
        [0.75, 0.25, 0.75],
    ];
    let group_size = match mode {
        MaterialDebugMode::None => return Vec4::ONE,
        MaterialDebugMode::Depth => pack_sizes[0],
        MaterialDebugMode::Opaque | MaterialDebugMode::OpaqueTransparent => {
            pack_sizes[1] + pack_sizes[2]
        }
    }
    .max(1);
    let base = COLORS[(material.id as usize * 6 / group_size as usize).min(5)];
    let id = (material.id + 1) as f32 / (group_size + 2) as f32;
    Vec4::new(
        id.min(1.0 / 3.0) * 3.0 * base[0],
        (id - 1.0 / 3.0).clamp(0.0, 1.0 / 3.0) * 3.0 * base[1],
        (id - 2.0 / 3.0).clamp(0.0, 1.0 / 3.0) * 3.0 * base[2],
        1.0,
    )
}

impl MaterialSystem {
    /// Compile the per-material pipelines through the program backend.
    /// Call once after `generate_world_materials`.
    pub fn compile_material_pipelines(&mut self, backend: &dyn ProgramBackend) {
        self.ensure_render_resources();
        let Some(resources) = self.render.as_ref() else {
            return;
        };
        let layout = &resources.pipeline_layout;
        let show_tris = self.config.show_tris;
        // Profiler sub-group diagnostics draw with blending masked off.
        let profiler_mask = if self.config.profiler_subgroups.is_some() {
            !state_bits::BLEND_BITS
        } else {
            !0
        };

        for pack in &mut self.table.packs {
            for material in &mut pack.materials {
                let desc = MaterialPipelineDesc {
                    family: material.family,
                    permutation: material.permutation,
                    state_bits: material.state_bits & profiler_mask,
                    cull: material.cull,
                    polygon_offset: material.use_polygon_offset,
                    use_attr_color: material.permutation.use_attr_color,
                    line_mode: false,
                };
                material.pipeline = Some(backend.material_pipeline(&self.device, layout, &desc));

                let debuggable = matches!(
                    material.family,
                    StageFamily::Generic3D | StageFamily::LightMapping
                );
                if show_tris && debuggable {
                    let line_desc = MaterialPipelineDesc {
                        line_mode: true,
                        ..desc
                    };
                    material.line_pipeline =
                        Some(backend.material_pipeline(&self.device, layout, &line_desc));
                }
            }
        }
    }

    /// First-per-frame work: rewrite the dynamic uniform region, clear
    /// the next frame's counters, acquire texture residency in draw
    /// order, and rebuild the bindless table bind group. Must run on an
    /// encoder submitted before any of this frame's render passes.
    pub fn prepare_frame(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &WorldScene,
        refdef: &RefDef,
    ) {
        if !self.generated_world || !self.frame_start {
            return;
        }
        self.frame_start = false;

        self.rendered_materials.clear();
        self.pending_foreground_copies.clear();

        self.update_dynamic_surfaces(scene, refdef);
        self.update_frame_data(encoder);
        self.acquire_texture_residency();
        self.ensure_render_resources();
        if self.render.is_some() {
            self.rebuild_bindless_group(scene);
            self.update_group1();
        }
    }

    /// Residency acquisition with the eviction-and-retry protocol, in
    /// draw order across all packs.
    fn acquire_texture_residency(&mut self) {
        let mut acquired: Vec<(usize, usize)> = Vec::new();

        for pack_index in 0..NUM_PACKS {
            for material_index in 0..self.table.packs[pack_index].materials.len() {
                if self.table.packs[pack_index].materials[material_index].textures_resident {
                    acquired.push((pack_index, material_index));
                    continue;
                }

                let textures =
                    self.table.packs[pack_index].materials[material_index].textures.clone();
                for texture in textures {
                    if self.residency.is_resident(texture) {
                        continue;
                    }
                    if self.residency.make_resident(texture).is_some() {
                        continue;
                    }

                    // Table full: evict everything acquired so far this
                    // frame and retry once.
                    for &(evict_pack, evict_material) in &acquired {
                        let evicted =
                            &mut self.table.packs[evict_pack].materials[evict_material];
                        warn!(
                            "Making material {} textures non-resident ({})",
                            evicted.id,
                            evicted.textures.len()
                        );
                        for tex in evicted.textures.clone() {
                            self.residency.make_non_resident(tex);
                        }
                        evicted.textures_resident = false;
                    }

                    if self.residency.make_resident(texture).is_none() {
                        warn!("Not enough texture space! Some textures may be missing");
                        break;
                    }
                }

                self.table.packs[pack_index].materials[material_index].textures_resident = true;
                acquired.push((pack_index, material_index));
            }
        }
    }

    /// Rebuild the bindless binding array from the residency table.
    fn rebuild_bindless_group(&mut self, scene: &WorldScene) {
        let Some(buffers) = &self.buffers else {
            return;
        };
        let resources = self
            .render
            .as_mut()
            .expect("render resources created by prepare_frame");

        let views: Vec<&wgpu::TextureView> = self
            .residency
            .slot_textures()
            .iter()
            .map(|slot| {
                slot.and_then(|texture| {
                    scene
                        .textures
                        .get(texture.0 as usize)
                        .and_then(|t| t.view.as_ref())
                })
                .unwrap_or(&resources.fallback_view)
            })
            .collect();

        resources.group0 = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Frame Bind Group"),
            layout: &resources.group0_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &resources.scene_uniforms,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<SceneUniforms>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.materials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureViewArray(&views),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&resources.sampler),
                },
            ],
        }));
    }

    fn update_group1(&mut self) {
        let resources = self
            .render
            .as_mut()
            .expect("render resources created by prepare_frame");
        if resources.group1.is_some() {
            return;
        }
        resources.group1 = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Draw Bind Group"),
            layout: &resources.group1_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &resources.bind_uniforms,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<MaterialBindUniforms>() as u64),
                }),
            }],
        }));
    }

    /// Write the per-view uniform regions consumed by this view's draws.
    pub fn prepare_view(&mut self, scene: &WorldScene, refdef: &RefDef, view_id: u32) {
        let Some(resources) = &self.render else {
            return;
        };

        let scene_block = SceneUniforms {
            view_projection: refdef.model_view_projection().to_cols_array_2d(),
            view_matrix: refdef.view_matrix.to_cols_array_2d(),
            view_origin: refdef.view_origin.to_array(),
            time: refdef.float_time,
            view_up: refdef.view_matrix.row(1).truncate().to_array(),
            num_lights: refdef.num_lights,
        };
        self.queue.write_buffer(
            &resources.scene_uniforms,
            view_id as u64 * UNIFORM_REGION_ALIGN,
            bytemuck::bytes_of(&scene_block),
        );

        let pack_sizes = [
            self.table.packs[0].materials.len() as u32,
            self.table.packs[1].materials.len() as u32,
            self.table.packs[2].materials.len() as u32,
        ];

        for pack in &self.table.packs {
            for material in &pack.materials {
                let (fog_distance_vector, fog_depth_vector, fog_eye_t) = material
                    .fog
                    .map(|id| fog_vectors(&scene.fogs[id.0 as usize], refdef))
                    .unwrap_or(([0.0; 4], [0.0; 4], 0.0));

                let normal = MaterialBindUniforms {
                    debug_color: material_debug_color(
                        self.config.debug_materials,
                        material,
                        pack_sizes,
                    )
                    .to_array(),
                    fog_distance_vector,
                    fog_depth_vector,
                    fog_eye_t,
                    deform_enable: 1,
                    show_tris: 0,
                    _pad: 0,
                };
                // The alternate region serves the heat-haze foreground
                // copy and the line-debug redraw.
                let alternate = MaterialBindUniforms {
                    deform_enable: 0,
                    show_tris: 1,
                    ..normal
                };

                self.queue.write_buffer(
                    &resources.bind_uniforms,
                    bind_region_offset(BindRegion::Normal, view_id, material.global_id) as u64,
                    bytemuck::bytes_of(&normal),
                );
                self.queue.write_buffer(
                    &resources.bind_uniforms,
                    bind_region_offset(BindRegion::Alternate, view_id, material.global_id) as u64,
                    bytemuck::bytes_of(&alternate),
                );
            }
        }
    }

    /// Whether a material survives the profiler sub-group filters. The
    /// blend-state mask of profiler mode is applied when the pipelines
    /// are compiled.
    fn profiler_filter(&self, material: &Material) -> bool {
        let Some(mode) = self.config.profiler_subgroups else {
            return true;
        };
        if let Some(stage_id) = self.config.profiler_subgroups_stage {
            let depth_count = self.table.packs[DEPTH_PACK as usize].materials.len() as u32;
            // Depth materials always pass; others must match the id.
            if material.global_id >= depth_count
                && material.global_id != stage_id + depth_count
            {
                return false;
            }
        }
        match mode {
            ProfilerSubGroupsMode::Opaque => {
                material.state_bits & state_bits::BLEND_BITS == 0
            }
            ProfilerSubGroupsMode::Transparent => {
                material.state_bits & !state_bits::BLEND_BITS == 0
            }
            ProfilerSubGroupsMode::All => true,
        }
    }

    /// Submit every material whose pack lies inside `[from_sort, to_sort]`
    /// for `view_id`, in material-id order, plus the sky shaders when the
    /// range covers a sky sort class. `draw_sky` is the conventional
    /// non-indirect sky path of the host.
    #[allow(clippy::too_many_arguments)]
    pub fn render_materials<'a>(
        &'a mut self,
        pass: &mut wgpu::RenderPass<'a>,
        scene: &'a WorldScene,
        refdef: &RefDef,
        from_sort: ShaderSort,
        to_sort: ShaderSort,
        view_id: u32,
        draw_sky: &mut dyn FnMut(ShaderId),
    ) {
        if !self.config.draw_world || !self.generated_world {
            return;
        }
        debug_assert!(
            !self.frame_start,
            "prepare_frame must run before render_materials"
        );

        // Select materials first; the draw loop below only borrows.
        let mut draws: Vec<(usize, usize)> = Vec::new();
        for pack_index in 0..NUM_PACKS {
            let pack = &self.table.packs[pack_index];
            if pack.from_sort >= from_sort && pack.to_sort <= to_sort {
                for material_index in 0..pack.materials.len() {
                    let material = &pack.materials[material_index];
                    if material.family == StageFamily::Fog
                        && (!self.config.world_fog || refdef.no_world_model)
                    {
                        continue;
                    }
                    if !self.profiler_filter(material) {
                        continue;
                    }
                    draws.push((pack_index, material_index));
                }
            }
        }
        for &(pack_index, material_index) in &draws {
            let material = &self.table.packs[pack_index].materials[material_index];
            self.rendered_materials
                .push((pack_index as u32, material.id));
            if material.family == StageFamily::HeatHaze {
                self.pending_foreground_copies
                    .push((pack_index as u32, material_index as u32));
            }
        }

        let this: &'a Self = self;
        for &(pack_index, material_index) in &draws {
            let material = &this.table.packs[pack_index].materials[material_index];
            this.draw_material(pass, scene, material, view_id, BindRegion::Normal, false);

            if this.config.show_tris
                && material.state_bits & state_bits::DEPTHMASK_TRUE == 0
                && material.line_pipeline.is_some()
            {
                this.draw_material(pass, scene, material, view_id, BindRegion::Alternate, true);
            }
        }

        // The sky skipped the world-surface walk; draw it through the
        // conventional path when its sort class is in range.
        let fog_sky = from_sort <= ShaderSort::EnvironmentFog && to_sort >= ShaderSort::EnvironmentFog;
        let nofog_sky =
            from_sort <= ShaderSort::EnvironmentNoFog && to_sort >= ShaderSort::EnvironmentNoFog;
        if fog_sky || nofog_sky {
            let nofog_pass = to_sort >= ShaderSort::EnvironmentNoFog;
            for shader_id in &this.sky_shaders {
                if scene.shader(*shader_id).no_fog != nofog_pass {
                    continue;
                }
                draw_sky(*shader_id);
            }
        }
    }

    /// Heat-haze foreground copies, drawn after the host re-targets the
    /// opposite main color attachment. Deform stays disabled on this
    /// pass.
    pub fn render_foreground_copies<'a>(
        &'a mut self,
        pass: &mut wgpu::RenderPass<'a>,
        scene: &'a WorldScene,
        view_id: u32,
    ) {
        let copies = std::mem::take(&mut self.pending_foreground_copies);
        let this: &'a Self = self;
        for &(pack_index, material_index) in &copies {
            let material =
                &this.table.packs[pack_index as usize].materials[material_index as usize];
            this.draw_material(pass, scene, material, view_id, BindRegion::Alternate, false);
        }
    }

    fn draw_material<'a>(
        &'a self,
        pass: &mut wgpu::RenderPass<'a>,
        scene: &'a WorldScene,
        material: &'a Material,
        view_id: u32,
        region: BindRegion,
        line_mode: bool,
    ) {
        let Some(buffers) = &self.buffers else {
            return;
        };
        let Some(resources) = &self.render else {
            return;
        };
        let (Some(group0), Some(group1)) = (&resources.group0, &resources.group1) else {
            return;
        };
        let pipeline = if line_mode {
            material.line_pipeline.as_deref()
        } else {
            material.pipeline.as_deref()
        };
        let Some(pipeline) = pipeline else {
            return;
        };
        if material.draw_commands.is_empty() {
            return;
        }

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, group0, &[view_id * UNIFORM_REGION_ALIGN as u32]);
        pass.set_bind_group(
            1,
            group1,
            &[bind_region_offset(region, view_id, material.global_id)],
        );

        let geometry = &scene.geometry_buffers[material.geometry_buffers as usize];
        pass.set_vertex_buffer(0, geometry.vertex.slice(..));
        pass.set_index_buffer(geometry.index.slice(..), wgpu::IndexFormat::Uint32);

        let frame = self.frames.current_frame();
        pass.multi_draw_indexed_indirect_count(
            &buffers.culled_commands,
            calculations::culled_commands_byte_offset(
                material.surface_command_batch_offset,
                self.surface_commands_count,
                frame,
                view_id,
            ),
            &buffers.atomic_counters,
            calculations::counter_byte_offset(material.global_id, frame, view_id),
            material.draw_commands.len() as u32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_regions_do_not_overlap() {
        let a = bind_region_offset(BindRegion::Normal, MAX_VIEWS - 1, MAX_COMMAND_COUNTERS - 1);
        let b = bind_region_offset(BindRegion::Alternate, 0, 0);
        assert!(a < b);
    }

    #[test]
    fn uniform_block_sizes() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 160);
        assert_eq!(std::mem::size_of::<MaterialBindUniforms>(), 64);
    }

    #[test]
    fn debug_color_modes() {
        let material = Material {
            id: 2,
            ..Default::default()
        };
        let sizes = [4, 8, 2];
        assert_eq!(
            material_debug_color(MaterialDebugMode::None, &material, sizes),
            Vec4::ONE
        );
        let colored = material_debug_color(MaterialDebugMode::Opaque, &material, sizes);
        assert_ne!(colored, Vec4::ONE);
    }

    #[test]
    fn fog_vectors_eye_inside_without_surface() {
        let fog = Fog {
            tc_scale: 1.0,
            ..Default::default()
        };
        let refdef = RefDef::default();
        let (_, depth, eye_t) = fog_vectors(&fog, &refdef);
        assert_eq!(depth, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(eye_t, 1.0);
    }
}
