//! The material system facade
//!
//! Owns the material packs, the per-surface stage assignments, the seven
//! GPU buffers, the frame ring, and the portal state. World lifecycle is
//! `generate_world_materials` / `free`; per-frame operations live here
//! and in `cull` / `render`.

use std::sync::Arc;

use glam::Vec3;
use log::{debug, info};
use rustc_hash::FxHashMap;

use super::layout::{assign_slot, plan_regions, MaterialsBufferLayout};
use super::surface_data::{
    write_surface_stage, SharedImages, StageAssignment, SurfaceRecord, WriterContext,
};
use super::table::MaterialTable;
use super::{DrawCommand, Material, NUM_PACKS};
use crate::config::MaterialSystemConfig;
use crate::constants::{
    MAX_COMMAND_COUNTERS, MAX_SURFACE_COMMAND_BATCHES, MAX_VIEWFRAMES,
    SURFACE_COMMANDS_PER_BATCH,
};
use crate::error::{MaterialError, MaterialResult};
use crate::frame::FrameRing;
use crate::gpu::buffer_layouts::{descriptor_words, IndirectCommand, SurfaceCommand,
    SurfaceCommandBatch};
use crate::gpu::{CullPipelines, DepthPyramid, PipelineBuffers, WorldBufferSizes};
use crate::portal::{portal_bounding_sphere, PortalStack};
use crate::gpu::buffer_layouts::PortalSurfaceData;
use crate::residency::BindlessTable;
use crate::scene::{DrawSurfId, RefDef, ShaderId, WorldScene};
use crate::shader::StageFamily;

/// PVS-lock latch: cull inputs frozen for debugging.
#[derive(Debug, Clone, Default)]
pub struct PvsLock {
    pub locked: bool,
    pub origins: Vec<Vec3>,
    pub frustums: Vec<crate::scene::Frustum>,
    pub view_matrix: glam::Mat4,
}

/// The GPU-driven material and draw-command system.
pub struct MaterialSystem {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) config: MaterialSystemConfig,

    pub(crate) table: MaterialTable,
    pub(crate) layout: MaterialsBufferLayout,

    /// Stage assignments per processed surface.
    pub(crate) records: FxHashMap<DrawSurfId, SurfaceRecord>,
    /// Surfaces with at least one dynamic stage, rewritten every frame.
    pub(crate) dynamic_surfaces: Vec<DrawSurfId>,
    /// Surfaces handed back to the scene for the conventional path.
    pub(crate) autosprite_surfaces: Vec<DrawSurfId>,
    pub(crate) sky_shaders: Vec<ShaderId>,

    pub(crate) portal_surfaces: Vec<DrawSurfId>,
    pub(crate) portal_bounds: Vec<PortalSurfaceData>,
    pub(crate) portal_stack: PortalStack,
    pub(crate) total_portals: u32,

    pub(crate) frames: FrameRing,
    pub(crate) residency: BindlessTable,
    pub(crate) images: SharedImages,

    pub(crate) pipelines: CullPipelines,
    pub(crate) buffers: Option<PipelineBuffers>,
    pub(crate) depth_pyramid: Option<DepthPyramid>,
    pub(crate) render: Option<crate::render::RenderResources>,
    pub(crate) pvs_lock: PvsLock,

    pub(crate) total_draw_surfs: u32,
    pub(crate) total_batch_count: u32,
    pub(crate) surface_commands_count: u32,
    pub(crate) max_stages: u32,
    pub(crate) world_view_bounds: (Vec3, Vec3),

    pub(crate) generating_world: bool,
    pub(crate) generated_world: bool,
    pub(crate) frame_start: bool,

    /// Materials submitted so far this frame, for residency eviction.
    pub(crate) rendered_materials: Vec<(u32, u32)>,
    /// Heat-haze materials awaiting their foreground copy draw.
    pub(crate) pending_foreground_copies: Vec<(u32, u32)>,
}

impl MaterialSystem {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: MaterialSystemConfig,
    ) -> Self {
        let pipelines = CullPipelines::new(&device);
        let residency = BindlessTable::new(config.bindless_capacity);
        Self {
            device,
            queue,
            config,
            table: MaterialTable::default(),
            layout: MaterialsBufferLayout::default(),
            records: FxHashMap::default(),
            dynamic_surfaces: Vec::new(),
            autosprite_surfaces: Vec::new(),
            sky_shaders: Vec::new(),
            portal_surfaces: Vec::new(),
            portal_bounds: Vec::new(),
            portal_stack: PortalStack::default(),
            total_portals: 0,
            frames: FrameRing::default(),
            residency,
            images: SharedImages::default(),
            pipelines,
            buffers: None,
            depth_pyramid: None,
            render: None,
            pvs_lock: PvsLock::default(),
            total_draw_surfs: 0,
            total_batch_count: 0,
            surface_commands_count: 0,
            max_stages: 0,
            world_view_bounds: (Vec3::ZERO, Vec3::ZERO),
            generating_world: false,
            generated_world: false,
            frame_start: false,
            rendered_materials: Vec::new(),
            pending_foreground_copies: Vec::new(),
        }
    }

    /// Engine images the uniform writers reference.
    pub fn set_shared_images(&mut self, images: SharedImages) {
        self.images = images;
    }

    /// Create the draw-path GPU resources on first use. Deferred so
    /// compute-only hosts never require the binding-array features; on a
    /// device without them the draw path stays disabled.
    pub(crate) fn ensure_render_resources(&mut self) {
        if self.render.is_some() {
            return;
        }
        if !self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_BINDING_ARRAY)
        {
            log::warn!("device lacks TEXTURE_BINDING_ARRAY; material draw path disabled");
            return;
        }
        self.render = Some(crate::render::RenderResources::new(
            &self.device,
            self.config.bindless_capacity as u32,
        ));
    }

    pub fn residency(&self) -> &BindlessTable {
        &self.residency
    }

    pub fn surface_commands_count(&self) -> u32 {
        self.surface_commands_count
    }

    pub fn pipeline_buffers(&self) -> Option<&PipelineBuffers> {
        self.buffers.as_ref()
    }

    pub fn current_frame(&self) -> u32 {
        self.frames.current_frame()
    }

    pub fn next_frame(&self) -> u32 {
        self.frames.next_frame()
    }

    pub fn config(&self) -> &MaterialSystemConfig {
        &self.config
    }

    pub fn total_draw_surfs(&self) -> u32 {
        self.total_draw_surfs
    }

    /// Bounds of all pipeline surfaces, captured at generation.
    pub fn world_bounds(&self) -> (Vec3, Vec3) {
        self.world_view_bounds
    }

    pub fn total_materials(&self) -> u32 {
        self.table.total_materials()
    }

    pub fn materials_layout(&self) -> &MaterialsBufferLayout {
        &self.layout
    }

    pub fn packs(&self) -> &[super::MaterialPack; NUM_PACKS] {
        &self.table.packs
    }

    pub fn record(&self, surf: DrawSurfId) -> Option<&SurfaceRecord> {
        self.records.get(&surf)
    }

    /// Surfaces drawn through the conventional autosprite path; the scene
    /// re-queues them each frame.
    pub fn autosprite_surfaces(&self) -> &[DrawSurfId] {
        &self.autosprite_surfaces
    }

    /// True between `generate_world_materials` and `free`.
    pub fn world_generated(&self) -> bool {
        self.generated_world
    }

    /// True while world-material generation is in progress; the scene
    /// must not mutate its surfaces or shaders then.
    pub fn generating_world(&self) -> bool {
        self.generating_world
    }

    /// Materials submitted so far this frame, as (pack, id) pairs.
    pub fn rendered_materials(&self) -> &[(u32, u32)] {
        &self.rendered_materials
    }

    fn surface_enters_pipeline(&mut self, scene: &WorldScene, id: DrawSurfId) -> Option<ShaderId> {
        let surf = scene.surface(id);
        if !surf.world_surface || surf.skip {
            return None;
        }
        let shader_id = surf.shader?;
        let shader = scene.effective_shader(shader_id);
        if shader.is_sky {
            if !self.sky_shaders.contains(&shader_id) {
                self.sky_shaders.push(shader_id);
            }
            return None;
        }
        if shader.is_portal {
            self.portal_surfaces.push(id);
            return None;
        }
        if shader.autosprite {
            self.autosprite_surfaces.push(id);
            return None;
        }
        Some(shader_id)
    }

    /// Build the deduplicated material set and all world buffers.
    ///
    /// The scene must not mutate its surfaces or shaders while this runs.
    pub fn generate_world_materials(
        &mut self,
        scene: &WorldScene,
        refdef: &RefDef,
    ) -> MaterialResult<()> {
        self.generating_world = true;
        debug!("Generating world materials");

        let (mut bounds_min, mut bounds_max) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));

        self.total_draw_surfs = 0;
        let mut pack_ids = [0u32; NUM_PACKS];

        for index in 0..scene.surfaces.len() {
            let id = DrawSurfId(index as u32);
            let Some(shader_id) = self.surface_enters_pipeline(scene, id) else {
                continue;
            };
            let surf = scene.surface(id);
            let shader = scene.effective_shader(shader_id);

            bounds_min = bounds_min.min(surf.bounds.origin - surf.bounds.radius);
            bounds_max = bounds_max.max(surf.bounds.origin + surf.bounds.radius);

            // Depth pre-pass children are folded into their parent's
            // descriptor instead of counting as their own surface.
            if !surf.material_system_skip {
                self.total_draw_surfs += 1;
            }

            let mut record = SurfaceRecord {
                surf: id,
                stages: Vec::with_capacity(shader.num_stages()),
            };
            let mut previous_material_id = 0u32;
            for (stage_index, stage) in shader.stages.iter().enumerate() {
                let (pack, material, dynamics) = self.table.process_stage(
                    scene,
                    id,
                    surf,
                    shader,
                    stage_index,
                    stage,
                    &mut pack_ids,
                    &mut previous_material_id,
                );
                record.stages.push(StageAssignment {
                    pack,
                    material,
                    family: StageFamily::classify(stage),
                    dynamics,
                    ..Default::default()
                });
            }

            let descriptor_stages = shader.num_stages() as u32
                + surf.depth_surface.is_some() as u32
                + surf.fog_surface.is_some() as u32;
            self.max_stages = self.max_stages.max(descriptor_stages);

            self.records.insert(id, record);
        }

        if bounds_min.x <= bounds_max.x {
            self.world_view_bounds = (bounds_min, bounds_max);
            info!(
                "World bounds: min: {} {} {} max: {} {} {}",
                bounds_min.x, bounds_min.y, bounds_min.z,
                bounds_max.x, bounds_max.y, bounds_max.z
            );
        }

        let total_materials = self.table.total_materials();
        if total_materials > MAX_COMMAND_COUNTERS {
            return Err(MaterialError::TooManyMaterials {
                count: total_materials,
            });
        }

        let materials_staging = self.generate_world_materials_buffer(scene, refdef)?;

        info!(
            "Generated {} materials from {} surfaces",
            total_materials,
            scene.surfaces.len()
        );

        self.add_all_world_surfaces(scene, materials_staging)?;
        self.generate_portal_bounding_spheres(scene);

        self.generated_world = true;
        Ok(())
    }

    /// Lay out the materials buffer and serialize every (surface, stage)
    /// uniform block into a staging image of it.
    fn generate_world_materials_buffer(
        &mut self,
        scene: &WorldScene,
        refdef: &RefDef,
    ) -> MaterialResult<Vec<u32>> {
        debug!("Generating materials buffer");

        self.layout = plan_regions(&mut self.table.packs);
        let mut staging = vec![0u32; self.layout.total_words as usize];

        for pack_index in 0..NUM_PACKS {
            for material_index in 0..self.table.packs[pack_index].materials.len() {
                self.fill_material_surfaces(scene, refdef, pack_index, material_index, &mut staging)?;
            }
        }

        Ok(staging)
    }

    /// Walk one material's surfaces: claim slots, register textures,
    /// record draw commands, and write the uniform blocks.
    fn fill_material_surfaces(
        &mut self,
        scene: &WorldScene,
        refdef: &RefDef,
        pack_index: usize,
        material_index: usize,
        staging: &mut Vec<u32>,
    ) -> MaterialResult<()> {
        let surf_ids = self.table.packs[pack_index].materials[material_index]
            .draw_surfs
            .clone();

        for surf_id in surf_ids {
            let surf = scene.surface(surf_id);
            let shader_id = surf.shader.expect("processed surface lost its shader");
            let shader = scene.effective_shader(shader_id);

            let mut record = self
                .records
                .remove(&surf_id)
                .expect("processed surface lost its record");
            let mut has_dynamic_stages = false;

            for (stage_index, stage) in shader.stages.iter().enumerate() {
                let assignment = &mut record.stages[stage_index];
                if assignment.material != material_index as u32
                    || assignment.pack != pack_index as u32
                {
                    continue;
                }

                let material = &mut self.table.packs[pack_index].materials[material_index];
                let slot = assign_slot(material, assignment.dynamics.dynamic, &self.layout);
                assignment.ssbo_slot = slot.absolute;

                Self::add_stage_textures(material, scene, surf, stage)?;

                let mut ctx = WriterContext {
                    scene,
                    images: &self.images,
                    residency: &mut self.residency,
                    time: refdef.float_time,
                    view_origin: refdef.view_origin,
                    map_light_factor: 1.0,
                    relief_depth_scale_default: 1.0,
                    specular_exponent_min_default: 2.0,
                    specular_exponent_max_default: 256.0,
                };
                write_surface_stage(
                    staging,
                    assignment,
                    &self.table.packs[pack_index].materials[material_index],
                    surf,
                    shader,
                    stage,
                    &mut ctx,
                );

                // Record the indirect draw for this (surface, stage).
                let material = &mut self.table.packs[pack_index].materials[material_index];
                // The draw reads its slot from the buffer start, so the
                // command always carries the absolute index.
                material.draw_commands.push(DrawCommand {
                    cmd: IndirectCommand {
                        index_count: surf.geometry.index_count,
                        instance_count: 1,
                        first_index: surf.geometry.first_index,
                        base_vertex: surf.geometry.base_vertex,
                        base_instance: slot.absolute,
                    },
                    materials_ssbo_slot: slot.absolute,
                });
                let assignment = &mut record.stages[stage_index];
                assignment.draw_command = material.draw_commands.len() as u32 - 1;

                if assignment.dynamics.dynamic {
                    // The per-frame rewrite maps only the dynamic region;
                    // re-express the slot relative to it.
                    assignment.ssbo_slot = slot.relative;
                    has_dynamic_stages = true;
                }
            }

            self.records.insert(surf_id, record);

            if has_dynamic_stages && !self.dynamic_surfaces.contains(&surf_id) {
                self.dynamic_surfaces.push(surf_id);
            }
        }
        Ok(())
    }

    fn add_stage_textures(
        material: &mut Material,
        scene: &WorldScene,
        surf: &crate::scene::DrawSurface,
        stage: &crate::shader::ShaderStage,
    ) -> MaterialResult<()> {
        for bundle in &stage.bundles {
            for image in &bundle.images {
                material.add_texture(*image)?;
            }
        }
        if let Some(lightmap) = surf.lightmap {
            material.add_texture(lightmap)?;
        }
        if let Some(deluxemap) = surf.deluxemap {
            material.add_texture(deluxemap)?;
        }
        if let Some((grid1, grid2)) = scene.light_grid {
            if material.permutation.enable_grid_lighting {
                material.add_texture(grid1)?;
            }
            if material.permutation.enable_grid_deluxe_mapping {
                material.add_texture(grid2)?;
            }
        }
        Ok(())
    }

    /// Generate the command, descriptor, and batch buffers and upload
    /// every world buffer to the GPU.
    fn add_all_world_surfaces(
        &mut self,
        scene: &WorldScene,
        materials_staging: Vec<u32>,
    ) -> MaterialResult<()> {
        self.generate_world_command_buffer(scene, materials_staging)?;
        self.generating_world = false;
        Ok(())
    }

    fn generate_world_command_buffer(
        &mut self,
        scene: &WorldScene,
        materials_staging: Vec<u32>,
    ) -> MaterialResult<()> {
        debug!("Generating world command buffer");

        // Assign batch runs and global ids in pack order.
        self.total_batch_count = 0;
        let mut batch_offset = 0u32;
        let mut global_id = 0u32;
        for pack in &mut self.table.packs {
            for material in &mut pack.materials {
                let cmd_count = material.draw_commands.len() as u32;
                let batch_count = cmd_count.div_ceil(SURFACE_COMMANDS_PER_BATCH);

                material.surface_command_batch_offset = batch_offset;
                material.surface_command_batch_count = batch_count;
                material.global_id = global_id;

                batch_offset += batch_count;
                self.total_batch_count += batch_count;
                global_id += 1;
            }
        }
        debug!("Total batch count: {}", self.total_batch_count);

        if self.total_batch_count > MAX_SURFACE_COMMAND_BATCHES {
            return Err(MaterialError::TooManyBatches {
                count: self.total_batch_count,
            });
        }

        self.surface_commands_count = self.total_batch_count * SURFACE_COMMANDS_PER_BATCH;
        let words = descriptor_words(self.max_stages);

        let mut descriptors: Vec<u32> =
            Vec::with_capacity((self.total_draw_surfs * words) as usize);
        let mut commands =
            vec![SurfaceCommand::default(); self.surface_commands_count as usize];

        let command_id = |system: &Self, child: DrawSurfId, stage: usize| -> MaterialResult<u32> {
            let record = system
                .records
                .get(&child)
                .ok_or(MaterialError::UnassignedStage {
                    surface: child.0,
                    stage: stage as u32,
                })?;
            let assignment = &record.stages[stage];
            let material = &system.table.packs[assignment.pack as usize].materials
                [assignment.material as usize];
            Ok(material.surface_command_batch_offset * SURFACE_COMMANDS_PER_BATCH
                + assignment.draw_command)
        };

        for index in 0..scene.surfaces.len() {
            let id = DrawSurfId(index as u32);
            let surf = scene.surface(id);
            if surf.material_system_skip || !self.records.contains_key(&id) {
                continue;
            }
            let shader_id = surf.shader.expect("processed surface lost its shader");
            let shader = scene.effective_shader(shader_id);

            let mut descriptor = vec![0u32; words as usize];
            descriptor[0] = surf.bounds.origin.x.to_bits();
            descriptor[1] = surf.bounds.origin.y.to_bits();
            descriptor[2] = surf.bounds.origin.z.to_bits();
            descriptor[3] = surf.bounds.radius.to_bits();

            let depth_offset = surf.depth_surface.is_some() as usize;
            let mut write_stage = |slot: usize, cmd_id: u32, command: SurfaceCommand| {
                // Stored ids are offset by one; 0 means "no command".
                descriptor[4 + slot] = cmd_id + 1;
                commands[cmd_id as usize] = command;
            };

            if let Some(depth_surf) = surf.depth_surface {
                let cmd_id = command_id(self, depth_surf, 0)?;
                let command = self.surface_command(depth_surf, 0);
                write_stage(0, cmd_id, command);
            }

            for stage_index in 0..shader.num_stages() {
                let cmd_id = command_id(self, id, stage_index)?;
                let command = self.surface_command(id, stage_index);
                write_stage(stage_index + depth_offset, cmd_id, command);
            }

            if let Some(fog_surf) = surf.fog_surface {
                let cmd_id = command_id(self, fog_surf, 0)?;
                let command = self.surface_command(fog_surf, 0);
                write_stage(shader.num_stages() + depth_offset, cmd_id, command);
            }

            descriptors.extend_from_slice(&descriptor);
        }

        // Batch table: run of batches per material, in global-id order.
        let mut batches =
            vec![SurfaceCommandBatch::default(); self.total_batch_count as usize];
        let mut batch_index = 0usize;
        for pack in &self.table.packs {
            for material in &pack.materials {
                for _ in 0..material.surface_command_batch_count {
                    batches[batch_index] = SurfaceCommandBatch {
                        material_id: material.global_id,
                        batch_offset: material.surface_command_batch_offset,
                        _pad: [0; 2],
                    };
                    batch_index += 1;
                }
            }
        }

        // Allocate the world buffers now that every extent is known.
        let sizes = WorldBufferSizes {
            materials_bytes: self.layout.total_bytes(),
            descriptor_words: words,
            surface_descriptors_count: self.total_draw_surfs,
            surface_commands_count: self.surface_commands_count,
            total_portals: self.portal_surfaces.len() as u32,
            debug_buffer: self.config.debug_buffer,
        };
        let buffers = PipelineBuffers::new(&self.device, &sizes);

        if !materials_staging.is_empty() {
            self.queue
                .write_buffer(&buffers.materials, 0, bytemuck::cast_slice(&materials_staging));
        }
        if !descriptors.is_empty() {
            self.queue.write_buffer(
                &buffers.surface_descriptors,
                0,
                bytemuck::cast_slice(&descriptors),
            );
        }
        if !commands.is_empty() {
            // Every (frame, view) slice starts from the same command image.
            let slice_bytes: &[u8] = bytemuck::cast_slice(&commands);
            for viewframe in 0..MAX_VIEWFRAMES {
                self.queue.write_buffer(
                    &buffers.surface_commands,
                    viewframe as u64 * slice_bytes.len() as u64,
                    slice_bytes,
                );
            }
        }
        if !batches.is_empty() {
            self.queue
                .write_buffer(&buffers.surface_batches, 0, bytemuck::cast_slice(&batches));
        }

        self.buffers = Some(buffers);
        Ok(())
    }

    fn surface_command(&self, surf: DrawSurfId, stage: usize) -> SurfaceCommand {
        let record = &self.records[&surf];
        let assignment = &record.stages[stage];
        let material =
            &self.table.packs[assignment.pack as usize].materials[assignment.material as usize];
        SurfaceCommand {
            enabled: 0,
            draw_command: material.draw_commands[assignment.draw_command as usize].cmd,
        }
    }

    /// Compute portal bounding spheres and seed the portal buffer.
    fn generate_portal_bounding_spheres(&mut self, scene: &WorldScene) {
        debug!("Generating portal bounding spheres");

        self.total_portals = self.portal_surfaces.len() as u32;
        if self.total_portals == 0 {
            return;
        }

        self.portal_bounds.clear();
        for (index, surf_id) in self.portal_surfaces.iter().enumerate() {
            let surf = scene.surface(*surf_id);
            let sphere = portal_bounding_sphere(&surf.vertices);
            self.portal_bounds.push(PortalSurfaceData {
                origin: sphere.origin.to_array(),
                radius: sphere.radius,
                distance: -1.0,
                draw_surf_id: index as u32,
                _pad: [0; 2],
            });
        }

        // Replicate the seed data across every (frame, view) slice.
        if let Some(buffers) = &self.buffers {
            let mut seeded =
                Vec::with_capacity((self.total_portals * MAX_VIEWFRAMES) as usize);
            for _ in 0..MAX_VIEWFRAMES {
                seeded.extend_from_slice(&self.portal_bounds);
            }
            self.queue
                .write_buffer(&buffers.portal_surfaces, 0, bytemuck::cast_slice(&seeded));
        }
    }

    /// Per-frame rewrite of the dynamic uniform region.
    pub fn update_dynamic_surfaces(&mut self, scene: &WorldScene, refdef: &RefDef) {
        if self.layout.dynamic_size_words == 0 {
            return;
        }

        // Unset uniforms read as zero; match that before rewriting.
        let mut staging = vec![0u32; self.layout.dynamic_size_words as usize];

        for surf_index in 0..self.dynamic_surfaces.len() {
            let surf_id = self.dynamic_surfaces[surf_index];
            let surf = scene.surface(surf_id);
            let shader_id = surf.shader.expect("dynamic surface lost its shader");
            let shader = scene.effective_shader(shader_id);

            let mut record = self
                .records
                .remove(&surf_id)
                .expect("dynamic surface lost its record");
            for (stage_index, stage) in shader.stages.iter().enumerate() {
                let assignment = &mut record.stages[stage_index];
                if !assignment.dynamics.dynamic {
                    continue;
                }
                let material = &self.table.packs[assignment.pack as usize].materials
                    [assignment.material as usize];
                let mut ctx = WriterContext {
                    scene,
                    images: &self.images,
                    residency: &mut self.residency,
                    time: refdef.float_time,
                    view_origin: refdef.view_origin,
                    map_light_factor: 1.0,
                    relief_depth_scale_default: 1.0,
                    specular_exponent_min_default: 2.0,
                    specular_exponent_max_default: 256.0,
                };
                write_surface_stage(
                    &mut staging,
                    assignment,
                    material,
                    surf,
                    shader,
                    stage,
                    &mut ctx,
                );
            }
            self.records.insert(surf_id, record);
        }

        if let Some(buffers) = &self.buffers {
            self.queue.write_buffer(
                &buffers.materials,
                self.layout.dynamic_offset_bytes(),
                bytemuck::cast_slice(&staging),
            );
        }
    }

    /// Allocate the occlusion depth pyramid for the current resolution.
    pub fn generate_depth_images(&mut self, width: u32, height: u32) {
        self.depth_pyramid = Some(DepthPyramid::new(&self.device, width, height));
    }

    pub fn start_frame(&mut self) {
        if !self.generated_world {
            return;
        }
        self.frames.start_frame();
        self.frame_start = true;
    }

    pub fn end_frame(&mut self) {
        if !self.generated_world {
            return;
        }
        self.frames.end_frame();
    }

    /// Queue one view of the next frame for GPU culling.
    pub fn queue_surface_cull(
        &mut self,
        view_id: u32,
        origin: Vec3,
        frustum: &crate::scene::Frustum,
    ) {
        self.frames.queue_surface_cull(view_id, origin, frustum);
    }

    /// Release all world state; the next world must regenerate from
    /// scratch (including `max_stages`, which is captured at layout
    /// time and never recomputed while a world is live).
    pub fn free(&mut self) {
        self.generated_world = false;

        self.records.clear();
        self.dynamic_surfaces.clear();
        self.autosprite_surfaces.clear();
        self.sky_shaders.clear();
        self.portal_surfaces.clear();
        self.portal_bounds.clear();
        self.portal_stack = PortalStack::default();
        self.total_portals = 0;
        self.rendered_materials.clear();
        self.pending_foreground_copies.clear();

        self.frames.reset();
        self.residency.clear();
        self.buffers = None;
        self.layout = MaterialsBufferLayout::default();
        self.table.clear();

        self.total_draw_surfs = 0;
        self.total_batch_count = 0;
        self.surface_commands_count = 0;
        self.max_stages = 0;
        self.frame_start = false;
        self.pvs_lock = PvsLock::default();
    }
}
