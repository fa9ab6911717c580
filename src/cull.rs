//! GPU cull dispatcher
//!
//! Per view of the next frame: optionally rebuild the depth pyramid,
//! then run the cull pass (surface visibility + portal distances) and
//! the batch-compaction pass. Passes on one encoder execute in order,
//! which provides the storage/atomic ordering the compaction needs.
//! The PVS lock latches the cull inputs of a frame and replays them
//! until released.

use crate::constants::{
    DEPTH_REDUCTION_GROUP_DIM, MAX_COMMAND_COUNTERS, MAX_VIEWS, PORTAL_CULL_GROUP_SIZE,
    UNIFORM_REGION_ALIGN,
};
use crate::error::MaterialResult;
use crate::gpu::buffer_layouts::{calculations, descriptor_words, ClearUniforms, CullUniforms,
    DepthReductionUniforms};
use crate::material::system::MaterialSystem;
use crate::portal::{expand_portal_views, PortalExpansion};
use crate::scene::{DrawSurfId, RefDef};

impl MaterialSystem {
    /// Clear the next frame's per-view atomic counters.
    pub fn update_frame_data(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let Some(buffers) = &self.buffers else {
            return;
        };

        self.queue.write_buffer(
            &buffers.clear_uniforms,
            0,
            bytemuck::bytes_of(&ClearUniforms {
                frame: self.frames.next_frame(),
                _pad: [0; 3],
            }),
        );

        let bind_group = self.pipelines.clear_bind_group(&self.device, buffers);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Clear Counters Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipelines.clear_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(MAX_VIEWS, 1, 1);
    }

    /// Rebuild the depth pyramid from the scene depth buffer.
    fn depth_reduction(&mut self, encoder: &mut wgpu::CommandEncoder, scene_depth: &wgpu::TextureView) {
        if self.config.lock_pvs {
            // Keep testing against the pyramid latched with the lock.
            return;
        }
        let (Some(buffers), Some(pyramid)) = (&self.buffers, &self.depth_pyramid) else {
            return;
        };

        // One uniform region per reduction step, written up front.
        for level in 0..pyramid.levels {
            let (width, height) = pyramid.level_size(level);
            self.queue.write_buffer(
                &buffers.depth_reduction_uniforms,
                level as u64 * UNIFORM_REGION_ALIGN,
                bytemuck::bytes_of(&DepthReductionUniforms {
                    view_width: width,
                    view_height: height,
                    initial_level: (level == 0) as u32,
                    _pad: 0,
                }),
            );
        }

        for level in 0..pyramid.levels {
            let (width, height) = pyramid.level_size(level);
            // The initial pass reads the scene depth buffer only; its
            // sampled-level binding must still not alias the written
            // level, so it points one level up.
            let source = if level == 0 { 1 } else { level - 1 };
            let bind_group = self.pipelines.depth_reduction_bind_group(
                &self.device,
                buffers,
                scene_depth,
                pyramid,
                source,
                level,
            );

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Depth Reduction Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.depth_reduction_pipeline);
            pass.set_bind_group(
                0,
                &bind_group,
                &[(level * UNIFORM_REGION_ALIGN as u32) as wgpu::DynamicOffset],
            );
            pass.dispatch_workgroups(
                width.div_ceil(DEPTH_REDUCTION_GROUP_DIM),
                height.div_ceil(DEPTH_REDUCTION_GROUP_DIM),
                1,
            );
        }
    }

    /// Dispatch culling and batch compaction for every queued view of
    /// the next frame.
    pub fn cull_surfaces(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        refdef: &RefDef,
        scene_depth: Option<&wgpu::TextureView>,
    ) {
        if !self.generated_world {
            return;
        }

        // The cull bind group always references a pyramid, even when
        // occlusion culling is off.
        if self.depth_pyramid.is_none() {
            self.depth_pyramid = Some(crate::gpu::DepthPyramid::new(&self.device, 2, 2));
        }

        if self.config.gpu_occlusion_culling {
            if let Some(depth) = scene_depth {
                self.depth_reduction(encoder, depth);
            }
        }

        let next_frame = self.frames.next_frame();
        let view_count = self.frames.next().view_count;

        let surface_groups = self.total_draw_surfs.div_ceil(MAX_COMMAND_COUNTERS);
        let portal_groups = self.total_portals.div_ceil(PORTAL_CULL_GROUP_SIZE);

        // Latch or release the PVS lock before uniforms are written.
        if self.pvs_lock.locked && !self.config.lock_pvs {
            self.pvs_lock.locked = false;
        }
        if self.config.lock_pvs && !self.pvs_lock.locked {
            self.pvs_lock.locked = true;
            self.pvs_lock.origins.clear();
            self.pvs_lock.frustums.clear();
            for view in 0..view_count {
                let frame = &self.frames.next().views[view as usize];
                self.pvs_lock.origins.push(frame.origin);
                self.pvs_lock.frustums.push(frame.frustum);
            }
            self.pvs_lock.view_matrix = refdef.view_matrix;
        }

        let (width, height) = self
            .depth_pyramid
            .as_ref()
            .map(|p| (p.width, p.height))
            .unwrap_or((0, 0));

        for view in 0..view_count {
            let (origin, frustum, view_matrix) = if self.pvs_lock.locked {
                (
                    self.pvs_lock.origins[view as usize],
                    self.pvs_lock.frustums[view as usize],
                    self.pvs_lock.view_matrix,
                )
            } else {
                let frame = &self.frames.next().views[view as usize];
                (frame.origin, frame.frustum, refdef.view_matrix)
            };

            let mut frustum_planes = [[0.0f32; 4]; 6];
            for (target, plane) in frustum_planes.iter_mut().zip(frustum.iter()) {
                *target = [plane.normal.x, plane.normal.y, plane.normal.z, plane.dist];
            }

            let uniforms = CullUniforms {
                frustum_planes,
                view_matrix: view_matrix.to_cols_array_2d(),
                camera_position: origin.to_array(),
                frame: next_frame,
                view_id: view,
                total_draw_surfs: self.total_draw_surfs,
                total_portals: self.total_portals,
                first_portal_group: surface_groups,
                surface_commands_offset: calculations::surface_commands_offset(
                    self.surface_commands_count,
                    next_frame,
                    view,
                ),
                use_frustum_culling: self.config.gpu_frustum_culling as u32,
                use_occlusion_culling: (self.config.gpu_occlusion_culling
                    && scene_depth.is_some()) as u32,
                view_width: width,
                view_height: height,
                p00: refdef.projection_matrix.x_axis.x,
                p11: refdef.projection_matrix.y_axis.y,
                descriptor_words: descriptor_words(self.max_stages),
                _reserved: [[0.0; 4]; 2],
            };
            if let Some(buffers) = &self.buffers {
                self.queue.write_buffer(
                    &buffers.cull_uniforms,
                    view as u64 * UNIFORM_REGION_ALIGN,
                    bytemuck::bytes_of(&uniforms),
                );
            }
        }

        let Some(buffers) = &self.buffers else {
            return;
        };
        let Some(pyramid) = &self.depth_pyramid else {
            return;
        };

        let cull_bind_group = self.pipelines.cull_bind_group(&self.device, buffers, pyramid);
        let process_bind_group = self.pipelines.process_bind_group(&self.device, buffers);

        for view in 0..view_count {
            let offset = (view * UNIFORM_REGION_ALIGN as u32) as wgpu::DynamicOffset;

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Cull Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipelines.cull_pipeline);
                pass.set_bind_group(0, &cull_bind_group, &[offset]);
                pass.dispatch_workgroups(surface_groups + portal_groups, 1, 1);
            }

            // Separate pass: compaction reads the flags and counters the
            // cull pass just wrote.
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Process Surfaces Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipelines.process_pipeline);
                pass.set_bind_group(0, &process_bind_group, &[offset]);
                pass.dispatch_workgroups(self.total_batch_count, 1, 1);
            }
        }
    }

    /// Read back the current frame's portal distances and grow the next
    /// frame's view tree. `off_screen` is the CPU-side screen-rectangle
    /// test; returning true rejects the portal.
    pub fn add_portal_surfaces(
        &mut self,
        off_screen: &mut dyn FnMut(DrawSurfId) -> bool,
    ) -> MaterialResult<PortalExpansion> {
        if self.total_portals == 0 || self.config.lock_pvs {
            return Ok(PortalExpansion {
                view_count: 1,
                complete: true,
            });
        }

        let data = {
            let buffers = self.buffers.as_ref().ok_or(
                crate::error::MaterialError::WorldNotGenerated {
                    operation: "add_portal_surfaces",
                },
            )?;

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Portal Readback Encoder"),
                });
            buffers.copy_portal_area(&mut encoder, self.frames.current_frame());
            self.queue.submit(Some(encoder.finish()));

            buffers.read_portals(&self.device)?
        };

        Ok(expand_portal_views(
            &mut self.frames,
            &data,
            self.total_portals,
            &mut self.portal_stack,
            off_screen,
        ))
    }
}
