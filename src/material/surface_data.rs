//! Per-stage surface data writers
//!
//! One writer per shader family serializes the family's uniform block
//! into the (surface, stage) slot of the materials buffer. Writers run
//! once per stage at world generation and again every frame for stages
//! classified dynamic. All writers share the same preamble: skip the
//! stage when it is initialized and nothing in it can change.

use glam::{Mat3, Vec3};
use log::warn;

use super::Material;
use crate::residency::BindlessTable;
use crate::scene::{DrawSurfId, DrawSurface, TextureId, WorldScene};
use crate::shader::uniforms::{self, write_block};
use crate::shader::{
    bundle_index, state_bits, AlphaGen, ColorGen, Shader, ShaderStage, StageDynamics,
    StageFamily, StageType,
};

/// Where a stage's uniforms live and how they are addressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageAssignment {
    pub pack: u32,
    pub material: u32,
    /// Slot index; relative to the dynamic region for dynamic stages.
    pub ssbo_slot: u32,
    /// Index into the material's draw-command list.
    pub draw_command: u32,
    pub family: StageFamily,
    pub dynamics: StageDynamics,
    pub initialized: bool,
}

/// Stage assignments of one surface, owned by the material system.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRecord {
    pub surf: DrawSurfId,
    pub stages: Vec<StageAssignment>,
}

/// Engine images shared with the whole frame (depth, feedback targets).
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedImages {
    pub depth: Option<TextureId>,
    pub current_render: Option<TextureId>,
    pub portal: Option<TextureId>,
    pub fog: Option<TextureId>,
    pub light_tiles: Option<TextureId>,
}

/// Everything a writer needs besides the destination slot.
pub struct WriterContext<'a> {
    pub scene: &'a WorldScene,
    pub images: &'a SharedImages,
    pub residency: &'a mut BindlessTable,
    pub time: f32,
    pub view_origin: Vec3,
    pub map_light_factor: f32,
    pub relief_depth_scale_default: f32,
    pub specular_exponent_min_default: f32,
    pub specular_exponent_max_default: f32,
}

impl<'a> WriterContext<'a> {
    /// Bindless handle of `texture`, claiming residency on first use.
    /// Slot 0 stands in when the table is exhausted; rendering degrades
    /// instead of failing.
    fn handle(&mut self, texture: Option<TextureId>) -> u32 {
        let Some(texture) = texture else {
            return 0;
        };
        match self.residency.make_resident(texture) {
            Some(slot) => slot,
            None => {
                warn!("bindless table full while writing surface data; texture dropped");
                0
            }
        }
    }
}

/// Alpha-test threshold encoded for the shader; negative selects the
/// less-than comparison.
fn alpha_threshold(bits: u32) -> f32 {
    match bits & state_bits::ATEST_BITS {
        state_bits::ATEST_GT_0 => 0.0,
        state_bits::ATEST_LT_HALF => -0.5,
        state_bits::ATEST_GE_HALF => 0.5,
        _ => -1.0,
    }
}

/// Pack the color/alpha generator selectors the way the shaders decode
/// them.
fn color_modulate(rgb: ColorGen, alpha: AlphaGen, vertex_overbright: bool) -> u32 {
    let rgb_bits = match rgb {
        ColorGen::Identity | ColorGen::IdentityLighting => 0,
        ColorGen::Vertex => 1,
        ColorGen::OneMinusVertex => 2,
        _ => 3,
    };
    let alpha_bits = match alpha {
        AlphaGen::Identity => 0,
        AlphaGen::Vertex => 1,
        AlphaGen::OneMinusVertex => 2,
        _ => 3,
    };
    rgb_bits | (alpha_bits << 4) | ((vertex_overbright as u32) << 8)
}

fn normal_scale(stage: &ShaderStage, time: f32) -> [f32; 4] {
    [1.0, 1.0, stage.normal_intensity_exp.evaluate(1.0, time), 0.0]
}

fn bundle_matrix(stage: &ShaderStage, index: usize, time: f32) -> Mat3 {
    stage
        .bundle(index)
        .map(|b| b.tex_matrix(time))
        .unwrap_or(Mat3::IDENTITY)
}

fn bundle_frame(stage: &ShaderStage, index: usize, time: f32) -> Option<TextureId> {
    stage.bundle(index).and_then(|b| b.frame_at(time))
}

/// Relief depth scale shared by the relief-mapped families.
fn relief_depth_scale(stage: &ShaderStage, shader: &Shader, ctx: &WriterContext) -> f32 {
    let depth = stage
        .depth_scale_exp
        .evaluate(ctx.relief_depth_scale_default, ctx.time);
    let shader_scale = if shader.relief_depth_scale == 0.0 {
        1.0
    } else {
        shader.relief_depth_scale
    };
    depth * shader_scale
}

/// Write one (surface, stage) slot. `words` is the region the slot
/// addresses: the whole buffer at generation time, the dynamic region
/// during the per-frame rewrite.
pub fn write_surface_stage(
    words: &mut [u32],
    assignment: &mut StageAssignment,
    material: &Material,
    surf: &DrawSurface,
    shader: &Shader,
    stage: &ShaderStage,
    ctx: &mut WriterContext,
) {
    let dynamics = assignment.dynamics;
    let updated = !assignment.initialized
        || dynamics.color_dynamic
        || dynamics.tex_matrices_dynamic
        || dynamics.dynamic;
    if !updated {
        return;
    }
    assignment.initialized = true;

    let stride = material.padded_stride_words as usize;
    let offset = assignment.ssbo_slot as usize * stride;
    let slot = &mut words[offset..offset + stride];
    let time = ctx.time;

    match assignment.family {
        StageFamily::None => unreachable!("NONE surface data writer dispatched"),
        StageFamily::Nop => {}
        StageFamily::Generic3D => {
            let color_map = if stage.stage_type == StageType::StyleLightMap {
                surf.lightmap
            } else {
                bundle_frame(stage, bundle_index::COLOR_MAP, time)
            };
            let vertex_overbright =
                stage.stage_type == StageType::ColorMap && surf.bsp_surface;
            let block = uniforms::Generic3dBlock {
                color: stage.compute_color(time).to_array(),
                texture_matrix: uniforms::tex_matrix(bundle_matrix(
                    stage,
                    bundle_index::COLOR_MAP,
                    time,
                )),
                color_map: ctx.handle(color_map),
                depth_map: ctx.handle(ctx.images.depth),
                alpha_threshold: alpha_threshold(stage.state_bits),
                color_modulate: color_modulate(
                    stage.rgb_gen,
                    stage.alpha_gen,
                    vertex_overbright,
                ),
                depth_scale: if stage.has_depth_fade {
                    stage.depth_fade_value
                } else {
                    0.0
                },
                _pad: [0; 3],
            };
            write_block(slot, &block);
        }
        StageFamily::LightMapping => {
            let p = &material.permutation;
            let height_map = (p.enable_relief_mapping && !p.has_height_map_in_normal_map)
                .then(|| bundle_frame(stage, bundle_index::HEIGHT_MAP, time))
                .flatten();
            let material_map = (p.enable_specular_mapping || p.enable_physical_mapping)
                .then(|| bundle_frame(stage, bundle_index::MATERIAL_MAP, time))
                .flatten();
            let light_map = if p.enable_grid_lighting {
                ctx.scene.light_grid.map(|(grid1, _)| grid1)
            } else {
                surf.lightmap
            };
            let deluxe_map = if p.enable_grid_deluxe_mapping {
                ctx.scene.light_grid.map(|(_, grid2)| grid2)
            } else {
                surf.deluxemap
            };

            let (environment_map0, environment_map1, environment_interpolation) =
                if p.enable_specular_mapping {
                    let probes = ctx.scene.nearest_cube_probes(ctx.view_origin, 2);
                    match probes.as_slice() {
                        [a, b] => {
                            let da = a.origin.distance(ctx.view_origin);
                            let db = b.origin.distance(ctx.view_origin);
                            let sum = da + db;
                            let interpolation = if sum > 0.0 { da / sum } else { 0.0 };
                            (Some(a.cubemap), Some(b.cubemap), interpolation)
                        }
                        [a] => (Some(a.cubemap), Some(a.cubemap), 0.0),
                        _ => (None, None, 0.0),
                    }
                } else {
                    (None, None, 0.0)
                };

            let light_factor = if p.enable_grid_lighting || surf.lightmap.is_some() {
                ctx.map_light_factor
            } else {
                1.0
            };

            let block = uniforms::LightMappingBlock {
                color: stage.compute_color(time).to_array(),
                texture_matrix: uniforms::tex_matrix(if stage.stage_type != StageType::LightMap
                {
                    bundle_matrix(stage, bundle_index::DIFFUSE_MAP, time)
                } else {
                    Mat3::IDENTITY
                }),
                light_factor,
                alpha_threshold: alpha_threshold(stage.state_bits),
                color_modulate: color_modulate(stage.rgb_gen, stage.alpha_gen, false),
                num_lights: 0,
                diffuse_map: ctx.handle(bundle_frame(stage, bundle_index::DIFFUSE_MAP, time)),
                normal_map: ctx.handle(bundle_frame(stage, bundle_index::NORMAL_MAP, time)),
                height_map: ctx.handle(height_map),
                material_map: ctx.handle(material_map),
                light_map: ctx.handle(light_map),
                deluxe_map: ctx.handle(deluxe_map),
                glow_map: ctx.handle(bundle_frame(stage, bundle_index::GLOW_MAP, time)),
                light_tiles: ctx.handle(ctx.images.light_tiles),
                relief_depth_scale: if p.enable_relief_mapping {
                    relief_depth_scale(stage, shader, ctx)
                } else {
                    0.0
                },
                relief_offset_bias: shader.relief_offset_bias,
                specular_exponent_min: stage
                    .specular_exponent_min
                    .evaluate(ctx.specular_exponent_min_default, time),
                specular_exponent_max: stage
                    .specular_exponent_max
                    .evaluate(ctx.specular_exponent_max_default, time),
                normal_scale: normal_scale(stage, time),
                environment_map0: ctx.handle(environment_map0),
                environment_map1: ctx.handle(environment_map1),
                environment_interpolation,
                _pad: 0,
            };
            write_block(slot, &block);
        }
        StageFamily::Reflection => {
            let probes = ctx.scene.nearest_cube_probes(ctx.view_origin, 1);
            let cube = probes.first().map(|p| p.cubemap);
            let p = &material.permutation;
            let height_map = (p.enable_relief_mapping && !p.has_height_map_in_normal_map)
                .then(|| bundle_frame(stage, bundle_index::HEIGHT_MAP, time))
                .flatten();
            let block = uniforms::ReflectionBlock {
                color_map_cube: ctx.handle(cube),
                normal_map: ctx.handle(bundle_frame(stage, bundle_index::NORMAL_MAP, time)),
                height_map: ctx.handle(height_map),
                _pad0: 0,
                normal_scale: normal_scale(stage, time),
                relief_depth_scale: if p.enable_relief_mapping {
                    relief_depth_scale(stage, shader, ctx)
                } else {
                    0.0
                },
                relief_offset_bias: shader.relief_offset_bias,
                _pad1: [0; 2],
            };
            write_block(slot, &block);
        }
        StageFamily::Skybox => {
            let block = uniforms::SkyboxBlock {
                color_map_cube: ctx.handle(bundle_frame(stage, bundle_index::COLOR_MAP, time)),
                alpha_threshold: alpha_threshold(state_bits::ATEST_NONE),
                _pad: [0; 2],
            };
            write_block(slot, &block);
        }
        StageFamily::Screen => {
            let block = uniforms::ScreenBlock {
                current_map: ctx.handle(ctx.images.current_render),
                _pad: [0; 3],
            };
            write_block(slot, &block);
        }
        StageFamily::HeatHaze => {
            let block = uniforms::HeatHazeBlock {
                deform_magnitude: stage.deform_magnitude_exp.evaluate(1.0, time),
                normal_map: ctx.handle(bundle_frame(stage, bundle_index::NORMAL_MAP, time)),
                _pad0: [0; 2],
                texture_matrix: uniforms::tex_matrix(if stage.enable_normal_mapping {
                    bundle_matrix(stage, bundle_index::NORMAL_MAP, time)
                } else {
                    Mat3::IDENTITY
                }),
                normal_scale: if stage.enable_normal_mapping {
                    normal_scale(stage, time)
                } else {
                    [0.0; 4]
                },
            };
            write_block(slot, &block);
        }
        StageFamily::Liquid => {
            let p = &material.permutation;
            let height_map = (p.enable_relief_mapping && !p.has_height_map_in_normal_map)
                .then(|| bundle_frame(stage, bundle_index::HEIGHT_MAP, time))
                .flatten();
            let fog_color = stage.compute_color(time);
            let block = uniforms::LiquidBlock {
                refraction_index: stage.refraction_index_exp.evaluate(1.0, time),
                fresnel_power: stage.fresnel_power_exp.evaluate(2.0, time),
                fresnel_scale: stage.fresnel_scale_exp.evaluate(1.0, time),
                fresnel_bias: stage.fresnel_bias_exp.evaluate(0.05, time),
                fog_color: fog_color.to_array(),
                fog_density: stage.fog_density_exp.evaluate(0.001, time),
                specular_exponent_min: stage
                    .specular_exponent_min
                    .evaluate(ctx.specular_exponent_min_default, time),
                specular_exponent_max: stage
                    .specular_exponent_max
                    .evaluate(ctx.specular_exponent_max_default, time),
                _pad0: 0,
                current_map: ctx.handle(ctx.images.current_render),
                portal_map: ctx.handle(ctx.images.portal),
                depth_map: ctx.handle(ctx.images.depth),
                normal_map: ctx.handle(bundle_frame(stage, bundle_index::NORMAL_MAP, time)),
                height_map: ctx.handle(height_map),
                relief_depth_scale: if p.enable_relief_mapping {
                    relief_depth_scale(stage, shader, ctx)
                } else {
                    0.0
                },
                relief_offset_bias: shader.relief_offset_bias,
                _pad1: 0,
            };
            write_block(slot, &block);
        }
        StageFamily::Fog => {
            let color = material
                .fog
                .map(|id| ctx.scene.fogs[id.0 as usize].color)
                .unwrap_or_default();
            let block = uniforms::FogBlock {
                color: color.to_array(),
                fog_map: ctx.handle(ctx.images.fog),
                _pad: [0; 3],
            };
            write_block(slot, &block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{Waveform, WaveFunc};

    fn context<'a>(
        scene: &'a WorldScene,
        images: &'a SharedImages,
        residency: &'a mut BindlessTable,
        time: f32,
    ) -> WriterContext<'a> {
        WriterContext {
            scene,
            images,
            residency,
            time,
            view_origin: Vec3::ZERO,
            map_light_factor: 1.0,
            relief_depth_scale_default: 1.0,
            specular_exponent_min_default: 2.0,
            specular_exponent_max_default: 256.0,
        }
    }

    fn plain_shader() -> Shader {
        Shader::default()
    }

    fn generic_material() -> Material {
        Material {
            family: StageFamily::Generic3D,
            padded_stride_words: StageFamily::Generic3D.padded_stride_words(),
            ..Default::default()
        }
    }

    #[test]
    fn static_stage_writes_once() {
        let scene = WorldScene::default();
        let images = SharedImages::default();
        let mut residency = BindlessTable::new(16);
        let material = generic_material();
        let surf = DrawSurface::default();
        let shader = plain_shader();
        let stage = ShaderStage::default();
        let mut assignment = StageAssignment {
            family: StageFamily::Generic3D,
            ..Default::default()
        };

        let stride = material.padded_stride_words as usize;
        let mut words = vec![0u32; stride];
        {
            let mut ctx = context(&scene, &images, &mut residency, 0.0);
            write_surface_stage(
                &mut words,
                &mut assignment,
                &material,
                &surf,
                &shader,
                &stage,
                &mut ctx,
            );
        }
        assert!(assignment.initialized);

        // A second pass with different time must not touch the slot.
        let snapshot = words.clone();
        let mut ctx = context(&scene, &images, &mut residency, 42.0);
        write_surface_stage(
            &mut words,
            &mut assignment,
            &material,
            &surf,
            &shader,
            &stage,
            &mut ctx,
        );
        assert_eq!(words, snapshot);
    }

    #[test]
    fn dynamic_waveform_stage_rewrites_with_time() {
        let scene = WorldScene::default();
        let images = SharedImages::default();
        let mut residency = BindlessTable::new(16);
        let material = generic_material();
        let surf = DrawSurface::default();
        let shader = plain_shader();
        let stage = ShaderStage {
            rgb_gen: ColorGen::Waveform,
            rgb_wave: Waveform {
                func: WaveFunc::Sawtooth,
                base: 0.0,
                amplitude: 1.0,
                phase: 0.0,
                frequency: 1.0,
            },
            ..Default::default()
        };
        let mut assignment = StageAssignment {
            family: StageFamily::Generic3D,
            dynamics: crate::shader::classify_stage_dynamics(&stage),
            ..Default::default()
        };

        let stride = material.padded_stride_words as usize;
        let mut words = vec![0u32; stride];
        {
            let mut ctx = context(&scene, &images, &mut residency, 0.1);
            write_surface_stage(
                &mut words,
                &mut assignment,
                &material,
                &surf,
                &shader,
                &stage,
                &mut ctx,
            );
        }
        let first = words.clone();

        let mut ctx = context(&scene, &images, &mut residency, 0.6);
        write_surface_stage(
            &mut words,
            &mut assignment,
            &material,
            &surf,
            &shader,
            &stage,
            &mut ctx,
        );
        assert_ne!(words, first, "dynamic slot must follow float time");
    }

    #[test]
    fn writer_claims_residency_for_stage_textures() {
        let scene = WorldScene::default();
        let images = SharedImages::default();
        let mut residency = BindlessTable::new(16);
        let material = generic_material();
        let surf = DrawSurface::default();
        let shader = plain_shader();
        let stage = ShaderStage {
            bundles: vec![crate::shader::TextureBundle::single(TextureId(5))],
            ..Default::default()
        };
        let mut assignment = StageAssignment {
            family: StageFamily::Generic3D,
            ..Default::default()
        };

        let stride = material.padded_stride_words as usize;
        let mut words = vec![0u32; stride];
        let mut ctx = context(&scene, &images, &mut residency, 0.0);
        write_surface_stage(
            &mut words,
            &mut assignment,
            &material,
            &surf,
            &shader,
            &stage,
            &mut ctx,
        );
        assert!(residency.is_resident(TextureId(5)));
    }
}
