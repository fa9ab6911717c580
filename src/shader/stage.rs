//! Shader stage description
//!
//! One stage is one draw pass of a multi-stage shader: state bits, color
//! and alpha generators, texture bundles with their modifiers, and the
//! scalar expressions feeding the stage's uniform block.

use glam::{Mat3, Vec3, Vec4};

use super::expression::{Expression, Waveform};
use crate::scene::TextureId;

/// GPU state bits carried per stage. Only the bits in
/// [`state_bits::STATEFUL_MASK`] participate in material deduplication;
/// alpha-test bits select shader behaviour, not pipeline state.
pub mod state_bits {
    pub const SRCBLEND_BITS: u32 = 0x0000_000f;
    pub const DSTBLEND_BITS: u32 = 0x0000_00f0;
    pub const BLEND_BITS: u32 = SRCBLEND_BITS | DSTBLEND_BITS;

    pub const DEPTHMASK_TRUE: u32 = 0x0000_0100;
    pub const POLYMODE_LINE: u32 = 0x0000_0200;
    pub const DEPTHTEST_DISABLE: u32 = 0x0000_0400;
    pub const DEPTHFUNC_BITS: u32 = 0x0000_1800;

    pub const ATEST_BITS: u32 = 0x0000_e000;
    pub const ATEST_NONE: u32 = 0x0000_0000;
    pub const ATEST_GT_0: u32 = 0x0000_2000;
    pub const ATEST_LT_HALF: u32 = 0x0000_4000;
    pub const ATEST_GE_HALF: u32 = 0x0000_6000;

    pub const COLORMASK_BITS: u32 = 0x000f_0000;

    /// Bits that change bound GL state and therefore split materials.
    pub const STATEFUL_MASK: u32 = DEPTHFUNC_BITS
        | SRCBLEND_BITS
        | DSTBLEND_BITS
        | POLYMODE_LINE
        | DEPTHTEST_DISABLE
        | COLORMASK_BITS
        | DEPTHMASK_TRUE;
}

/// RGB color generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorGen {
    #[default]
    Identity,
    IdentityLighting,
    Vertex,
    OneMinusVertex,
    Const,
    Entity,
    OneMinusEntity,
    Waveform,
    CustomRgb,
    CustomRgbs,
}

/// Alpha generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaGen {
    #[default]
    Identity,
    Vertex,
    OneMinusVertex,
    Const,
    Entity,
    OneMinusEntity,
    Waveform,
    Custom,
}

/// A texture-coordinate modifier attached to a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum TexMod {
    None,
    Scale { s: f32, t: f32 },
    Transform { matrix: [f32; 4], translate: [f32; 2] },
    Turbulent { wave: Waveform },
    EntityTranslate,
    Scroll { s: f32, t: f32 },
    Stretch { wave: Waveform },
    Rotate { degrees_per_second: f32 },
    Scroll2 { s: Expression, t: Expression },
    Scale2 { s: Expression, t: Expression },
    CenterScale { s: Expression, t: Expression },
    Shear { s: Expression, t: Expression },
    Rotate2 { r: Expression },
}

/// Named bundle slots of a stage.
pub mod bundle_index {
    pub const COLOR_MAP: usize = 0;
    pub const DIFFUSE_MAP: usize = 0;
    pub const NORMAL_MAP: usize = 1;
    pub const HEIGHT_MAP: usize = 2;
    pub const MATERIAL_MAP: usize = 3;
    pub const GLOW_MAP: usize = 4;

    pub const MAX_BUNDLES: usize = 5;
}

/// One texture bundle: animation frames plus coordinate modifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureBundle {
    /// Animation frames; more than one makes the stage textures-dynamic.
    pub images: Vec<TextureId>,
    /// Frames per second for animated bundles.
    pub image_animation_speed: f32,
    /// Cinematic source; always textures-dynamic.
    pub is_video_map: bool,
    pub tex_mods: Vec<TexMod>,
}

impl TextureBundle {
    pub fn single(image: TextureId) -> Self {
        Self {
            images: vec![image],
            image_animation_speed: 0.0,
            is_video_map: false,
            tex_mods: Vec::new(),
        }
    }

    /// First frame, if the bundle holds any image.
    #[inline]
    pub fn image(&self) -> Option<TextureId> {
        self.images.first().copied()
    }

    /// Frame selected for `time`, cycling through the animation.
    pub fn frame_at(&self, time: f32) -> Option<TextureId> {
        if self.images.len() <= 1 {
            return self.image();
        }
        let frame =
            (time * self.image_animation_speed).max(0.0) as usize % self.images.len();
        Some(self.images[frame])
    }

    /// Accumulated 2D texture matrix for `time`.
    pub fn tex_matrix(&self, time: f32) -> Mat3 {
        let mut matrix = Mat3::IDENTITY;
        for tex_mod in &self.tex_mods {
            let step = match tex_mod {
                TexMod::None | TexMod::EntityTranslate => Mat3::IDENTITY,
                TexMod::Scale { s, t } => Mat3::from_diagonal(Vec3::new(*s, *t, 1.0)),
                TexMod::Transform { matrix: m, translate } => Mat3::from_cols(
                    Vec3::new(m[0], m[1], 0.0),
                    Vec3::new(m[2], m[3], 0.0),
                    Vec3::new(translate[0], translate[1], 1.0),
                ),
                TexMod::Scroll { s, t } => {
                    translation(fract_signed(s * time), fract_signed(t * time))
                }
                TexMod::Scroll2 { s, t } => translation(
                    fract_signed(s.evaluate(0.0, time)),
                    fract_signed(t.evaluate(0.0, time)),
                ),
                TexMod::Turbulent { wave } => {
                    let amount = wave.evaluate(time);
                    translation(amount, amount)
                }
                TexMod::Stretch { wave } => {
                    let factor = wave.evaluate(time);
                    let inv = if factor != 0.0 { 1.0 / factor } else { 1.0 };
                    centered(Mat3::from_diagonal(Vec3::new(inv, inv, 1.0)))
                }
                TexMod::Scale2 { s, t } => Mat3::from_diagonal(Vec3::new(
                    s.evaluate(1.0, time),
                    t.evaluate(1.0, time),
                    1.0,
                )),
                TexMod::CenterScale { s, t } => centered(Mat3::from_diagonal(Vec3::new(
                    s.evaluate(1.0, time),
                    t.evaluate(1.0, time),
                    1.0,
                ))),
                TexMod::Shear { s, t } => {
                    let sv = s.evaluate(0.0, time);
                    let tv = t.evaluate(0.0, time);
                    centered(Mat3::from_cols(
                        Vec3::new(1.0, tv, 0.0),
                        Vec3::new(sv, 1.0, 0.0),
                        Vec3::Z,
                    ))
                }
                TexMod::Rotate { degrees_per_second } => {
                    rotation(degrees_per_second * time)
                }
                TexMod::Rotate2 { r } => rotation(r.evaluate(0.0, time)),
            };
            matrix = step * matrix;
        }
        matrix
    }
}

fn translation(s: f32, t: f32) -> Mat3 {
    Mat3::from_cols(Vec3::X, Vec3::Y, Vec3::new(s, t, 1.0))
}

fn rotation(degrees: f32) -> Mat3 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    centered(Mat3::from_cols(
        Vec3::new(cos, sin, 0.0),
        Vec3::new(-sin, cos, 0.0),
        Vec3::Z,
    ))
}

/// Apply `m` around the texture center instead of the origin.
fn centered(m: Mat3) -> Mat3 {
    translation(0.5, 0.5) * m * translation(-0.5, -0.5)
}

fn fract_signed(v: f32) -> f32 {
    v - v.floor()
}

/// Broad stage kind, used to pick light/deluxe modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageType {
    #[default]
    ColorMap,
    LightMap,
    StyleLightMap,
    DiffuseMap,
    ReflectionMap,
    SkyboxMap,
    ScreenMap,
    HeatHazeMap,
    LiquidMap,
    Fog,
}

/// Description of one draw pass of a shader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderStage {
    pub stage_type: StageType,
    pub state_bits: u32,

    pub rgb_gen: ColorGen,
    pub alpha_gen: AlphaGen,
    pub const_color: Vec4,
    pub rgb_wave: Waveform,
    pub alpha_wave: Waveform,

    pub bundles: Vec<TextureBundle>,

    pub tc_gen_environment: bool,
    pub tc_gen_lightmap: bool,
    /// Shader program permutation selected by vertex deforms.
    pub deform_index: u32,

    pub has_depth_fade: bool,
    pub depth_fade_value: f32,

    pub enable_relief_mapping: bool,
    pub enable_normal_mapping: bool,
    pub enable_specular_mapping: bool,
    pub enable_physical_mapping: bool,
    pub has_height_map_in_normal_map: bool,

    pub if_exp: Expression,
    pub alpha_exp: Expression,
    pub alpha_test_exp: Expression,
    pub rgb_exp: Expression,
    pub red_exp: Expression,
    pub green_exp: Expression,
    pub blue_exp: Expression,
    pub deform_magnitude_exp: Expression,
    pub depth_scale_exp: Expression,
    pub fog_density_exp: Expression,
    pub fresnel_bias_exp: Expression,
    pub fresnel_power_exp: Expression,
    pub fresnel_scale_exp: Expression,
    pub normal_intensity_exp: Expression,
    pub refraction_index_exp: Expression,
    pub specular_exponent_min: Expression,
    pub specular_exponent_max: Expression,
}

impl ShaderStage {
    pub fn bundle(&self, index: usize) -> Option<&TextureBundle> {
        self.bundles.get(index)
    }

    /// Stage color after evaluating the generators (`Tess_ComputeColor`).
    pub fn compute_color(&self, time: f32) -> Vec4 {
        let rgb = match self.rgb_gen {
            ColorGen::Identity | ColorGen::IdentityLighting => Vec3::ONE,
            // Vertex colors come from the attribute stream; the uniform is white.
            ColorGen::Vertex | ColorGen::OneMinusVertex => Vec3::ONE,
            ColorGen::Const | ColorGen::Entity | ColorGen::OneMinusEntity => {
                self.const_color.truncate()
            }
            ColorGen::Waveform => Vec3::splat(self.rgb_wave.evaluate(time).clamp(0.0, 1.0)),
            ColorGen::CustomRgb => Vec3::splat(self.rgb_exp.evaluate(1.0, time)),
            ColorGen::CustomRgbs => Vec3::new(
                self.red_exp.evaluate(1.0, time),
                self.green_exp.evaluate(1.0, time),
                self.blue_exp.evaluate(1.0, time),
            ),
        };
        let alpha = match self.alpha_gen {
            AlphaGen::Identity | AlphaGen::Vertex | AlphaGen::OneMinusVertex => 1.0,
            AlphaGen::Const | AlphaGen::Entity | AlphaGen::OneMinusEntity => self.const_color.w,
            AlphaGen::Waveform => self.alpha_wave.evaluate(time).clamp(0.0, 1.0),
            AlphaGen::Custom => self.alpha_exp.evaluate(1.0, time),
        };
        rgb.extend(alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::expression::WaveFunc;

    #[test]
    fn scroll_matrix_translates() {
        let bundle = TextureBundle {
            tex_mods: vec![TexMod::Scroll { s: 0.25, t: 0.0 }],
            ..Default::default()
        };
        let m = bundle.tex_matrix(1.0);
        assert!((m.z_axis.x - 0.25).abs() < 1e-6);
        assert!((m.z_axis.y).abs() < 1e-6);
    }

    #[test]
    fn waveform_color_changes_with_time() {
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
        assert_ne!(stage.compute_color(0.1), stage.compute_color(0.6));
    }

    #[test]
    fn animated_bundle_cycles_frames() {
        let bundle = TextureBundle {
            images: vec![TextureId(0), TextureId(1), TextureId(2)],
            image_animation_speed: 10.0,
            ..Default::default()
        };
        assert_eq!(bundle.frame_at(0.0), Some(TextureId(0)));
        assert_eq!(bundle.frame_at(0.15), Some(TextureId(1)));
        assert_eq!(bundle.frame_at(0.45), Some(TextureId(1)));
    }
}
