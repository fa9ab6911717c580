//! Stage dynamics classification
//!
//! Decides, once per world load, which parts of a stage's uniform block can
//! change between frames. Static stages are written once into the static
//! region of the materials buffer; dynamic stages land in the dynamic
//! region, which is rewritten every frame.

use super::expression::WaveFunc;
use super::stage::{AlphaGen, ColorGen, ShaderStage, TexMod};

/// Per-stage dynamics flags. `dynamic` implies at least one of the
/// specific flags or a non-empty stage expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageDynamics {
    pub color_dynamic: bool,
    pub tex_matrices_dynamic: bool,
    pub textures_dynamic: bool,
    pub dynamic: bool,
}

/// Classify a stage. Mirrors the frame-update paths: anything those paths
/// re-evaluate per frame must be flagged here.
pub fn classify_stage_dynamics(stage: &ShaderStage) -> StageDynamics {
    let mut out = StageDynamics::default();

    out.color_dynamic = matches!(
        stage.rgb_gen,
        ColorGen::Waveform | ColorGen::CustomRgb | ColorGen::CustomRgbs
    ) || matches!(stage.alpha_gen, AlphaGen::Waveform | AlphaGen::Custom);

    for bundle in &stage.bundles {
        for tex_mod in &bundle.tex_mods {
            let dynamic = match tex_mod {
                TexMod::None | TexMod::Scale { .. } | TexMod::Transform { .. } => false,
                TexMod::Turbulent { .. }
                | TexMod::EntityTranslate
                | TexMod::Scroll { .. }
                | TexMod::Rotate { .. } => true,
                TexMod::Stretch { wave } => wave.func != WaveFunc::None,
                TexMod::Scroll2 { s, t }
                | TexMod::Scale2 { s, t }
                | TexMod::CenterScale { s, t }
                | TexMod::Shear { s, t } => s.num_ops() > 0 || t.num_ops() > 0,
                TexMod::Rotate2 { r } => r.num_ops() > 0,
            };
            if dynamic {
                out.tex_matrices_dynamic = true;
            }
        }
    }

    for bundle in &stage.bundles {
        if bundle.is_video_map || bundle.images.len() > 1 {
            out.textures_dynamic = true;
            break;
        }
    }

    let has_dynamic_expressions = stage.if_exp.num_ops() > 0
        || stage.alpha_exp.num_ops() > 0
        || stage.alpha_test_exp.num_ops() > 0
        || stage.rgb_exp.num_ops() > 0
        || stage.red_exp.num_ops() > 0
        || stage.green_exp.num_ops() > 0
        || stage.blue_exp.num_ops() > 0
        || stage.deform_magnitude_exp.num_ops() > 0
        || stage.depth_scale_exp.num_ops() > 0
        || stage.fog_density_exp.num_ops() > 0
        || stage.fresnel_bias_exp.num_ops() > 0
        || stage.fresnel_power_exp.num_ops() > 0
        || stage.fresnel_scale_exp.num_ops() > 0
        || stage.normal_intensity_exp.num_ops() > 0
        || stage.refraction_index_exp.num_ops() > 0;

    out.dynamic = has_dynamic_expressions
        || out.color_dynamic
        || out.tex_matrices_dynamic
        || out.textures_dynamic;

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::expression::{Expression, Waveform};
    use crate::shader::stage::TextureBundle;

    #[test]
    fn static_stage_has_no_flags() {
        let stage = ShaderStage::default();
        let dynamics = classify_stage_dynamics(&stage);
        assert_eq!(dynamics, StageDynamics::default());
    }

    #[test]
    fn waveform_color_is_dynamic() {
        let stage = ShaderStage {
            rgb_gen: ColorGen::Waveform,
            ..Default::default()
        };
        let dynamics = classify_stage_dynamics(&stage);
        assert!(dynamics.color_dynamic);
        assert!(dynamics.dynamic);
    }

    #[test]
    fn scroll_marks_tex_matrices() {
        let stage = ShaderStage {
            bundles: vec![TextureBundle {
                tex_mods: vec![TexMod::Scroll { s: 1.0, t: 0.0 }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let dynamics = classify_stage_dynamics(&stage);
        assert!(dynamics.tex_matrices_dynamic);
        assert!(!dynamics.color_dynamic);
        assert!(dynamics.dynamic);
    }

    #[test]
    fn stretch_without_wave_is_static() {
        let stage = ShaderStage {
            bundles: vec![TextureBundle {
                tex_mods: vec![TexMod::Stretch {
                    wave: Waveform::default(),
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(!classify_stage_dynamics(&stage).dynamic);
    }

    #[test]
    fn animated_bundle_marks_textures() {
        let stage = ShaderStage {
            bundles: vec![TextureBundle {
                images: vec![crate::scene::TextureId(0), crate::scene::TextureId(1)],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(classify_stage_dynamics(&stage).textures_dynamic);
    }

    #[test]
    fn expression_alone_marks_dynamic() {
        let stage = ShaderStage {
            depth_scale_exp: Expression::constant(0.5),
            ..Default::default()
        };
        let dynamics = classify_stage_dynamics(&stage);
        assert!(dynamics.dynamic);
        assert!(!dynamics.color_dynamic);
        assert!(!dynamics.tex_matrices_dynamic);
        assert!(!dynamics.textures_dynamic);
    }

    #[test]
    fn dynamic_implies_a_cause() {
        // dynamic ⇒ at least one sub-flag or a stage expression
        let stage = ShaderStage {
            alpha_gen: AlphaGen::Waveform,
            ..Default::default()
        };
        let d = classify_stage_dynamics(&stage);
        assert!(!d.dynamic || d.color_dynamic || d.tex_matrices_dynamic || d.textures_dynamic);
    }
}
