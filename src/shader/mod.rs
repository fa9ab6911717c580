//! Multi-stage shader descriptions and the stage-family dispatch
//!
//! A `Shader` is the scene-side description of how a surface is drawn:
//! an ordered list of stages, a global sort class, and cull/offset state.
//! The material system classifies each stage into a [`StageFamily`] and
//! deduplicates the resulting GPU state into materials.

pub mod dynamics;
pub mod expression;
pub mod family;
pub mod stage;
pub mod uniforms;

pub use dynamics::{classify_stage_dynamics, StageDynamics};
pub use expression::{Expression, ExpressionOp, WaveFunc, Waveform};
pub use family::{FamilyPermutation, StageFamily};
pub use stage::{
    bundle_index, state_bits, AlphaGen, ColorGen, ShaderStage, StageType, TexMod, TextureBundle,
};

use crate::scene::ShaderId;

/// Global sort class of a shader. Order is meaningful: materials are
/// partitioned into packs by sort ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ShaderSort {
    Bad,
    Portal,
    /// Depth pre-pass surfaces.
    Depth,
    /// Sky drawn before everything else, fogged.
    EnvironmentFog,
    #[default]
    Opaque,
    /// Sky drawn after opaque surfaces, unfogged.
    EnvironmentNoFog,
    Banner,
    Underwater,
    Blend,
    AlmostNearest,
    Nearest,
    PostProcess,
}

/// Face culling mode of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullType {
    #[default]
    FrontSided,
    BackSided,
    TwoSided,
}

/// A complete multi-stage shader description.
#[derive(Debug, Clone, Default)]
pub struct Shader {
    pub name: String,
    pub sort: ShaderSort,
    pub cull: CullType,
    pub polygon_offset: bool,

    pub is_sky: bool,
    /// Sky drawn on the unfogged pass.
    pub no_fog: bool,
    pub is_portal: bool,
    pub autosprite: bool,

    pub relief_depth_scale: f32,
    pub relief_offset_bias: f32,

    /// Substituted shader, when the console remapped this one.
    pub remapped: Option<ShaderId>,

    pub stages: Vec<ShaderStage>,
}

impl Shader {
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }
}
