//! Stage families
//!
//! Every shader stage is dispatched through one of a fixed set of families
//! (one per GPU program). A family knows how to derive the material
//! permutation from a stage, how large its uniform block is, and how to
//! serialize that block (see `uniforms` and `material::surface_data`).

use super::stage::{AlphaGen, ColorGen, ShaderStage, StageType};
use super::uniforms;
use crate::scene::{DrawSurface, WorldScene};

/// The shader family a stage is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageFamily {
    /// Dispatch-table hole; reaching it is a populate bug.
    #[default]
    None,
    /// Stage intentionally skipped by the pipeline.
    Nop,
    Generic3D,
    LightMapping,
    Reflection,
    Skybox,
    Screen,
    HeatHaze,
    Liquid,
    Fog,
}

/// How a surface samples precomputed lighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightMode {
    #[default]
    FullBright,
    Vertex,
    Grid,
    Map,
}

/// How a surface samples light directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeluxeMode {
    #[default]
    None,
    Grid,
    Map,
}

/// Pick light/deluxe sampling for a (surface, stage-type) pair.
pub fn light_deluxe_mode(
    scene: &WorldScene,
    surf: &DrawSurface,
    stage_type: StageType,
) -> (LightMode, DeluxeMode) {
    let lightmap_stage = matches!(
        stage_type,
        StageType::LightMap | StageType::StyleLightMap | StageType::DiffuseMap
    );
    if lightmap_stage && surf.lightmap.is_some() {
        let deluxe = if surf.deluxemap.is_some() {
            DeluxeMode::Map
        } else {
            DeluxeMode::None
        };
        return (LightMode::Map, deluxe);
    }
    if surf.bsp_surface {
        if scene.light_grid.is_some() {
            return (LightMode::Grid, DeluxeMode::Grid);
        }
        return (LightMode::FullBright, DeluxeMode::None);
    }
    (LightMode::Vertex, DeluxeMode::None)
}

/// Shader-program permutation flags a material freezes at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilyPermutation {
    pub deform_index: u32,
    pub tc_gen_environment: bool,
    pub tc_gen_lightmap: bool,
    pub has_depth_fade: bool,
    pub enable_deluxe_mapping: bool,
    pub enable_grid_lighting: bool,
    pub enable_grid_deluxe_mapping: bool,
    pub has_height_map_in_normal_map: bool,
    pub enable_relief_mapping: bool,
    pub enable_normal_mapping: bool,
    pub enable_specular_mapping: bool,
    pub enable_physical_mapping: bool,
    pub bsp_surface: bool,
    pub use_attr_color: bool,
}

impl StageFamily {
    /// Family for a stage, from its parsed type.
    pub fn classify(stage: &ShaderStage) -> StageFamily {
        match stage.stage_type {
            StageType::ColorMap | StageType::StyleLightMap => StageFamily::Generic3D,
            StageType::DiffuseMap | StageType::LightMap => StageFamily::LightMapping,
            StageType::ReflectionMap => StageFamily::Reflection,
            StageType::SkyboxMap => StageFamily::Skybox,
            StageType::ScreenMap => StageFamily::Screen,
            StageType::HeatHazeMap => StageFamily::HeatHaze,
            StageType::LiquidMap => StageFamily::Liquid,
            StageType::Fog => StageFamily::Fog,
        }
    }

    /// Uniform block stride in u32 words, padded so consecutive surface
    /// slots stay aligned to the block size.
    pub fn padded_stride_words(&self) -> u32 {
        let bytes = match self {
            StageFamily::None | StageFamily::Nop => 0,
            StageFamily::Generic3D => std::mem::size_of::<uniforms::Generic3dBlock>(),
            StageFamily::LightMapping => std::mem::size_of::<uniforms::LightMappingBlock>(),
            StageFamily::Reflection => std::mem::size_of::<uniforms::ReflectionBlock>(),
            StageFamily::Skybox => std::mem::size_of::<uniforms::SkyboxBlock>(),
            StageFamily::Screen => std::mem::size_of::<uniforms::ScreenBlock>(),
            StageFamily::HeatHaze => std::mem::size_of::<uniforms::HeatHazeBlock>(),
            StageFamily::Liquid => std::mem::size_of::<uniforms::LiquidBlock>(),
            StageFamily::Fog => std::mem::size_of::<uniforms::FogBlock>(),
        };
        ((bytes + 15) & !15) as u32 / 4
    }

    /// Derive the permutation a material with this stage freezes.
    /// Mirrors the binder's permutation selection without touching GPU
    /// state.
    pub fn process_material(
        &self,
        scene: &WorldScene,
        surf: &DrawSurface,
        stage: &ShaderStage,
    ) -> FamilyPermutation {
        let mut p = FamilyPermutation {
            deform_index: stage.deform_index,
            bsp_surface: surf.bsp_surface,
            ..Default::default()
        };

        match self {
            StageFamily::None => unreachable!("NONE stage family dispatched"),
            StageFamily::Nop => {}
            StageFamily::Generic3D => {
                p.tc_gen_environment = stage.tc_gen_environment;
                p.tc_gen_lightmap = stage.tc_gen_lightmap;
                p.has_depth_fade = stage.has_depth_fade;
                p.use_attr_color = matches!(
                    stage.rgb_gen,
                    ColorGen::Vertex | ColorGen::OneMinusVertex
                ) || matches!(
                    stage.alpha_gen,
                    AlphaGen::Vertex | AlphaGen::OneMinusVertex
                );
            }
            StageFamily::LightMapping => {
                let (light, deluxe) = light_deluxe_mode(scene, surf, stage.stage_type);
                p.enable_deluxe_mapping = deluxe == DeluxeMode::Map;
                p.enable_grid_lighting = light == LightMode::Grid;
                p.enable_grid_deluxe_mapping = deluxe == DeluxeMode::Grid;
                debug_assert!(
                    !(p.enable_deluxe_mapping && p.enable_grid_deluxe_mapping),
                    "deluxe map and grid deluxe are mutually exclusive"
                );
                p.has_height_map_in_normal_map = stage.has_height_map_in_normal_map;
                p.enable_relief_mapping = stage.enable_relief_mapping;
                p.enable_normal_mapping = stage.enable_normal_mapping;
                p.enable_specular_mapping = stage.enable_specular_mapping;
                p.enable_physical_mapping = stage.enable_physical_mapping;
            }
            StageFamily::Reflection => {
                p.has_height_map_in_normal_map = stage.has_height_map_in_normal_map;
                p.enable_relief_mapping = stage.enable_relief_mapping;
                p.enable_normal_mapping = stage.enable_normal_mapping;
            }
            StageFamily::Skybox | StageFamily::Screen | StageFamily::HeatHaze => {}
            StageFamily::Liquid => {
                let (light, deluxe) = light_deluxe_mode(scene, surf, stage.stage_type);
                p.has_height_map_in_normal_map = stage.has_height_map_in_normal_map;
                p.enable_relief_mapping = stage.enable_relief_mapping;
                p.enable_normal_mapping = stage.enable_normal_mapping;
                p.enable_specular_mapping = stage.enable_specular_mapping;
                p.enable_grid_lighting = light == LightMode::Grid;
                p.enable_grid_deluxe_mapping = deluxe == DeluxeMode::Grid;
            }
            StageFamily::Fog => {}
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_stage_type() {
        let mut stage = ShaderStage::default();
        assert_eq!(StageFamily::classify(&stage), StageFamily::Generic3D);
        stage.stage_type = StageType::LiquidMap;
        assert_eq!(StageFamily::classify(&stage), StageFamily::Liquid);
        stage.stage_type = StageType::Fog;
        assert_eq!(StageFamily::classify(&stage), StageFamily::Fog);
    }

    #[test]
    fn strides_are_block_aligned() {
        for family in [
            StageFamily::Generic3D,
            StageFamily::LightMapping,
            StageFamily::Reflection,
            StageFamily::Skybox,
            StageFamily::Screen,
            StageFamily::HeatHaze,
            StageFamily::Liquid,
            StageFamily::Fog,
        ] {
            let words = family.padded_stride_words();
            assert!(words > 0);
            assert_eq!(words % 4, 0, "{family:?} stride must stay vec4-aligned");
        }
    }

    #[test]
    fn vertex_color_selects_attr_color() {
        let scene = WorldScene::default();
        let surf = DrawSurface::default();
        let stage = ShaderStage {
            rgb_gen: ColorGen::Vertex,
            ..Default::default()
        };
        let p = StageFamily::Generic3D.process_material(&scene, &surf, &stage);
        assert!(p.use_attr_color);
    }
}
