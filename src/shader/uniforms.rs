//! Per-family uniform blocks
//!
//! One `#[repr(C)]` block per shader family, serialized verbatim into the
//! materials storage buffer. Field order is the declaration order the GPU
//! programs expect; sizes are pinned by tests. Bindless texture fields
//! hold slot indices into the bindless table (`residency`).

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3, Vec4};

/// A 3x3 texture matrix in three padded columns.
pub type TexMatrix = [[f32; 4]; 3];

pub fn tex_matrix(m: Mat3) -> TexMatrix {
    [
        [m.x_axis.x, m.x_axis.y, m.x_axis.z, 0.0],
        [m.y_axis.x, m.y_axis.y, m.y_axis.z, 0.0],
        [m.z_axis.x, m.z_axis.y, m.z_axis.z, 0.0],
    ]
}

pub fn vec4_array(v: Vec4) -> [f32; 4] {
    v.to_array()
}

pub fn vec3_padded(v: Vec3) -> [f32; 4] {
    [v.x, v.y, v.z, 0.0]
}

/// generic3d: plain textured pass. 96 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct Generic3dBlock {
    pub color: [f32; 4],
    pub texture_matrix: TexMatrix,
    pub color_map: u32,
    pub depth_map: u32,
    pub alpha_threshold: f32,
    pub color_modulate: u32,
    pub depth_scale: f32,
    pub _pad: [u32; 3],
}

/// lightMapping: the main world surface pass. 160 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct LightMappingBlock {
    pub color: [f32; 4],
    pub texture_matrix: TexMatrix,
    pub light_factor: f32,
    pub alpha_threshold: f32,
    pub color_modulate: u32,
    pub num_lights: u32,
    pub diffuse_map: u32,
    pub normal_map: u32,
    pub height_map: u32,
    pub material_map: u32,
    pub light_map: u32,
    pub deluxe_map: u32,
    pub glow_map: u32,
    pub light_tiles: u32,
    pub relief_depth_scale: f32,
    pub relief_offset_bias: f32,
    pub specular_exponent_min: f32,
    pub specular_exponent_max: f32,
    pub normal_scale: [f32; 4],
    pub environment_map0: u32,
    pub environment_map1: u32,
    pub environment_interpolation: f32,
    pub _pad: u32,
}

/// reflection: cubemap mirror pass. 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct ReflectionBlock {
    pub color_map_cube: u32,
    pub normal_map: u32,
    pub height_map: u32,
    pub _pad0: u32,
    pub normal_scale: [f32; 4],
    pub relief_depth_scale: f32,
    pub relief_offset_bias: f32,
    pub _pad1: [u32; 2],
}

/// skybox: cubemap backdrop. 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SkyboxBlock {
    pub color_map_cube: u32,
    pub alpha_threshold: f32,
    pub _pad: [u32; 2],
}

/// screen: framebuffer-sampling pass. 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct ScreenBlock {
    pub current_map: u32,
    pub _pad: [u32; 3],
}

/// heatHaze: screen-space distortion. 80 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct HeatHazeBlock {
    pub deform_magnitude: f32,
    pub normal_map: u32,
    pub _pad0: [u32; 2],
    pub texture_matrix: TexMatrix,
    pub normal_scale: [f32; 4],
}

/// liquid: refractive water pass. 80 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct LiquidBlock {
    pub refraction_index: f32,
    pub fresnel_power: f32,
    pub fresnel_scale: f32,
    pub fresnel_bias: f32,
    pub fog_color: [f32; 4],
    pub fog_density: f32,
    pub specular_exponent_min: f32,
    pub specular_exponent_max: f32,
    pub _pad0: u32,
    pub current_map: u32,
    pub portal_map: u32,
    pub depth_map: u32,
    pub normal_map: u32,
    pub height_map: u32,
    pub relief_depth_scale: f32,
    pub relief_offset_bias: f32,
    pub _pad1: u32,
}

/// fog: world fog volume pass. The distance/depth vectors are view
/// dependent and travel with the per-draw bind uniforms instead.
/// 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct FogBlock {
    pub color: [f32; 4],
    pub fog_map: u32,
    pub _pad: [u32; 3],
}

/// Serialize a block into a word slot of the materials buffer.
pub fn write_block<T: Pod>(slot: &mut [u32], block: &T) {
    let bytes = bytemuck::bytes_of(block);
    let words: &[u32] = bytemuck::cast_slice(bytes);
    slot[..words.len()].copy_from_slice(words);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn block_sizes() {
        assert_eq!(mem::size_of::<Generic3dBlock>(), 96);
        assert_eq!(mem::size_of::<LightMappingBlock>(), 160);
        assert_eq!(mem::size_of::<ReflectionBlock>(), 48);
        assert_eq!(mem::size_of::<SkyboxBlock>(), 16);
        assert_eq!(mem::size_of::<ScreenBlock>(), 16);
        assert_eq!(mem::size_of::<HeatHazeBlock>(), 80);
        assert_eq!(mem::size_of::<LiquidBlock>(), 80);
        assert_eq!(mem::size_of::<FogBlock>(), 32);
    }

    #[test]
    fn write_block_round_trips() {
        let block = SkyboxBlock {
            color_map_cube: 7,
            alpha_threshold: 0.5,
            _pad: [0; 2],
        };
        let mut slot = [0u32; 4];
        write_block(&mut slot, &block);
        assert_eq!(slot[0], 7);
        assert_eq!(f32::from_bits(slot[1]), 0.5);
    }
}
