//! Materials: deduplicated GPU state configurations
//!
//! A material is the unit of indirect-draw dispatch: one GPU pipeline
//! state, one shader-family permutation, one VBO/IBO pair. Materials live
//! in exactly three packs partitioned by coarse sort class, and their ids
//! are dense within a pack for the lifetime of a world.

pub mod layout;
pub mod surface_data;
pub mod system;
pub mod table;

use std::sync::Arc;

use crate::error::{MaterialError, MaterialResult};
use crate::gpu::buffer_layouts::IndirectCommand;
use crate::scene::{DrawSurfId, FogId, TextureId};
use crate::shader::{CullType, FamilyPermutation, ShaderSort, StageFamily};

/// Index of a material pack: depth pre-pass, opaque, translucent.
pub type PackId = u32;

pub const DEPTH_PACK: PackId = 0;
pub const OPAQUE_PACK: PackId = 1;
pub const TRANSLUCENT_PACK: PackId = 2;
pub const NUM_PACKS: usize = 3;

/// One recorded draw of a (surface, stage) pair.
#[derive(Debug, Clone, Default)]
pub struct DrawCommand {
    pub cmd: IndirectCommand,
    /// Slot index the draw reads its uniforms from (`base_instance`).
    pub materials_ssbo_slot: u32,
}

/// A deduplicated GPU state configuration.
#[derive(Debug, Clone, Default)]
pub struct Material {
    /// Dense id within the owning pack.
    pub id: u32,
    /// Id across all packs; selects the atomic counter slot.
    pub global_id: u32,
    /// Owning pack index.
    pub sort: PackId,

    /// Must be drawn after `sync_material` of the same pack.
    pub use_sync: bool,
    pub sync_material: u32,

    pub state_bits: u32,
    pub family: StageFamily,
    pub permutation: FamilyPermutation,
    pub cull: CullType,
    pub use_polygon_offset: bool,

    /// Geometry buffer pair this material draws from.
    pub geometry_buffers: u32,

    pub fog: Option<FogId>,

    /// Uniform stride of the family, in words.
    pub padded_stride_words: u32,

    // Layout-time aggregates.
    pub total_draw_surf_count: u32,
    pub total_static_draw_surf_count: u32,
    pub total_dynamic_draw_surf_count: u32,
    pub current_static_draw_surf_count: u32,
    pub current_dynamic_draw_surf_count: u32,

    /// Word offsets of this material's regions in the materials buffer.
    pub static_ssbo_offset: u32,
    pub dynamic_ssbo_offset: u32,

    pub surface_command_batch_offset: u32,
    pub surface_command_batch_count: u32,

    pub draw_commands: Vec<DrawCommand>,
    pub draw_surfs: Vec<DrawSurfId>,

    pub textures: Vec<TextureId>,
    pub textures_resident: bool,

    /// Compiled by the program backend once the world is generated.
    pub pipeline: Option<Arc<wgpu::RenderPipeline>>,
    pub line_pipeline: Option<Arc<wgpu::RenderPipeline>>,
}

impl Material {
    /// State equality: true when binding either material performs the
    /// same GPU work. Ids, sync links, and layout cursors are excluded.
    pub fn same_state(&self, other: &Material) -> bool {
        self.sort == other.sort
            && self.state_bits == other.state_bits
            && self.family == other.family
            && self.permutation == other.permutation
            && self.cull == other.cull
            && self.use_polygon_offset == other.use_polygon_offset
            && self.geometry_buffers == other.geometry_buffers
            && self.fog == other.fog
    }

    /// Record a texture used by this material's draws.
    pub fn add_texture(&mut self, texture: TextureId) -> MaterialResult<()> {
        if self.textures.contains(&texture) {
            return Ok(());
        }
        if self.textures.len() >= crate::constants::MAX_DRAW_COMMAND_TEXTURES {
            return Err(MaterialError::TooManyDrawCommandTextures);
        }
        self.textures.push(texture);
        Ok(())
    }
}

/// All materials of one sort bucket, in draw order.
#[derive(Debug, Clone)]
pub struct MaterialPack {
    pub from_sort: ShaderSort,
    pub to_sort: ShaderSort,
    pub materials: Vec<Material>,
}

impl MaterialPack {
    pub fn new(from_sort: ShaderSort, to_sort: ShaderSort) -> Self {
        Self {
            from_sort,
            to_sort,
            materials: Vec::new(),
        }
    }
}

/// The three world packs in draw order.
pub fn new_material_packs() -> [MaterialPack; NUM_PACKS] {
    [
        MaterialPack::new(ShaderSort::Depth, ShaderSort::Depth),
        MaterialPack::new(ShaderSort::EnvironmentFog, ShaderSort::Opaque),
        MaterialPack::new(ShaderSort::EnvironmentNoFog, ShaderSort::PostProcess),
    ]
}

/// Pack a shader sort class maps to.
pub fn pack_for_sort(sort: ShaderSort) -> PackId {
    if sort == ShaderSort::Depth {
        DEPTH_PACK
    } else if sort >= ShaderSort::EnvironmentFog && sort <= ShaderSort::Opaque {
        OPAQUE_PACK
    } else {
        TRANSLUCENT_PACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_to_pack() {
        assert_eq!(pack_for_sort(ShaderSort::Depth), DEPTH_PACK);
        assert_eq!(pack_for_sort(ShaderSort::Opaque), OPAQUE_PACK);
        assert_eq!(pack_for_sort(ShaderSort::EnvironmentFog), OPAQUE_PACK);
        assert_eq!(pack_for_sort(ShaderSort::EnvironmentNoFog), TRANSLUCENT_PACK);
        assert_eq!(pack_for_sort(ShaderSort::Blend), TRANSLUCENT_PACK);
        assert_eq!(pack_for_sort(ShaderSort::Portal), TRANSLUCENT_PACK);
    }

    #[test]
    fn same_state_ignores_ids() {
        let mut a = Material {
            state_bits: 0x100,
            family: StageFamily::Generic3D,
            ..Default::default()
        };
        let mut b = a.clone();
        a.id = 3;
        b.id = 9;
        b.use_sync = true;
        b.sync_material = 2;
        assert!(a.same_state(&b));
        b.state_bits = 0x200;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn texture_dedup_and_capacity() {
        let mut material = Material::default();
        material.add_texture(TextureId(1)).unwrap();
        material.add_texture(TextureId(1)).unwrap();
        assert_eq!(material.textures.len(), 1);

        for i in 2..=crate::constants::MAX_DRAW_COMMAND_TEXTURES as u32 {
            material.add_texture(TextureId(i)).unwrap();
        }
        assert!(material
            .add_texture(TextureId(10_000))
            .is_err());
    }
}
