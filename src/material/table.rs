//! Material deduplication
//!
//! `process_stage` folds one (surface, stage) pair into the material packs:
//! it builds the tentative material, scans the owning pack for an equal
//! material that satisfies the stage's ordering dependency, and appends a
//! new material only when none qualifies.

use super::{new_material_packs, pack_for_sort, Material, MaterialPack, NUM_PACKS, PackId};
use crate::scene::{DrawSurfId, DrawSurface, WorldScene};
use crate::shader::{
    classify_stage_dynamics, state_bits, Shader, ShaderStage, StageDynamics, StageFamily,
};

/// The three packs plus the dedup state used while generating a world.
pub struct MaterialTable {
    pub packs: [MaterialPack; NUM_PACKS],
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self {
            packs: new_material_packs(),
        }
    }
}

impl MaterialTable {
    pub fn total_materials(&self) -> u32 {
        self.packs.iter().map(|p| p.materials.len() as u32).sum()
    }

    pub fn clear(&mut self) {
        for pack in &mut self.packs {
            pack.materials.clear();
        }
    }

    /// Classify one stage of a surface into a (pack, material) pair.
    ///
    /// `pack_ids` carries the next free id per pack across the generation
    /// walk; `previous_material_id` carries the sync dependency from the
    /// surface's previous stage.
    pub fn process_stage(
        &mut self,
        scene: &WorldScene,
        surf_id: DrawSurfId,
        surf: &DrawSurface,
        shader: &Shader,
        stage_index: usize,
        stage: &ShaderStage,
        pack_ids: &mut [u32; NUM_PACKS],
        previous_material_id: &mut u32,
    ) -> (PackId, u32, StageDynamics) {
        let pack_id = pack_for_sort(shader.sort);

        let family = StageFamily::classify(stage);
        let dynamics = classify_stage_dynamics(stage);

        let mut material = Material {
            sort: pack_id,
            // Consecutive stages of one surface must draw in stage order.
            use_sync: stage_index > 0,
            sync_material: if stage_index > 0 {
                *previous_material_id
            } else {
                0
            },
            // Alpha-test bits select shader behaviour, not pipeline state.
            state_bits: stage.state_bits & state_bits::STATEFUL_MASK,
            family,
            permutation: family.process_material(scene, surf, stage),
            cull: shader.cull,
            use_polygon_offset: shader.polygon_offset,
            geometry_buffers: surf.geometry.buffers,
            fog: if family == StageFamily::Fog {
                surf.fog
            } else {
                None
            },
            padded_stride_words: family.padded_stride_words(),
            ..Default::default()
        };

        let materials = &mut self.packs[pack_id as usize].materials;

        // Find the first equal material whose id satisfies the sync
        // dependency. The scan deliberately advances past equal materials
        // with a smaller id even when one of them would already have
        // satisfied ordering for this surface.
        let mut search_from = 0usize;
        let mut found: Option<usize> = None;
        while let Some(rel) = materials[search_from..]
            .iter()
            .position(|m| m.same_state(&material))
        {
            let index = search_from + rel;
            if material.use_sync && materials[index].id < material.sync_material {
                search_from = index + 1;
            } else {
                found = Some(index);
                break;
            }
        }

        let material_id = match found {
            Some(index) => materials[index].id,
            None => {
                let id = pack_ids[pack_id as usize];
                material.id = id;
                materials.push(material);
                pack_ids[pack_id as usize] = id + 1;
                id
            }
        };
        *previous_material_id = material_id;

        let entry = &mut materials[material_id as usize];
        entry.total_draw_surf_count += 1;
        if dynamics.dynamic {
            entry.total_dynamic_draw_surf_count += 1;
        } else {
            entry.total_static_draw_surf_count += 1;
        }
        if !entry.draw_surfs.contains(&surf_id) {
            entry.draw_surfs.push(surf_id);
        }

        (pack_id, material_id, dynamics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderSort, StageType};

    fn world_surface() -> DrawSurface {
        DrawSurface {
            world_surface: true,
            ..Default::default()
        }
    }

    fn opaque_shader(stages: Vec<ShaderStage>) -> Shader {
        Shader {
            sort: ShaderSort::Opaque,
            stages,
            ..Default::default()
        }
    }

    #[test]
    fn equal_stages_share_a_material() {
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = opaque_shader(vec![ShaderStage::default()]);
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];

        for surf_index in 0..4 {
            let mut previous = 0;
            let (pack, id, _) = table.process_stage(
                &scene,
                DrawSurfId(surf_index),
                &surf,
                &shader,
                0,
                &shader.stages[0],
                &mut pack_ids,
                &mut previous,
            );
            assert_eq!((pack, id), (super::super::OPAQUE_PACK, 0));
        }
        assert_eq!(table.packs[1].materials.len(), 1);
        assert_eq!(table.packs[1].materials[0].total_draw_surf_count, 4);
        assert_eq!(table.packs[1].materials[0].draw_surfs.len(), 4);
    }

    #[test]
    fn ids_are_dense_within_a_pack() {
        let scene = WorldScene::default();
        let surf = world_surface();
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];

        for bits in [0u32, 0x100, 0x200] {
            let shader = opaque_shader(vec![ShaderStage {
                state_bits: bits,
                ..Default::default()
            }]);
            let mut previous = 0;
            table.process_stage(
                &scene,
                DrawSurfId(0),
                &surf,
                &shader,
                0,
                &shader.stages[0],
                &mut pack_ids,
                &mut previous,
            );
        }
        let ids: Vec<u32> = table.packs[1].materials.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn second_stage_records_sync_dependency() {
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = opaque_shader(vec![
            ShaderStage::default(),
            ShaderStage {
                state_bits: state_bits::DEPTHMASK_TRUE,
                ..Default::default()
            },
        ]);
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];
        let mut previous = 0;

        let (_, first, _) = table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            0,
            &shader.stages[0],
            &mut pack_ids,
            &mut previous,
        );
        let (_, second, _) = table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            1,
            &shader.stages[1],
            &mut pack_ids,
            &mut previous,
        );

        assert!(second > first);
        let material = &table.packs[1].materials[second as usize];
        assert!(material.use_sync);
        assert_eq!(material.sync_material, first);
    }

    #[test]
    fn sync_accepts_equal_material_at_dependency_id() {
        // Stage 1 state equals stage 0 state; the dependency id itself
        // satisfies the ordering, so the material is reused.
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = opaque_shader(vec![ShaderStage::default(), ShaderStage::default()]);
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];
        let mut previous = 0;

        let (_, first, _) = table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            0,
            &shader.stages[0],
            &mut pack_ids,
            &mut previous,
        );
        let (_, second, _) = table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            1,
            &shader.stages[1],
            &mut pack_ids,
            &mut previous,
        );

        assert_eq!(second, first);
        assert_eq!(table.packs[1].materials.len(), 1);
    }

    #[test]
    fn appended_sync_material_gets_higher_id() {
        // A dependent material appended to the pack always lands above
        // its dependency.
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = opaque_shader(vec![
            ShaderStage::default(),
            ShaderStage {
                state_bits: state_bits::DEPTHTEST_DISABLE,
                ..Default::default()
            },
        ]);
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];
        let mut previous = 0;

        for (index, stage) in shader.stages.iter().enumerate() {
            table.process_stage(
                &scene,
                DrawSurfId(0),
                &surf,
                &shader,
                index,
                stage,
                &mut pack_ids,
                &mut previous,
            );
        }
        for material in &table.packs[1].materials {
            if material.use_sync {
                assert!(material.id > material.sync_material);
            }
        }
    }

    #[test]
    fn depth_sort_goes_to_depth_pack() {
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = Shader {
            sort: ShaderSort::Depth,
            stages: vec![ShaderStage::default()],
            ..Default::default()
        };
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];
        let mut previous = 0;
        let (pack, _, _) = table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            0,
            &shader.stages[0],
            &mut pack_ids,
            &mut previous,
        );
        assert_eq!(pack, super::super::DEPTH_PACK);
    }

    #[test]
    fn lightmap_stage_uses_lightmapping_family() {
        let scene = WorldScene::default();
        let surf = world_surface();
        let shader = opaque_shader(vec![ShaderStage {
            stage_type: StageType::DiffuseMap,
            ..Default::default()
        }]);
        let mut table = MaterialTable::default();
        let mut pack_ids = [0u32; NUM_PACKS];
        let mut previous = 0;
        table.process_stage(
            &scene,
            DrawSurfId(0),
            &surf,
            &shader,
            0,
            &shader.stages[0],
            &mut pack_ids,
            &mut previous,
        );
        assert_eq!(
            table.packs[1].materials[0].family,
            StageFamily::LightMapping
        );
    }
}
