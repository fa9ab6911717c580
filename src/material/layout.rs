//! Materials buffer layout planning
//!
//! The materials storage buffer holds one fixed-stride slot per
//! (surface, stage), grouped by material, split into a static region
//! (written once at world load) and a dynamic region (rewritten every
//! frame). Offsets are in u32 words throughout.
//!
//! Layout:
//! ```text
//! // Static region:
//! //   Material0: slot, slot, ..., padding to the material's stride
//! //   Material1: ...
//! // Dynamic region (dynamic_offset_words):
//! //   same shape; remapped and rewritten each frame
//! ```

use super::{Material, MaterialPack, NUM_PACKS};

/// Planned extents of the materials buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialsBufferLayout {
    /// Total buffer length in words.
    pub total_words: u32,
    /// Start of the dynamic region in words.
    pub dynamic_offset_words: u32,
    /// Length of the dynamic region in words.
    pub dynamic_size_words: u32,
}

impl MaterialsBufferLayout {
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_words as u64 * 4
    }

    #[inline]
    pub fn dynamic_offset_bytes(&self) -> u64 {
        self.dynamic_offset_words as u64 * 4
    }

    #[inline]
    pub fn dynamic_size_bytes(&self) -> u64 {
        self.dynamic_size_words as u64 * 4
    }
}

/// Align `offset` up to a multiple of `stride`.
#[inline]
fn align_to_stride(offset: u32, stride: u32) -> u32 {
    if stride == 0 || offset % stride == 0 {
        offset
    } else {
        offset + stride - offset % stride
    }
}

/// Lay out the static and dynamic regions across all packs.
///
/// Every material's region must begin at an integer multiple of its own
/// padded stride so that slot indices address whole blocks.
pub fn plan_regions(packs: &mut [MaterialPack; NUM_PACKS]) -> MaterialsBufferLayout {
    let mut offset = 0u32;

    for pack in packs.iter_mut() {
        for material in &mut pack.materials {
            let stride = material.padded_stride_words;
            offset = align_to_stride(offset, stride);
            material.static_ssbo_offset = offset;
            offset += stride * material.total_static_draw_surf_count;
        }
    }

    let mut dynamic_offset = None;

    for pack in packs.iter_mut() {
        for material in &mut pack.materials {
            let stride = material.padded_stride_words;
            offset = align_to_stride(offset, stride);
            // The region boundary includes the first material's padding.
            if dynamic_offset.is_none() {
                dynamic_offset = Some(offset);
            }
            material.dynamic_ssbo_offset = offset;
            offset += stride * material.total_dynamic_draw_surf_count;
        }
    }

    let dynamic_offset_words = dynamic_offset.unwrap_or(offset);
    MaterialsBufferLayout {
        total_words: offset,
        dynamic_offset_words,
        dynamic_size_words: offset - dynamic_offset_words,
    }
}

/// A claimed slot: the absolute index used while the whole buffer is
/// being written at generation time, and the index stored on the stage
/// afterwards (relative to the dynamic region for dynamic stages, so the
/// per-frame rewrite can address its mapping independently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub absolute: u32,
    pub relative: u32,
}

/// Claim the next slot of `material` for one (surface, stage).
pub fn assign_slot(
    material: &mut Material,
    dynamic: bool,
    layout: &MaterialsBufferLayout,
) -> SlotAssignment {
    let stride = material.padded_stride_words;
    debug_assert!(stride > 0, "slot assignment for a strideless family");
    if dynamic {
        let index = material.current_dynamic_draw_surf_count;
        material.current_dynamic_draw_surf_count += 1;
        debug_assert!(index < material.total_dynamic_draw_surf_count);
        SlotAssignment {
            absolute: material.dynamic_ssbo_offset / stride + index,
            relative: (material.dynamic_ssbo_offset - layout.dynamic_offset_words) / stride
                + index,
        }
    } else {
        let index = material.current_static_draw_surf_count;
        material.current_static_draw_surf_count += 1;
        debug_assert!(index < material.total_static_draw_surf_count);
        let slot = material.static_ssbo_offset / stride + index;
        SlotAssignment {
            absolute: slot,
            relative: slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::new_material_packs;
    use crate::shader::StageFamily;

    fn material(family: StageFamily, statics: u32, dynamics: u32) -> Material {
        Material {
            family,
            padded_stride_words: family.padded_stride_words(),
            total_static_draw_surf_count: statics,
            total_dynamic_draw_surf_count: dynamics,
            total_draw_surf_count: statics + dynamics,
            ..Default::default()
        }
    }

    #[test]
    fn empty_world_has_empty_layout() {
        let mut packs = new_material_packs();
        let layout = plan_regions(&mut packs);
        assert_eq!(layout.total_words, 0);
        assert_eq!(layout.dynamic_size_words, 0);
    }

    #[test]
    fn padding_law_holds() {
        let mut packs = new_material_packs();
        packs[1].materials.push(material(StageFamily::Skybox, 1, 0));
        packs[1]
            .materials
            .push(material(StageFamily::LightMapping, 3, 2));
        packs[2].materials.push(material(StageFamily::Liquid, 0, 1));
        let layout = plan_regions(&mut packs);

        for pack in &packs {
            for m in &pack.materials {
                assert_eq!(m.static_ssbo_offset % m.padded_stride_words, 0);
                assert_eq!(m.dynamic_ssbo_offset % m.padded_stride_words, 0);
            }
        }
        assert!(layout.dynamic_size_words > 0);
    }

    #[test]
    fn static_region_precedes_dynamic_region() {
        let mut packs = new_material_packs();
        packs[1]
            .materials
            .push(material(StageFamily::Generic3D, 2, 1));
        let layout = plan_regions(&mut packs);

        let m = &packs[1].materials[0];
        let stride = m.padded_stride_words;
        assert_eq!(m.static_ssbo_offset, 0);
        assert_eq!(layout.dynamic_offset_words, stride * 2);
        assert_eq!(layout.dynamic_size_words, stride);
        assert_eq!(layout.total_words, stride * 3);
    }

    #[test]
    fn dynamic_slots_fall_inside_dynamic_region() {
        let mut packs = new_material_packs();
        packs[1]
            .materials
            .push(material(StageFamily::Generic3D, 1, 2));
        packs[1].materials.push(material(StageFamily::Fog, 0, 1));
        let layout = plan_regions(&mut packs);

        let materials = &mut packs[1].materials;
        for m in materials.iter_mut() {
            for _ in 0..m.total_dynamic_draw_surf_count {
                let slot = assign_slot(m, true, &layout);
                let begin = slot.relative * m.padded_stride_words * 4;
                let end = begin + m.padded_stride_words * 4;
                assert!(end as u64 <= layout.dynamic_size_bytes());
                let absolute_bytes = slot.absolute as u64 * m.padded_stride_words as u64 * 4;
                assert!(absolute_bytes >= layout.dynamic_offset_bytes());
                assert!(
                    absolute_bytes + (end - begin) as u64
                        <= layout.dynamic_offset_bytes() + layout.dynamic_size_bytes()
                );
            }
        }
    }

    #[test]
    fn distinct_pairs_get_distinct_slots() {
        let mut packs = new_material_packs();
        packs[1]
            .materials
            .push(material(StageFamily::Generic3D, 3, 3));
        let layout = plan_regions(&mut packs);

        let m = &mut packs[1].materials[0];
        let mut static_slots = Vec::new();
        let mut dynamic_slots = Vec::new();
        for _ in 0..3 {
            static_slots.push(assign_slot(m, false, &layout).absolute);
            dynamic_slots.push(assign_slot(m, true, &layout).relative);
        }
        static_slots.dedup();
        dynamic_slots.dedup();
        assert_eq!(static_slots.len(), 3);
        assert_eq!(dynamic_slots.len(), 3);
    }

    #[test]
    fn slots_address_whole_blocks_in_allocation() {
        let mut packs = new_material_packs();
        packs[0].materials.push(material(StageFamily::Nop, 0, 0));
        packs[1]
            .materials
            .push(material(StageFamily::LightMapping, 2, 0));
        packs[1].materials.push(material(StageFamily::Skybox, 1, 0));
        let layout = plan_regions(&mut packs);

        for m in &mut packs[1].materials.iter_mut() {
            let stride = m.padded_stride_words;
            for _ in 0..m.total_static_draw_surf_count {
                let slot = assign_slot(m, false, &layout).absolute;
                let begin = slot * stride;
                assert!(begin >= m.static_ssbo_offset / stride * stride);
                assert!(
                    (slot + 1) * stride
                        <= m.static_ssbo_offset + stride * m.total_static_draw_surf_count
                );
            }
        }
    }
}
