//! Bindless texture table
//!
//! The bindless table is a bounded array of texture slots sampled by the
//! material shaders through `u32` handles stored in the uniform blocks.
//! Residency is slot occupancy: making a texture resident claims a slot,
//! evicting releases it. The render path owns the eviction policy (see
//! `render::acquire_material_textures`).

use rustc_hash::FxHashMap;

use crate::scene::TextureId;

/// Handle written into uniform blocks; indexes the bindless table.
pub type BindlessHandle = u32;

/// Bounded bindless texture table.
pub struct BindlessTable {
    capacity: usize,
    slots: Vec<Option<TextureId>>,
    free: Vec<u32>,
    resident: FxHashMap<TextureId, BindlessHandle>,
}

impl BindlessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: vec![None; capacity],
            free: (0..capacity as u32).rev().collect(),
            resident: FxHashMap::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    #[inline]
    pub fn is_resident(&self, texture: TextureId) -> bool {
        self.resident.contains_key(&texture)
    }

    /// Slot of a resident texture.
    #[inline]
    pub fn handle(&self, texture: TextureId) -> Option<BindlessHandle> {
        self.resident.get(&texture).copied()
    }

    /// Claim a slot for `texture`. Returns `None` when the table is full;
    /// the caller decides whether to evict and retry.
    pub fn make_resident(&mut self, texture: TextureId) -> Option<BindlessHandle> {
        if let Some(handle) = self.resident.get(&texture) {
            return Some(*handle);
        }
        let slot = self.free.pop()?;
        self.slots[slot as usize] = Some(texture);
        self.resident.insert(texture, slot);
        Some(slot)
    }

    /// Release the slot of `texture`, if it holds one.
    pub fn make_non_resident(&mut self, texture: TextureId) {
        if let Some(slot) = self.resident.remove(&texture) {
            self.slots[slot as usize] = None;
            self.free.push(slot);
        }
    }

    /// Texture occupying each slot, fallback-substituted; used to build
    /// the binding array.
    pub fn slot_textures(&self) -> &[Option<TextureId>] {
        &self.slots
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.free = (0..self.capacity as u32).rev().collect();
        self.resident.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residency_is_idempotent() {
        let mut table = BindlessTable::new(4);
        let a = table.make_resident(TextureId(7)).unwrap();
        let b = table.make_resident(TextureId(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.resident_count(), 1);
    }

    #[test]
    fn table_fills_up_and_recovers() {
        let mut table = BindlessTable::new(2);
        assert!(table.make_resident(TextureId(0)).is_some());
        assert!(table.make_resident(TextureId(1)).is_some());
        assert!(table.make_resident(TextureId(2)).is_none());

        table.make_non_resident(TextureId(0));
        assert!(!table.is_resident(TextureId(0)));
        assert!(table.make_resident(TextureId(2)).is_some());
    }

    #[test]
    fn handles_stay_stable_across_unrelated_evictions() {
        let mut table = BindlessTable::new(3);
        table.make_resident(TextureId(0)).unwrap();
        let handle = table.make_resident(TextureId(1)).unwrap();
        table.make_non_resident(TextureId(0));
        assert_eq!(table.handle(TextureId(1)), Some(handle));
    }
}
