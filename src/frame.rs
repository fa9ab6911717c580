//! Frame-slot ring
//!
//! The pipeline runs `MAX_FRAMES` frames deep: the CPU fills the view list
//! and dynamic uniforms of slot `next_frame` while the GPU culls and draws
//! from slot `current_frame`. The two slices of every per-viewframe buffer
//! are disjoint by construction, so no locking is needed.

use glam::Vec3;

use crate::constants::{MAX_FRAMES, MAX_VIEWS};
use crate::scene::Frustum;

/// Per-view cull inputs and the portal-view tree discovered for it.
#[derive(Debug, Clone, Copy)]
pub struct ViewFrame {
    pub origin: Vec3,
    pub frustum: Frustum,
    /// Sub-views rooted at this view's portals.
    pub portal_views: [u32; MAX_VIEWS as usize],
    /// Number of entries in `portal_views`.
    pub view_count: u32,
    /// Portal surface this view looks through (0 for the primary view).
    pub portal_surface_id: u32,
}

impl Default for ViewFrame {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            frustum: Frustum::default(),
            portal_views: [0; MAX_VIEWS as usize],
            view_count: 0,
            portal_surface_id: 0,
        }
    }
}

/// One frame slot: the views queued for culling.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    pub views: [ViewFrame; MAX_VIEWS as usize],
    pub view_count: u32,
}

/// The ring of frame slots.
#[derive(Debug, Clone)]
pub struct FrameRing {
    frames: [FrameSlot; MAX_FRAMES as usize],
    current: u32,
    next: u32,
}

impl Default for FrameRing {
    fn default() -> Self {
        Self {
            frames: Default::default(),
            current: 0,
            next: 1,
        }
    }
}

impl FrameRing {
    #[inline]
    pub fn current_frame(&self) -> u32 {
        self.current
    }

    #[inline]
    pub fn next_frame(&self) -> u32 {
        self.next
    }

    pub fn current(&self) -> &FrameSlot {
        &self.frames[self.current as usize]
    }

    pub fn next(&self) -> &FrameSlot {
        &self.frames[self.next as usize]
    }

    pub fn next_mut(&mut self) -> &mut FrameSlot {
        &mut self.frames[self.next as usize]
    }

    /// Reset the slot the CPU is about to fill.
    pub fn start_frame(&mut self) {
        self.frames[self.next as usize].view_count = 0;
    }

    /// Queue one view for GPU culling this frame.
    pub fn queue_surface_cull(&mut self, view_id: u32, origin: Vec3, frustum: &Frustum) {
        debug_assert!(view_id < MAX_VIEWS, "view id out of range");
        let slot = &mut self.frames[self.next as usize];
        let view = &mut slot.views[view_id as usize];
        view.origin = origin;
        view.frustum = *frustum;
        slot.view_count += 1;
    }

    /// Advance the ring: the slot just filled becomes the GPU's.
    pub fn end_frame(&mut self) {
        self.current = self.next;
        self.next = (self.next + 1) % MAX_FRAMES;
    }

    pub fn reset(&mut self) {
        self.frames = Default::default();
        self.current = 0;
        self.next = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_alternates_slots() {
        let mut ring = FrameRing::default();
        assert_eq!(ring.current_frame(), 0);
        assert_eq!(ring.next_frame(), 1);
        ring.end_frame();
        assert_eq!(ring.current_frame(), 1);
        assert_eq!(ring.next_frame(), 0);
        ring.end_frame();
        assert_eq!(ring.current_frame(), 0);
        assert_eq!(ring.next_frame(), 1);
    }

    #[test]
    fn cpu_and_gpu_slots_are_disjoint() {
        let mut ring = FrameRing::default();
        for _ in 0..8 {
            assert_ne!(ring.current_frame(), ring.next_frame());
            ring.end_frame();
        }
    }

    #[test]
    fn start_frame_clears_only_next() {
        let mut ring = FrameRing::default();
        ring.queue_surface_cull(0, Vec3::ZERO, &Frustum::default());
        ring.end_frame();
        // Slot 1 is now current with one view; slot 0 is being refilled.
        ring.start_frame();
        ring.queue_surface_cull(0, Vec3::ONE, &Frustum::default());
        ring.queue_surface_cull(1, Vec3::ONE, &Frustum::default());
        assert_eq!(ring.current().view_count, 1);
        assert_eq!(ring.next().view_count, 2);
    }
}
