//! Portal sub-view discovery
//!
//! The cull shader writes a camera distance per portal per view (-1 when
//! culled). Each frame the CPU reads those distances back, walks them
//! nearest-first, and grows the next frame's view tree, bounded by
//! `MAX_VIEWS` across the whole frame regardless of how portals chain or
//! cycle. The walk uses an explicit work list, so pathological portal
//! graphs cannot grow the stack.

use glam::Vec3;

use crate::constants::MAX_VIEWS;
use crate::frame::FrameRing;
use crate::gpu::buffer_layouts::PortalSurfaceData;
use crate::scene::{BoundingSphere, DrawSurfId};

/// Per-view portal bookkeeping kept for the mirror-view setup.
#[derive(Debug, Clone, Copy)]
pub struct PortalView {
    pub draw_surf: Option<DrawSurfId>,
    pub views: [u32; MAX_VIEWS as usize],
    pub count: u32,
}

impl Default for PortalView {
    fn default() -> Self {
        Self {
            draw_surf: None,
            views: [0; MAX_VIEWS as usize],
            count: 0,
        }
    }
}

/// The portal stack of one frame: one entry per (potential) view.
pub type PortalStack = [PortalView; MAX_VIEWS as usize];

/// Result of one expansion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalExpansion {
    /// Views in the frame, the primary view included.
    pub view_count: u32,
    /// False when discovery was truncated at the view bound.
    pub complete: bool,
}

/// Bounding sphere of a portal: vertex centroid plus the farthest vertex
/// distance. Computed once at world load.
pub fn portal_bounding_sphere(vertices: &[Vec3]) -> BoundingSphere {
    if vertices.is_empty() {
        return BoundingSphere::default();
    }
    let mut center = Vec3::ZERO;
    for v in vertices {
        center += *v;
    }
    center /= vertices.len() as f32;

    let mut radius = 0.0f32;
    for v in vertices {
        radius = radius.max(center.distance(*v));
    }
    BoundingSphere {
        origin: center,
        radius,
    }
}

struct ExpansionFrame {
    view_id: u32,
    /// This view's portals, sorted nearest first.
    portals: Vec<PortalSurfaceData>,
    next_portal: usize,
    portal_views: [u32; MAX_VIEWS as usize],
    count: u32,
}

impl ExpansionFrame {
    fn new(view_id: u32, view_portals: &[PortalSurfaceData]) -> Self {
        let mut portals = view_portals.to_vec();
        portals.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Self {
            view_id,
            portals,
            next_portal: 0,
            portal_views: [0; MAX_VIEWS as usize],
            count: 0,
        }
    }
}

/// Grow the next frame's view tree from the distances the GPU computed.
///
/// `portal_data` holds `MAX_VIEWS` runs of `total_portals` entries (the
/// next-frame slice of the portal buffer). `off_screen` is the CPU-side
/// screen-rectangle test; returning true rejects the portal. The previous
/// frame's tree steers which discovered portals recurse, keeping the view
/// hierarchy stable across frames.
pub fn expand_portal_views(
    ring: &mut FrameRing,
    portal_data: &[PortalSurfaceData],
    total_portals: u32,
    portal_stack: &mut PortalStack,
    off_screen: &mut dyn FnMut(DrawSurfId) -> bool,
) -> PortalExpansion {
    // The primary view occupies id 0.
    let mut view_count: u32 = 1;
    let mut stack: Vec<ExpansionFrame> = Vec::new();

    let view_slice = |view: u32| {
        let start = (view * total_portals) as usize;
        &portal_data[start..start + total_portals as usize]
    };

    ring.next_mut().views[0].view_count = 0;
    portal_stack[0] = PortalView::default();
    stack.push(ExpansionFrame::new(0, view_slice(0)));

    while let Some(top) = stack.last_mut() {
        if top.next_portal >= top.portals.len() {
            let done = stack.pop().expect("non-empty stack");
            ring.next_mut().views[done.view_id as usize].portal_views = done.portal_views;
            continue;
        }

        let portal = top.portals[top.next_portal];
        top.next_portal += 1;

        // -1 marks portals the cull shader rejected.
        if portal.distance < 0.0 {
            continue;
        }

        let portal_view_id = view_count;
        if off_screen(DrawSurfId(portal.draw_surf_id)) {
            continue;
        }

        let parent_view = top.view_id;
        top.portal_views[top.count as usize] = portal_view_id;
        top.count += 1;
        view_count += 1;

        {
            let slot = ring.next_mut();
            slot.views[portal_view_id as usize].portal_surface_id = portal.draw_surf_id;
            slot.views[parent_view as usize].view_count += 1;
        }
        let parent_count = portal_stack[parent_view as usize].count as usize;
        portal_stack[parent_view as usize].views[parent_count] = portal_view_id;
        portal_stack[parent_view as usize].count += 1;
        portal_stack[portal_view_id as usize].draw_surf = Some(DrawSurfId(portal.draw_surf_id));

        // Abort cleanly at the frame-wide bound; further portals stay
        // undiscovered this frame.
        if view_count == MAX_VIEWS {
            return PortalExpansion {
                view_count,
                complete: false,
            };
        }

        // Hierarchy continuity: when the previous frame already had a
        // sub-view rooted at this portal, expand that sub-view id again.
        let mut child = None;
        {
            let current = ring.current();
            let parent = &current.views[parent_view as usize];
            for j in 0..parent.view_count as usize {
                let sub = parent.portal_views[j];
                if sub != 0
                    && portal.draw_surf_id == current.views[sub as usize].portal_surface_id
                {
                    child = Some(sub);
                    break;
                }
            }
        }
        if let Some(sub) = child {
            ring.next_mut().views[sub as usize].view_count = 0;
            portal_stack[sub as usize].count = 0;
            stack.push(ExpansionFrame::new(sub, view_slice(sub)));
        }
    }

    PortalExpansion {
        view_count,
        complete: true,
    }
}
