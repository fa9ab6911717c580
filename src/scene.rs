//! Borrowed scene-database view
//!
//! The material system does not own world geometry, shaders, or images; it
//! consumes them from the scene database through the types below. Surfaces
//! are referenced by arena index everywhere — the system never keeps
//! pointers into scene storage.

use glam::{Mat4, Vec3, Vec4};

use crate::shader::Shader;

/// Index into [`WorldScene::surfaces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawSurfId(pub u32);

/// Index into [`WorldScene::shaders`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

/// Index into [`WorldScene::textures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Index into [`WorldScene::fogs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FogId(pub u32);

/// A world-space bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub origin: Vec3,
    pub radius: f32,
}

/// One clip plane, `normal . p = dist`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

/// Six view frustum planes.
pub type Frustum = [Plane; 6];

/// Index/vertex buffer pair shared by a set of surfaces.
pub struct GeometryBuffers {
    pub label: String,
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
}

/// The index range a surface occupies inside its geometry buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryRange {
    /// Index into [`WorldScene::geometry_buffers`].
    pub buffers: u32,
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

/// One renderable world primitive.
#[derive(Debug, Clone, Default)]
pub struct DrawSurface {
    pub shader: Option<ShaderId>,
    pub geometry: GeometryRange,
    pub bounds: BoundingSphere,

    /// Belongs to the world entity (only those enter the pipeline).
    pub world_surface: bool,
    pub bsp_surface: bool,
    /// Placeholder surface kind, never drawn.
    pub skip: bool,
    /// Depth pre-pass child surface; folded into its parent's descriptor.
    pub material_system_skip: bool,

    pub depth_surface: Option<DrawSurfId>,
    pub fog_surface: Option<DrawSurfId>,
    pub fog: Option<FogId>,

    pub lightmap: Option<TextureId>,
    pub deluxemap: Option<TextureId>,

    /// Mesh positions; used once at world load for portal bounding spheres.
    pub vertices: Vec<Vec3>,
}

/// World fog volume parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fog {
    pub color: Vec4,
    pub tc_scale: f32,
    pub has_surface: bool,
    pub surface: Vec4,
}

/// An image registered with the bindless table.
pub struct TextureResource {
    pub name: String,
    /// Absent in headless tests; required for render submission.
    pub view: Option<wgpu::TextureView>,
}

/// A baked environment probe.
#[derive(Debug, Clone, Copy)]
pub struct CubeProbe {
    pub origin: Vec3,
    pub cubemap: TextureId,
}

/// The scene database slice the material system consumes.
#[derive(Default)]
pub struct WorldScene {
    pub surfaces: Vec<DrawSurface>,
    pub shaders: Vec<Shader>,
    pub fogs: Vec<Fog>,
    pub textures: Vec<TextureResource>,
    pub geometry_buffers: Vec<GeometryBuffers>,
    pub cube_probes: Vec<CubeProbe>,
    /// Light grid volume textures, when the world carries them.
    pub light_grid: Option<(TextureId, TextureId)>,
}

impl WorldScene {
    pub fn surface(&self, id: DrawSurfId) -> &DrawSurface {
        &self.surfaces[id.0 as usize]
    }

    pub fn shader(&self, id: ShaderId) -> &Shader {
        &self.shaders[id.0 as usize]
    }

    /// Shader after following a remap, the way draw paths see it.
    pub fn effective_shader(&self, id: ShaderId) -> &Shader {
        let shader = self.shader(id);
        match shader.remapped {
            Some(remap) => self.shader(remap),
            None => shader,
        }
    }

    /// The `count` probes nearest to `origin`, closest first.
    pub fn nearest_cube_probes(&self, origin: Vec3, count: usize) -> Vec<&CubeProbe> {
        let mut probes: Vec<&CubeProbe> = self.cube_probes.iter().collect();
        probes.sort_by(|a, b| {
            let da = a.origin.distance_squared(origin);
            let db = b.origin.distance_squared(origin);
            da.total_cmp(&db)
        });
        probes.truncate(count);
        probes
    }
}

/// Per-frame view inputs handed in by the frontend.
#[derive(Debug, Clone, Copy)]
pub struct RefDef {
    pub float_time: f32,
    /// `RDF_NOWORLDMODEL`: suppress world drawing (and fog materials).
    pub no_world_model: bool,
    /// Cubemap probes unavailable for this view.
    pub no_cubemap: bool,
    pub num_lights: u32,
    pub view_origin: Vec3,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
}

impl Default for RefDef {
    fn default() -> Self {
        Self {
            float_time: 0.0,
            no_world_model: false,
            no_cubemap: false,
            num_lights: 0,
            view_origin: Vec3::ZERO,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
        }
    }
}

impl RefDef {
    pub fn model_view_projection(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix
    }
}
