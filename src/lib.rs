//! basalt — GPU-driven material and indirect draw-command pipeline
//!
//! Transforms a world's draw surfaces into a deduplicated material set,
//! a packed per-(surface, stage) uniform buffer, and GPU-culled indirect
//! draw streams submitted with one count-draw per material per view.
//!
//! Frame shape:
//! - `start_frame`, then `queue_surface_cull` per view
//! - `cull_surfaces` dispatches the compute culling for the next frame
//! - `add_portal_surfaces` grows the view tree from GPU portal distances
//! - `prepare_frame` / `prepare_view` / `render_materials` submit the
//!   current frame
//! - `end_frame` advances the ring
//!
//! World lifecycle: `generate_world_materials` once per world load,
//! `free` on unload.

pub mod config;
pub mod constants;
pub mod cull;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod material;
pub mod portal;
pub mod render;
pub mod residency;
pub mod scene;
pub mod shader;

pub use config::{MaterialDebugMode, MaterialSystemConfig, ProfilerSubGroupsMode};
pub use error::{MaterialError, MaterialResult};
pub use material::system::MaterialSystem;
pub use material::{Material, MaterialPack, DEPTH_PACK, OPAQUE_PACK, TRANSLUCENT_PACK};
pub use portal::PortalExpansion;
pub use render::{MaterialPipelineDesc, ProgramBackend};
pub use residency::BindlessTable;
pub use scene::{
    BoundingSphere, DrawSurfId, DrawSurface, Fog, FogId, Frustum, GeometryRange, Plane, RefDef,
    ShaderId, TextureId, WorldScene,
};
pub use shader::{Shader, ShaderSort, ShaderStage, StageFamily};
