//! GPU resources of the material pipeline
//!
//! `buffer_layouts` pins the wire contract, `buffers` owns the seven
//! pipeline buffers plus the depth pyramid, `pipelines` owns the compute
//! passes that consume them.

pub mod buffer_layouts;
pub mod buffers;
pub mod pipelines;

pub use buffer_layouts::{IndirectCommand, PortalSurfaceData, SurfaceCommand, SurfaceCommandBatch};
pub use buffers::{DepthPyramid, PipelineBuffers, WorldBufferSizes};
pub use pipelines::CullPipelines;
