//! Material pipeline error handling
//!
//! Capacity overflows are hard errors surfaced to the caller; residency
//! shortfalls degrade with a warning instead (see `render`).

use thiserror::Error;

use crate::constants::{MAX_COMMAND_COUNTERS, MAX_DRAW_COMMAND_TEXTURES, MAX_SURFACE_COMMAND_BATCHES};

/// Errors produced while generating or submitting world materials.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("draw command exceeds {MAX_DRAW_COMMAND_TEXTURES} textures")]
    TooManyDrawCommandTextures,

    #[error("{count} materials exceed the {MAX_COMMAND_COUNTERS} command counter slots")]
    TooManyMaterials { count: u32 },

    #[error("{count} surface command batches exceed the {MAX_SURFACE_COMMAND_BATCHES} batch slots")]
    TooManyBatches { count: u32 },

    #[error("stage {stage} of surface {surface} references no material")]
    UnassignedStage { surface: u32, stage: u32 },

    #[error("world materials were not generated before `{operation}`")]
    WorldNotGenerated { operation: &'static str },

    #[error("GPU buffer readback failed: {0}")]
    Readback(String),
}

pub type MaterialResult<T> = Result<T, MaterialError>;
