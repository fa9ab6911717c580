//! Build script mirroring pipeline constants into WGSL
//!
//! The compute shaders index the same buffer layouts as the Rust side;
//! generating the constants keeps the two from drifting.

use std::{env, fs, path::Path};

// Mirrors src/constants.rs; build scripts cannot import the crate.
const MAX_FRAMES: u32 = 2;
const MAX_VIEWS: u32 = 8;
const SURFACE_COMMANDS_PER_BATCH: u32 = 64;
const MAX_COMMAND_COUNTERS: u32 = 64;
const PORTAL_CULL_GROUP_SIZE: u32 = 64;

fn main() {
    println!("cargo:rerun-if-changed=src/constants.rs");
    println!("cargo:rerun-if-changed=src/shaders");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let constants_path = Path::new(&out_dir).join("gpu_constants.wgsl");

    let content = format!(
        "// Generated from src/constants.rs; do not edit.\n\
         const MAX_FRAMES: u32 = {MAX_FRAMES}u;\n\
         const MAX_VIEWS: u32 = {MAX_VIEWS}u;\n\
         const MAX_VIEWFRAMES: u32 = {}u;\n\
         const SURFACE_COMMANDS_PER_BATCH: u32 = {SURFACE_COMMANDS_PER_BATCH}u;\n\
         const MAX_COMMAND_COUNTERS: u32 = {MAX_COMMAND_COUNTERS}u;\n\
         const PORTAL_CULL_GROUP_SIZE: u32 = {PORTAL_CULL_GROUP_SIZE}u;\n",
        MAX_FRAMES * MAX_VIEWS
    );

    fs::write(&constants_path, content).expect("failed to write generated WGSL constants");
}
