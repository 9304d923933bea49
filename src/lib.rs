//! prism-ngin
//!
//! The rendering core of a small mobile 3D engine. It imports Wavefront OBJ
//! and glTF 2.0 models into one mesh representation, keeps their GPU
//! resources alive across surface changes and drives a fenced ring of
//! in-flight frames against an explicit, Vulkan-style GPU interface.
//!
//! High-level modules
//! - `engine`: the host-facing [`Engine`] (init, resize, load, render, destroy)
//! - `context`: renderer state owned by the engine and per-frame recording
//! - `resources`: model import (OBJ/MTL, glTF/GLB) and the asset/image collaborators
//! - `resource_manager`: swapchain rebuilds and per-model buffer uploads
//! - `texture_cache`: content-addressed texture uploads
//! - `frame`: the frame scheduler
//! - `gpu`: the GPU device trait with a `wgpu` and a headless backend
//! - `camera`, `config`: camera state machine and engine tunables
//! - `flow`: a desktop host built on winit
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod engine;
pub mod flow;
pub mod frame;
pub mod gpu;
pub mod pipelines;
pub mod resource_manager;
pub mod resources;
pub mod swapchain;
pub mod texture_cache;

/// The crate's `assets/` as staged by the build script, shaders compiled to SPIR-V.
pub const BUILT_ASSETS: &str = env!("PRISM_ASSET_DIR");

// Re-exports commonly used types for convenience in downstream code.
pub use camera::Camera;
pub use config::EngineConfig;
pub use data_structures::model::{Material, Mesh, ModelId, Subset};
pub use engine::Engine;
pub use frame::{FrameOutcome, FrameStats, SkipReason};
pub use gpu::{GpuDevice, GpuError, HeadlessDevice, WgpuDevice};
pub use resources::{
    assets::{AssetSource, DecodedImage, FsAssetSource, ImageCrateDecoder, ImageDecoder, MemoryAssetSource},
    import_model, try_import_model,
};
