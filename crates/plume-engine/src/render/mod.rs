//! Volumetric ray-marching renderer.
//!
//! This module is feature-gated behind `renderer`. When the feature is not
//! enabled, this module compiles to nothing; the CPU-side packing and camera
//! math it relies on live in [`crate::volume`] and are always available.
//!
//! Each frame the renderer:
//!
//! 1. Uploads the fields listed in a
//!    [`FrameUpdate`](crate::coordinator::FrameUpdate) into the
//!    [`VolumeCache`] and drops the textures of released grids. Grids beyond
//!    the device's 3D texture limit are skipped with an error log.
//! 2. Dispatches the ray-marching compute pass into an [`OutputTarget`].
//! 3. Composites the output over the source frame. If ray marching is
//!    disabled or its pipeline failed to build, the source frame is passed
//!    through unchanged.

#[cfg(feature = "renderer")]
pub mod app;
#[cfg(feature = "renderer")]
pub mod composite;
#[cfg(feature = "renderer")]
pub mod raymarch;
#[cfg(feature = "renderer")]
pub mod renderer;
#[cfg(feature = "renderer")]
pub mod volume_textures;

#[cfg(feature = "renderer")]
pub use composite::{CompositeMode, CompositePass};
#[cfg(feature = "renderer")]
pub use raymarch::{OutputTarget, RayMarchPass};
#[cfg(feature = "renderer")]
pub use renderer::VolumeRenderer;
#[cfg(feature = "renderer")]
pub use volume_textures::{VolumeCache, VolumeSlot, VolumeTextureSet};

/// Errors from GPU setup.
#[cfg(feature = "renderer")]
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to request GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    /// Shader or pipeline validation failed.
    #[error("{stage} pipeline rejected by the device: {message}")]
    Pipeline { stage: &'static str, message: String },
}
