//! GPU-free half of the volumetric renderer.
//!
//! Everything here is plain data and arithmetic: texel packing for the volume
//! textures, compute dispatch sizing, camera math and the uniform block the
//! ray-marching shader reads. The wgpu code in [`crate::render`] consumes it;
//! keeping it out of the feature gate lets headless builds test it.

use glam::{Mat4, Vec3};
use plume_bridge::GridDims;
use serde::{Deserialize, Serialize};

use crate::grid::GridFields;

// ---------------------------------------------------------------------------
// Dispatch sizing
// ---------------------------------------------------------------------------

/// Edge length of the ray-marching compute workgroup.
pub const WORKGROUP_SIZE: u32 = 8;

/// Workgroups needed to cover a `width x height` output: one invocation per
/// pixel, rounded up.
pub fn workgroup_count(width: u32, height: u32) -> [u32; 3] {
    [
        width.div_ceil(WORKGROUP_SIZE),
        height.div_ceil(WORKGROUP_SIZE),
        1,
    ]
}

/// Whether an output target of `current` size must be recreated to serve
/// `requested`.
pub fn needs_resize(current: Option<(u32, u32)>, requested: (u32, u32)) -> bool {
    current != Some(requested)
}

/// Smallest output edge accepted by [`RayMarchSettings::set_output_size`].
pub const MIN_OUTPUT_EDGE: u32 = 512;

/// Largest output edge accepted by [`RayMarchSettings::set_output_size`].
pub const MAX_OUTPUT_EDGE: u32 = 2048;

/// Width over height, treating zero as one.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

/// Whether a grid of `dims` fits in a 3D texture whose edges are capped at
/// `max_edge` texels.
pub fn fits_texture_3d(dims: GridDims, max_edge: u32) -> bool {
    dims.to_array().into_iter().all(|edge| edge <= max_edge)
}

// ---------------------------------------------------------------------------
// Texel packing
// ---------------------------------------------------------------------------

/// Texels of the single-channel density texture: the scalar field as-is.
///
/// # Panics
///
/// Panics if `data` does not hold exactly one value per cell of `dims`.
pub fn density_texels(data: &[f32], dims: GridDims) -> &[f32] {
    assert_eq!(
        data.len(),
        dims.cell_count(),
        "density buffer length does not match grid {dims}"
    );
    data
}

/// Texels of the four-channel velocity texture: `(vx, vy, vz, 0)` per cell.
///
/// # Panics
///
/// Panics if `data` does not hold exactly three values per cell of `dims`.
pub fn velocity_texels(data: &[f32], dims: GridDims) -> Vec<[f32; 4]> {
    assert_eq!(
        data.len(),
        dims.cell_count() * 3,
        "velocity buffer length does not match grid {dims}"
    );
    data.chunks_exact(3)
        .map(|v| [v[0], v[1], v[2], 0.0])
        .collect()
}

/// Density and velocity texels of `fields`, both checked against `dims`,
/// the extent the textures were allocated with.
///
/// # Panics
///
/// Panics if either field's length does not match `dims`.
pub fn field_texels(fields: &GridFields, dims: GridDims) -> (&[f32], Vec<[f32; 4]>) {
    (
        density_texels(fields.density.data(), dims),
        velocity_texels(fields.velocity.data(), dims),
    )
}

// ---------------------------------------------------------------------------
// RayMarchSettings
// ---------------------------------------------------------------------------

/// User-facing ray-marching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayMarchSettings {
    /// When `false` the source frame is passed through untouched.
    pub enabled: bool,
    /// Output target width in pixels.
    pub width: u32,
    /// Output target height in pixels.
    pub height: u32,
    /// Multiplier applied to sampled density.
    pub density_scale: f32,
    /// Ray step in world units.
    pub step_size: f32,
    /// Upper bound on samples per ray.
    pub max_steps: u32,
    /// RGBA tint of the medium.
    pub tint: [f32; 4],
    pub light_intensity: f32,
    /// Direction the light travels. Normalized before use.
    pub light_direction: [f32; 3],
}

impl Default for RayMarchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1024,
            height: 1024,
            density_scale: 2.0,
            step_size: 0.1,
            max_steps: 128,
            tint: [0.8, 0.9, 1.0, 1.0],
            light_intensity: 1.0,
            light_direction: [-1.0, -1.0, -1.0],
        }
    }
}

impl RayMarchSettings {
    /// Request a new output resolution, clamped per axis to
    /// [`MIN_OUTPUT_EDGE`]..=[`MAX_OUTPUT_EDGE`]. The renderer reallocates its
    /// target on the next frame if the result differs from the current size.
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.width = width.clamp(MIN_OUTPUT_EDGE, MAX_OUTPUT_EDGE);
        self.height = height.clamp(MIN_OUTPUT_EDGE, MAX_OUTPUT_EDGE);
    }

    /// The light direction as a unit vector. A zero vector falls back to the
    /// default direction.
    pub fn light_direction_normalized(&self) -> Vec3 {
        Vec3::from_array(self.light_direction)
            .try_normalize()
            .unwrap_or_else(|| Vec3::splat(-1.0).normalize())
    }
}

// ---------------------------------------------------------------------------
// CameraState
// ---------------------------------------------------------------------------

/// A perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    /// Unit view direction.
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraState {
    /// A camera at `position` looking at `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            forward: (target - position).try_normalize().unwrap_or(Vec3::NEG_Z),
            ..Self::default()
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// VolumeTransform
// ---------------------------------------------------------------------------

/// Placement of a grid in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeTransform {
    /// World-space center.
    pub position: Vec3,
    /// World-space size along each axis.
    pub size: Vec3,
    pub cell_size: f32,
}

impl VolumeTransform {
    /// Placement of a grid with `dims` cells of `cell_size`, centered at
    /// `position`.
    pub fn for_grid(dims: GridDims, cell_size: f32, position: [f32; 3]) -> Self {
        let [x, y, z] = dims.to_array();
        Self {
            position: Vec3::from_array(position),
            size: Vec3::new(x as f32, y as f32, z as f32) * cell_size,
            cell_size,
        }
    }
}

// ---------------------------------------------------------------------------
// RayMarchUniforms
// ---------------------------------------------------------------------------

/// Uniform block of the ray-marching shader. Layout must match
/// `RayMarchParams` in `raymarch.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "renderer", derive(bytemuck_derive::Pod, bytemuck_derive::Zeroable))]
pub struct RayMarchUniforms {
    pub inv_view_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub camera_forward: [f32; 4],
    pub volume_position: [f32; 4],
    pub volume_size: [f32; 4],
    pub tint: [f32; 4],
    pub light_direction: [f32; 4],
    pub cell_size: f32,
    pub density_scale: f32,
    pub step_size: f32,
    pub light_intensity: f32,
    pub max_steps: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub _pad: u32,
}

impl RayMarchUniforms {
    /// Assemble the uniform block for one dispatch at `output` resolution.
    ///
    /// `aspect` is that of the surface the output is composited onto, not of
    /// the output itself: the target is stretched over the whole surface, so
    /// rays must be cast through the surface's frustum.
    pub fn new(
        camera: &CameraState,
        volume: &VolumeTransform,
        settings: &RayMarchSettings,
        output: (u32, u32),
        aspect: f32,
    ) -> Self {
        let (width, height) = output;
        let inv_view_proj = camera.view_projection(aspect).inverse();
        Self {
            inv_view_proj: inv_view_proj.to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            camera_forward: camera.forward.extend(0.0).to_array(),
            volume_position: volume.position.extend(1.0).to_array(),
            volume_size: volume.size.extend(0.0).to_array(),
            tint: settings.tint,
            light_direction: settings.light_direction_normalized().extend(0.0).to_array(),
            cell_size: volume.cell_size,
            density_scale: settings.density_scale,
            step_size: settings.step_size,
            light_intensity: settings.light_intensity,
            max_steps: settings.max_steps,
            output_width: width,
            output_height: height,
            _pad: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
