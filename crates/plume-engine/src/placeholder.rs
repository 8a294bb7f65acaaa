//! Synthetic fields used when native export is unavailable.
//!
//! The placeholder is a soft sphere of density centered in the grid with zero
//! velocity everywhere. It carries [`FieldSource::Placeholder`] so downstream
//! code can always tell it apart from simulated data.

use plume_bridge::{FieldBuffer, FieldFormat, FieldSource, GridDims};

/// Fraction of the smallest axis used as the sphere radius.
const RADIUS_FRACTION: f32 = 0.3;

/// Placeholder density at integer cell `(x, y, z)`.
///
/// `max(0, 1 - |p - c| / r)^2` with `c` the grid center and
/// `r = min(X, Y, Z) * 0.3`.
pub fn density_at(dims: GridDims, x: u32, y: u32, z: u32) -> f32 {
    let center = [dims.x as f32 * 0.5, dims.y as f32 * 0.5, dims.z as f32 * 0.5];
    let radius = dims.x.min(dims.y).min(dims.z) as f32 * RADIUS_FRACTION;
    if radius <= 0.0 {
        return 0.0;
    }
    let dx = x as f32 - center[0];
    let dy = y as f32 - center[1];
    let dz = z as f32 - center[2];
    let dist = (dx * dx + dy * dy + dz * dz).sqrt();
    let falloff = (1.0 - dist / radius).max(0.0);
    falloff * falloff
}

/// Placeholder density field for `dims`.
pub fn density(dims: GridDims) -> FieldBuffer {
    let mut data = Vec::with_capacity(dims.cell_count());
    for z in 0..dims.z {
        for y in 0..dims.y {
            for x in 0..dims.x {
                data.push(density_at(dims, x, y, z));
            }
        }
    }
    FieldBuffer::new(data, dims, FieldFormat::Scalar, FieldSource::Placeholder)
}

/// Placeholder velocity field for `dims`: all zero.
pub fn velocity(dims: GridDims) -> FieldBuffer {
    FieldBuffer::zeroed(dims, FieldFormat::Vector3, FieldSource::Placeholder)
}
