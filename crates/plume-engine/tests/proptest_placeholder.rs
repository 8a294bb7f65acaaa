//! Property tests for the placeholder density field.
//!
//! The placeholder must fill exactly `X*Y*Z` cells, stay within `[0, 1]`,
//! and never get denser moving away from the grid center.

use plume_bridge::{FieldSource, GridDims};
use plume_engine::placeholder;
use proptest::prelude::*;

fn dims_strategy() -> impl Strategy<Value = GridDims> {
    (1u32..24, 1u32..24, 1u32..24).prop_map(|(x, y, z)| GridDims::new(x, y, z))
}

/// Squared distance from cell `(x, y, z)` to the grid center.
fn dist_sq(dims: GridDims, x: u32, y: u32, z: u32) -> f32 {
    let dx = x as f32 - dims.x as f32 * 0.5;
    let dy = y as f32 - dims.y as f32 * 0.5;
    let dz = z as f32 - dims.z as f32 * 0.5;
    dx * dx + dy * dy + dz * dz
}

proptest! {
    #[test]
    fn density_covers_every_cell(dims in dims_strategy()) {
        let field = placeholder::density(dims);
        prop_assert_eq!(field.data().len(), dims.cell_count());
        prop_assert_eq!(field.source(), FieldSource::Placeholder);
    }

    #[test]
    fn density_stays_in_unit_range(dims in dims_strategy()) {
        let field = placeholder::density(dims);
        for &d in field.data() {
            prop_assert!((0.0..=1.0).contains(&d), "density {} out of range", d);
        }
    }

    #[test]
    fn density_never_increases_with_distance(
        dims in dims_strategy(),
        a in (0u32..24, 0u32..24, 0u32..24),
        b in (0u32..24, 0u32..24, 0u32..24),
    ) {
        let clamp = |(x, y, z): (u32, u32, u32)| (x % dims.x, y % dims.y, z % dims.z);
        let (ax, ay, az) = clamp(a);
        let (bx, by, bz) = clamp(b);

        let (near, far) = if dist_sq(dims, ax, ay, az) <= dist_sq(dims, bx, by, bz) {
            ((ax, ay, az), (bx, by, bz))
        } else {
            ((bx, by, bz), (ax, ay, az))
        };
        let d_near = placeholder::density_at(dims, near.0, near.1, near.2);
        let d_far = placeholder::density_at(dims, far.0, far.1, far.2);
        prop_assert!(d_near >= d_far, "near {} < far {}", d_near, d_far);
    }

    #[test]
    fn velocity_is_zero_with_three_components(dims in dims_strategy()) {
        let field = placeholder::velocity(dims);
        prop_assert_eq!(field.data().len(), dims.cell_count() * 3);
        prop_assert!(field.data().iter().all(|&v| v == 0.0));
    }
}
