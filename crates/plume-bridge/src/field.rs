//! Host-owned copies of exported simulation fields.
//!
//! The native engine hands out pointers into its own memory that are only
//! valid until the next call. Everything in this module is the host side of
//! that contract: once a [`FieldBuffer`] exists, it owns its data outright.

use serde::{Deserialize, Serialize};

use crate::native::NativeField;

// ---------------------------------------------------------------------------
// GridDims
// ---------------------------------------------------------------------------

/// Cell counts along each axis of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    /// Cells along X.
    pub x: u32,
    /// Cells along Y.
    pub y: u32,
    /// Cells along Z.
    pub z: u32,
}

impl GridDims {
    /// Build dims from per-axis counts.
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Convert dims reported across the native boundary.
    ///
    /// Returns `None` if any axis is zero or negative.
    pub fn from_native(raw: [i32; 3]) -> Option<Self> {
        let [x, y, z] = raw;
        if x <= 0 || y <= 0 || z <= 0 {
            return None;
        }
        Some(Self::new(x as u32, y as u32, z as u32))
    }

    /// Total number of cells.
    pub fn cell_count(self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Linear index of cell `(x, y, z)` in the x-fastest layout used by the
    /// native engine.
    pub fn index(self, x: u32, y: u32, z: u32) -> usize {
        x as usize + y as usize * self.x as usize + z as usize * self.x as usize * self.y as usize
    }

    /// Per-axis counts as an array.
    pub fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl std::fmt::Display for GridDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// FieldFormat
// ---------------------------------------------------------------------------

/// Element layout of an exported field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldFormat {
    /// One `f32` per cell (density). Native code `0`.
    Scalar,
    /// Three `f32`s per cell (velocity x, y, z). Native code `1`.
    Vector3,
}

impl FieldFormat {
    /// Decode the format code written by the native export calls.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Scalar),
            1 => Some(Self::Vector3),
            _ => None,
        }
    }

    /// The native format code.
    pub fn code(self) -> i32 {
        match self {
            Self::Scalar => 0,
            Self::Vector3 => 1,
        }
    }

    /// Number of `f32` components per cell.
    pub fn components(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector3 => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// FieldSource
// ---------------------------------------------------------------------------

/// Where the data in a [`FieldBuffer`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldSource {
    /// Copied out of the native engine.
    Native,
    /// Synthesized on the host because native data was unavailable.
    Placeholder,
}

// ---------------------------------------------------------------------------
// FieldBuffer
// ---------------------------------------------------------------------------

/// A host-owned field: flat `f32` data plus its shape and provenance.
///
/// Invariant: `data.len() == dims.cell_count() * format.components()`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuffer {
    data: Vec<f32>,
    dims: GridDims,
    format: FieldFormat,
    source: FieldSource,
}

impl FieldBuffer {
    /// Wrap existing data.
    ///
    /// # Panics
    ///
    /// Panics if the data length does not match `dims` and `format`.
    pub fn new(data: Vec<f32>, dims: GridDims, format: FieldFormat, source: FieldSource) -> Self {
        let expected = dims.cell_count() * format.components();
        assert_eq!(
            data.len(),
            expected,
            "field buffer length {} does not match {dims} x {} components",
            data.len(),
            format.components()
        );
        Self {
            data,
            dims,
            format,
            source,
        }
    }

    /// An all-zero field.
    pub fn zeroed(dims: GridDims, format: FieldFormat, source: FieldSource) -> Self {
        let len = dims.cell_count() * format.components();
        Self::new(vec![0.0; len], dims, format, source)
    }

    /// Copy a native export into host memory.
    ///
    /// Returns `None` if the native format code is unknown or is not
    /// `expected`, if the dims are not positive, or if the native slice is
    /// shorter than the dims claim.
    pub fn copy_from_native(view: NativeField<'_>, expected: FieldFormat) -> Option<Self> {
        let Some(format) = FieldFormat::from_code(view.format) else {
            tracing::warn!(code = view.format, "native export reported an unknown field format");
            return None;
        };
        if format != expected {
            tracing::warn!(?format, ?expected, "native export reported the wrong field format");
            return None;
        }
        let Some(dims) = GridDims::from_native(view.dims) else {
            tracing::warn!(dims = ?view.dims, "native export reported non-positive dims");
            return None;
        };
        let len = dims.cell_count() * format.components();
        if view.data.len() < len {
            tracing::warn!(
                available = view.data.len(),
                required = len,
                "native export is shorter than its dims"
            );
            return None;
        }
        Some(Self::new(
            view.data[..len].to_vec(),
            dims,
            format,
            FieldSource::Native,
        ))
    }

    /// The flat data, x-fastest.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the buffer and return its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Grid dims of this field.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Element layout.
    pub fn format(&self) -> FieldFormat {
        self.format
    }

    /// Provenance.
    pub fn source(&self) -> FieldSource {
        self.source
    }

    /// Whether the data was synthesized instead of exported.
    pub fn is_placeholder(&self) -> bool {
        self.source == FieldSource::Placeholder
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_reject_non_positive_axes() {
        assert_eq!(GridDims::from_native([2, 3, 4]), Some(GridDims::new(2, 3, 4)));
        assert_eq!(GridDims::from_native([0, 3, 4]), None);
        assert_eq!(GridDims::from_native([2, -1, 4]), None);
    }

    #[test]
    fn index_is_x_fastest() {
        let dims = GridDims::new(4, 3, 2);
        assert_eq!(dims.index(0, 0, 0), 0);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 4);
        assert_eq!(dims.index(0, 0, 1), 12);
        assert_eq!(dims.index(3, 2, 1), dims.cell_count() - 1);
    }

    #[test]
    fn copy_from_native_copies_exactly_the_declared_cells() {
        let native = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 99.0];
        let view = NativeField {
            data: &native,
            dims: [2, 2, 2],
            format: 0,
        };
        let field = FieldBuffer::copy_from_native(view, FieldFormat::Scalar).unwrap();
        assert_eq!(field.data(), &native[..8]);
        assert_eq!(field.source(), FieldSource::Native);
    }

    #[test]
    fn copy_from_native_rejects_wrong_format() {
        let native = vec![0.0; 24];
        let view = NativeField {
            data: &native,
            dims: [2, 2, 2],
            format: 1,
        };
        assert!(FieldBuffer::copy_from_native(view, FieldFormat::Scalar).is_none());

        let view = NativeField {
            data: &native,
            dims: [2, 2, 2],
            format: 7,
        };
        assert!(FieldBuffer::copy_from_native(view, FieldFormat::Vector3).is_none());
    }

    #[test]
    fn copy_from_native_rejects_short_slices() {
        let native = vec![0.0; 7];
        let view = NativeField {
            data: &native,
            dims: [2, 2, 2],
            format: 0,
        };
        assert!(FieldBuffer::copy_from_native(view, FieldFormat::Scalar).is_none());
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn new_panics_on_length_mismatch() {
        let _ = FieldBuffer::new(
            vec![0.0; 5],
            GridDims::new(2, 2, 2),
            FieldFormat::Scalar,
            FieldSource::Native,
        );
    }
}
