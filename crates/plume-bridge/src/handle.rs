//! Opaque native resource handles.

use serde::{Deserialize, Serialize};

/// Integer reference to a native-owned grid or emitter.
///
/// Non-negative values name a live native resource; any negative value means
/// "absent". Handles are only meaningful for the lifetime of the
/// [`SimulationBridge`](crate::SimulationBridge) that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimHandle(i32);

impl SimHandle {
    /// The sentinel stored in a resource that has no native counterpart.
    pub const INVALID: Self = Self(-1);

    /// Wrap a raw value returned across the native boundary.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw value passed across the native boundary.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Whether this handle may be passed to the bridge.
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for SimHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}
