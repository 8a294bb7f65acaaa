//! The native engine's function table, as a trait.
//!
//! Each method corresponds to one exported entry point of the native
//! library. Implementations follow the native conventions exactly (integer
//! status codes, negative handles on failure, silent no-ops on unknown
//! handles); turning those conventions into typed results is the job of
//! [`SimulationBridge`](crate::SimulationBridge), not of the implementor.
//!
//! Two implementations ship with this crate:
//!
//! - [`SoftwareEngine`](crate::software::SoftwareEngine): in-process, used for
//!   headless runs and tests.
//! - `LinkedEngine` (feature `link-native`): binds the C library.

use std::sync::Arc;

use crate::event::NativeEvent;

/// Callback invoked by the native side for every event, from any thread.
pub type EventCallback = Arc<dyn Fn(NativeEvent) + Send + Sync>;

/// A borrowed view of native field memory.
///
/// Valid only until the next call into the engine; the borrow on the engine
/// enforces that.
#[derive(Debug, Clone, Copy)]
pub struct NativeField<'a> {
    /// Field data as laid out by the engine.
    pub data: &'a [f32],
    /// Cell counts as reported by the engine.
    pub dims: [i32; 3],
    /// Format code as reported by the engine (`0` scalar, `1` vec3).
    pub format: i32,
}

/// The native engine ABI.
pub trait NativeEngine: Send {
    /// Register or replace the event callback. `None` disables callbacks.
    ///
    /// Must be called before [`init`](Self::init): the engine may report
    /// events while initializing.
    fn register_callback(&mut self, callback: Option<EventCallback>, user_data: usize);

    /// Initialize the engine. `0` means success, anything else is a failure
    /// code.
    fn init(&mut self) -> i32;

    /// Advance the engine's global clock.
    fn step(&mut self, dt: f32);

    /// Ask the engine to report a test event carrying `message`.
    fn emit_test_event(&mut self, message: &str);

    /// Tear the engine down.
    fn shutdown(&mut self);

    /// Create a spherical emitter. Negative on failure.
    fn create_emitter(&mut self, x: f32, y: f32, z: f32, radius: f32, density: f32) -> i32;

    /// Destroy an emitter. No-op on unknown handles.
    fn destroy_emitter(&mut self, handle: i32);

    /// Update an emitter's parameters. No-op on unknown handles.
    fn set_emitter_params(&mut self, handle: i32, x: f32, y: f32, z: f32, radius: f32, density: f32);

    /// Create a simulation grid. Negative on failure.
    fn create_grid(&mut self, size_x: i32, size_y: i32, size_z: i32, cell_size: f32) -> i32;

    /// Destroy a grid. No-op on unknown handles.
    fn destroy_grid(&mut self, handle: i32);

    /// Advance one grid. No-op on unknown handles.
    fn step_grid(&mut self, handle: i32, dt: f32);

    /// Borrow the density field of a grid; `None` when no data is available.
    fn export_grid_density(&mut self, handle: i32) -> Option<NativeField<'_>>;

    /// Borrow the velocity field of a grid; `None` when no data is available.
    fn export_grid_velocity(&mut self, handle: i32) -> Option<NativeField<'_>>;
}
