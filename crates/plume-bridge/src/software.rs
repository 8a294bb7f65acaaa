//! In-process implementation of the native engine ABI.
//!
//! [`SoftwareEngine`] behaves like the native library from the bridge's point
//! of view: integer status codes, handles starting at 1, negative handles on
//! failure, silent no-ops for unknown handles, events pushed through the
//! registered callback. It exists so the rest of the stack can run headless
//! and be tested without the native library installed.
//!
//! The field update is deliberately small: emitters inject density with a
//! cubic falloff and an upward impulse, density dissipates, dense cells gain
//! buoyancy, and both fields are clamped. It is not a fluid solver.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::event::{EventKind, FrameReport, NativeEvent};
use crate::native::{EventCallback, NativeEngine, NativeField};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Density injected per unit emitter density per second at the emitter core.
const EMITTER_STRENGTH: f32 = 5.0;
/// Upward velocity impulse per second at the emitter core.
const EMITTER_VELOCITY: f32 = 8.0;
/// Upward acceleration per unit density.
const BUOYANCY: f32 = 5.0;
/// Per-step density retention.
const DISSIPATION: f32 = 0.99;
/// Per-step velocity retention.
const VELOCITY_DAMPING: f32 = 0.995;
/// Densities below this are cleared to zero.
const DENSITY_FLOOR: f32 = 0.001;
/// Upper density clamp.
const DENSITY_CEILING: f32 = 10.0;
/// Per-component velocity clamp.
const VELOCITY_LIMIT: f32 = 20.0;
/// Step used when the caller passes a non-positive `dt`.
const DEFAULT_GRID_DT: f32 = 0.016;
/// Largest step a grid will take in one call.
const MAX_GRID_DT: f32 = 0.033;

// ---------------------------------------------------------------------------
// Callback slot
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Registered {
    callback: EventCallback,
    user_data: usize,
}

type CallbackSlot = Arc<Mutex<Option<Registered>>>;

fn fire(slot: &CallbackSlot, kind: EventKind, payload: &str) -> bool {
    let registered = match slot.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    // The lock is released before calling out so a callback may re-enter.
    let Some(registered) = registered else {
        return false;
    };
    (registered.callback)(NativeEvent {
        event_type: kind.code(),
        payload: payload.to_owned(),
        user_data: registered.user_data,
    });
    true
}

/// Fires events into the engine's registered callback from any thread.
///
/// Models the native library's worker threads, which report events
/// independently of calls made by the host.
#[derive(Clone)]
pub struct WorkerEvents {
    slot: CallbackSlot,
}

impl WorkerEvents {
    /// Deliver one event. Returns `false` if no callback is registered.
    pub fn emit(&self, kind: EventKind, payload: &str) -> bool {
        fire(&self.slot, kind, payload)
    }
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct SoftEmitter {
    position: [f32; 3],
    radius: f32,
    density: f32,
}

#[derive(Debug, Clone)]
struct SoftGrid {
    dims: [usize; 3],
    cell_size: f32,
    density: Vec<f32>,
    velocity: Vec<f32>,
}

impl SoftGrid {
    fn new(dims: [usize; 3], cell_size: f32) -> Self {
        let cells = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            cell_size,
            density: vec![0.0; cells],
            velocity: vec![0.0; cells * 3],
        }
    }

    fn native_dims(&self) -> [i32; 3] {
        [self.dims[0] as i32, self.dims[1] as i32, self.dims[2] as i32]
    }

    /// Add density and upward velocity inside the emitter sphere. The grid is
    /// centered on the world origin.
    fn inject(&mut self, emitter: &SoftEmitter, dt: f32) {
        let [sx, sy, sz] = self.dims;
        let cs = self.cell_size;
        let radius = emitter.radius / cs;
        if radius <= 0.0 {
            return;
        }
        let center = [
            (emitter.position[0] + sx as f32 * cs * 0.5) / cs,
            (emitter.position[1] + sy as f32 * cs * 0.5) / cs,
            (emitter.position[2] + sz as f32 * cs * 0.5) / cs,
        ];
        let span = |c: f32, n: usize| -> Option<(usize, usize)> {
            let lo = ((c - radius) as i64 - 1).max(0);
            let hi = ((c + radius) as i64 + 1).min(n as i64 - 1);
            (lo <= hi).then_some((lo as usize, hi as usize))
        };
        let (Some((x0, x1)), Some((y0, y1)), Some((z0, z1))) =
            (span(center[0], sx), span(center[1], sy), span(center[2], sz))
        else {
            return;
        };

        let radius_sq = radius * radius;
        for z in z0..=z1 {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dx = x as f32 - center[0];
                    let dy = y as f32 - center[1];
                    let dz = z as f32 - center[2];
                    let dist_sq = dx * dx + dy * dy + dz * dz;
                    if dist_sq >= radius_sq {
                        continue;
                    }
                    let falloff = (1.0 - dist_sq.sqrt() / radius).powi(3);
                    let idx = x + y * sx + z * sx * sy;
                    self.density[idx] += emitter.density * falloff * dt * EMITTER_STRENGTH;
                    self.velocity[idx * 3 + 1] += falloff * EMITTER_VELOCITY * dt;
                }
            }
        }
    }

    fn relax(&mut self, dt: f32) {
        for (d, v) in self
            .density
            .iter_mut()
            .zip(self.velocity.chunks_exact_mut(3))
        {
            *d *= DISSIPATION;
            for c in v.iter_mut() {
                *c *= VELOCITY_DAMPING;
            }
            if *d > DENSITY_FLOOR {
                v[1] += *d * BUOYANCY * dt;
            }
            if *d > DENSITY_CEILING {
                *d = DENSITY_CEILING;
            } else if *d < DENSITY_FLOOR {
                *d = 0.0;
            }
            for c in v.iter_mut() {
                *c = c.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SoftwareEngine
// ---------------------------------------------------------------------------

/// In-process engine implementing [`NativeEngine`].
pub struct SoftwareEngine {
    slot: CallbackSlot,
    initialized: bool,
    init_failure: Option<i32>,
    exports_enabled: bool,
    grid_capacity: Option<usize>,
    emitter_capacity: Option<usize>,
    next_grid: i32,
    next_emitter: i32,
    grids: BTreeMap<i32, SoftGrid>,
    emitters: BTreeMap<i32, SoftEmitter>,
    flushed_frame: u64,
}

impl SoftwareEngine {
    /// A healthy engine with unlimited capacity.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            initialized: false,
            init_failure: None,
            exports_enabled: true,
            grid_capacity: None,
            emitter_capacity: None,
            next_grid: 1,
            next_emitter: 1,
            grids: BTreeMap::new(),
            emitters: BTreeMap::new(),
            flushed_frame: 0,
        }
    }

    /// Make [`init`](NativeEngine::init) fail with `code`, reporting an error
    /// event first.
    pub fn with_init_failure(mut self, code: i32) -> Self {
        self.init_failure = Some(code);
        self
    }

    /// Make every export call report "no data".
    pub fn with_exports_disabled(mut self) -> Self {
        self.exports_enabled = false;
        self
    }

    /// Refuse grid creation once `capacity` grids are alive.
    pub fn with_grid_capacity(mut self, capacity: usize) -> Self {
        self.grid_capacity = Some(capacity);
        self
    }

    /// Refuse emitter creation once `capacity` emitters are alive.
    pub fn with_emitter_capacity(mut self, capacity: usize) -> Self {
        self.emitter_capacity = Some(capacity);
        self
    }

    /// A handle for firing events from other threads.
    pub fn worker_events(&self) -> WorkerEvents {
        WorkerEvents {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Number of live grids.
    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    /// Number of live emitters.
    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    fn emit(&self, kind: EventKind, payload: &str) {
        fire(&self.slot, kind, payload);
    }
}

impl Default for SoftwareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for SoftwareEngine {
    fn register_callback(&mut self, callback: Option<EventCallback>, user_data: usize) {
        let registered = callback.map(|callback| Registered {
            callback,
            user_data,
        });
        match self.slot.lock() {
            Ok(mut guard) => *guard = registered,
            Err(poisoned) => *poisoned.into_inner() = registered,
        }
    }

    fn init(&mut self) -> i32 {
        if self.initialized {
            return 0;
        }
        if let Some(code) = self.init_failure {
            self.emit(EventKind::Error, "device interface not available");
            return code;
        }
        self.initialized = true;
        0
    }

    fn step(&mut self, dt: f32) {
        if !self.initialized {
            return;
        }
        self.flushed_frame += 1;
        let report = FrameReport {
            flushed_frame: self.flushed_frame,
            dt: dt.max(0.0),
        };
        self.emit(EventKind::Frame, &report.to_string());
    }

    fn emit_test_event(&mut self, message: &str) {
        self.emit(EventKind::Test, message);
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.grids.clear();
        self.emitters.clear();
        self.initialized = false;
        self.register_callback(None, 0);
    }

    fn create_emitter(&mut self, x: f32, y: f32, z: f32, radius: f32, density: f32) -> i32 {
        if !self.initialized {
            return -1;
        }
        if self
            .emitter_capacity
            .is_some_and(|cap| self.emitters.len() >= cap)
        {
            return -1;
        }
        let handle = self.next_emitter;
        self.next_emitter += 1;
        self.emitters.insert(
            handle,
            SoftEmitter {
                position: [x, y, z],
                radius,
                density,
            },
        );
        handle
    }

    fn destroy_emitter(&mut self, handle: i32) {
        self.emitters.remove(&handle);
    }

    fn set_emitter_params(&mut self, handle: i32, x: f32, y: f32, z: f32, radius: f32, density: f32) {
        if let Some(emitter) = self.emitters.get_mut(&handle) {
            *emitter = SoftEmitter {
                position: [x, y, z],
                radius,
                density,
            };
        }
    }

    fn create_grid(&mut self, size_x: i32, size_y: i32, size_z: i32, cell_size: f32) -> i32 {
        if !self.initialized {
            return -1;
        }
        if size_x <= 0 || size_y <= 0 || size_z <= 0 || !(cell_size > 0.0) {
            return -1;
        }
        if self.grid_capacity.is_some_and(|cap| self.grids.len() >= cap) {
            return -1;
        }
        let dims = [size_x as usize, size_y as usize, size_z as usize];
        if dims[0]
            .checked_mul(dims[1])
            .and_then(|xy| xy.checked_mul(dims[2]))
            .and_then(|cells| cells.checked_mul(3))
            .is_none()
        {
            return -1;
        }
        let handle = self.next_grid;
        self.next_grid += 1;
        self.grids.insert(handle, SoftGrid::new(dims, cell_size));
        handle
    }

    fn destroy_grid(&mut self, handle: i32) {
        self.grids.remove(&handle);
    }

    fn step_grid(&mut self, handle: i32, dt: f32) {
        let Some(grid) = self.grids.get_mut(&handle) else {
            return;
        };
        let dt = if dt <= 0.0 {
            DEFAULT_GRID_DT
        } else {
            dt.min(MAX_GRID_DT)
        };
        for emitter in self.emitters.values() {
            grid.inject(emitter, dt);
        }
        grid.relax(dt);
    }

    fn export_grid_density(&mut self, handle: i32) -> Option<NativeField<'_>> {
        if !self.exports_enabled {
            return None;
        }
        let grid = self.grids.get(&handle)?;
        Some(NativeField {
            data: &grid.density,
            dims: grid.native_dims(),
            format: 0,
        })
    }

    fn export_grid_velocity(&mut self, handle: i32) -> Option<NativeField<'_>> {
        if !self.exports_enabled {
            return None;
        }
        let grid = self.grids.get(&handle)?;
        Some(NativeField {
            data: &grid.velocity,
            dims: grid.native_dims(),
            format: 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
