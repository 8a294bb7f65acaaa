//! Shared test helpers: an engine wrapper that records every call.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use plume_bridge::{EventCallback, NativeEngine, NativeField, SoftwareEngine};

/// One call that crossed into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    RegisterCallback { registered: bool },
    Init,
    Step,
    TestEvent,
    Shutdown,
    CreateEmitter,
    DestroyEmitter(i32),
    SetEmitterParams(i32),
    CreateGrid,
    DestroyGrid(i32),
    StepGrid(i32),
    ExportDensity(i32),
    ExportVelocity(i32),
}

impl Call {
    /// The handle argument, for calls that take one.
    pub fn handle(&self) -> Option<i32> {
        match *self {
            Call::DestroyEmitter(h)
            | Call::SetEmitterParams(h)
            | Call::DestroyGrid(h)
            | Call::StepGrid(h)
            | Call::ExportDensity(h)
            | Call::ExportVelocity(h) => Some(h),
            _ => None,
        }
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// [`SoftwareEngine`] plus a shared log of the calls it received.
pub struct RecordingEngine {
    inner: SoftwareEngine,
    calls: CallLog,
}

impl RecordingEngine {
    pub fn new(inner: SoftwareEngine) -> (Self, CallLog) {
        let calls = CallLog::default();
        (
            Self {
                inner,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NativeEngine for RecordingEngine {
    fn register_callback(&mut self, callback: Option<EventCallback>, user_data: usize) {
        self.record(Call::RegisterCallback {
            registered: callback.is_some(),
        });
        self.inner.register_callback(callback, user_data);
    }

    fn init(&mut self) -> i32 {
        self.record(Call::Init);
        self.inner.init()
    }

    fn step(&mut self, dt: f32) {
        self.record(Call::Step);
        self.inner.step(dt);
    }

    fn emit_test_event(&mut self, message: &str) {
        self.record(Call::TestEvent);
        self.inner.emit_test_event(message);
    }

    fn shutdown(&mut self) {
        self.record(Call::Shutdown);
        self.inner.shutdown();
    }

    fn create_emitter(&mut self, x: f32, y: f32, z: f32, radius: f32, density: f32) -> i32 {
        self.record(Call::CreateEmitter);
        self.inner.create_emitter(x, y, z, radius, density)
    }

    fn destroy_emitter(&mut self, handle: i32) {
        self.record(Call::DestroyEmitter(handle));
        self.inner.destroy_emitter(handle);
    }

    fn set_emitter_params(&mut self, handle: i32, x: f32, y: f32, z: f32, radius: f32, density: f32) {
        self.record(Call::SetEmitterParams(handle));
        self.inner.set_emitter_params(handle, x, y, z, radius, density);
    }

    fn create_grid(&mut self, size_x: i32, size_y: i32, size_z: i32, cell_size: f32) -> i32 {
        self.record(Call::CreateGrid);
        self.inner.create_grid(size_x, size_y, size_z, cell_size)
    }

    fn destroy_grid(&mut self, handle: i32) {
        self.record(Call::DestroyGrid(handle));
        self.inner.destroy_grid(handle);
    }

    fn step_grid(&mut self, handle: i32, dt: f32) {
        self.record(Call::StepGrid(handle));
        self.inner.step_grid(handle, dt);
    }

    fn export_grid_density(&mut self, handle: i32) -> Option<NativeField<'_>> {
        self.record(Call::ExportDensity(handle));
        self.inner.export_grid_density(handle)
    }

    fn export_grid_velocity(&mut self, handle: i32) -> Option<NativeField<'_>> {
        self.record(Call::ExportVelocity(handle));
        self.inner.export_grid_velocity(handle)
    }
}

/// Every handle in the log that was negative.
pub fn invalid_handles(calls: &CallLog) -> Vec<Call> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.handle().is_some_and(|h| h < 0))
        .cloned()
        .collect()
}

pub fn count(calls: &CallLog, pred: impl Fn(&Call) -> bool) -> usize {
    calls.lock().unwrap().iter().filter(|c| pred(c)).count()
}
