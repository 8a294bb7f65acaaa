//! Binding to the native `unity_physx_flow` library.
//!
//! The C library keeps its callback and initialization state in process
//! globals, so at most one [`LinkedEngine`] may exist at a time.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::event::NativeEvent;
use crate::field::{FieldFormat, GridDims};
use crate::native::{EventCallback, NativeEngine, NativeField};
use crate::BridgeError;

type RawCallback = unsafe extern "C" fn(event_type: i32, payload: *const c_char, user_data: *mut c_void);

type RawExport = unsafe extern "C" fn(
    handle: i32,
    out_x: *mut c_int,
    out_y: *mut c_int,
    out_z: *mut c_int,
    out_format: *mut c_int,
) -> *const c_void;

#[link(name = "unity_physx_flow")]
extern "C" {
    fn Upf_Init() -> i32;
    fn Upf_RegisterCallback(callback: Option<RawCallback>, user_data: *mut c_void);
    fn Upf_Step(dt: f32);
    fn Upf_EmitTestEvent(message: *const c_char);
    fn Upf_Shutdown();
    fn Upf_CreateEmitter(x: f32, y: f32, z: f32, radius: f32, density: f32) -> i32;
    fn Upf_DestroyEmitter(handle: i32);
    fn Upf_SetEmitterParams(handle: i32, x: f32, y: f32, z: f32, radius: f32, density: f32);
    fn Upf_CreateGrid(size_x: c_int, size_y: c_int, size_z: c_int, cell_size: f32) -> i32;
    fn Upf_DestroyGrid(handle: i32);
    fn Upf_StepGrid(handle: i32, dt: f32);
    fn Upf_ExportGridDensity(
        handle: i32,
        out_x: *mut c_int,
        out_y: *mut c_int,
        out_z: *mut c_int,
        out_format: *mut c_int,
    ) -> *const c_void;
    fn Upf_ExportGridVelocity(
        handle: i32,
        out_x: *mut c_int,
        out_y: *mut c_int,
        out_z: *mut c_int,
        out_format: *mut c_int,
    ) -> *const c_void;
}

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// What the library's `user_data` pointer points at.
struct Registration {
    callback: EventCallback,
    user_data: usize,
}

unsafe extern "C" fn trampoline(event_type: i32, payload: *const c_char, user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` is the `Box<Registration>` pointer handed to
    // `Upf_RegisterCallback`. The box is only freed after the library has
    // been given a different pointer.
    let registration = unsafe { &*(user_data as *const Registration) };
    let payload = if payload.is_null() {
        String::new()
    } else {
        // SAFETY: the library passes a NUL-terminated string valid for the
        // duration of the call.
        unsafe { CStr::from_ptr(payload) }
            .to_string_lossy()
            .into_owned()
    };
    let event = NativeEvent {
        event_type,
        payload,
        user_data: registration.user_data,
    };
    // Unwinding into C is undefined behaviour.
    if panic::catch_unwind(AssertUnwindSafe(|| (registration.callback)(event))).is_err() {
        tracing::error!(event_type, "event callback panicked inside the native trampoline");
    }
}

/// The linked native engine.
pub struct LinkedEngine {
    registration: Option<Box<Registration>>,
}

impl LinkedEngine {
    /// Take ownership of the process-wide native engine.
    pub fn claim() -> Result<Self, BridgeError> {
        CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::EngineClaimed)?;
        Ok(Self { registration: None })
    }

    fn export(&mut self, export: RawExport, handle: i32) -> Option<NativeField<'_>> {
        let (mut x, mut y, mut z, mut format) = (0, 0, 0, -1);
        // SAFETY: all out-pointers are valid locals.
        let data = unsafe { export(handle, &mut x, &mut y, &mut z, &mut format) };
        if data.is_null() {
            return None;
        }
        let dims = GridDims::from_native([x, y, z])?;
        let len = dims.cell_count() * FieldFormat::from_code(format)?.components();
        // SAFETY: a non-null export points at `len` floats owned by the
        // library and valid until the next call into it. The returned view
        // borrows `self` mutably, so no such call can happen while it lives.
        let data = unsafe { std::slice::from_raw_parts(data.cast::<f32>(), len) };
        Some(NativeField {
            data,
            dims: [x, y, z],
            format,
        })
    }
}

impl NativeEngine for LinkedEngine {
    fn register_callback(&mut self, callback: Option<EventCallback>, user_data: usize) {
        let next = callback.map(|callback| Box::new(Registration { callback, user_data }));
        let (raw, data): (Option<RawCallback>, *mut c_void) = match &next {
            Some(reg) => (
                Some(trampoline as RawCallback),
                &**reg as *const Registration as *mut c_void,
            ),
            None => (None, ptr::null_mut()),
        };
        // SAFETY: `data` is either null or a boxed registration that stays
        // alive until it is replaced here or the engine is dropped.
        unsafe { Upf_RegisterCallback(raw, data) };
        // The previous registration is released only now that the library no
        // longer refers to it.
        self.registration = next;
    }

    fn init(&mut self) -> i32 {
        // SAFETY: plain FFI call.
        unsafe { Upf_Init() }
    }

    fn step(&mut self, dt: f32) {
        // SAFETY: plain FFI call.
        unsafe { Upf_Step(dt) }
    }

    fn emit_test_event(&mut self, message: &str) {
        let Ok(message) = CString::new(message) else {
            tracing::warn!("test event message contains a NUL byte; not sent");
            return;
        };
        // SAFETY: `message` outlives the call.
        unsafe { Upf_EmitTestEvent(message.as_ptr()) }
    }

    fn shutdown(&mut self) {
        // SAFETY: plain FFI call.
        unsafe { Upf_Shutdown() }
    }

    fn create_emitter(&mut self, x: f32, y: f32, z: f32, radius: f32, density: f32) -> i32 {
        // SAFETY: plain FFI call.
        unsafe { Upf_CreateEmitter(x, y, z, radius, density) }
    }

    fn destroy_emitter(&mut self, handle: i32) {
        // SAFETY: plain FFI call.
        unsafe { Upf_DestroyEmitter(handle) }
    }

    fn set_emitter_params(&mut self, handle: i32, x: f32, y: f32, z: f32, radius: f32, density: f32) {
        // SAFETY: plain FFI call.
        unsafe { Upf_SetEmitterParams(handle, x, y, z, radius, density) }
    }

    fn create_grid(&mut self, size_x: i32, size_y: i32, size_z: i32, cell_size: f32) -> i32 {
        // SAFETY: plain FFI call.
        unsafe { Upf_CreateGrid(size_x, size_y, size_z, cell_size) }
    }

    fn destroy_grid(&mut self, handle: i32) {
        // SAFETY: plain FFI call.
        unsafe { Upf_DestroyGrid(handle) }
    }

    fn step_grid(&mut self, handle: i32, dt: f32) {
        // SAFETY: plain FFI call.
        unsafe { Upf_StepGrid(handle, dt) }
    }

    fn export_grid_density(&mut self, handle: i32) -> Option<NativeField<'_>> {
        self.export(Upf_ExportGridDensity, handle)
    }

    fn export_grid_velocity(&mut self, handle: i32) -> Option<NativeField<'_>> {
        self.export(Upf_ExportGridVelocity, handle)
    }
}

impl Drop for LinkedEngine {
    fn drop(&mut self) {
        if self.registration.is_some() {
            // SAFETY: clearing the callback before freeing its registration.
            unsafe { Upf_RegisterCallback(None, ptr::null_mut()) };
            self.registration = None;
        }
        CLAIMED.store(false, Ordering::Release);
    }
}
