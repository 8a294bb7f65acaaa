//! The single owner of the native engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use plume_dispatch::DispatchHandle;

use crate::event::{log_event, EventHandler, NativeEvent};
use crate::field::{FieldBuffer, FieldFormat};
use crate::handle::SimHandle;
use crate::native::{EventCallback, NativeEngine};
use crate::BridgeError;

// ---------------------------------------------------------------------------
// CallbackRegistration
// ---------------------------------------------------------------------------

/// The callback currently installed in the native engine.
///
/// The callback never runs the event handler itself: it copies the event and
/// enqueues the handler on the dispatcher, so handlers always run on the
/// draining context. The registration lives exactly as long as the engine may
/// call it, and is dropped only after the engine has been told to forget it.
pub struct CallbackRegistration {
    callback: EventCallback,
    user_data: usize,
    delivered: Arc<AtomicU64>,
}

impl CallbackRegistration {
    fn new(dispatch: DispatchHandle, handler: EventHandler, user_data: usize) -> Self {
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);
        let callback: EventCallback = Arc::new(move |event: NativeEvent| {
            counter.fetch_add(1, Ordering::Relaxed);
            let handler = Arc::clone(&handler);
            if !dispatch.enqueue(move || handler(&event)) {
                tracing::trace!("native event arrived after the dispatcher was dropped");
            }
        });
        Self {
            callback,
            user_data,
            delivered,
        }
    }

    /// Events received from the engine through this registration.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// The opaque tag passed back with every event.
    pub fn user_data(&self) -> usize {
        self.user_data
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("user_data", &self.user_data)
            .field("delivered", &self.delivered())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SimulationBridge
// ---------------------------------------------------------------------------

/// Typed wrapper around every native entry point.
///
/// The bridge checks only its own lifecycle. Handle validity and parameter
/// validation belong to the caller; invalid handles passed here go straight
/// to the engine, which ignores them.
pub struct SimulationBridge {
    engine: Box<dyn NativeEngine>,
    dispatch: DispatchHandle,
    handler: EventHandler,
    user_data: usize,
    registration: Option<CallbackRegistration>,
    initialized: bool,
}

impl SimulationBridge {
    /// Wrap an engine. Events will be enqueued on `dispatch` and handled by
    /// [`log_event`] unless another handler is set.
    pub fn new(engine: Box<dyn NativeEngine>, dispatch: DispatchHandle) -> Self {
        Self {
            engine,
            dispatch,
            handler: Arc::new(log_event),
            user_data: 0,
            registration: None,
            initialized: false,
        }
    }

    /// Use `handler` for native events. Takes effect at the next
    /// [`initialize`](Self::initialize).
    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.set_event_handler(handler);
        self
    }

    /// Replace the event handler. Takes effect at the next
    /// [`initialize`](Self::initialize).
    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.handler = handler;
    }

    /// Tag passed back with every native event.
    pub fn with_user_data(mut self, user_data: usize) -> Self {
        self.user_data = user_data;
        self
    }

    /// Register the event callback, then initialize the engine.
    ///
    /// Calling this while initialized only logs a warning.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        if self.initialized {
            tracing::warn!("simulation bridge is already initialized");
            return Ok(());
        }

        // The engine may report events from inside init.
        let registration = CallbackRegistration::new(
            self.dispatch.clone(),
            Arc::clone(&self.handler),
            self.user_data,
        );
        self.engine
            .register_callback(Some(Arc::clone(&registration.callback)), self.user_data);
        self.registration = Some(registration);

        let code = self.engine.init();
        if code != 0 {
            tracing::error!(code, "native engine initialization failed");
            self.release_callback();
            return Err(BridgeError::Initialization { code });
        }

        self.initialized = true;
        tracing::info!(user_data = self.user_data, "simulation bridge initialized");
        Ok(())
    }

    /// Shut the engine down and release the callback registration.
    ///
    /// Safe to call when not initialized.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.engine.shutdown();
        self.initialized = false;
        self.release_callback();
        tracing::info!("simulation bridge shut down");
    }

    fn release_callback(&mut self) {
        self.engine.register_callback(None, 0);
        if let Some(registration) = self.registration.take() {
            tracing::debug!(delivered = registration.delivered(), "callback registration released");
        }
    }

    /// Whether [`initialize`](Self::initialize) has succeeded and
    /// [`shutdown`](Self::shutdown) has not been called since.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The tag passed back with native events.
    pub fn user_data(&self) -> usize {
        self.user_data
    }

    /// The live callback registration, if any.
    pub fn registration(&self) -> Option<&CallbackRegistration> {
        self.registration.as_ref()
    }

    // -- Global ---------------------------------------------------------------

    /// Advance the engine's global clock.
    pub fn step(&mut self, dt: f32) {
        self.engine.step(dt);
    }

    /// Ask the engine to echo a test event.
    pub fn emit_test_event(&mut self, message: &str) {
        self.engine.emit_test_event(message);
    }

    // -- Grids ----------------------------------------------------------------

    /// Create a grid. Returns [`SimHandle::INVALID`] when not initialized;
    /// otherwise whatever the engine returned.
    pub fn create_grid(&mut self, size_x: i32, size_y: i32, size_z: i32, cell_size: f32) -> SimHandle {
        if !self.initialized {
            tracing::warn!("create_grid called before the bridge was initialized");
            return SimHandle::INVALID;
        }
        SimHandle::from_raw(self.engine.create_grid(size_x, size_y, size_z, cell_size))
    }

    pub fn destroy_grid(&mut self, handle: SimHandle) {
        self.engine.destroy_grid(handle.raw());
    }

    pub fn step_grid(&mut self, handle: SimHandle, dt: f32) {
        self.engine.step_grid(handle.raw(), dt);
    }

    /// Copy a grid's density field into host memory.
    ///
    /// `None` means the engine had no data; that is not an error.
    pub fn export_density(&mut self, handle: SimHandle) -> Option<FieldBuffer> {
        let view = self.engine.export_grid_density(handle.raw())?;
        FieldBuffer::copy_from_native(view, FieldFormat::Scalar)
    }

    /// Copy a grid's velocity field into host memory.
    pub fn export_velocity(&mut self, handle: SimHandle) -> Option<FieldBuffer> {
        let view = self.engine.export_grid_velocity(handle.raw())?;
        FieldBuffer::copy_from_native(view, FieldFormat::Vector3)
    }

    // -- Emitters -------------------------------------------------------------

    /// Create an emitter. Returns [`SimHandle::INVALID`] when not initialized.
    pub fn create_emitter(&mut self, position: [f32; 3], radius: f32, density: f32) -> SimHandle {
        if !self.initialized {
            tracing::warn!("create_emitter called before the bridge was initialized");
            return SimHandle::INVALID;
        }
        let [x, y, z] = position;
        SimHandle::from_raw(self.engine.create_emitter(x, y, z, radius, density))
    }

    pub fn destroy_emitter(&mut self, handle: SimHandle) {
        self.engine.destroy_emitter(handle.raw());
    }

    pub fn set_emitter_params(&mut self, handle: SimHandle, position: [f32; 3], radius: f32, density: f32) {
        let [x, y, z] = position;
        self.engine
            .set_emitter_params(handle.raw(), x, y, z, radius, density);
    }
}

impl Drop for SimulationBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimulationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationBridge")
            .field("initialized", &self.initialized)
            .field("user_data", &self.user_data)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
