//! Plume Bridge -- typed access to a native, handle-based fluid engine.
//!
//! The native engine is a C library exposing a flat function table: integer
//! status codes, integer handles for grids and emitters, raw pointers for
//! exported fields, and one event callback that may fire on any thread. This
//! crate turns that table into something the rest of Plume can hold safely:
//!
//! - [`NativeEngine`] models the function table as a trait. The
//!   [`SoftwareEngine`] implements it in-process; `LinkedEngine` (feature
//!   `link-native`) binds the real library.
//! - [`SimulationBridge`] owns one engine for the life of the process:
//!   callback registration before init, release after shutdown, and
//!   copy-on-export of every field.
//! - Native events are never handled on the thread that reports them. The
//!   bridge's callback copies each event and enqueues its handler on a
//!   [`plume_dispatch::Dispatcher`].

#![deny(unsafe_code)]

pub mod bridge;
pub mod event;
pub mod field;
pub mod handle;
pub mod native;
pub mod software;

#[cfg(feature = "link-native")]
pub mod ffi;

pub use bridge::{CallbackRegistration, SimulationBridge};
pub use event::{
    log_event, EventHandler, EventKind, EventPayload, FrameReport, NativeEvent, ProfilerEntry,
    ProfilerReport,
};
pub use field::{FieldBuffer, FieldFormat, FieldSource, GridDims};
pub use handle::SimHandle;
pub use native::{EventCallback, NativeEngine, NativeField};
pub use software::{SoftwareEngine, WorkerEvents};

#[cfg(feature = "link-native")]
pub use ffi::LinkedEngine;

/// Errors surfaced by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The native init entry point returned a non-zero code.
    #[error("native engine initialization failed with code {code}")]
    Initialization { code: i32 },

    /// Another bridge already owns the process-wide native engine.
    #[error("the native engine is already owned by another bridge in this process")]
    EngineClaimed,
}
