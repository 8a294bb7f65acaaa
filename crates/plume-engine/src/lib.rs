//! Plume Engine -- grid/emitter resources, the per-frame coordinator, and the
//! volumetric renderer for a native fluid simulation.
//!
//! This crate builds on [`plume_bridge`] (the native engine boundary) and
//! [`plume_dispatch`] (main-thread action queue). The [`Coordinator`]
//! steps every grid at a fixed timestep, exports density and velocity fields
//! on each grid's cadence, and drains native events back onto the calling
//! thread. With the `renderer` feature, [`render`] ray marches the exported
//! fields in a window.
//!
//! [`Coordinator`]: coordinator::Coordinator
//!
//! # Quick Start
//!
//! ```
//! use plume_engine::prelude::*;
//!
//! let config = FlowConfig {
//!     grid: GridDesc::new(8, 8, 8, 0.25),
//!     emitters: vec![EmitterDesc::default()],
//!     ..Default::default()
//! };
//!
//! let settings = CoordinatorConfig::try_from(&config).unwrap();
//! let mut coordinator = Coordinator::try_new(Box::new(SoftwareEngine::new()), settings).unwrap();
//! coordinator.initialize().unwrap();
//! coordinator.spawn_scene(&config).unwrap();
//!
//! assert_eq!(coordinator.run_ticks(10), 10);
//! assert_eq!(coordinator.tick_count(), 10);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod emitter;
pub mod grid;
pub mod placeholder;
pub mod render;
pub mod resources;
pub mod telemetry;
pub mod volume;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the bridge crate for convenience.
pub use plume_bridge;

/// Re-export the dispatch crate for convenience.
pub use plume_dispatch;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use plume_bridge::{
        BridgeError, EventHandler, EventKind, EventPayload, FieldBuffer, FieldFormat, FieldSource, GridDims,
        NativeEngine, NativeEvent, SimHandle, SimulationBridge, SoftwareEngine,
    };
    pub use plume_dispatch::{Action, ActionTarget, DispatchHandle, Dispatcher, DrainReport};

    pub use crate::config::{ConfigError, FlowConfig};
    pub use crate::coordinator::{
        Coordinator, CoordinatorConfig, FieldUpload, FrameUpdate, ShutdownReport, TickDiagnostics,
    };
    pub use crate::emitter::{EmitterDesc, EmitterResource};
    pub use crate::grid::{
        ExportOutcome, ExportSettings, GridDesc, GridFields, GridResource, GridState,
        PlaceholderPolicy,
    };
    pub use crate::resources::{EmitterId, GridId, ResourceError, ResourceManager, StepReport};
    pub use crate::telemetry::init_tracing;
    pub use crate::volume::{CameraState, RayMarchSettings, RayMarchUniforms, VolumeTransform};

    #[cfg(feature = "renderer")]
    pub use crate::render::app::{run_windowed, WindowOptions};
    #[cfg(feature = "renderer")]
    pub use crate::render::VolumeRenderer;
}
