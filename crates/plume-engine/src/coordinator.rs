//! The per-frame driver.
//!
//! The [`Coordinator`] owns the bridge, the dispatcher and every resource,
//! and runs one fixed sequence per tick on the calling thread:
//!
//! 1. Global engine step.
//! 2. Emitter parameters pushed to the engine.
//! 3. Each grid stepped, and exported when its cadence is due.
//! 4. Queued native events drained and handled.
//!
//! The returned [`FrameUpdate`] lists the fields the renderer should upload.
//! Because stepping and exporting happen sequentially here, a grid is never
//! stepped while its fields are being exported.
//!
//! # Example
//!
//! ```
//! use plume_bridge::SoftwareEngine;
//! use plume_engine::coordinator::{Coordinator, CoordinatorConfig};
//! use plume_engine::emitter::EmitterDesc;
//! use plume_engine::grid::GridDesc;
//!
//! let mut coordinator = Coordinator::new(Box::new(SoftwareEngine::new()), CoordinatorConfig::default());
//! coordinator.initialize().unwrap();
//! let grid = coordinator.create_grid(GridDesc::new(16, 16, 16, 0.1)).unwrap();
//! coordinator.create_emitter(EmitterDesc::default()).unwrap();
//!
//! let update = coordinator.tick();
//! assert_eq!(update.uploads.len(), 1);
//! assert_eq!(update.uploads[0].grid, grid);
//!
//! coordinator.shutdown();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use plume_bridge::{BridgeError, EventHandler, NativeEngine, SimulationBridge};
use plume_dispatch::{DispatchHandle, Dispatcher, DrainReport};

use crate::config::{ConfigError, FlowConfig};
use crate::emitter::{EmitterDesc, EmitterResource};
use crate::grid::{ExportSettings, GridDesc, GridFields};
use crate::resources::{EmitterId, GridId, ResourceError, ResourceManager};
use crate::volume::VolumeTransform;

// ---------------------------------------------------------------------------
// CoordinatorConfig
// ---------------------------------------------------------------------------

/// Timing and mode of a [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Seconds per tick. Must be positive and finite.
    pub fixed_dt: f32,
    /// No window or GPU.
    pub headless: bool,
    /// Export settings for grids created without their own.
    pub export: ExportSettings,
}

impl Default for CoordinatorConfig {
    /// 60 Hz, windowed, export every step without placeholder.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            headless: false,
            export: ExportSettings::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            )));
        }
        Ok(())
    }
}

impl TryFrom<&FlowConfig> for CoordinatorConfig {
    type Error = ConfigError;

    /// Validates the whole `FlowConfig`, not only the fields copied.
    fn try_from(config: &FlowConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            fixed_dt: config.fixed_dt,
            headless: config.headless,
            export: config.export_settings(),
        })
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Global engine step.
    pub global_step_time: Duration,
    /// Emitter sync plus grid steps and exports.
    pub grid_time: Duration,
    /// Running queued event handlers.
    pub drain_time: Duration,
    /// Whole tick.
    pub total_time: Duration,
    /// Grids that published fields.
    pub exports: usize,
    /// Of those, grids that published placeholder data.
    pub placeholders: usize,
}

// ---------------------------------------------------------------------------
// FrameUpdate
// ---------------------------------------------------------------------------

/// Fields to upload for one grid.
#[derive(Debug, Clone)]
pub struct FieldUpload {
    pub grid: GridId,
    pub fields: Arc<GridFields>,
    pub volume: VolumeTransform,
}

/// What changed during one tick.
#[derive(Debug, Clone, Default)]
pub struct FrameUpdate {
    /// Tick number after this tick (first tick is 1).
    pub tick: u64,
    /// Grids with freshly published fields.
    pub uploads: Vec<FieldUpload>,
    /// Grids destroyed since the last update; their GPU caches can go.
    pub released: Vec<GridId>,
    /// Event handlers run this tick.
    pub drain: DrainReport,
}

/// What [`Coordinator::shutdown`] tore down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub grids_destroyed: usize,
    pub emitters_destroyed: usize,
    /// Queued actions dropped without running.
    pub actions_discarded: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Owns the simulation stack and drives it one tick at a time.
pub struct Coordinator {
    bridge: SimulationBridge,
    dispatcher: Dispatcher,
    resources: ResourceManager,
    config: CoordinatorConfig,
    tick_counter: u64,
    running: bool,
    released: Vec<GridId>,
    last_diagnostics: TickDiagnostics,
}

impl Coordinator {
    /// Wrap `engine`. Nothing crosses into the engine until
    /// [`initialize`](Self::initialize).
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid. Use [`try_new`](Self::try_new) for
    /// configs that come from outside the program.
    pub fn new(engine: Box<dyn NativeEngine>, config: CoordinatorConfig) -> Self {
        match Self::try_new(engine, config) {
            Ok(coordinator) => coordinator,
            Err(e) => panic!("{e}"),
        }
    }

    /// Like [`new`](Self::new), but reports an invalid `config` instead of
    /// panicking.
    pub fn try_new(engine: Box<dyn NativeEngine>, config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dispatcher = Dispatcher::new();
        let bridge = SimulationBridge::new(engine, dispatcher.handle());
        Ok(Self {
            bridge,
            dispatcher,
            resources: ResourceManager::new(config.export),
            config,
            tick_counter: 0,
            running: true,
            released: Vec::new(),
            last_diagnostics: TickDiagnostics::default(),
        })
    }

    /// Handle native events with `handler` instead of logging them.
    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.bridge.set_event_handler(handler);
        self
    }

    /// Initialize the bridge.
    ///
    /// Also valid after [`shutdown`](Self::shutdown): the engine starts again
    /// with no resources and ticking resumes.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        self.bridge.initialize()?;
        self.running = true;
        Ok(())
    }

    /// Create the grid and emitters described by `config`.
    pub fn spawn_scene(&mut self, config: &FlowConfig) -> Result<GridId, ResourceError> {
        let grid = self
            .resources
            .create_grid_with(&mut self.bridge, config.grid, config.export_settings())?;
        for desc in &config.emitters {
            self.resources.create_emitter(&mut self.bridge, *desc)?;
        }
        Ok(grid)
    }

    // -- resources ----------------------------------------------------------

    pub fn create_grid(&mut self, desc: GridDesc) -> Result<GridId, ResourceError> {
        self.resources.create_grid(&mut self.bridge, desc)
    }

    pub fn create_grid_with(&mut self, desc: GridDesc, export: ExportSettings) -> Result<GridId, ResourceError> {
        self.resources.create_grid_with(&mut self.bridge, desc, export)
    }

    pub fn create_emitter(&mut self, desc: EmitterDesc) -> Result<EmitterId, ResourceError> {
        self.resources.create_emitter(&mut self.bridge, desc)
    }

    /// Destroy a grid and drop queued actions aimed at it.
    pub fn destroy_grid(&mut self, id: GridId) -> bool {
        let discarded = self.dispatcher.discard_targeting(id.target());
        if discarded > 0 {
            tracing::debug!(%id, discarded, "discarded queued actions for destroyed grid");
        }
        let destroyed = self.resources.destroy_grid(&mut self.bridge, id);
        if destroyed {
            self.released.push(id);
        }
        destroyed
    }

    /// Destroy an emitter and drop queued actions aimed at it.
    pub fn destroy_emitter(&mut self, id: EmitterId) -> bool {
        self.dispatcher.discard_targeting(id.target());
        self.resources.destroy_emitter(&mut self.bridge, id)
    }

    /// Mutable access to an emitter's host parameters.
    pub fn emitter_mut(&mut self, id: EmitterId) -> Result<&mut EmitterResource, ResourceError> {
        self.resources.emitter_mut(id)
    }

    // -- ticking ------------------------------------------------------------

    /// Run one tick.
    ///
    /// After [`shutdown`](Self::shutdown), or before a successful
    /// [`initialize`](Self::initialize), nothing is sent to the engine; queued
    /// events are still drained.
    pub fn tick(&mut self) -> FrameUpdate {
        let tick_start = Instant::now();
        let dt = self.config.fixed_dt;
        let mut update = FrameUpdate::default();
        let mut diagnostics = TickDiagnostics::default();

        if self.running && self.bridge.is_initialized() {
            // Phase 1: global step.
            let phase = Instant::now();
            self.bridge.step(dt);
            diagnostics.global_step_time = phase.elapsed();

            // Phase 2: emitter sync, grid step, cadenced export.
            let phase = Instant::now();
            let report = self.resources.step_all(&mut self.bridge, dt);
            for id in report.published() {
                let Some(grid) = self.resources.grid(id) else {
                    continue;
                };
                let Some(fields) = grid.fields() else {
                    continue;
                };
                let desc = grid.desc();
                diagnostics.exports += 1;
                if fields.is_placeholder() {
                    diagnostics.placeholders += 1;
                }
                update.uploads.push(FieldUpload {
                    grid: id,
                    fields: Arc::clone(fields),
                    volume: VolumeTransform::for_grid(fields.dims(), desc.cell_size, desc.position),
                });
            }
            diagnostics.grid_time = phase.elapsed();

            self.tick_counter += 1;
        }

        // Phase 3: native events.
        let phase = Instant::now();
        update.drain = self.dispatcher.drain();
        diagnostics.drain_time = phase.elapsed();

        update.tick = self.tick_counter;
        update.released = std::mem::take(&mut self.released);
        diagnostics.total_time = tick_start.elapsed();
        tracing::trace!(
            tick = update.tick,
            uploads = update.uploads.len(),
            events = update.drain.executed,
            "tick complete"
        );
        self.last_diagnostics = diagnostics;
        update
    }

    /// Run `count` ticks. Returns the total number of uploads produced.
    pub fn run_ticks(&mut self, count: u64) -> usize {
        (0..count).map(|_| self.tick().uploads.len()).sum()
    }

    /// Tear everything down in order: stop ticking, drop queued actions aimed
    /// at live resources, destroy resources, shut the engine down, and only
    /// then release the callback.
    ///
    /// Calling this again is a no-op until the next successful
    /// [`initialize`](Self::initialize).
    pub fn shutdown(&mut self) -> ShutdownReport {
        if !self.running {
            return ShutdownReport::default();
        }
        self.running = false;

        let mut report = ShutdownReport::default();
        for target in self.resources.targets() {
            report.actions_discarded += self.dispatcher.discard_targeting(target);
        }
        report.emitters_destroyed = self.resources.emitter_count();
        let destroyed = self.resources.destroy_all(&mut self.bridge);
        report.grids_destroyed = destroyed.len();
        self.released.extend(destroyed);

        self.bridge.shutdown();
        tracing::info!(
            ticks = self.tick_counter,
            grids = report.grids_destroyed,
            emitters = report.emitters_destroyed,
            discarded = report.actions_discarded,
            "coordinator shut down"
        );
        report
    }

    /// Grids destroyed since the last tick, for callers that stop ticking.
    pub fn take_released(&mut self) -> Vec<GridId> {
        std::mem::take(&mut self.released)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of ticks that reached the engine.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulated seconds: `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * f64::from(self.config.fixed_dt)
    }

    pub fn fixed_dt(&self) -> f32 {
        self.config.fixed_dt
    }

    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    /// `false` between [`shutdown`](Self::shutdown) and the next successful
    /// [`initialize`](Self::initialize).
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn bridge(&self) -> &SimulationBridge {
        &self.bridge
    }

    /// Mutable bridge access, e.g. for test events.
    pub fn bridge_mut(&mut self) -> &mut SimulationBridge {
        &mut self.bridge
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Producer end of the event queue.
    pub fn dispatch_handle(&self) -> DispatchHandle {
        self.dispatcher.handle()
    }

    /// Actions waiting for the next drain.
    pub fn pending_actions(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use plume_bridge::SoftwareEngine;

    use super::*;
    use crate::grid::PlaceholderPolicy;

    fn running() -> Coordinator {
        let mut c = Coordinator::new(Box::new(SoftwareEngine::new()), CoordinatorConfig::default());
        c.initialize().unwrap();
        c
    }

    // -- 1. Construction ------------------------------------------------------

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let _ = Coordinator::new(
            Box::new(SoftwareEngine::new()),
            CoordinatorConfig {
                fixed_dt: 0.0,
                ..Default::default()
            },
        );
    }

    #[test]
    fn invalid_configs_are_reported_instead_of_panicking() {
        let err = Coordinator::try_new(
            Box::new(SoftwareEngine::new()),
            CoordinatorConfig {
                fixed_dt: f32::NAN,
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let flow = FlowConfig {
            fixed_dt: -1.0,
            ..Default::default()
        };
        assert!(CoordinatorConfig::try_from(&flow).is_err());

        let flow = FlowConfig {
            grid: GridDesc::new(0, 4, 4, 0.5),
            ..Default::default()
        };
        assert!(CoordinatorConfig::try_from(&flow).is_err());

        let config = CoordinatorConfig::try_from(&FlowConfig::default()).unwrap();
        assert!(Coordinator::try_new(Box::new(SoftwareEngine::new()), config).is_ok());
    }

    #[test]
    fn ticks_before_initialize_do_not_reach_the_engine() {
        let mut c = Coordinator::new(Box::new(SoftwareEngine::new()), CoordinatorConfig::default());
        let update = c.tick();
        assert_eq!(update.tick, 0);
        assert!(update.uploads.is_empty());
        assert_eq!(c.tick_count(), 0);
    }

    // -- 2. Ticking -----------------------------------------------------------

    #[test]
    fn tick_uploads_published_fields() {
        let mut c = running();
        let grid = c.create_grid(GridDesc::new(8, 8, 8, 0.25).at([1.0, 0.0, 0.0])).unwrap();
        c.create_emitter(EmitterDesc::default()).unwrap();

        let update = c.tick();
        assert_eq!(update.tick, 1);
        assert_eq!(update.uploads.len(), 1);
        let upload = &update.uploads[0];
        assert_eq!(upload.grid, grid);
        assert_eq!(upload.fields.generation, 1);
        assert_eq!(upload.volume.size.to_array(), [2.0, 2.0, 2.0]);
        assert_eq!(upload.volume.position.x, 1.0);
        // The frame event from the global step.
        assert_eq!(update.drain.executed, 1);
        assert_eq!(c.last_diagnostics().exports, 1);
    }

    #[test]
    fn cadence_limits_uploads() {
        let mut c = running();
        c.create_grid_with(
            GridDesc::new(4, 4, 4, 0.5),
            ExportSettings {
                interval: 2,
                placeholder: PlaceholderPolicy::Never,
            },
        )
        .unwrap();
        assert_eq!(c.run_ticks(6), 3);
        assert!((c.sim_time() - 6.0 / 60.0).abs() < 1e-6);
    }

    #[test]
    fn placeholder_uploads_are_counted() {
        let mut c = Coordinator::new(
            Box::new(SoftwareEngine::new().with_exports_disabled()),
            CoordinatorConfig {
                export: ExportSettings {
                    interval: 1,
                    placeholder: PlaceholderPolicy::OnExportFailure,
                },
                ..Default::default()
            },
        );
        c.initialize().unwrap();
        c.create_grid(GridDesc::new(4, 4, 4, 0.5)).unwrap();

        let update = c.tick();
        assert!(update.uploads[0].fields.is_placeholder());
        assert_eq!(c.last_diagnostics().placeholders, 1);
    }

    #[test]
    fn moved_emitter_is_synced_before_the_grid_steps() {
        let mut c = running();
        let grid = c.create_grid(GridDesc::new(16, 16, 16, 0.25)).unwrap();
        let emitter = c
            .create_emitter(EmitterDesc {
                position: [-1.5, 0.0, 0.0],
                radius: 0.5,
                density: 1.0,
            })
            .unwrap();
        c.emitter_mut(emitter).unwrap().set_position([1.5, 0.0, 0.0]);

        let update = c.tick();
        let dims = update.uploads[0].fields.dims();
        let density = update.uploads[0].fields.density.data();
        // x = (1.5 + 2.0) / 0.25 = 14, y = z = 8
        assert!(density[dims.index(14, 8, 8)] > 0.0);
        assert_eq!(density[dims.index(2, 8, 8)], 0.0);
        assert!(c.resources().grid(grid).is_some());
    }

    // -- 3. Teardown ----------------------------------------------------------

    #[test]
    fn destroy_grid_discards_targeted_actions_and_reports_release() {
        let mut c = running();
        let grid = c.create_grid(GridDesc::new(4, 4, 4, 0.5)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        c.dispatch_handle().enqueue_for(grid.target(), move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(c.destroy_grid(grid));
        assert!(!c.destroy_grid(grid));

        let update = c.tick();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(update.released, vec![grid]);
        assert!(update.uploads.is_empty());
    }

    #[test]
    fn shutdown_tears_down_in_order_and_stops_ticking() {
        let mut c = running();
        let grid = c.create_grid(GridDesc::new(4, 4, 4, 0.5)).unwrap();
        c.create_emitter(EmitterDesc::default()).unwrap();
        c.tick();
        c.dispatch_handle().enqueue_for(grid.target(), || Ok(()));

        let report = c.shutdown();
        assert_eq!(
            report,
            ShutdownReport {
                grids_destroyed: 1,
                emitters_destroyed: 1,
                actions_discarded: 1,
            }
        );
        assert!(!c.bridge().is_initialized());
        assert!(c.bridge().registration().is_none());
        assert_eq!(c.take_released(), vec![grid]);

        let before = c.tick_count();
        assert!(c.tick().uploads.is_empty());
        assert_eq!(c.tick_count(), before);
        assert_eq!(c.shutdown(), ShutdownReport::default());
    }

    #[test]
    fn reinitializing_after_shutdown_resumes_ticking() {
        let mut c = running();
        c.create_grid(GridDesc::new(4, 4, 4, 0.5)).unwrap();
        c.tick();
        c.shutdown();
        assert!(!c.is_running());

        c.initialize().unwrap();
        assert!(c.is_running());
        assert_eq!(c.resources().grid_count(), 0);
        let grid = c.create_grid(GridDesc::new(4, 4, 4, 0.5)).unwrap();

        let update = c.tick();
        assert_eq!(update.tick, 2);
        assert_eq!(update.uploads.len(), 1);
        assert_eq!(update.uploads[0].grid, grid);

        let report = c.shutdown();
        assert_eq!(report.grids_destroyed, 1);
        assert!(!c.bridge().is_initialized());
    }
}
