//! Simulation grids: descriptor, lifecycle and field export.
//!
//! A [`GridResource`] moves through
//!
//! ```text
//! Uninitialized -> Created -> (Stepping <-> FieldsReady) -> Destroyed
//! ```
//!
//! Every transition that crosses into the native engine checks the handle
//! first; a grid without a live handle never reaches the bridge.

use std::sync::Arc;

use plume_bridge::{FieldBuffer, GridDims, SimHandle, SimulationBridge};
use serde::{Deserialize, Serialize};

use crate::placeholder;
use crate::resources::ResourceError;

// ---------------------------------------------------------------------------
// GridDesc
// ---------------------------------------------------------------------------

/// Parameters of a grid, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDesc {
    /// Cell counts per axis.
    pub dims: GridDims,
    /// World units per cell.
    pub cell_size: f32,
    /// World-space center of the volume.
    pub position: [f32; 3],
}

impl GridDesc {
    /// A grid of `x * y * z` cells centered on the origin.
    pub fn new(x: u32, y: u32, z: u32, cell_size: f32) -> Self {
        Self {
            dims: GridDims::new(x, y, z),
            cell_size,
            position: [0.0; 3],
        }
    }

    /// Move the volume center.
    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    /// Reject descriptors the native engine would refuse.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let GridDims { x, y, z } = self.dims;
        if x == 0 || y == 0 || z == 0 {
            return Err(ResourceError::InvalidDescriptor {
                reason: format!("grid size must be positive on every axis, got {}", self.dims),
            });
        }
        if x > i32::MAX as u32 || y > i32::MAX as u32 || z > i32::MAX as u32 {
            return Err(ResourceError::InvalidDescriptor {
                reason: format!("grid size {} does not fit the native handle API", self.dims),
            });
        }
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(ResourceError::InvalidDescriptor {
                reason: format!("cell size must be positive and finite, got {}", self.cell_size),
            });
        }
        Ok(())
    }

    /// World-space size of the volume: `dims * cell_size`.
    pub fn world_extent(&self) -> [f32; 3] {
        [
            self.dims.x as f32 * self.cell_size,
            self.dims.y as f32 * self.cell_size,
            self.dims.z as f32 * self.cell_size,
        ]
    }
}

impl Default for GridDesc {
    fn default() -> Self {
        Self::new(64, 64, 64, 0.1)
    }
}

// ---------------------------------------------------------------------------
// Export policy
// ---------------------------------------------------------------------------

/// What to do when the engine has no field data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderPolicy {
    /// Warn and keep the previous fields.
    #[default]
    Never,
    /// Substitute the placeholder for whichever field is missing, and warn.
    OnExportFailure,
    /// Ignore the engine and always publish placeholder fields.
    Always,
}

/// Export cadence and fallback for one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Export every `interval` steps. `0` and `1` both mean every step.
    pub interval: u32,
    /// Fallback when export returns nothing.
    pub placeholder: PlaceholderPolicy,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            interval: 1,
            placeholder: PlaceholderPolicy::Never,
        }
    }
}

/// Result of one export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Cadence not due; nothing exported.
    Skipped,
    /// Both fields copied from the engine.
    Native,
    /// At least one field was synthesized.
    Placeholder,
    /// The engine had no data and the previous fields were kept.
    Unavailable,
}

impl ExportOutcome {
    /// Whether new fields were published.
    pub fn published(self) -> bool {
        matches!(self, Self::Native | Self::Placeholder)
    }
}

// ---------------------------------------------------------------------------
// GridFields
// ---------------------------------------------------------------------------

/// The most recent exported field pair of one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridFields {
    /// Scalar density, one value per cell.
    pub density: FieldBuffer,
    /// Velocity, three values per cell.
    pub velocity: FieldBuffer,
    /// Increases every time the grid publishes new fields.
    pub generation: u64,
}

impl GridFields {
    /// Dims shared by both fields.
    pub fn dims(&self) -> GridDims {
        self.density.dims()
    }

    /// Whether either field is synthesized.
    pub fn is_placeholder(&self) -> bool {
        self.density.is_placeholder() || self.velocity.is_placeholder()
    }
}

// ---------------------------------------------------------------------------
// GridResource
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`GridResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridState {
    /// Described but not yet created natively.
    Uninitialized,
    /// Native grid exists; not stepped yet.
    Created,
    /// Stepped since the last published export.
    Stepping,
    /// Fields for the latest export are available.
    FieldsReady,
    /// Native grid released.
    Destroyed,
}

/// One native grid and its host-side field cache.
#[derive(Debug)]
pub struct GridResource {
    desc: GridDesc,
    export: ExportSettings,
    handle: SimHandle,
    state: GridState,
    fields: Option<Arc<GridFields>>,
    steps_since_export: u32,
    generation: u64,
}

impl GridResource {
    /// Describe a grid without creating it.
    pub fn new(desc: GridDesc, export: ExportSettings) -> Self {
        Self {
            desc,
            export,
            handle: SimHandle::INVALID,
            state: GridState::Uninitialized,
            fields: None,
            steps_since_export: 0,
            generation: 0,
        }
    }

    /// Create the native grid.
    ///
    /// Returns the existing handle if already created.
    pub fn create(&mut self, bridge: &mut SimulationBridge) -> Result<SimHandle, ResourceError> {
        if self.handle.is_valid() {
            return Ok(self.handle);
        }
        self.desc.validate()?;
        if !bridge.is_initialized() {
            tracing::error!(dims = %self.desc.dims, "cannot create grid: bridge not initialized");
            return Err(ResourceError::BridgeNotInitialized);
        }

        let GridDims { x, y, z } = self.desc.dims;
        let handle = bridge.create_grid(x as i32, y as i32, z as i32, self.desc.cell_size);
        if !handle.is_valid() {
            tracing::error!(
                dims = %self.desc.dims,
                cell_size = self.desc.cell_size,
                "native engine refused to create grid"
            );
            return Err(ResourceError::ResourceExhausted { kind: "grid" });
        }

        self.handle = handle;
        self.state = GridState::Created;
        self.steps_since_export = 0;
        tracing::info!(
            %handle,
            dims = %self.desc.dims,
            cell_size = self.desc.cell_size,
            "grid created"
        );
        Ok(handle)
    }

    /// Advance the grid one tick and export if the cadence is due.
    pub fn step(&mut self, bridge: &mut SimulationBridge, dt: f32) -> Result<ExportOutcome, ResourceError> {
        self.require_handle()?;
        bridge.step_grid(self.handle, dt);
        self.state = GridState::Stepping;

        self.steps_since_export += 1;
        if self.export.interval > 1 && self.steps_since_export < self.export.interval {
            return Ok(ExportOutcome::Skipped);
        }
        self.steps_since_export = 0;
        self.export(bridge)
    }

    /// Export both fields now, regardless of cadence.
    pub fn export(&mut self, bridge: &mut SimulationBridge) -> Result<ExportOutcome, ResourceError> {
        self.require_handle()?;

        let (density, velocity, outcome) = match self.export.placeholder {
            PlaceholderPolicy::Always => (
                placeholder::density(self.desc.dims),
                placeholder::velocity(self.desc.dims),
                ExportOutcome::Placeholder,
            ),
            policy => {
                let density = bridge.export_density(self.handle);
                let velocity = bridge.export_velocity(self.handle);
                let consistent = match (&density, &velocity) {
                    (Some(d), Some(v)) => d.dims() == v.dims(),
                    _ => true,
                };
                if !consistent {
                    tracing::warn!(handle = %self.handle, "exported density and velocity disagree on dims");
                }
                match (density, velocity, policy) {
                    (Some(d), Some(v), _) if consistent => (d, v, ExportOutcome::Native),
                    (d, v, PlaceholderPolicy::OnExportFailure) if consistent => {
                        let dims = d.as_ref().or(v.as_ref()).map_or(self.desc.dims, |f| f.dims());
                        tracing::warn!(
                            handle = %self.handle,
                            density = d.is_some(),
                            velocity = v.is_some(),
                            "field export unavailable; substituting placeholder data"
                        );
                        (
                            d.unwrap_or_else(|| placeholder::density(dims)),
                            v.unwrap_or_else(|| placeholder::velocity(dims)),
                            ExportOutcome::Placeholder,
                        )
                    }
                    _ => {
                        tracing::warn!(handle = %self.handle, "field export unavailable; keeping previous fields");
                        return Ok(ExportOutcome::Unavailable);
                    }
                }
            }
        };

        self.generation += 1;
        self.fields = Some(Arc::new(GridFields {
            density,
            velocity,
            generation: self.generation,
        }));
        self.state = GridState::FieldsReady;
        tracing::trace!(handle = %self.handle, generation = self.generation, ?outcome, "grid fields published");
        Ok(outcome)
    }

    /// Release the native grid, then the field cache.
    ///
    /// Returns `false` if there was nothing to destroy.
    pub fn destroy(&mut self, bridge: &mut SimulationBridge) -> bool {
        if !self.handle.is_valid() {
            return false;
        }
        bridge.destroy_grid(self.handle);
        self.fields = None;
        tracing::info!(handle = %self.handle, "grid destroyed");
        self.handle = SimHandle::INVALID;
        self.state = GridState::Destroyed;
        true
    }

    fn require_handle(&self) -> Result<(), ResourceError> {
        if self.handle.is_valid() {
            Ok(())
        } else {
            Err(ResourceError::InvalidHandle { kind: "grid" })
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn desc(&self) -> &GridDesc {
        &self.desc
    }

    pub fn export_settings(&self) -> ExportSettings {
        self.export
    }

    /// Change cadence or fallback. Resets the cadence counter.
    pub fn set_export_settings(&mut self, export: ExportSettings) {
        self.export = export;
        self.steps_since_export = 0;
    }

    pub fn handle(&self) -> SimHandle {
        self.handle
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    /// The latest published fields, if any.
    pub fn fields(&self) -> Option<&Arc<GridFields>> {
        self.fields.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
