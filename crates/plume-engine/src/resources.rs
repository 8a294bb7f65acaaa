//! Ownership of every grid and emitter created through the bridge.
//!
//! The manager is the boundary that keeps invalid handles away from the
//! native engine: resources only enter its maps once they hold a live
//! handle, and leave them when destroyed.

use std::collections::BTreeMap;

use plume_bridge::SimulationBridge;
use plume_dispatch::ActionTarget;
use serde::{Deserialize, Serialize};

use crate::emitter::{EmitterDesc, EmitterResource};
use crate::grid::{ExportOutcome, ExportSettings, GridDesc, GridResource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from resource lifecycle operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    /// Creation was attempted before the bridge was initialized.
    #[error("simulation bridge is not initialized")]
    BridgeNotInitialized,

    /// The descriptor would be rejected by the native engine.
    #[error("invalid descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    /// The native engine returned a negative handle.
    #[error("native engine refused to create a {kind} -- not retrying the same parameters")]
    ResourceExhausted { kind: &'static str },

    /// The resource has no live native handle.
    #[error("{kind} has no live native handle")]
    InvalidHandle { kind: &'static str },

    #[error("unknown grid {0}")]
    UnknownGrid(GridId),

    #[error("unknown emitter {0}")]
    UnknownEmitter(EmitterId),
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

const EMITTER_TARGET_BIT: u64 = 1 << 63;

/// Host-side key of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridId(u64);

/// Host-side key of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmitterId(u64);

impl GridId {
    /// Dispatcher target for actions that touch this grid.
    pub fn target(self) -> ActionTarget {
        ActionTarget::Resource(self.0)
    }
}

impl EmitterId {
    /// Dispatcher target for actions that touch this emitter.
    pub fn target(self) -> ActionTarget {
        ActionTarget::Resource(self.0 | EMITTER_TARGET_BIT)
    }
}

impl std::fmt::Display for GridId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid-{}", self.0)
    }
}

impl std::fmt::Display for EmitterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "emitter-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StepReport
// ---------------------------------------------------------------------------

/// Outcome of [`ResourceManager::step_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Export outcome per grid, in id order.
    pub grids: Vec<(GridId, ExportOutcome)>,
    /// Emitters whose parameters were pushed.
    pub emitters_synced: usize,
}

impl StepReport {
    /// Grids that published new fields this step.
    pub fn published(&self) -> impl Iterator<Item = GridId> + '_ {
        self.grids
            .iter()
            .filter(|(_, outcome)| outcome.published())
            .map(|(id, _)| *id)
    }
}

// ---------------------------------------------------------------------------
// ResourceManager
// ---------------------------------------------------------------------------

/// Owns grids and emitters keyed by host ids.
#[derive(Debug, Default)]
pub struct ResourceManager {
    grids: BTreeMap<GridId, GridResource>,
    emitters: BTreeMap<EmitterId, EmitterResource>,
    next_id: u64,
    default_export: ExportSettings,
}

impl ResourceManager {
    /// An empty manager whose grids use `default_export`.
    pub fn new(default_export: ExportSettings) -> Self {
        Self {
            default_export,
            ..Default::default()
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // -- creation -----------------------------------------------------------

    /// Create a grid with the default export settings.
    pub fn create_grid(&mut self, bridge: &mut SimulationBridge, desc: GridDesc) -> Result<GridId, ResourceError> {
        let export = self.default_export;
        self.create_grid_with(bridge, desc, export)
    }

    /// Create a grid with its own export settings.
    pub fn create_grid_with(
        &mut self,
        bridge: &mut SimulationBridge,
        desc: GridDesc,
        export: ExportSettings,
    ) -> Result<GridId, ResourceError> {
        let mut grid = GridResource::new(desc, export);
        grid.create(bridge)?;
        let id = GridId(self.allocate_id());
        self.grids.insert(id, grid);
        Ok(id)
    }

    /// Create an emitter.
    pub fn create_emitter(
        &mut self,
        bridge: &mut SimulationBridge,
        desc: EmitterDesc,
    ) -> Result<EmitterId, ResourceError> {
        let mut emitter = EmitterResource::new(desc);
        emitter.create(bridge)?;
        let id = EmitterId(self.allocate_id());
        self.emitters.insert(id, emitter);
        Ok(id)
    }

    // -- per tick -----------------------------------------------------------

    /// Push every emitter's parameters, then step every grid.
    ///
    /// A grid that fails to step is logged and skipped; the others still run.
    pub fn step_all(&mut self, bridge: &mut SimulationBridge, dt: f32) -> StepReport {
        let mut report = StepReport::default();

        for (id, emitter) in &self.emitters {
            match emitter.sync(bridge) {
                Ok(()) => report.emitters_synced += 1,
                Err(e) => tracing::warn!(%id, error = %e, "emitter sync skipped"),
            }
        }

        for (id, grid) in &mut self.grids {
            match grid.step(bridge, dt) {
                Ok(outcome) => report.grids.push((*id, outcome)),
                Err(e) => tracing::warn!(%id, error = %e, "grid step skipped"),
            }
        }

        report
    }

    // -- destruction --------------------------------------------------------

    /// Destroy a grid. Returns `false` if `id` is not live.
    pub fn destroy_grid(&mut self, bridge: &mut SimulationBridge, id: GridId) -> bool {
        match self.grids.remove(&id) {
            Some(mut grid) => grid.destroy(bridge),
            None => {
                tracing::debug!(%id, "destroy of unknown grid ignored");
                false
            }
        }
    }

    /// Destroy an emitter. Returns `false` if `id` is not live.
    pub fn destroy_emitter(&mut self, bridge: &mut SimulationBridge, id: EmitterId) -> bool {
        match self.emitters.remove(&id) {
            Some(mut emitter) => emitter.destroy(bridge),
            None => {
                tracing::debug!(%id, "destroy of unknown emitter ignored");
                false
            }
        }
    }

    /// Destroy everything. Returns the ids of the grids that were destroyed.
    pub fn destroy_all(&mut self, bridge: &mut SimulationBridge) -> Vec<GridId> {
        for (_, mut emitter) in std::mem::take(&mut self.emitters) {
            emitter.destroy(bridge);
        }
        std::mem::take(&mut self.grids)
            .into_iter()
            .filter_map(|(id, mut grid)| grid.destroy(bridge).then_some(id))
            .collect()
    }

    // -- accessors ----------------------------------------------------------

    pub fn grid(&self, id: GridId) -> Option<&GridResource> {
        self.grids.get(&id)
    }

    pub fn grid_mut(&mut self, id: GridId) -> Result<&mut GridResource, ResourceError> {
        self.grids.get_mut(&id).ok_or(ResourceError::UnknownGrid(id))
    }

    pub fn emitter(&self, id: EmitterId) -> Option<&EmitterResource> {
        self.emitters.get(&id)
    }

    pub fn emitter_mut(&mut self, id: EmitterId) -> Result<&mut EmitterResource, ResourceError> {
        self.emitters
            .get_mut(&id)
            .ok_or(ResourceError::UnknownEmitter(id))
    }

    /// Live grids in id order.
    pub fn grids(&self) -> impl Iterator<Item = (GridId, &GridResource)> {
        self.grids.iter().map(|(id, grid)| (*id, grid))
    }

    /// Live emitters in id order.
    pub fn emitters(&self) -> impl Iterator<Item = (EmitterId, &EmitterResource)> {
        self.emitters.iter().map(|(id, emitter)| (*id, emitter))
    }

    /// Dispatcher targets of every live resource.
    pub fn targets(&self) -> Vec<ActionTarget> {
        self.grids
            .keys()
            .map(|id| id.target())
            .chain(self.emitters.keys().map(|id| id.target()))
            .collect()
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
