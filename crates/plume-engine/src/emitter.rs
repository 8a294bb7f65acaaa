//! Spherical density emitters.
//!
//! Emitter parameters are owned by the host. The native engine receives them
//! at creation and again on every [`sync`](EmitterResource::sync); nothing is
//! read back.

use plume_bridge::{SimHandle, SimulationBridge};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceError;

/// Host-side emitter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterDesc {
    /// World-space center.
    pub position: [f32; 3],
    /// Sphere radius in world units.
    pub radius: f32,
    /// Injected density per second at the center.
    pub density: f32,
}

impl Default for EmitterDesc {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            radius: 0.5,
            density: 1.0,
        }
    }
}

/// One native emitter.
#[derive(Debug)]
pub struct EmitterResource {
    desc: EmitterDesc,
    handle: SimHandle,
}

impl EmitterResource {
    pub fn new(desc: EmitterDesc) -> Self {
        Self {
            desc,
            handle: SimHandle::INVALID,
        }
    }

    /// Create the native emitter. Returns the existing handle if already
    /// created.
    pub fn create(&mut self, bridge: &mut SimulationBridge) -> Result<SimHandle, ResourceError> {
        if self.handle.is_valid() {
            return Ok(self.handle);
        }
        if !bridge.is_initialized() {
            tracing::error!("cannot create emitter: bridge not initialized");
            return Err(ResourceError::BridgeNotInitialized);
        }
        let handle = bridge.create_emitter(self.desc.position, self.desc.radius, self.desc.density);
        if !handle.is_valid() {
            tracing::error!(desc = ?self.desc, "native engine refused to create emitter");
            return Err(ResourceError::ResourceExhausted { kind: "emitter" });
        }
        self.handle = handle;
        tracing::debug!(%handle, position = ?self.desc.position, "emitter created");
        Ok(handle)
    }

    /// Push the current parameters to the engine.
    pub fn sync(&self, bridge: &mut SimulationBridge) -> Result<(), ResourceError> {
        if !self.handle.is_valid() {
            return Err(ResourceError::InvalidHandle { kind: "emitter" });
        }
        bridge.set_emitter_params(self.handle, self.desc.position, self.desc.radius, self.desc.density);
        Ok(())
    }

    /// Move the emitter. Takes effect at the next sync.
    pub fn set_position(&mut self, position: [f32; 3]) {
        self.desc.position = position;
    }

    /// Change radius and density. Takes effect at the next sync.
    pub fn set_params(&mut self, radius: f32, density: f32) {
        self.desc.radius = radius;
        self.desc.density = density;
    }

    /// Release the native emitter. Returns `false` if there was nothing to
    /// destroy.
    pub fn destroy(&mut self, bridge: &mut SimulationBridge) -> bool {
        if !self.handle.is_valid() {
            return false;
        }
        bridge.destroy_emitter(self.handle);
        tracing::debug!(handle = %self.handle, "emitter destroyed");
        self.handle = SimHandle::INVALID;
        true
    }

    pub fn desc(&self) -> &EmitterDesc {
        &self.desc
    }

    pub fn handle(&self) -> SimHandle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use plume_bridge::SoftwareEngine;
    use plume_dispatch::Dispatcher;

    use super::*;

    #[test]
    fn lifecycle_leaves_invalid_handle() {
        let dispatcher = Dispatcher::new();
        let mut bridge = SimulationBridge::new(Box::new(SoftwareEngine::new()), dispatcher.handle());
        let mut emitter = EmitterResource::new(EmitterDesc::default());

        assert_eq!(emitter.create(&mut bridge), Err(ResourceError::BridgeNotInitialized));
        bridge.initialize().unwrap();
        assert!(emitter.create(&mut bridge).unwrap().is_valid());
        assert!(emitter.sync(&mut bridge).is_ok());

        assert!(emitter.destroy(&mut bridge));
        assert!(!emitter.destroy(&mut bridge));
        assert_eq!(emitter.handle(), SimHandle::INVALID);
        assert_eq!(
            emitter.sync(&mut bridge),
            Err(ResourceError::InvalidHandle { kind: "emitter" })
        );
    }

    #[test]
    fn setters_update_host_parameters() {
        let mut emitter = EmitterResource::new(EmitterDesc::default());
        emitter.set_position([1.0, 2.0, 3.0]);
        emitter.set_params(0.25, 4.0);
        assert_eq!(
            *emitter.desc(),
            EmitterDesc {
                position: [1.0, 2.0, 3.0],
                radius: 0.25,
                density: 4.0,
            }
        );
    }
}
