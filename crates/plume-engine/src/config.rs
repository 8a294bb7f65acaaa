//! Run configuration loaded from JSON.
//!
//! ```
//! use plume_engine::config::FlowConfig;
//!
//! let config = FlowConfig::from_json_str(r#"{
//!     "grid": { "dims": { "x": 32, "y": 48, "z": 32 }, "cell_size": 0.1 },
//!     "export_interval": 2,
//!     "emitters": [ { "position": [0.0, -1.0, 0.0], "radius": 0.4 } ]
//! }"#).unwrap();
//!
//! assert_eq!(config.grid.dims.y, 48);
//! assert_eq!(config.emitters[0].density, 1.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::emitter::EmitterDesc;
use crate::grid::{ExportSettings, GridDesc, PlaceholderPolicy};
use crate::volume::RayMarchSettings;

/// Errors from loading a [`FlowConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to start a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Seconds per tick. Must be positive and finite.
    pub fixed_dt: f32,
    /// Skip window and GPU setup.
    pub headless: bool,
    pub grid: GridDesc,
    /// Export every N steps (`0` = every step).
    pub export_interval: u32,
    pub placeholder_policy: PlaceholderPolicy,
    pub emitters: Vec<EmitterDesc>,
    pub render: RayMarchSettings,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            headless: false,
            grid: GridDesc::default(),
            export_interval: 1,
            placeholder_policy: PlaceholderPolicy::Never,
            emitters: Vec::new(),
            render: RayMarchSettings::default(),
        }
    }
}

impl FlowConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), grid = %config.grid.dims, "loaded flow config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            )));
        }
        self.grid
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.render.width == 0 || self.render.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render size must be non-zero, got {}x{}",
                self.render.width, self.render.height
            )));
        }
        if !(self.render.step_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "render step_size must be positive, got {}",
                self.render.step_size
            )));
        }
        for (i, emitter) in self.emitters.iter().enumerate() {
            if !(emitter.radius > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "emitter {i} radius must be positive, got {}",
                    emitter.radius
                )));
            }
        }
        Ok(())
    }

    /// Export settings for grids created from this config.
    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            interval: self.export_interval,
            placeholder: self.placeholder_policy,
        }
    }
}
