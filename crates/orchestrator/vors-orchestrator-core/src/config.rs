//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::buffer::STRIDE;
use crate::diagnostics::DiagnosticsCfg;
use crate::error::{OrchestratorError, Result};

/// Buffer sizing for one tracking session.
///
/// Capacities are hard limits: reaching one is fatal for the session.
/// Initial sizes only decide how much is allocated before the first growth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of points in the cloud (3 scalars each).
    pub nb_particles: usize,
    /// Maximum number of poses in the camera path.
    pub camera_path_nb_frames: usize,
    /// Points allocated up front.
    pub initial_particles: usize,
    /// Poses allocated up front.
    pub initial_camera_frames: usize,
    pub diagnostics: DiagnosticsCfg,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nb_particles: 1_000_000,
            camera_path_nb_frames: 10_000,
            initial_particles: 65_536,
            initial_camera_frames: 1_024,
            diagnostics: DiagnosticsCfg::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let parse_error = |e: serde_json::Error| OrchestratorError::InvalidConfig {
            reason: format!("config parse error: {e}"),
        };
        let value: serde_json::Value = serde_json::from_str(text).map_err(parse_error)?;
        if !value.is_object() {
            return Err(OrchestratorError::InvalidConfig {
                reason: "config must be a JSON object".to_string(),
            });
        }
        let cfg: SessionConfig = serde_json::from_value(value).map_err(parse_error)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nb_particles == 0 {
            return Err(OrchestratorError::InvalidConfig {
                reason: "nb_particles must be positive".to_string(),
            });
        }
        if self.camera_path_nb_frames == 0 {
            return Err(OrchestratorError::InvalidConfig {
                reason: "camera_path_nb_frames must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Point buffer capacity in scalars.
    pub fn point_capacity(&self) -> usize {
        STRIDE * self.nb_particles
    }

    pub fn initial_point_scalars(&self) -> usize {
        STRIDE * self.initial_particles.min(self.nb_particles)
    }

    pub fn initial_camera_frames(&self) -> usize {
        self.initial_camera_frames.min(self.camera_path_nb_frames)
    }
}
