//! Monitor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::MonitorError;

/// Cycle loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Target cycles per second
    pub target_fps: f64,
    /// Start monitoring as soon as the service is up
    pub autostart: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_fps: 5.0,
            autostart: false,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(MonitorError::Config(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        Ok(())
    }

    /// Time between cycles
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps)
    }
}
