//! Stabilizer configuration

use serde::{Deserialize, Serialize};

use crate::StabilizerError;

/// Stabilizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Number of recent frames kept in the window
    pub window_size: usize,

    /// Fewer frames than this and the latest frame passes through verbatim
    pub min_history: usize,

    /// Minimum share of window frames a class must appear in
    pub min_frequency: f64,

    /// Minimum mean confidence of a class across the frames it appears in
    pub min_confidence: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            window_size: 9,
            min_history: 3,
            min_frequency: 0.30,
            min_confidence: 0.30,
        }
    }
}

impl StabilizerConfig {
    pub fn validate(&self) -> Result<(), StabilizerError> {
        if self.window_size == 0 {
            return Err(StabilizerError::EmptyWindow);
        }
        for (field, value) in [
            ("min_frequency", self.min_frequency),
            ("min_confidence", self.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StabilizerError::ThresholdRange { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StabilizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = StabilizerConfig { window_size: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(StabilizerError::EmptyWindow));

        let config = StabilizerConfig { min_confidence: 1.5, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(StabilizerError::ThresholdRange { field: "min_confidence", .. })
        ));
    }
}
