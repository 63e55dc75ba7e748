//! Temporal Stabilizer
//!
//! Turns a jittery per-frame detection stream into a low-noise per-cycle
//! detection set. A class is emitted only when it shows up often enough, and
//! confidently enough, across the last few frames.

pub mod config;
mod stabilize;
mod window;

pub use config::StabilizerConfig;
pub use stabilize::{stabilize, StabilizedDetection, TemporalStabilizer};
pub use window::SlidingWindow;

use thiserror::Error;

/// Stabilizer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StabilizerError {
    #[error("Window size must be at least 1")]
    EmptyWindow,

    #[error("{field} must be within [0, 1], got {value}")]
    ThresholdRange { field: &'static str, value: f64 },
}
