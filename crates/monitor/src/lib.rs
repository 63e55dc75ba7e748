//! Driver Monitor Pipeline
//!
//! Runs one monitoring cycle per frame: normalize, stabilize, count, score,
//! evaluate dangerous states and dispatch alerts. Also drives cycles at a
//! target rate from a frame source.

pub mod config;
mod pipeline;
mod runner;
pub mod source;

pub use config::MonitorConfig;
pub use pipeline::{
    process_frame_shared, CycleReport, DeliveredCycle, Monitor, MonitorHandle, PendingCycle,
};
pub use runner::run_cycles;
pub use source::{FrameSource, JsonLinesSource};

use thiserror::Error;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitoring is not running")]
    NotRunning,

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Stabilizer error: {0}")]
    Stabilizer(#[from] stabilizer::StabilizerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame source error: {0}")]
    Source(#[from] std::io::Error),
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
