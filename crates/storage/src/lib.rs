//! Storage Layer
//!
//! Single source of truth for cumulative detection counts:
//! - Key/value persistence backends (in-memory, JSON files)
//! - Throttled, order-preserving count updates
//! - Change notification for dashboards
//! - Snapshot export and validated import

mod backend;
mod counter;
mod snapshot;

pub use backend::{JsonFileStore, KeyValueStore, MemoryStore};
pub use counter::{CounterStore, StoreConfig, SubscriptionId, UpdateOutcome};
pub use snapshot::{CountsSnapshot, SessionEntry};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Import rejected: {0}")]
    Import(#[from] ImportError),
}

/// Reasons a snapshot is rejected on import
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(String),
    #[error("snapshot must be a JSON object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("totalDetections {total} does not match the sum of counts {sum}")]
    TotalMismatch { total: u64, sum: u64 },
}
