//! Detection Vocabulary
//!
//! Shared types for the driver monitoring pipeline:
//! - Detection classes produced by the cabin object detector
//! - Normalization of untrusted per-frame detector output
//! - Frame snapshots attached to outbound alerts

pub mod class;
pub mod frame;
pub mod types;

pub use class::DetectionClass;
pub use frame::{FrameImage, DEFAULT_JPEG_QUALITY};
pub use types::{BoundingBox, Detection, FrameRecord, RawDetection, RawFrame};

use std::collections::BTreeMap;
use thiserror::Error;

/// Running count per class label
pub type ClassCounts = BTreeMap<String, u64>;

/// Detection error types
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Frame buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Image encoding failed: {0}")]
    Encode(String),
}
