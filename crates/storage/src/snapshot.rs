//! Persisted/exported counts structure

use chrono::{DateTime, Utc};
use detection::ClassCounts;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ImportError;

/// One applied update, kept for export/audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub timestamp: DateTime<Utc>,
    /// Counts right after the update
    pub detections: ClassCounts,
    pub total_detections: u64,
}

/// Aggregate counts plus bounded session log.
///
/// This is both the persisted blob and the export format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsSnapshot {
    pub total_detections: u64,
    pub detection_counts: ClassCounts,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_data: Vec<SessionEntry>,
}

impl CountsSnapshot {
    pub fn count(&self, class: &str) -> u64 {
        self.detection_counts.get(class).copied().unwrap_or(0)
    }

    /// Sum of all per-class counts, saturating at `u64::MAX`
    pub fn counts_sum(&self) -> u64 {
        self.detection_counts.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Sum of all per-class counts, `None` on overflow
    pub fn checked_counts_sum(&self) -> Option<u64> {
        self.detection_counts.values().try_fold(0u64, |acc, n| acc.checked_add(*n))
    }

    pub fn is_empty(&self) -> bool {
        self.total_detections == 0
            && self.detection_counts.is_empty()
            && self.session_data.is_empty()
    }

    /// Serialize in the export format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and validate an exported snapshot.
    ///
    /// Requires a `detectionCounts` object of non-negative integers and an
    /// integer `totalDetections` equal to their sum.
    pub fn from_json(json: &str) -> Result<Self, ImportError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ImportError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ImportError> {
        let object = value.as_object().ok_or(ImportError::NotAnObject)?;

        let counts = object
            .get("detectionCounts")
            .ok_or(ImportError::MissingField("detectionCounts"))?;
        let counts = counts.as_object().ok_or_else(|| ImportError::InvalidField {
            field: "detectionCounts",
            reason: "expected an object".into(),
        })?;
        if let Some((class, _)) = counts.iter().find(|(_, v)| v.as_u64().is_none()) {
            return Err(ImportError::InvalidField {
                field: "detectionCounts",
                reason: format!("count for {} is not a non-negative integer", class),
            });
        }

        let total = object
            .get("totalDetections")
            .ok_or(ImportError::MissingField("totalDetections"))?
            .as_u64()
            .ok_or_else(|| ImportError::InvalidField {
                field: "totalDetections",
                reason: "expected a non-negative integer".into(),
            })?;

        let snapshot: CountsSnapshot =
            serde_json::from_value(value).map_err(|e| ImportError::InvalidField {
                field: "snapshot",
                reason: e.to_string(),
            })?;

        let sum = snapshot.checked_counts_sum().ok_or_else(|| ImportError::InvalidField {
            field: "detectionCounts",
            reason: "counts overflow".into(),
        })?;
        if sum != total {
            return Err(ImportError::TotalMismatch { total, sum });
        }
        Ok(snapshot)
    }
}
