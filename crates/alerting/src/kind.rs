//! Alert kinds

use detection::DetectionClass;
use serde::{Deserialize, Serialize};

/// Every alert the engine can raise; each has its own cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    Sleepy,
    DangerousDriving,
    Drinking,
    LowConcentration,
    SleepDetectionByConfidence,
}

impl AlertKind {
    /// Categories confirmed by the persistence state machine
    pub const PERSISTENT: [AlertKind; 3] =
        [AlertKind::Sleepy, AlertKind::DangerousDriving, AlertKind::Drinking];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sleepy => "sleepy",
            AlertKind::DangerousDriving => "dangerousDriving",
            AlertKind::Drinking => "drinking",
            AlertKind::LowConcentration => "lowConcentration",
            AlertKind::SleepDetectionByConfidence => "sleepDetectionByConfidence",
        }
    }

    /// Class whose running count drives a persistence category
    pub fn tracked_class(&self) -> Option<DetectionClass> {
        match self {
            AlertKind::Sleepy => Some(DetectionClass::SleepyDriving),
            AlertKind::DangerousDriving => Some(DetectionClass::DangerousDriving),
            AlertKind::Drinking => Some(DetectionClass::Drinking),
            AlertKind::LowConcentration | AlertKind::SleepDetectionByConfidence => None,
        }
    }

    /// Headline used in outbound messages
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::Sleepy => "Driver drowsiness",
            AlertKind::DangerousDriving => "Dangerous driving",
            AlertKind::Drinking => "Drinking while driving",
            AlertKind::LowConcentration => "Low concentration",
            AlertKind::SleepDetectionByConfidence => "Driver asleep",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
