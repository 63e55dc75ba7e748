//! Per-class presentation table

use detection::DetectionClass;
use serde::Serialize;

/// Display color and label for a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassStyle {
    pub color: &'static str,
    pub label: &'static str,
}

/// Entry used for labels outside the vocabulary
pub const DEFAULT_STYLE: ClassStyle = ClassStyle {
    color: "#9E9E9E",
    label: "Other",
};

/// Look up the style for a detector label
pub fn class_style(label: &str) -> ClassStyle {
    match DetectionClass::from_label(label) {
        Some(DetectionClass::SafeDriving) => ClassStyle { color: "#4CAF50", label: "Safe driving" },
        Some(DetectionClass::DangerousDriving) => ClassStyle {
            color: "#F44336",
            label: "Dangerous driving",
        },
        Some(DetectionClass::Distracted) => ClassStyle { color: "#FF9800", label: "Distracted" },
        Some(DetectionClass::Drinking) => ClassStyle { color: "#2196F3", label: "Drinking" },
        Some(DetectionClass::Yawn) => ClassStyle { color: "#9C27B0", label: "Yawning" },
        Some(DetectionClass::SleepyDriving) => ClassStyle {
            color: "#795548",
            label: "Sleepy driving",
        },
        None => DEFAULT_STYLE,
    }
}
