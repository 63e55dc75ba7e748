//! Detection class vocabulary

use serde::{Deserialize, Serialize};

/// Label used when the detector reports no class at all
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Classes emitted by the cabin detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionClass {
    SafeDriving,
    DangerousDriving,
    Distracted,
    Drinking,
    Yawn,
    SleepyDriving,
}

impl DetectionClass {
    /// Every recognised class, in presentation order
    pub const ALL: [DetectionClass; 6] = [
        DetectionClass::SafeDriving,
        DetectionClass::DangerousDriving,
        DetectionClass::Distracted,
        DetectionClass::Drinking,
        DetectionClass::Yawn,
        DetectionClass::SleepyDriving,
    ];

    /// Canonical label, as used for count keys and export
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionClass::SafeDriving => "SafeDriving",
            DetectionClass::DangerousDriving => "DangerousDriving",
            DetectionClass::Distracted => "Distracted",
            DetectionClass::Drinking => "Drinking",
            DetectionClass::Yawn => "Yawn",
            DetectionClass::SleepyDriving => "SleepyDriving",
        }
    }

    /// Match a detector label against the vocabulary.
    ///
    /// Matching ignores case, `_`, `-` and whitespace, so `sleepy_driving`
    /// and `Sleepy Driving` both resolve to [`DetectionClass::SleepyDriving`].
    pub fn from_label(label: &str) -> Option<Self> {
        let folded: String = label
            .chars()
            .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        Self::ALL
            .into_iter()
            .find(|class| class.as_str().to_lowercase() == folded)
    }

    /// Canonicalise an arbitrary detector label.
    ///
    /// Known classes get their canonical spelling; unknown labels are kept
    /// trimmed; blank labels become [`UNKNOWN_LABEL`].
    pub fn canonical_label(label: &str) -> String {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return UNKNOWN_LABEL.to_string();
        }
        match Self::from_label(trimmed) {
            Some(class) => class.as_str().to_string(),
            None => trimmed.to_string(),
        }
    }
}

impl std::fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
