//! Concentration formula and tiers

use detection::{ClassCounts, DetectionClass};
use serde::{Deserialize, Serialize};

/// Lowest score classified as Good
pub const GOOD_MIN: u8 = 76;

/// Highest score classified as Critical
pub const CRITICAL_MAX: u8 = 25;

/// Concentration tier (presentation only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcentrationTier {
    Good,
    Acceptable,
    Critical,
}

impl ConcentrationTier {
    /// `>= 76` Good, `26..=75` Acceptable, `<= 25` Critical
    pub fn from_score(score: u8) -> Self {
        if score >= GOOD_MIN {
            ConcentrationTier::Good
        } else if score > CRITICAL_MAX {
            ConcentrationTier::Acceptable
        } else {
            ConcentrationTier::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConcentrationTier::Good => "Good",
            ConcentrationTier::Acceptable => "Acceptable",
            ConcentrationTier::Critical => "Critical",
        }
    }
}

/// Score plus tier, as served to dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationReport {
    pub score: u8,
    pub tier: ConcentrationTier,
}

impl ConcentrationReport {
    pub fn from_counts(counts: &ClassCounts) -> Self {
        let score = concentration(counts);
        Self {
            score,
            tier: ConcentrationTier::from_score(score),
        }
    }
}

/// Share of safe driving among the six recognised classes, in percent.
///
/// No evidence at all counts as full concentration. Labels outside the
/// vocabulary are ignored. Halves round up.
pub fn concentration(counts: &ClassCounts) -> u8 {
    let count_of = |class: DetectionClass| counts.get(class.as_str()).copied().unwrap_or(0) as u128;

    let total: u128 = DetectionClass::ALL.into_iter().map(count_of).sum();
    if total == 0 {
        return 100;
    }

    let safe = count_of(DetectionClass::SafeDriving);
    // round(100 * safe / total) in integers
    ((200 * safe + total) / (2 * total)) as u8
}
