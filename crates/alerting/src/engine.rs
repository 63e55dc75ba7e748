//! Dangerous-state persistence engine

use detection::{ClassCounts, Detection, DetectionClass};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cooldown::CooldownTable;
use crate::kind::AlertKind;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Continuous time a condition must hold before it is confirmed (ms)
    pub persistence_ms: u64,

    /// Concentration at or below which the low concentration alert fires
    pub low_concentration_threshold: u8,

    /// Raw sleep detections above this confidence alert immediately
    pub sleep_confidence_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persistence_ms: 10_000,
            low_concentration_threshold: scoring::CRITICAL_MAX,
            sleep_confidence_threshold: 0.7,
        }
    }
}

/// Derived phase of a tracked category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DangerPhase {
    Idle,
    Pending,
    Confirmed,
}

/// Persistence record of one hazard category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DangerState {
    pub active_since: Option<u64>,
    pub alert_sent: bool,
}

impl DangerState {
    pub fn phase(&self, now_ms: u64, persistence_ms: u64) -> DangerPhase {
        match self.active_since {
            None => DangerPhase::Idle,
            Some(since) if now_ms.saturating_sub(since) < persistence_ms => DangerPhase::Pending,
            Some(_) => DangerPhase::Confirmed,
        }
    }

    /// Feed the current condition. Returns true when the episode is
    /// confirmed and has not alerted yet.
    fn observe(&mut self, condition: bool, now_ms: u64, persistence_ms: u64) -> bool {
        if !condition {
            *self = DangerState::default();
            return false;
        }

        let since = match self.active_since {
            Some(since) => since,
            None => {
                self.active_since = Some(now_ms);
                self.alert_sent = false;
                now_ms
            }
        };

        now_ms.saturating_sub(since) >= persistence_ms && !self.alert_sent
    }
}

/// Optional lines appended to an alert message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertMetadata {
    pub timestamp_ms: Option<u64>,
    pub confidence: Option<f32>,
    pub concentration: Option<u8>,
    pub total_detections: Option<u64>,
}

/// An alert the engine decided to issue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRequest {
    pub kind: AlertKind,
    pub message: String,
    pub metadata: AlertMetadata,
}

/// One consistent view of the pipeline for an evaluation
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub counts: &'a ClassCounts,
    pub total_detections: u64,
    pub concentration: u8,
    /// Raw detections of the frame just processed
    pub raw_detections: &'a [Detection],
    pub now_ms: u64,
}

/// Watches counts and concentration over time and decides which alerts to issue.
///
/// Persistence categories (sleepy, dangerous driving, drinking) alert once per
/// continuous episode after the condition held for `persistence_ms`. Low
/// concentration and high-confidence sleep are level-triggered and only
/// throttled by their cooldowns.
pub struct DangerousStateEngine {
    config: EngineConfig,
    states: Vec<(AlertKind, DangerState)>,
}

impl DangerousStateEngine {
    pub fn new(config: EngineConfig) -> Self {
        info!("Creating dangerous-state engine with config: {:?}", config);
        Self {
            config,
            states: AlertKind::PERSISTENT.iter().map(|k| (*k, DangerState::default())).collect(),
        }
    }

    /// Evaluate one cycle. Every returned request is considered issued:
    /// its episode is marked as alerted.
    pub fn evaluate(
        &mut self,
        input: &EngineInput<'_>,
        cooldowns: &CooldownTable,
    ) -> Vec<AlertRequest> {
        let now = input.now_ms;
        let persistence_ms = self.config.persistence_ms;
        let mut requests = Vec::new();

        for (kind, state) in self.states.iter_mut() {
            let Some(class) = kind.tracked_class() else {
                continue;
            };
            let condition = input.counts.get(class.as_str()).copied().unwrap_or(0) > 0;
            let was_active = state.active_since.is_some();

            if !state.observe(condition, now, persistence_ms) {
                if was_active && state.active_since.is_none() {
                    debug!("{} cleared, persistence timer reset", kind);
                } else if !was_active && state.active_since.is_some() {
                    debug!("{} condition started at {}", kind, now);
                }
                continue;
            }

            if !cooldowns.is_ready(*kind, now) {
                debug!(
                    "{} confirmed, waiting {} ms for cooldown",
                    kind,
                    cooldowns.remaining(*kind, now)
                );
                continue;
            }

            let held_ms = now.saturating_sub(state.active_since.unwrap_or(now));
            state.alert_sent = true;
            info!("{} confirmed after {} ms", kind, held_ms);
            requests.push(AlertRequest {
                kind: *kind,
                message: format!(
                    "{}: detected continuously for {} seconds",
                    kind.title(),
                    held_ms / 1000
                ),
                metadata: AlertMetadata {
                    timestamp_ms: Some(now),
                    confidence: None,
                    concentration: Some(input.concentration),
                    total_detections: Some(input.total_detections),
                },
            });
        }

        if input.concentration <= self.config.low_concentration_threshold
            && cooldowns.is_ready(AlertKind::LowConcentration, now)
        {
            info!("Concentration at {}%", input.concentration);
            requests.push(AlertRequest {
                kind: AlertKind::LowConcentration,
                message: format!(
                    "{}: concentration dropped to {}%",
                    AlertKind::LowConcentration.title(),
                    input.concentration
                ),
                metadata: AlertMetadata {
                    timestamp_ms: Some(now),
                    confidence: None,
                    concentration: Some(input.concentration),
                    total_detections: Some(input.total_detections),
                },
            });
        }

        let sleepiest = input
            .raw_detections
            .iter()
            .filter(|d| d.is_class(DetectionClass::SleepyDriving))
            .filter(|d| d.confidence > self.config.sleep_confidence_threshold)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        if let Some(detection) = sleepiest {
            if cooldowns.is_ready(AlertKind::SleepDetectionByConfidence, now) {
                info!("High-confidence sleep detection ({:.2})", detection.confidence);
                requests.push(AlertRequest {
                    kind: AlertKind::SleepDetectionByConfidence,
                    message: format!(
                        "{}: sleep detected with {:.0}% confidence",
                        AlertKind::SleepDetectionByConfidence.title(),
                        detection.confidence * 100.0
                    ),
                    metadata: AlertMetadata {
                        timestamp_ms: Some(now),
                        confidence: Some(detection.confidence),
                        concentration: Some(input.concentration),
                        total_detections: Some(input.total_detections),
                    },
                });
            }
        }

        requests
    }

    /// Record of a persistence category
    pub fn state(&self, kind: AlertKind) -> Option<DangerState> {
        self.states.iter().find(|(k, _)| *k == kind).map(|(_, s)| *s)
    }

    /// All persistence categories with their current phase
    pub fn phases(&self, now_ms: u64) -> Vec<(AlertKind, DangerPhase)> {
        self.states
            .iter()
            .map(|(k, s)| (*k, s.phase(now_ms, self.config.persistence_ms)))
            .collect()
    }

    /// Return every category to idle
    pub fn reset(&mut self) {
        for (_, state) in self.states.iter_mut() {
            *state = DangerState::default();
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for DangerousStateEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
