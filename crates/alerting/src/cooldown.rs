//! Per-kind alert cooldowns

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::kind::AlertKind;

/// Cooldown per alert kind (milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub sleepy_ms: u64,
    pub dangerous_driving_ms: u64,
    pub drinking_ms: u64,
    pub low_concentration_ms: u64,
    pub sleep_confidence_ms: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            sleepy_ms: 30_000,
            dangerous_driving_ms: 30_000,
            drinking_ms: 30_000,
            low_concentration_ms: 15_000,
            sleep_confidence_ms: 30_000,
        }
    }
}

impl CooldownConfig {
    pub fn cooldown_for(&self, kind: AlertKind) -> u64 {
        match kind {
            AlertKind::Sleepy => self.sleepy_ms,
            AlertKind::DangerousDriving => self.dangerous_driving_ms,
            AlertKind::Drinking => self.drinking_ms,
            AlertKind::LowConcentration => self.low_concentration_ms,
            AlertKind::SleepDetectionByConfidence => self.sleep_confidence_ms,
        }
    }
}

/// Last dispatch time per alert kind.
///
/// Only the dispatcher stamps it; the engine reads it.
#[derive(Debug, Clone, Default)]
pub struct CooldownTable {
    config: CooldownConfig,
    last_sent: HashMap<AlertKind, u64>,
}

impl CooldownTable {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            last_sent: HashMap::new(),
        }
    }

    /// Whether the kind's cooldown has elapsed since its last dispatch
    pub fn is_ready(&self, kind: AlertKind, now_ms: u64) -> bool {
        self.remaining(kind, now_ms) == 0
    }

    /// Milliseconds left before `kind` may be dispatched again
    pub fn remaining(&self, kind: AlertKind, now_ms: u64) -> u64 {
        match self.last_sent.get(&kind) {
            Some(&sent) => (sent + self.config.cooldown_for(kind)).saturating_sub(now_ms),
            None => 0,
        }
    }

    /// Record a dispatch attempt
    pub(crate) fn mark_sent(&mut self, kind: AlertKind, now_ms: u64) {
        debug!("Cooldown started for {} at {}", kind, now_ms);
        self.last_sent.insert(kind, now_ms);
    }

    pub fn last_sent(&self, kind: AlertKind) -> Option<u64> {
        self.last_sent.get(&kind).copied()
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Forget all dispatch times
    pub fn clear(&mut self) {
        self.last_sent.clear();
    }
}
