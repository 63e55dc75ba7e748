//! Status Routes

use alerting::{AlertKind, AlertStatus, DangerPhase};
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use detection::ClassCounts;
use monitor::now_ms;
use scoring::{class_style, ClassStyle, ConcentrationTier};
use serde::Serialize;
use stabilizer::StabilizedDetection;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use crate::{ApiError, AppState, SharedState};

/// Service banner
#[derive(Debug, Serialize)]
pub struct BannerResponse {
    pub message: String,
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub monitoring: bool,
    pub alerting: AlertStatus,
    pub active_connections: usize,
}

/// Current counts and derived scores
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_detections: u64,
    pub detection_counts: ClassCounts,
    pub last_updated: Option<DateTime<Utc>>,
    pub concentration: u8,
    pub tier: ConcentrationTier,
    pub monitoring: bool,
    pub cycles: u64,
    pub current_detections: Vec<StabilizedDetection>,
    /// Display style of every counted class
    pub styles: BTreeMap<String, ClassStyle>,
    /// Persistence phase of every tracked hazard
    pub hazards: BTreeMap<AlertKind, DangerPhase>,
}

impl StatsResponse {
    pub fn from_state(state: &AppState) -> Self {
        let monitor = &state.monitor;
        let counts = monitor.store().state();
        let report = monitor.concentration();
        Self {
            total_detections: counts.total_detections,
            detection_counts: counts.detection_counts.clone(),
            last_updated: counts.last_updated,
            concentration: report.score,
            tier: report.tier,
            monitoring: monitor.is_running(),
            cycles: monitor.cycles(),
            current_detections: monitor.current_detections().to_vec(),
            styles: counts
                .detection_counts
                .keys()
                .map(|class| (class.clone(), class_style(class)))
                .collect(),
            hazards: monitor.engine().phases(now_ms()).into_iter().collect(),
        }
    }
}

pub async fn root_handler(State(state): State<SharedState>) -> Json<BannerResponse> {
    let state = state.read().await;
    Json(BannerResponse {
        message: "Driver Monitoring System API".to_string(),
        status: "running".to_string(),
        version: state.version.clone(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Health check handler
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let state = state.read().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        monitoring: state.monitor.is_running(),
        alerting: state.monitor.dispatcher().status(),
        active_connections: state.connections.load(Ordering::Relaxed),
    })
}

pub async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    let state = state.read().await;
    Json(StatsResponse::from_state(&state))
}

/// Prometheus exposition
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, ApiError> {
    let state = state.read().await;
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ApiError::MetricsUnavailable)
}
