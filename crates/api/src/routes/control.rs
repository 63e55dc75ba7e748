//! Monitoring Control Routes

use alerting::{AlertKind, DispatchOutcome};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use detection::RawFrame;
use monitor::{now_ms, process_frame_shared};
use scoring::ConcentrationReport;
use serde::Serialize;
use stabilizer::StabilizedDetection;
use tracing::info;

use crate::routes::status::StatsResponse;
use crate::routes::ws::ServerEvent;
use crate::{ApiError, SharedState};

/// Acknowledgement of a control command
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub message: String,
    pub status: String,
}

/// Alert raised while processing a frame
#[derive(Debug, Serialize)]
pub struct AlertSummary {
    pub kind: AlertKind,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// Result of one submitted frame
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResponse {
    pub raw_detections: usize,
    pub stable: Vec<StabilizedDetection>,
    pub total_detections: u64,
    pub concentration: ConcentrationReport,
    pub alerts: Vec<AlertSummary>,
}

pub async fn start_handler(State(state): State<SharedState>) -> Json<ControlResponse> {
    let mut state = state.write().await;
    state.monitor.start();
    state.broadcast(ServerEvent::MonitoringStarted {
        message: "Monitoring started from API".to_string(),
    });
    Json(ControlResponse {
        message: "Monitoring started".to_string(),
        status: "success".to_string(),
    })
}

pub async fn stop_handler(State(state): State<SharedState>) -> Json<ControlResponse> {
    let mut state = state.write().await;
    state.monitor.stop();
    state.broadcast(ServerEvent::MonitoringStopped {
        message: "Monitoring stopped from API".to_string(),
    });
    Json(ControlResponse {
        message: "Monitoring stopped".to_string(),
        status: "success".to_string(),
    })
}

/// Run one cycle for a frame from the detection source. Alerts are sent
/// with the state lock released.
pub async fn frame_handler(
    State(state): State<SharedState>,
    Json(frame): Json<RawFrame>,
) -> Result<Json<FrameResponse>, ApiError> {
    let report = process_frame_shared(&state, frame, now_ms()).await?;

    Ok(Json(FrameResponse {
        raw_detections: report.raw_detections,
        stable: report.stable,
        total_detections: report.total_detections,
        concentration: report.concentration,
        alerts: report
            .alerts
            .into_iter()
            .map(|(kind, outcome)| AlertSummary { kind, outcome })
            .collect(),
    }))
}

pub async fn reset_handler(
    State(state): State<SharedState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let mut state = state.write().await;
    state.monitor.reset(now_ms())?;
    Ok(Json(StatsResponse::from_state(&state)))
}

/// Full counts structure in the export format
pub async fn export_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let state = state.read().await;
    let body = state.monitor.export()?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Replace the counts with an exported snapshot
pub async fn import_handler(
    State(state): State<SharedState>,
    body: String,
) -> Result<Json<StatsResponse>, ApiError> {
    let mut state = state.write().await;
    state.monitor.import(&body, now_ms())?;
    info!("Counts replaced by import");
    Ok(Json(StatsResponse::from_state(&state)))
}
