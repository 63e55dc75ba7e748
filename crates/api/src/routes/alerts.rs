//! Alert Routes

use alerting::AlertRecord;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::SharedState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub data: Vec<AlertRecord>,
    pub count: usize,
    pub failed_count: usize,
}

/// Recent alerts, newest first
pub async fn get_alerts(
    State(state): State<SharedState>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let state = state.read().await;
    let alerts: Vec<AlertRecord> = state
        .monitor
        .dispatcher()
        .history()
        .rev()
        .take(params.limit)
        .cloned()
        .collect();

    let failed = alerts.iter().filter(|a| !a.outcome.is_success()).count();

    Json(AlertResponse {
        count: alerts.len(),
        failed_count: failed,
        data: alerts,
    })
}
