//! WebSocket Route

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use detection::ClassCounts;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use storage::CountsSnapshot;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::routes::status::StatsResponse;
use crate::SharedState;

/// Counts pushed after every store change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsPayload {
    pub total_detections: u64,
    pub detection_counts: ClassCounts,
    pub last_updated: Option<DateTime<Utc>>,
    pub concentration: u8,
}

impl From<&CountsSnapshot> for CountsPayload {
    fn from(snapshot: &CountsSnapshot) -> Self {
        Self {
            total_detections: snapshot.total_detections,
            detection_counts: snapshot.detection_counts.clone(),
            last_updated: snapshot.last_updated,
            concentration: scoring::concentration(&snapshot.detection_counts),
        }
    }
}

/// Messages sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Pong { timestamp: String },
    Stats { data: StatsResponse },
    MonitoringStarted { message: String },
    MonitoringStopped { message: String },
    CountsUpdated { data: CountsPayload },
    Error { message: String },
}

/// Messages accepted from clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    GetStats,
    StartMonitoring,
    StopMonitoring,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    let (mut events, connections) = {
        let state = state.read().await;
        (state.events.subscribe(), state.connections.clone())
    };
    let open = connections.fetch_add(1, Ordering::Relaxed) + 1;
    info!("Client connected. Total connections: {}", open);

    loop {
        let reply = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_message(&text, &state).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode WebSocket event: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            // Client disconnected
            break;
        }
    }

    let open = connections.fetch_sub(1, Ordering::Relaxed) - 1;
    info!("Client disconnected. Total connections: {}", open);
}

async fn handle_message(text: &str, state: &SharedState) -> ServerEvent {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerEvent::Error {
                message: format!("Unrecognised message: {}", e),
            }
        }
    };

    match message {
        ClientMessage::Ping => ServerEvent::Pong {
            timestamp: Utc::now().to_rfc3339(),
        },
        ClientMessage::GetStats => {
            let state = state.read().await;
            ServerEvent::Stats {
                data: StatsResponse::from_state(&state),
            }
        }
        ClientMessage::StartMonitoring => {
            let mut state = state.write().await;
            state.monitor.start();
            ServerEvent::MonitoringStarted {
                message: "Monitoring started successfully".to_string(),
            }
        }
        ClientMessage::StopMonitoring => {
            let mut state = state.write().await;
            state.monitor.stop();
            ServerEvent::MonitoringStopped {
                message: "Monitoring stopped successfully".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppState, Settings};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn state() -> SharedState {
        Arc::new(RwLock::new(AppState::new(&Settings::default(), None).unwrap()))
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let reply = handle_message(r#"{"type":"ping"}"#, &state()).await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_start_stop_commands() {
        let state = state();
        let reply = handle_message(r#"{"type":"start_monitoring"}"#, &state).await;
        assert!(matches!(reply, ServerEvent::MonitoringStarted { .. }));
        assert!(state.read().await.monitor.is_running());

        handle_message(r#"{"type":"stop_monitoring"}"#, &state).await;
        assert!(!state.read().await.monitor.is_running());
    }

    #[tokio::test]
    async fn test_get_stats_and_unknown() {
        let state = state();
        let reply = handle_message(r#"{"type":"get_stats"}"#, &state).await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["data"]["totalDetections"], 0);
        assert_eq!(json["data"]["concentration"], 100);

        let reply = handle_message(r#"{"type":"dance"}"#, &state).await;
        assert!(matches!(reply, ServerEvent::Error { .. }));
    }
}
