//! Driver Monitor API Server
//!
//! REST API and WebSocket server for the driver monitoring dashboard.

use alerting::{connection_status, TelegramTransport};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use monitor::{run_cycles, JsonLinesSource, Monitor, MonitorError, MonitorHandle};
use serde::Serialize;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use storage::{CounterStore, ImportError, StorageError};
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod background;
mod routes;
pub mod settings;

pub use routes::ws::{CountsPayload, ServerEvent};
pub use settings::Settings;

/// State shared across handlers and background tasks
pub type SharedState = Arc<RwLock<AppState>>;

/// Application state shared across handlers
pub struct AppState {
    /// Detection-to-alert pipeline
    pub monitor: Monitor<TelegramTransport>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Events pushed to WebSocket clients
    pub events: broadcast::Sender<ServerEvent>,
    /// Open WebSocket connections
    pub connections: Arc<AtomicUsize>,
    /// Prometheus exposition, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the pipeline from settings
    pub fn new(settings: &Settings, metrics: Option<PrometheusHandle>) -> Result<Self, ApiError> {
        let transport = TelegramTransport::from_config(&settings.telegram)?;
        let store = CounterStore::open(settings.storage.backend()?, settings.storage.clone());
        let dispatcher = alerting::AlertDispatcher::new(settings.dispatcher.clone(), transport);
        let mut monitor = Monitor::new(
            settings.monitor.clone(),
            settings.stabilizer.clone(),
            settings.engine.clone(),
            store,
            dispatcher,
        )?;

        let (events, _) = broadcast::channel(settings.server.event_capacity.max(1));
        let publisher = events.clone();
        monitor.store_mut().subscribe(move |snapshot| {
            // No receivers is fine
            let _ = publisher.send(ServerEvent::CountsUpdated {
                data: CountsPayload::from(snapshot),
            });
        });

        if settings.monitor.autostart {
            monitor.start();
        }

        Ok(Self {
            monitor,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            events,
            connections: Arc::new(AtomicUsize::new(0)),
            metrics,
        })
    }

    /// Publish an event to every WebSocket client
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

impl MonitorHandle for AppState {
    type Transport = TelegramTransport;

    fn monitor(&mut self) -> &mut Monitor<TelegramTransport> {
        &mut self.monitor
    }
}

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Monitoring is not running")]
    NotRunning,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] ImportError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Monitor error: {0}")]
    Monitor(MonitorError),

    #[error("Transport error: {0}")]
    Transport(#[from] alerting::TransportError),

    #[error("Metrics exporter not installed")]
    MetricsUnavailable,
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Import(e) => ApiError::InvalidSnapshot(e),
            other => ApiError::Storage(other),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::NotRunning => ApiError::NotRunning,
            MonitorError::Storage(e) => e.into(),
            other => ApiError::Monitor(other),
        }
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotRunning => StatusCode::CONFLICT,
            ApiError::InvalidSnapshot(_) => StatusCode::BAD_REQUEST,
            ApiError::MetricsUnavailable => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Monitor(_) | ApiError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            status: "error".to_string(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Create the application router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(routes::status::root_handler))
        .route("/api/v1/health", get(routes::status::health_handler))
        .route("/api/v1/stats", get(routes::status::stats_handler))
        .route("/api/v1/start", post(routes::control::start_handler))
        .route("/api/v1/stop", post(routes::control::stop_handler))
        .route("/api/v1/frames", post(routes::control::frame_handler))
        .route("/api/v1/reset", post(routes::control::reset_handler))
        .route("/api/v1/export", get(routes::control::export_handler))
        .route("/api/v1/import", post(routes::control::import_handler))
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route("/metrics", get(routes::status::metrics_handler))
        .route("/ws", get(routes::ws::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Initialize logging
pub fn init_logging(logging: &settings::LoggingSettings) {
    let level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }
}

/// Run the server until Ctrl-C
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus exporter unavailable: {}", e);
            None
        }
    };

    let state = Arc::new(RwLock::new(AppState::new(&settings, metrics)?));
    let transport = state.read().await.monitor.dispatcher().transport();
    if let Some(transport) = transport {
        let status = connection_status(&*transport).await;
        state.write().await.monitor.dispatcher_mut().set_status(status);
        info!("Alerting status: {:?}", status);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let maintenance =
        background::spawn_maintenance(state.clone(), &settings.storage, stop_rx.clone());

    // Replay idles while monitoring is stopped and resumes on start
    let replay = match &settings.server.replay_path {
        Some(path) => {
            let source = JsonLinesSource::open(path).await?;
            Some(tokio::spawn(run_cycles(state.clone(), source, stop_rx)))
        }
        None => None,
    };

    let app = create_router(state);
    info!("Starting API server on {}", settings.server.bind_addr);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = stop_tx.send(true);
    maintenance.await?;
    if let Some(replay) = replay {
        match replay.await? {
            Ok(cycles) => info!("Replay processed {} cycles", cycles),
            Err(e) => warn!("Replay ended with error: {}", e),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
