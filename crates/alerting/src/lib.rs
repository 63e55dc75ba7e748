//! Alerting System
//!
//! Decides when a dangerous driver state is confirmed and delivers at most
//! one alert per confirmed episode:
//! - Persistence state machine per hazard category
//! - Level-triggered low concentration and high-confidence sleep checks
//! - Independent cooldowns per alert kind
//! - Messaging dispatch with its own cooldown gate

mod cooldown;
mod dispatcher;
mod engine;
mod kind;
pub mod transport;

pub use cooldown::{CooldownConfig, CooldownTable};
pub use dispatcher::{
    connection_status, AlertDispatcher, AlertRecord, AlertStatus, DeliveredAlert, DispatchOutcome,
    DispatcherConfig, PendingAlert,
};
pub use engine::{
    AlertMetadata, AlertRequest, DangerPhase, DangerState, DangerousStateEngine, EngineConfig,
    EngineInput,
};
pub use kind::AlertKind;
pub use transport::{
    AlertTransport, OutboundMessage, TelegramConfig, TelegramTransport, TransportError,
};
