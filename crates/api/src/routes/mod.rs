//! HTTP and WebSocket routes

pub mod alerts;
pub mod control;
pub mod status;
pub mod ws;
