//! Outbound messaging transports

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Telegram rejects photo captions longer than this
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API rejected request ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Invalid transport configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it embeds the bot token
        TransportError::Request(err.without_url().to_string())
    }
}

/// A fully formatted alert ready to send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    /// JPEG bytes
    pub photo: Option<Vec<u8>>,
}

/// Delivery channel for alert messages
pub trait AlertTransport: Send + Sync {
    fn send(
        &self,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Connectivity check
    fn check(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Telegram bot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    pub timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API transport
pub struct TelegramTransport {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramTransport {
    /// Build a transport, or `None` when credentials are missing
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, TransportError> {
        let token = config.bot_token.as_deref().map(str::trim).unwrap_or_default();
        let chat_id = config.chat_id.as_deref().map(str::trim).unwrap_or_default();
        if token.is_empty() || chat_id.is_empty() {
            info!("Telegram credentials not configured");
            return Ok(None);
        }
        if config.timeout_ms == 0 {
            return Err(TransportError::Config("timeout_ms must be positive".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Some(Self {
            client,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
        }))
    }

    async fn read_response(response: reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Api {
                    status: status.as_u16(),
                    description: status.canonical_reason().unwrap_or("unknown").to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if body.ok && status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Api {
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            })
        }
    }
}

impl AlertTransport for TelegramTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let response = match &message.photo {
            Some(photo) => {
                debug!("Sending photo alert ({} bytes)", photo.len());
                let caption: String = message.text.chars().take(MAX_CAPTION_CHARS).collect();
                let part = reqwest::multipart::Part::bytes(photo.clone())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?;
                let form = reqwest::multipart::Form::new()
                    .text("chat_id", self.chat_id.clone())
                    .text("caption", caption)
                    .part("photo", part);
                self.client
                    .post(format!("{}/sendPhoto", self.endpoint))
                    .multipart(form)
                    .send()
                    .await?
            }
            None => {
                debug!("Sending text alert");
                self.client
                    .post(format!("{}/sendMessage", self.endpoint))
                    .json(&serde_json::json!({
                        "chat_id": self.chat_id,
                        "text": message.text,
                    }))
                    .send()
                    .await?
            }
        };

        Self::read_response(response).await
    }

    async fn check(&self) -> Result<(), TransportError> {
        let response = self.client.get(format!("{}/getMe", self.endpoint)).send().await?;
        Self::read_response(response).await
    }
}
