//! Alert dispatch with cooldown gating and bounded history

use chrono::DateTime;
use detection::FrameImage;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cooldown::{CooldownConfig, CooldownTable};
use crate::engine::{AlertMetadata, AlertRequest};
use crate::kind::AlertKind;
use crate::transport::{AlertTransport, OutboundMessage, TransportError};

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub cooldowns: CooldownConfig,
    /// Alerts kept for the history endpoint
    pub history_limit: usize,
    pub jpeg_quality: u8,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cooldowns: CooldownConfig::default(),
            history_limit: 50,
            jpeg_quality: detection::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Result of one dispatch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum DispatchOutcome {
    Sent,
    Failed,
    CoolingDown { retry_in_ms: u64 },
    Disabled,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }
}

/// Alerting status badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertStatus {
    Disabled,
    Connected,
    Disconnected,
}

/// One entry of the alert history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub kind: AlertKind,
    pub message: String,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// An alert that passed the gate and still has to go out.
///
/// Owns a handle on the transport so the send can run after the caller
/// released whatever lock guards the dispatcher.
pub struct PendingAlert<T> {
    kind: AlertKind,
    message: String,
    timestamp_ms: u64,
    outbound: OutboundMessage,
    transport: Arc<T>,
}

/// A send attempt, ready to be folded back into the dispatcher
#[derive(Debug)]
pub struct DeliveredAlert {
    kind: AlertKind,
    message: String,
    timestamp_ms: u64,
    result: Result<(), TransportError>,
}

impl<T: AlertTransport> PendingAlert<T> {
    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    pub async fn send(self) -> DeliveredAlert {
        let result = self.transport.send(&self.outbound).await;
        DeliveredAlert {
            kind: self.kind,
            message: self.message,
            timestamp_ms: self.timestamp_ms,
            result,
        }
    }
}

impl DeliveredAlert {
    pub fn kind(&self) -> AlertKind {
        self.kind
    }
}

/// Sends alerts through a transport, at most once per cooldown per kind
pub struct AlertDispatcher<T> {
    transport: Option<Arc<T>>,
    cooldowns: CooldownTable,
    status: AlertStatus,
    history: VecDeque<AlertRecord>,
    config: DispatcherConfig,
}

impl<T: AlertTransport> AlertDispatcher<T> {
    /// A dispatcher without a transport is disabled
    pub fn new(config: DispatcherConfig, transport: Option<T>) -> Self {
        let status = if transport.is_some() {
            info!("Alert dispatcher enabled");
            AlertStatus::Disconnected
        } else {
            warn!("Alert dispatcher disabled: no messaging credentials");
            AlertStatus::Disabled
        };

        Self {
            transport: transport.map(Arc::new),
            cooldowns: CooldownTable::new(config.cooldowns.clone()),
            status,
            history: VecDeque::with_capacity(config.history_limit),
            config,
        }
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// Most recent alerts, oldest first
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &AlertRecord> {
        self.history.iter()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn prepare_request(
        &mut self,
        request: &AlertRequest,
        image: Option<&FrameImage>,
        now_ms: u64,
    ) -> Result<PendingAlert<T>, DispatchOutcome> {
        self.prepare(request.kind, &request.message, image, &request.metadata, now_ms)
    }

    /// Gate and format one alert.
    ///
    /// The cooldown is stamped here, at attempt time, whatever the send
    /// later returns. `Err` carries the outcome of an alert that will not
    /// be sent.
    pub fn prepare(
        &mut self,
        kind: AlertKind,
        message: &str,
        image: Option<&FrameImage>,
        metadata: &AlertMetadata,
        now_ms: u64,
    ) -> Result<PendingAlert<T>, DispatchOutcome> {
        let Some(transport) = self.transport.as_ref() else {
            debug!("Dropping {} alert: dispatcher disabled", kind);
            return Err(DispatchOutcome::Disabled);
        };

        let remaining = self.cooldowns.remaining(kind, now_ms);
        if remaining > 0 {
            debug!("{} alert suppressed, {} ms of cooldown left", kind, remaining);
            return Err(DispatchOutcome::CoolingDown { retry_in_ms: remaining });
        }
        self.cooldowns.mark_sent(kind, now_ms);

        let photo = image.and_then(|img| match img.encode_jpeg(self.config.jpeg_quality) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Sending {} alert without snapshot: {}", kind, e);
                None
            }
        });

        Ok(PendingAlert {
            kind,
            message: message.to_string(),
            timestamp_ms: now_ms,
            outbound: OutboundMessage {
                text: format_message(message, metadata),
                photo,
            },
            transport: Arc::clone(transport),
        })
    }

    /// Record a finished send in the status badge, metrics and history
    pub fn complete(&mut self, delivered: DeliveredAlert) -> DispatchOutcome {
        let kind = delivered.kind;
        let outcome = match delivered.result {
            Ok(()) => {
                info!("{} alert sent", kind);
                self.status = AlertStatus::Connected;
                counter!("dms_alerts_sent_total", "kind" => kind.as_str()).increment(1);
                DispatchOutcome::Sent
            }
            Err(e) => {
                warn!("{} alert failed: {}", kind, e);
                self.status = AlertStatus::Disconnected;
                counter!("dms_alerts_failed_total", "kind" => kind.as_str()).increment(1);
                DispatchOutcome::Failed
            }
        };

        self.record(AlertRecord {
            kind,
            message: delivered.message,
            timestamp_ms: delivered.timestamp_ms,
            outcome,
        });
        outcome
    }

    /// Format and send one alert in place. Never fails: transport errors
    /// are logged and reported as `Failed`.
    pub async fn dispatch(
        &mut self,
        kind: AlertKind,
        message: &str,
        image: Option<&FrameImage>,
        metadata: &AlertMetadata,
        now_ms: u64,
    ) -> DispatchOutcome {
        match self.prepare(kind, message, image, metadata, now_ms) {
            Ok(pending) => {
                let delivered = pending.send().await;
                self.complete(delivered)
            }
            Err(outcome) => outcome,
        }
    }

    /// Shared handle on the transport, `None` when disabled
    pub fn transport(&self) -> Option<Arc<T>> {
        self.transport.clone()
    }

    /// Refresh the status badge; a disabled dispatcher stays disabled
    pub fn set_status(&mut self, status: AlertStatus) {
        if self.transport.is_some() {
            self.status = status;
        }
    }

    fn record(&mut self, record: AlertRecord) {
        if self.config.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

/// Connectivity of one transport as a status badge
pub async fn connection_status<T: AlertTransport>(transport: &T) -> AlertStatus {
    match transport.check().await {
        Ok(()) => AlertStatus::Connected,
        Err(e) => {
            warn!("Messaging connectivity check failed: {}", e);
            AlertStatus::Disconnected
        }
    }
}

/// Message line, blank line, then metadata in a fixed order
fn format_message(message: &str, metadata: &AlertMetadata) -> String {
    let mut lines = Vec::new();

    if let Some(ts) = metadata.timestamp_ms {
        let time = DateTime::from_timestamp_millis(ts as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| ts.to_string());
        lines.push(format!("Time: {}", time));
    }
    if let Some(confidence) = metadata.confidence {
        lines.push(format!("Confidence: {:.0}%", confidence * 100.0));
    }
    if let Some(concentration) = metadata.concentration {
        lines.push(format!("Concentration: {}%", concentration));
    }
    if let Some(total) = metadata.total_detections {
        lines.push(format!("Total detections: {}", total));
    }

    if lines.is_empty() {
        message.to_string()
    } else {
        format!("{}\n\n{}", message, lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockTransport {
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
        failing: Arc<AtomicBool>,
    }

    impl AlertTransport for MockTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Request("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn check(&self) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(TransportError::Request("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher() -> (AlertDispatcher<MockTransport>, MockTransport) {
        let transport = MockTransport::default();
        (
            AlertDispatcher::new(DispatcherConfig::default(), Some(transport.clone())),
            transport,
        )
    }

    #[tokio::test]
    async fn test_sent_then_cooling_down() {
        let (mut dispatcher, transport) = dispatcher();
        let meta = AlertMetadata::default();

        let first = dispatcher.dispatch(AlertKind::Sleepy, "wake up", None, &meta, 1_000).await;
        assert!(first.is_success());
        assert_eq!(dispatcher.status(), AlertStatus::Connected);

        let second = dispatcher.dispatch(AlertKind::Sleepy, "wake up", None, &meta, 2_000).await;
        assert_eq!(second, DispatchOutcome::CoolingDown { retry_in_ms: 29_000 });
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        let other = dispatcher.dispatch(AlertKind::Drinking, "drinking", None, &meta, 2_000).await;
        assert!(other.is_success());
    }

    #[tokio::test]
    async fn test_disabled_never_calls_transport() {
        let mut dispatcher: AlertDispatcher<MockTransport> =
            AlertDispatcher::new(DispatcherConfig::default(), None);
        let outcome = dispatcher
            .dispatch(AlertKind::Sleepy, "x", None, &AlertMetadata::default(), 0)
            .await;

        assert_eq!(outcome, DispatchOutcome::Disabled);
        assert!(!dispatcher.is_enabled());
        assert_eq!(dispatcher.status(), AlertStatus::Disabled);
        assert!(dispatcher.transport().is_none());
        dispatcher.set_status(AlertStatus::Connected);
        assert_eq!(dispatcher.status(), AlertStatus::Disabled);
        assert_eq!(dispatcher.history().count(), 0);
    }

    #[tokio::test]
    async fn test_failure_logged_and_cooldown_stamped() {
        let (mut dispatcher, transport) = dispatcher();
        transport.failing.store(true, Ordering::SeqCst);

        let outcome = dispatcher
            .dispatch(AlertKind::DangerousDriving, "careful", None, &AlertMetadata::default(), 0)
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(dispatcher.status(), AlertStatus::Disconnected);
        assert_eq!(dispatcher.cooldowns().last_sent(AlertKind::DangerousDriving), Some(0));

        let record = dispatcher.history().last().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn test_photo_attached() {
        let (mut dispatcher, transport) = dispatcher();
        let image = FrameImage::new(vec![128; 8 * 8 * 3], 8, 8).unwrap();

        dispatcher
            .dispatch(AlertKind::Sleepy, "asleep", Some(&image), &AlertMetadata::default(), 0)
            .await;

        let sent = transport.sent.lock().unwrap();
        let photo = sent[0].photo.as_ref().unwrap();
        assert_eq!(&photo[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let transport = MockTransport::default();
        let config = DispatcherConfig {
            history_limit: 2,
            cooldowns: CooldownConfig {
                low_concentration_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut dispatcher = AlertDispatcher::new(config, Some(transport));

        for t in 0..5 {
            dispatcher
                .dispatch(AlertKind::LowConcentration, "low", None, &AlertMetadata::default(), t)
                .await;
        }
        let stamps: Vec<u64> = dispatcher.history().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_prepare_stamps_cooldown_before_send() {
        let (mut dispatcher, transport) = dispatcher();
        let meta = AlertMetadata::default();

        let pending = dispatcher
            .prepare(AlertKind::Drinking, "drinking", None, &meta, 5_000)
            .unwrap();
        assert_eq!(dispatcher.cooldowns().last_sent(AlertKind::Drinking), Some(5_000));
        assert_eq!(pending.kind(), AlertKind::Drinking);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(matches!(
            dispatcher.prepare(AlertKind::Drinking, "drinking", None, &meta, 6_000),
            Err(DispatchOutcome::CoolingDown { .. })
        ));

        let delivered = pending.send().await;
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.history().count(), 0);

        assert_eq!(dispatcher.complete(delivered), DispatchOutcome::Sent);
        let record = dispatcher.history().last().unwrap();
        assert_eq!(record.timestamp_ms, 5_000);
        assert_eq!(record.message, "drinking");
    }

    #[tokio::test]
    async fn test_connection_status_updates_badge() {
        let (mut dispatcher, transport) = dispatcher();
        assert_eq!(dispatcher.status(), AlertStatus::Disconnected);

        let shared = dispatcher.transport().unwrap();
        let status = connection_status(&*shared).await;
        assert_eq!(status, AlertStatus::Connected);
        dispatcher.set_status(status);
        assert_eq!(dispatcher.status(), AlertStatus::Connected);

        transport.failing.store(true, Ordering::SeqCst);
        assert_eq!(connection_status(&*shared).await, AlertStatus::Disconnected);
    }

    #[test]
    fn test_message_format_order() {
        let meta = AlertMetadata {
            timestamp_ms: Some(0),
            confidence: Some(0.873),
            concentration: Some(40),
            total_detections: Some(12),
        };
        assert_eq!(
            format_message("Driver asleep", &meta),
            "Driver asleep\n\nTime: 1970-01-01 00:00:00 UTC\nConfidence: 87%\n\
             Concentration: 40%\nTotal detections: 12"
        );

        let partial = AlertMetadata {
            total_detections: Some(3),
            ..Default::default()
        };
        assert_eq!(format_message("Hi", &partial), "Hi\n\nTotal detections: 3");
        assert_eq!(format_message("Hi", &AlertMetadata::default()), "Hi");
    }
}
