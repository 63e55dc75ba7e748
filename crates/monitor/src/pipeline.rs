//! One monitoring cycle

use alerting::{
    AlertDispatcher, AlertKind, AlertTransport, DangerousStateEngine, DeliveredAlert,
    DispatchOutcome, EngineConfig, EngineInput, PendingAlert,
};
use detection::{FrameRecord, RawFrame};
use metrics::{counter, gauge};
use scoring::ConcentrationReport;
use stabilizer::{StabilizedDetection, StabilizerConfig, TemporalStabilizer};
use storage::{CounterStore, UpdateOutcome};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::MonitorError;

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp_ms: u64,
    /// Detections in the incoming frame after normalization
    pub raw_detections: usize,
    pub stable: Vec<StabilizedDetection>,
    /// Count update, `None` when the store failed to persist
    pub update: Option<UpdateOutcome>,
    pub total_detections: u64,
    pub concentration: ConcentrationReport,
    pub alerts: Vec<(AlertKind, DispatchOutcome)>,
}

type Resolved = (AlertKind, DispatchOutcome);

/// A cycle whose gated alerts still have to be sent
pub struct PendingCycle<T> {
    report: CycleReport,
    alerts: Vec<Result<PendingAlert<T>, Resolved>>,
}

impl<T: AlertTransport> PendingCycle<T> {
    /// Send the alerts in request order. Needs no access to the monitor.
    pub async fn deliver(self) -> DeliveredCycle {
        let mut alerts = Vec::with_capacity(self.alerts.len());
        for alert in self.alerts {
            alerts.push(match alert {
                Ok(pending) => Ok(pending.send().await),
                Err(resolved) => Err(resolved),
            });
        }
        DeliveredCycle {
            report: self.report,
            alerts,
        }
    }
}

/// A cycle whose sends have finished
pub struct DeliveredCycle {
    report: CycleReport,
    alerts: Vec<Result<DeliveredAlert, Resolved>>,
}

/// The detection-to-alert pipeline.
///
/// Owns every stateful stage so a cycle runs against one consistent view.
pub struct Monitor<T> {
    config: MonitorConfig,
    stabilizer: TemporalStabilizer,
    store: CounterStore,
    engine: DangerousStateEngine,
    dispatcher: AlertDispatcher<T>,
    running: bool,
    current: Vec<StabilizedDetection>,
    cycles: u64,
}

impl<T: AlertTransport> Monitor<T> {
    pub fn new(
        config: MonitorConfig,
        stabilizer: StabilizerConfig,
        engine: EngineConfig,
        store: CounterStore,
        dispatcher: AlertDispatcher<T>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        Ok(Self {
            stabilizer: TemporalStabilizer::new(stabilizer)?,
            engine: DangerousStateEngine::new(engine),
            config,
            store,
            dispatcher,
            running: false,
            current: Vec::new(),
            cycles: 0,
        })
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("Monitoring started");
        }
        self.running = true;
    }

    /// Halt cycles and drop the frame window. Counts and dangerous-state
    /// timers are kept.
    pub fn stop(&mut self) {
        if self.running {
            info!("Monitoring stopped after {} cycles", self.cycles);
        }
        self.running = false;
        self.stabilizer.clear();
        self.current.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run one full cycle for a frame received at `now_ms`, sending alerts
    /// in place
    pub async fn process_frame(
        &mut self,
        raw: RawFrame,
        now_ms: u64,
    ) -> Result<CycleReport, MonitorError> {
        let pending = self.begin_cycle(raw, now_ms)?;
        let delivered = pending.deliver().await;
        Ok(self.finish_cycle(delivered))
    }

    /// Everything in a cycle up to the alert sends: normalize, stabilize,
    /// count, score and evaluate. Cooldowns of the alerts to send are
    /// stamped before this returns.
    pub fn begin_cycle(
        &mut self,
        raw: RawFrame,
        now_ms: u64,
    ) -> Result<PendingCycle<T>, MonitorError> {
        if !self.running {
            return Err(MonitorError::NotRunning);
        }

        let frame = FrameRecord::from_raw(&raw, now_ms);
        let raw_detections = frame.detections.clone();
        let stable = self.stabilizer.push(frame);

        let update = match self.store.record_detections(&stable, now_ms) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Failed to persist detection counts: {}", e);
                None
            }
        };
        if let Err(e) = self.store.flush_due(now_ms) {
            warn!("Failed to flush queued count updates: {}", e);
        }

        let snapshot = self.store.snapshot();
        let concentration = ConcentrationReport::from_counts(&snapshot.detection_counts);

        let input = EngineInput {
            counts: &snapshot.detection_counts,
            total_detections: snapshot.total_detections,
            concentration: concentration.score,
            raw_detections: &raw_detections,
            now_ms,
        };
        let requests = self.engine.evaluate(&input, self.dispatcher.cooldowns());

        let alerts = if self.dispatcher.is_enabled() {
            requests
                .iter()
                .map(|request| {
                    self.dispatcher
                        .prepare_request(request, raw.image.as_ref(), now_ms)
                        .map_err(|outcome| (request.kind, outcome))
                })
                .collect()
        } else {
            if !requests.is_empty() {
                debug!("{} alert requests dropped: dispatcher disabled", requests.len());
            }
            Vec::new()
        };

        self.cycles += 1;
        self.current = stable.clone();
        counter!("dms_cycles_total").increment(1);
        counter!("dms_stabilized_detections_total").increment(stable.len() as u64);
        gauge!("dms_concentration_percent").set(concentration.score as f64);
        debug!(
            "Cycle {}: {} raw, {} stable, concentration {}%",
            self.cycles,
            raw_detections.len(),
            stable.len(),
            concentration.score
        );

        Ok(PendingCycle {
            report: CycleReport {
                timestamp_ms: now_ms,
                raw_detections: raw_detections.len(),
                stable,
                update,
                total_detections: snapshot.total_detections,
                concentration,
                alerts: Vec::new(),
            },
            alerts,
        })
    }

    /// Fold the send results into the alert history and the report
    pub fn finish_cycle(&mut self, delivered: DeliveredCycle) -> CycleReport {
        let DeliveredCycle { mut report, alerts } = delivered;
        report.alerts = alerts
            .into_iter()
            .map(|alert| match alert {
                Ok(delivered) => (delivered.kind(), self.dispatcher.complete(delivered)),
                Err(resolved) => resolved,
            })
            .collect();
        report
    }

    /// Apply count updates held back by the throttle
    pub fn flush_due(&mut self, now_ms: u64) -> Result<Option<usize>, MonitorError> {
        Ok(self.store.flush_due(now_ms)?)
    }

    /// Re-read the persisted counts, adopting external changes
    pub fn reconcile(&mut self) -> Result<bool, MonitorError> {
        Ok(self.store.reconcile()?)
    }

    /// Zero the counts and return every hazard category to idle
    pub fn reset(&mut self, now_ms: u64) -> Result<(), MonitorError> {
        self.store.reset(now_ms)?;
        self.engine.reset();
        Ok(())
    }

    pub fn export(&self) -> Result<String, MonitorError> {
        Ok(self.store.export_snapshot()?)
    }

    /// Replace the counts with an exported snapshot; rejected snapshots
    /// leave everything untouched
    pub fn import(&mut self, json: &str, now_ms: u64) -> Result<(), MonitorError> {
        self.store.import_snapshot(json, now_ms)?;
        self.engine.reset();
        Ok(())
    }

    pub fn current_detections(&self) -> &[StabilizedDetection] {
        &self.current
    }

    pub fn concentration(&self) -> ConcentrationReport {
        ConcentrationReport::from_counts(self.store.counts())
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CounterStore {
        &mut self.store
    }

    pub fn engine(&self) -> &DangerousStateEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &AlertDispatcher<T> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut AlertDispatcher<T> {
        &mut self.dispatcher
    }
}

/// Shared state that owns a monitor
pub trait MonitorHandle: Send + Sync + 'static {
    type Transport: AlertTransport + 'static;

    fn monitor(&mut self) -> &mut Monitor<Self::Transport>;
}

impl<T: AlertTransport + 'static> MonitorHandle for Monitor<T> {
    type Transport = T;

    fn monitor(&mut self) -> &mut Monitor<T> {
        self
    }
}

/// Run one cycle against shared state.
///
/// The lock is held to prepare the cycle and again to record the sends,
/// never across a transport call.
pub async fn process_frame_shared<M: MonitorHandle>(
    shared: &RwLock<M>,
    raw: RawFrame,
    now_ms: u64,
) -> Result<CycleReport, MonitorError> {
    let pending = {
        let mut guard = shared.write().await;
        guard.monitor().begin_cycle(raw, now_ms)?
    };
    let delivered = pending.deliver().await;
    let mut guard = shared.write().await;
    Ok(guard.monitor().finish_cycle(delivered))
}
