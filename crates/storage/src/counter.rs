//! Aggregate counter with throttled persistence

use crate::backend::{JsonFileStore, KeyValueStore, MemoryStore};
use crate::snapshot::{CountsSnapshot, SessionEntry};
use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stabilizer::StabilizedDetection;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key the counts blob is stored under
    pub key: String,
    /// Directory for the JSON file backend; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// Minimum interval between persisted writes (ms)
    pub throttle_ms: u64,
    /// Session entries kept for export
    pub session_log_limit: usize,
    /// Interval of the reconciliation pass against the backend (ms)
    pub reconcile_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key: "driver_monitor.detection_counts".to_string(),
            data_dir: None,
            throttle_ms: 100,
            session_log_limit: 100,
            reconcile_interval_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Build the backend this configuration names
    pub fn backend(&self) -> Result<Box<dyn KeyValueStore>, StorageError> {
        match &self.data_dir {
            Some(dir) => Ok(Box::new(JsonFileStore::open(dir)?)),
            None => Ok(Box::new(MemoryStore::new())),
        }
    }
}

/// Result of a count update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing to count
    Empty,
    /// Queued updates (this one included) were applied and written
    Applied { updates: usize },
    /// Inside the throttle window; applied by a later flush
    Deferred { retry_in_ms: u64, queued: usize },
}

/// Handle returned by [`CounterStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&CountsSnapshot) + Send + Sync>;

struct PendingUpdate {
    classes: Vec<String>,
    issued_at: u64,
}

/// Sole mutator of the aggregate counts.
///
/// Updates are queued in issue order and applied exactly once. Writes to the
/// backend happen at most once per throttle interval; an update arriving
/// inside the interval waits for [`CounterStore::flush_due`].
pub struct CounterStore {
    backend: Box<dyn KeyValueStore>,
    config: StoreConfig,
    state: CountsSnapshot,
    pending: VecDeque<PendingUpdate>,
    last_write_ms: Option<u64>,
    /// In-memory state has changes the backend has not accepted yet
    dirty: bool,
    subscribers: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl CounterStore {
    /// Open the store, loading any persisted counts.
    ///
    /// A missing or unreadable blob starts from empty counts.
    pub fn open(backend: Box<dyn KeyValueStore>, config: StoreConfig) -> Self {
        let state = match backend.get(&config.key) {
            Ok(Some(json)) => match CountsSnapshot::from_json(&json) {
                Ok(snapshot) => {
                    info!("Loaded {} persisted detections", snapshot.total_detections);
                    snapshot
                }
                Err(e) => {
                    warn!("Persisted counts are invalid, starting empty: {}", e);
                    CountsSnapshot::default()
                }
            },
            Ok(None) => CountsSnapshot::default(),
            Err(e) => {
                warn!("Failed to read persisted counts, starting empty: {}", e);
                CountsSnapshot::default()
            }
        };

        Self {
            backend,
            config,
            state,
            pending: VecDeque::new(),
            last_write_ms: None,
            dirty: false,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    /// In-memory store with default configuration
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryStore::new()), StoreConfig::default())
    }

    /// Count one unit per stabilized detection.
    pub fn record_detections(
        &mut self,
        stable: &[StabilizedDetection],
        now_ms: u64,
    ) -> Result<UpdateOutcome, StorageError> {
        if stable.is_empty() {
            return Ok(UpdateOutcome::Empty);
        }

        self.pending.push_back(PendingUpdate {
            classes: stable.iter().map(|d| d.class.clone()).collect(),
            issued_at: now_ms,
        });

        let remaining = self.throttle_remaining(now_ms);
        if remaining > 0 {
            debug!("Count update deferred {} ms ({} queued)", remaining, self.pending.len());
            return Ok(UpdateOutcome::Deferred {
                retry_in_ms: remaining,
                queued: self.pending.len(),
            });
        }

        self.flush(now_ms)
    }

    /// Apply queued updates once the throttle interval has passed.
    ///
    /// Returns the number of updates applied, if any were due.
    pub fn flush_due(&mut self, now_ms: u64) -> Result<Option<usize>, StorageError> {
        if self.pending.is_empty() || self.throttle_remaining(now_ms) > 0 {
            return Ok(None);
        }
        match self.flush(now_ms)? {
            UpdateOutcome::Applied { updates } => Ok(Some(updates)),
            _ => Ok(None),
        }
    }

    /// Milliseconds until queued updates may be written
    pub fn throttle_remaining(&self, now_ms: u64) -> u64 {
        match self.last_write_ms {
            Some(last) if now_ms >= last => (last + self.config.throttle_ms).saturating_sub(now_ms),
            _ => 0,
        }
    }

    fn flush(&mut self, now_ms: u64) -> Result<UpdateOutcome, StorageError> {
        let updates = self.pending.len();
        while let Some(update) = self.pending.pop_front() {
            self.apply(update);
        }
        self.last_write_ms = Some(now_ms);

        let written = self.persist();
        self.notify();
        written.map(|_| UpdateOutcome::Applied { updates })
    }

    fn apply(&mut self, update: PendingUpdate) {
        for class in update.classes {
            let count = self.state.detection_counts.entry(class).or_insert(0);
            *count = count.saturating_add(1);
        }
        self.state.total_detections = self.state.counts_sum();

        let timestamp = to_datetime(update.issued_at);
        self.state.last_updated = Some(timestamp);
        self.state.session_data.push(SessionEntry {
            timestamp,
            detections: self.state.detection_counts.clone(),
            total_detections: self.state.total_detections,
        });
        self.trim_session_log();
        self.dirty = true;
    }

    fn trim_session_log(&mut self) {
        let limit = self.config.session_log_limit;
        let len = self.state.session_data.len();
        if len > limit {
            self.state.session_data.drain(..len - limit);
        }
    }

    /// Write the whole structure; failures leave the store dirty for a retry
    fn persist(&mut self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.state)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        match self.backend.set(&self.config.key, &json) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                warn!("Failed to persist detection counts: {}", e);
                Err(e)
            }
        }
    }

    fn notify(&self) {
        for (_, listener) in &self.subscribers {
            listener(&self.state);
        }
    }

    /// Clear counts, total, session log and queued updates
    pub fn reset(&mut self, now_ms: u64) -> Result<(), StorageError> {
        info!("Resetting detection counts ({} total)", self.state.total_detections);
        self.pending.clear();
        self.state = CountsSnapshot::default();
        self.last_write_ms = Some(now_ms);
        let written = self.persist();
        self.notify();
        written
    }

    /// Serialize the full structure in the export format
    pub fn export_snapshot(&self) -> Result<String, StorageError> {
        self.state.to_json().map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Replace state wholesale with a validated snapshot.
    ///
    /// Malformed input is rejected before anything changes.
    pub fn import_snapshot(&mut self, json: &str, now_ms: u64) -> Result<(), StorageError> {
        let mut snapshot = CountsSnapshot::from_json(json)?;
        self.pending.clear();
        std::mem::swap(&mut self.state, &mut snapshot);
        self.trim_session_log();
        self.last_write_ms = Some(now_ms);
        info!("Imported snapshot with {} detections", self.state.total_detections);
        let written = self.persist();
        self.notify();
        written
    }

    /// Reconcile the mirror with the backend.
    ///
    /// Retries an outstanding write first; otherwise adopts the persisted
    /// state when another writer changed it. Returns whether state changed.
    pub fn reconcile(&mut self) -> Result<bool, StorageError> {
        if self.dirty {
            debug!("Retrying outstanding count write");
            self.persist()?;
            return Ok(false);
        }
        if !self.pending.is_empty() {
            return Ok(false);
        }

        let persisted = match self.backend.get(&self.config.key)? {
            Some(json) => match CountsSnapshot::from_json(&json) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Ignoring invalid persisted counts: {}", e);
                    return Ok(false);
                }
            },
            None => CountsSnapshot::default(),
        };

        if persisted == self.state {
            return Ok(false);
        }

        info!(
            "Adopting externally changed counts ({} -> {} total)",
            self.state.total_detections, persisted.total_detections
        );
        self.state = persisted;
        self.notify();
        Ok(true)
    }

    /// Register a listener receiving the full state after every change
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&CountsSnapshot) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn snapshot(&self) -> CountsSnapshot {
        self.state.clone()
    }

    pub fn state(&self) -> &CountsSnapshot {
        &self.state
    }

    pub fn counts(&self) -> &detection::ClassCounts {
        &self.state.detection_counts
    }

    pub fn total(&self) -> u64 {
        self.state.total_detections
    }

    /// Updates waiting for the throttle interval
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use detection::BoundingBox;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stable(classes: &[&str]) -> Vec<StabilizedDetection> {
        classes
            .iter()
            .map(|c| StabilizedDetection {
                class: c.to_string(),
                confidence: 0.8,
                bbox: BoundingBox::default(),
                timestamp: 0,
                is_stable: true,
            })
            .collect()
    }

    /// Backend whose writes can be switched off
    struct FlakyStore {
        inner: MemoryStore,
        fail: Arc<std::sync::atomic::AtomicBool>,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("disk full".into()));
            }
            self.inner.set(key, value)
        }
    }

    #[test]
    fn test_record_counts_one_per_class() {
        let mut store = CounterStore::in_memory();
        let outcome = store.record_detections(&stable(&["Yawn", "SafeDriving"]), 0).unwrap();

        assert_eq!(outcome, UpdateOutcome::Applied { updates: 1 });
        assert_eq!(store.counts().get("Yawn"), Some(&1));
        assert_eq!(store.total(), 2);
        assert_eq!(store.state().session_data.len(), 1);
        assert_eq!(store.state().session_data[0].total_detections, 2);
    }

    #[test]
    fn test_empty_set_is_noop() {
        let mut store = CounterStore::in_memory();
        assert_eq!(store.record_detections(&[], 0).unwrap(), UpdateOutcome::Empty);
        assert!(store.state().session_data.is_empty());
    }

    #[test]
    fn test_rapid_updates_deferred_then_applied_in_order() {
        let mut store = CounterStore::in_memory();
        let classes = ["Yawn", "Drinking", "SafeDriving", "Distracted", "Yawn"];

        for (i, class) in classes.iter().enumerate() {
            store.record_detections(&stable(&[class]), i as u64 * 20).unwrap();
        }
        // First update written immediately, the other four wait
        assert_eq!(store.total(), 1);
        assert_eq!(store.pending_len(), 4);

        assert_eq!(store.flush_due(99).unwrap(), None);
        assert_eq!(store.flush_due(100).unwrap(), Some(4));

        assert_eq!(store.total(), 5);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.counts().get("Yawn"), Some(&2));

        let totals: Vec<u64> =
            store.state().session_data.iter().map(|e| e.total_detections).collect();
        assert_eq!(totals, vec![1, 2, 3, 4, 5]);
        let third = &store.state().session_data[2];
        assert_eq!(third.detections.get("SafeDriving"), Some(&1));
        assert_eq!(third.detections.get("Distracted"), None);
    }

    #[test]
    fn test_deferred_reports_remaining_wait() {
        let mut store = CounterStore::in_memory();
        store.record_detections(&stable(&["Yawn"]), 1_000).unwrap();
        let outcome = store.record_detections(&stable(&["Yawn"]), 1_030).unwrap();
        assert_eq!(outcome, UpdateOutcome::Deferred { retry_in_ms: 70, queued: 1 });

        // A later record past the window flushes everything queued
        let outcome = store.record_detections(&stable(&["Yawn"]), 1_200).unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied { updates: 2 });
        assert_eq!(store.total(), 3);
    }

    #[test]
    fn test_at_most_one_write_per_interval() {
        let backend = MemoryStore::new();
        let mut store = CounterStore::open(Box::new(backend.clone()), StoreConfig::default());

        store.record_detections(&stable(&["Yawn"]), 0).unwrap();
        let written_once = backend.get(&store.config().key).unwrap().unwrap();
        store.record_detections(&stable(&["Yawn"]), 50).unwrap();
        assert_eq!(backend.get(&store.config().key).unwrap().unwrap(), written_once);

        store.flush_due(100).unwrap();
        let written = backend.get(&store.config().key).unwrap().unwrap();
        let persisted = CountsSnapshot::from_json(&written).unwrap();
        assert_eq!(persisted.total_detections, 2);
    }

    #[test]
    fn test_session_log_bounded() {
        let config = StoreConfig { session_log_limit: 3, throttle_ms: 0, ..Default::default() };
        let mut store = CounterStore::open(Box::new(MemoryStore::new()), config);
        for i in 0..10 {
            store.record_detections(&stable(&["Yawn"]), i).unwrap();
        }
        let totals: Vec<u64> =
            store.state().session_data.iter().map(|e| e.total_detections).collect();
        assert_eq!(totals, vec![8, 9, 10]);
    }

    #[test]
    fn test_reset_clears_and_persists() {
        let backend = MemoryStore::new();
        let mut store = CounterStore::open(Box::new(backend.clone()), StoreConfig::default());
        store.record_detections(&stable(&["Yawn"]), 0).unwrap();
        store.record_detections(&stable(&["Yawn"]), 10).unwrap();

        store.reset(20).unwrap();
        assert_eq!(store.total(), 0);
        assert!(store.counts().is_empty());
        assert_eq!(store.pending_len(), 0);

        let written = backend.get(&store.config().key).unwrap().unwrap();
        let persisted = CountsSnapshot::from_json(&written).unwrap();
        assert!(persisted.is_empty());
    }

    #[test]
    fn test_counts_survive_reopen() {
        let backend = MemoryStore::new();
        {
            let mut store = CounterStore::open(Box::new(backend.clone()), StoreConfig::default());
            store.record_detections(&stable(&["Drinking"]), 0).unwrap();
        }
        let reopened = CounterStore::open(Box::new(backend), StoreConfig::default());
        assert_eq!(reopened.counts().get("Drinking"), Some(&1));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut store = CounterStore::in_memory();
        store.record_detections(&stable(&["Yawn", "SafeDriving"]), 1_700_000_000_000).unwrap();
        let exported = store.export_snapshot().unwrap();
        let before = store.snapshot();

        let mut other = CounterStore::in_memory();
        other.import_snapshot(&exported, 0).unwrap();
        assert_eq!(other.snapshot(), before);
        assert_eq!(other.export_snapshot().unwrap(), exported);
    }

    #[test]
    fn test_import_rejects_without_mutation() {
        let mut store = CounterStore::in_memory();
        store.record_detections(&stable(&["Yawn"]), 0).unwrap();
        let before = store.snapshot();

        assert!(matches!(
            store.import_snapshot(r#"{"detectionCounts": {"Yawn": 1}}"#, 10),
            Err(StorageError::Import(_))
        ));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_counts_saturate_at_max() {
        let mut store = CounterStore::in_memory();
        let json = format!(
            r#"{{"totalDetections": {max}, "detectionCounts": {{"Yawn": {max}}}}}"#,
            max = u64::MAX
        );
        store.import_snapshot(&json, 0).unwrap();

        store.record_detections(&stable(&["Yawn"]), 10_000).unwrap();
        assert_eq!(store.counts().get("Yawn"), Some(&u64::MAX));
        assert_eq!(store.total(), u64::MAX);

        store.record_detections(&stable(&["SafeDriving"]), 20_000).unwrap();
        assert_eq!(store.counts().get("SafeDriving"), Some(&1));
        assert_eq!(store.total(), u64::MAX);
    }

    #[test]
    fn test_subscribers_notified() {
        let mut store = CounterStore::in_memory();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let id = store.subscribe(move |snapshot| {
            seen_clone.store(snapshot.total_detections as usize, Ordering::SeqCst);
        });

        store.record_detections(&stable(&["Yawn", "Drinking"]), 0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.record_detections(&stable(&["Yawn"]), 500).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_persist_failure_keeps_memory_and_retries() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let inner = MemoryStore::new();
        let backend = FlakyStore { inner: inner.clone(), fail: fail.clone() };
        let mut store = CounterStore::open(Box::new(backend), StoreConfig::default());

        assert!(store.record_detections(&stable(&["Yawn"]), 0).is_err());
        assert_eq!(store.total(), 1);
        assert!(inner.get(&store.config().key).unwrap().is_none());

        fail.store(false, Ordering::SeqCst);
        assert!(!store.reconcile().unwrap());
        let written = inner.get(&store.config().key).unwrap().unwrap();
        let persisted = CountsSnapshot::from_json(&written).unwrap();
        assert_eq!(persisted.total_detections, 1);
    }

    #[test]
    fn test_reconcile_adopts_external_change() {
        let backend = MemoryStore::new();
        let mut store = CounterStore::open(Box::new(backend.clone()), StoreConfig::default());
        let mut other_tab = CounterStore::open(Box::new(backend), StoreConfig::default());

        other_tab.record_detections(&stable(&["Distracted"]), 0).unwrap();
        assert_eq!(store.total(), 0);

        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        store.subscribe(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.reconcile().unwrap());
        assert_eq!(store.counts().get("Distracted"), Some(&1));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(!store.reconcile().unwrap());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Record(Vec<usize>),
        Flush,
        Reset,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => proptest::collection::vec(0usize..4, 0..4).prop_map(Op::Record),
            3 => Just(Op::Flush),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn prop_total_equals_sum(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let labels = ["Yawn", "Drinking", "SafeDriving", "Phone"];
            let mut store = CounterStore::in_memory();
            let mut now = 0u64;
            for op in ops {
                now += 37;
                match op {
                    Op::Record(idx) => {
                        let classes: Vec<&str> = idx.iter().map(|i| labels[*i]).collect();
                        store.record_detections(&stable(&classes), now).unwrap();
                    }
                    Op::Flush => { store.flush_due(now).unwrap(); }
                    Op::Reset => store.reset(now).unwrap(),
                }
                prop_assert_eq!(store.total(), store.counts().values().sum::<u64>());
            }
        }

        #[test]
        fn prop_no_update_lost(batches in proptest::collection::vec(1usize..4, 1..20)) {
            let mut store = CounterStore::in_memory();
            let mut expected = 0u64;
            for (i, n) in batches.iter().enumerate() {
                let classes = vec!["Yawn"; *n];
                store.record_detections(&stable(&classes), i as u64 * 10).unwrap();
                expected += *n as u64;
            }
            store.flush_due(u64::MAX / 2).unwrap();
            prop_assert_eq!(store.total(), expected);
        }
    }
}
