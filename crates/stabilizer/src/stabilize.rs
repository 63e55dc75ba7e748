//! Window statistics and stable-class selection

use std::collections::{BTreeMap, BTreeSet};

use detection::{BoundingBox, Detection, FrameRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StabilizerConfig;
use crate::window::SlidingWindow;
use crate::StabilizerError;

/// One class deemed present for the current cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizedDetection {
    pub class: String,
    /// Mean confidence over the window frames containing the class
    pub confidence: f32,
    /// Box from the most recent frame containing the class
    pub bbox: BoundingBox,
    pub timestamp: u64,
    /// False when the window was too short and the latest frame passed through
    pub is_stable: bool,
}

impl StabilizedDetection {
    fn passthrough(detection: &Detection) -> Self {
        Self {
            class: detection.class.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            timestamp: detection.timestamp,
            is_stable: false,
        }
    }
}

#[derive(Default)]
struct ClassStats {
    frames: usize,
    confidence_sum: f64,
    last_bbox: Option<BoundingBox>,
}

/// Confidences arrive as f32; absorb their widening error at the threshold
const THRESHOLD_EPSILON: f64 = 1e-6;

fn at_least(value: f64, threshold: f64) -> bool {
    value + THRESHOLD_EPSILON >= threshold
}

/// Compute the stable detection set of a window.
///
/// With fewer than `min_history` frames the latest frame's detections are
/// returned verbatim. Otherwise a class is stable when it appears in at least
/// `min_frequency` of the frames with a mean confidence of at least
/// `min_confidence`. A frame holding several detections of one class
/// contributes once, with its most confident detection.
pub fn stabilize(
    history: &SlidingWindow<FrameRecord>,
    config: &StabilizerConfig,
) -> Vec<StabilizedDetection> {
    let Some(latest) = history.back() else {
        return Vec::new();
    };

    if history.len() < config.min_history {
        return latest.detections.iter().map(StabilizedDetection::passthrough).collect();
    }

    let mut stats: BTreeMap<&str, ClassStats> = BTreeMap::new();
    for frame in history.iter() {
        let classes: BTreeSet<&str> = frame.detections.iter().map(|d| d.class.as_str()).collect();
        for class in classes {
            let Some(best) = frame.best_of(class) else {
                continue;
            };
            let entry = stats.entry(class).or_default();
            entry.frames += 1;
            entry.confidence_sum += best.confidence as f64;
            entry.last_bbox = Some(best.bbox);
        }
    }

    let window_len = history.len() as f64;
    let stable: Vec<StabilizedDetection> = stats
        .iter()
        .filter_map(|(class, s)| {
            let frequency = s.frames as f64 / window_len;
            let mean_confidence = s.confidence_sum / s.frames as f64;
            let keep = at_least(frequency, config.min_frequency)
                && at_least(mean_confidence, config.min_confidence);
            keep.then(|| StabilizedDetection {
                class: class.to_string(),
                confidence: mean_confidence as f32,
                bbox: s.last_bbox.unwrap_or_default(),
                timestamp: latest.timestamp,
                is_stable: true,
            })
        })
        .collect();

    debug!(
        "Stabilized {} of {} classes over {} frames",
        stable.len(),
        stats.len(),
        history.len()
    );
    stable
}

/// Owns the frame history and produces one stable set per cycle
pub struct TemporalStabilizer {
    window: SlidingWindow<FrameRecord>,
    config: StabilizerConfig,
}

impl TemporalStabilizer {
    pub fn new(config: StabilizerConfig) -> Result<Self, StabilizerError> {
        config.validate()?;
        Ok(Self {
            window: SlidingWindow::new(config.window_size),
            config,
        })
    }

    /// Push the just-processed frame and return this cycle's stable set
    pub fn push(&mut self, frame: FrameRecord) -> Vec<StabilizedDetection> {
        self.window.push(frame);
        self.current()
    }

    /// Stable set of the current window without pushing
    pub fn current(&self) -> Vec<StabilizedDetection> {
        stabilize(&self.window, &self.config)
    }

    /// Frames currently held
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Drop the history (monitoring stopped)
    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }
}

impl Default for TemporalStabilizer {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(StabilizerConfig::default().window_size),
            config: StabilizerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(class: &str, confidence: f32, ts: u64) -> Detection {
        Detection::new(class, confidence, BoundingBox::new(ts as f32, 0.0, 10.0, 10.0), ts)
    }

    fn frame(ts: u64, detections: Vec<Detection>) -> FrameRecord {
        FrameRecord::new(detections, ts)
    }

    /// Nine frames; `class` appears in the first `hits` frames
    fn window_with_hits(class: &str, hits: u64, confidence: f32) -> TemporalStabilizer {
        let mut stabilizer = TemporalStabilizer::default();
        for ts in 0..9 {
            let detections = if ts < hits { vec![det(class, confidence, ts)] } else { vec![] };
            stabilizer.push(frame(ts, detections));
        }
        stabilizer
    }

    #[test]
    fn test_three_of_nine_is_stable() {
        let stabilizer = window_with_hits("Yawn", 3, 0.5);
        let stable = stabilizer.current();

        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].class, "Yawn");
        assert!((stable[0].confidence - 0.5).abs() < 1e-6);
        assert!(stable[0].is_stable);
        assert_eq!(stable[0].timestamp, 8);
    }

    #[test]
    fn test_frequency_boundary_is_inclusive() {
        let config = StabilizerConfig { window_size: 10, ..Default::default() };
        let mut stabilizer = TemporalStabilizer::new(config).unwrap();
        for ts in 0..10 {
            let detections = if ts < 3 { vec![det("Yawn", 0.9, ts)] } else { vec![] };
            stabilizer.push(frame(ts, detections));
        }
        let stable = stabilizer.current();
        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].class, "Yawn");
    }

    #[test]
    fn test_confidence_boundary_is_inclusive() {
        let mut stabilizer = TemporalStabilizer::default();
        let confidences = [0.2, 0.4, 0.2, 0.4];
        for ts in 0..9u64 {
            let detections = match confidences.get(ts as usize) {
                Some(c) => vec![det("Yawn", *c, ts)],
                None => vec![],
            };
            stabilizer.push(frame(ts, detections));
        }
        let stable = stabilizer.current();
        assert_eq!(stable.len(), 1);
        assert!((stable[0].confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_two_of_nine_is_not_stable() {
        let stabilizer = window_with_hits("Yawn", 2, 0.5);
        assert!(stabilizer.current().is_empty());
    }

    #[test]
    fn test_low_confidence_is_not_stable() {
        let stabilizer = window_with_hits("Drinking", 9, 0.2);
        assert!(stabilizer.current().is_empty());
    }

    #[test]
    fn test_bbox_from_most_recent_frame() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.push(frame(0, vec![det("Yawn", 0.9, 0)]));
        stabilizer.push(frame(1, vec![det("Yawn", 0.9, 1)]));
        stabilizer.push(frame(2, vec![det("Yawn", 0.9, 2)]));
        let stable = stabilizer.push(frame(3, vec![]));

        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].bbox.x, 2.0);
    }

    #[test]
    fn test_short_history_passes_through() {
        let mut stabilizer = TemporalStabilizer::default();
        stabilizer.push(frame(0, vec![det("SafeDriving", 0.9, 0)]));
        let latest = vec![det("Phone", 0.05, 1), det("Phone", 0.01, 1)];
        let out = stabilizer.push(frame(1, latest));

        assert_eq!(stabilizer.len(), 2);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|d| d.class == "Phone" && !d.is_stable));
        assert!((out[1].confidence - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_empty_history() {
        let stabilizer = TemporalStabilizer::default();
        assert!(stabilizer.current().is_empty());
    }

    #[test]
    fn test_window_evicts_old_frames() {
        let mut stabilizer = TemporalStabilizer::default();
        for ts in 0..5 {
            stabilizer.push(frame(ts, vec![det("Drinking", 0.8, ts)]));
        }
        for ts in 5..14 {
            stabilizer.push(frame(ts, vec![det("SafeDriving", 0.8, ts)]));
        }

        assert_eq!(stabilizer.len(), 9);
        let classes: Vec<_> = stabilizer.current().into_iter().map(|d| d.class).collect();
        assert_eq!(classes, vec!["SafeDriving".to_string()]);
    }

    #[test]
    fn test_duplicate_class_in_frame_counts_once() {
        let mut stabilizer = TemporalStabilizer::default();
        // Two frames each holding two Yawn boxes: still 2/9 frames
        for ts in 0..9 {
            let detections = if ts < 2 {
                vec![det("Yawn", 0.9, ts), det("Yawn", 0.8, ts)]
            } else {
                vec![]
            };
            stabilizer.push(frame(ts, detections));
        }
        assert!(stabilizer.current().is_empty());
    }

    #[test]
    fn test_output_sorted_by_class() {
        let mut stabilizer = TemporalStabilizer::default();
        for ts in 0..4 {
            stabilizer.push(frame(ts, vec![det("Yawn", 0.6, ts), det("Drinking", 0.6, ts)]));
        }
        let classes: Vec<_> = stabilizer.current().into_iter().map(|d| d.class).collect();
        assert_eq!(classes, vec!["Drinking".to_string(), "Yawn".to_string()]);
    }

    #[test]
    fn test_clear() {
        let mut stabilizer = window_with_hits("Yawn", 9, 0.9);
        stabilizer.clear();
        assert!(stabilizer.is_empty());
        assert!(stabilizer.current().is_empty());
    }

    proptest! {
        #[test]
        fn prop_stable_entries_meet_thresholds(
            frames in proptest::collection::vec(
                proptest::collection::vec((0usize..3, 0.0f32..=1.0), 0..4),
                3..12,
            )
        ) {
            let labels = ["Yawn", "Drinking", "SafeDriving"];
            let mut stabilizer = TemporalStabilizer::default();
            let mut out = Vec::new();
            for (ts, dets) in frames.iter().enumerate() {
                let detections = dets
                    .iter()
                    .map(|(i, c)| det(labels[*i], *c, ts as u64))
                    .collect();
                out = stabilizer.push(frame(ts as u64, detections));
            }
            for entry in out {
                prop_assert!(entry.is_stable);
                prop_assert!(entry.confidence >= 0.3 - 1e-6);
            }
        }
    }
}
