//! Detections and frame records

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::class::DetectionClass;
use crate::frame::FrameImage;

/// Axis-aligned rectangle in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// One observed object in one frame, after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    /// Canonical class label
    pub class: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Capture time (ms since epoch)
    pub timestamp: u64,
}

impl Detection {
    /// Build a detection with a fresh id
    pub fn new(
        class: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            class: class.into(),
            confidence: sanitize_confidence(confidence as f64),
            bbox,
            timestamp,
        }
    }

    /// Normalize untrusted detector output.
    ///
    /// Missing or non-finite numbers become 0, confidence is clamped to
    /// [0, 1] and negative extents collapse to 0.
    pub fn from_raw(raw: &RawDetection, timestamp: u64) -> Self {
        let class = raw
            .class
            .as_deref()
            .map(DetectionClass::canonical_label)
            .unwrap_or_else(|| crate::class::UNKNOWN_LABEL.to_string());

        Self {
            id: Uuid::new_v4(),
            class,
            confidence: sanitize_confidence(raw.confidence.unwrap_or(0.0)),
            bbox: BoundingBox {
                x: finite_or_zero(raw.x),
                y: finite_or_zero(raw.y),
                width: finite_or_zero(raw.width).max(0.0),
                height: finite_or_zero(raw.height).max(0.0),
            },
            timestamp,
        }
    }

    pub fn is_class(&self, class: DetectionClass) -> bool {
        self.class == class.as_str()
    }
}

/// Detector output for one detection, as received.
///
/// Every field is optional and tolerant of wrong JSON types: a value that
/// cannot be read as the expected type is treated as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default, alias = "label", deserialize_with = "lenient_label")]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<f64>,
}

impl RawDetection {
    pub fn new(class: &str, confidence: f64, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            class: Some(class.to_string()),
            confidence: Some(confidence),
            x: Some(x),
            y: Some(y),
            width: Some(width),
            height: Some(height),
        }
    }
}

/// One processed frame from the detection source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub detections: Vec<RawDetection>,
    /// Capture time (ms since epoch); the receive time is used when absent
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Frame pixels, attached to alerts raised in this cycle
    #[serde(skip)]
    pub image: Option<FrameImage>,
}

/// Normalized detections of one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub detections: Vec<Detection>,
    pub timestamp: u64,
}

impl FrameRecord {
    pub fn new(detections: Vec<Detection>, timestamp: u64) -> Self {
        Self { detections, timestamp }
    }

    /// Normalize a raw frame, stamping `received_at` when the source gave no time
    pub fn from_raw(raw: &RawFrame, received_at: u64) -> Self {
        let timestamp = raw.timestamp.unwrap_or(received_at);
        let detections: Vec<Detection> = raw
            .detections
            .iter()
            .map(|d| Detection::from_raw(d, timestamp))
            .collect();
        debug!("Normalized frame at {} with {} detections", timestamp, detections.len());
        Self { detections, timestamp }
    }

    /// Highest-confidence detection of `class` in this frame
    pub fn best_of(&self, class: &str) -> Option<&Detection> {
        self.detections
            .iter()
            .filter(|d| d.class == class)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

fn finite_or_zero(value: Option<f64>) -> f32 {
    match value {
        Some(v) if v.is_finite() => v as f32,
        _ => 0.0,
    }
}

fn sanitize_confidence(value: f64) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientValue {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LenientValue>::deserialize(deserializer)? {
        Some(LenientValue::Number(n)) => Some(n),
        Some(LenientValue::Text(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LenientValue>::deserialize(deserializer)? {
        Some(LenientValue::Text(s)) => Some(s),
        Some(LenientValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_raw_canonicalises_class() {
        let raw = RawDetection::new("sleepy_driving", 0.8, 10.0, 20.0, 30.0, 40.0);
        let det = Detection::from_raw(&raw, 1_000);

        assert_eq!(det.class, "SleepyDriving");
        assert!(det.is_class(DetectionClass::SleepyDriving));
        assert_eq!(det.bbox, BoundingBox::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(det.timestamp, 1_000);
    }

    #[test]
    fn test_missing_fields_default_safely() {
        let det = Detection::from_raw(&RawDetection::default(), 5);

        assert_eq!(det.class, "Unknown");
        assert_eq!(det.confidence, 0.0);
        assert_eq!(det.bbox, BoundingBox::default());
    }

    #[test]
    fn test_nan_and_negative_values() {
        let raw = RawDetection {
            class: Some("Yawn".into()),
            confidence: Some(f64::NAN),
            x: Some(f64::INFINITY),
            y: Some(3.0),
            width: Some(-5.0),
            height: Some(2.0),
        };
        let det = Detection::from_raw(&raw, 0);

        assert_eq!(det.confidence, 0.0);
        assert_eq!(det.bbox.x, 0.0);
        assert_eq!(det.bbox.width, 0.0);
        assert_eq!(det.bbox.height, 2.0);
    }

    #[test]
    fn test_lenient_json() {
        let json = r#"{
            "detections": [
                {"class": "Drinking", "confidence": "0.9", "x": 1, "y": null, "width": {"bad": 1}},
                {"label": 7, "confidence": [1, 2]},
                {}
            ],
            "timestamp": 42
        }"#;
        let raw: RawFrame = serde_json::from_str(json).unwrap();
        let frame = FrameRecord::from_raw(&raw, 0);

        assert_eq!(frame.timestamp, 42);
        assert_eq!(frame.detections.len(), 3);
        assert_eq!(frame.detections[0].class, "Drinking");
        assert!((frame.detections[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(frame.detections[0].bbox.width, 0.0);
        assert_eq!(frame.detections[1].class, "7");
        assert_eq!(frame.detections[1].confidence, 0.0);
        assert_eq!(frame.detections[2].class, "Unknown");
    }

    #[test]
    fn test_receive_time_fallback() {
        let raw = RawFrame {
            detections: vec![RawDetection::new("Yawn", 0.5, 0.0, 0.0, 1.0, 1.0)],
            ..Default::default()
        };
        let frame = FrameRecord::from_raw(&raw, 99);
        assert_eq!(frame.timestamp, 99);
        assert_eq!(frame.detections[0].timestamp, 99);
    }

    #[test]
    fn test_best_of() {
        let frame = FrameRecord::new(
            vec![
                Detection::new("Yawn", 0.4, BoundingBox::default(), 0),
                Detection::new("Yawn", 0.7, BoundingBox::new(1.0, 1.0, 1.0, 1.0), 0),
                Detection::new("Drinking", 0.9, BoundingBox::default(), 0),
            ],
            0,
        );
        let best = frame.best_of("Yawn").unwrap();
        assert!((best.confidence - 0.7).abs() < 1e-6);
        assert!(frame.best_of("SafeDriving").is_none());
    }

    proptest! {
        #[test]
        fn prop_confidence_always_in_unit_range(c in proptest::num::f64::ANY) {
            let raw = RawDetection { confidence: Some(c), ..Default::default() };
            let det = Detection::from_raw(&raw, 0);
            prop_assert!((0.0..=1.0).contains(&det.confidence));
        }
    }
}
