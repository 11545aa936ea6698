// SPDX-License-Identifier: GPL-3.0-only

//! The detection model capability interface.
//!
//! The neural network itself is explicitly out of scope: what lives here
//! is the trait boundary a real model backend plugs into, plus the two
//! backend shells actually shipped (YOLOv5 and EfficientDet-D3). Each
//! backend takes its inference routine as an injected closure so the
//! surrounding capture/track/photo pipeline is fully testable without a
//! real model file on disk.

mod efficientdet;
mod yolo;

pub use efficientdet::EfficientDetModel;
pub use yolo::{YoloSize, YoloV5Model};

use crate::errors::DetectorError;
use crate::frame::Frame;

/// One raw detection as returned by a model backend, before the tracker
/// enriches it with stationarity fields (§3 of the design: detections are
/// populated in two phases).
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_label: String,
    pub class_id: i64,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Informational metrics a backend reports about itself, surfaced through
/// the `--model-type` CLI flag and the stream overlay.
#[derive(Debug, Clone)]
pub struct ModelMetrics {
    pub model_name: String,
    pub model_type: String,
    pub accuracy_score: f64,
    pub avg_inference_time_ms: f64,
    pub model_size_mb: f64,
    pub description: String,
}

/// Capability interface a concrete detection backend implements.
///
/// `detect` is the only method called per-frame by the frame processor;
/// `metrics`/`supported_classes`/`warm_up` exist for introspection and
/// startup.
pub trait Detector: Send + Sync {
    /// Runs inference on one frame, returning zero or more raw detections.
    /// A single inference failure is recoverable: callers mark the
    /// enclosing `FrameResult` as unprocessed and continue (§7).
    fn detect(&self, frame: &Frame, min_confidence: f64) -> Result<Vec<RawDetection>, DetectorError>;

    /// Informational metrics about this backend.
    fn metrics(&self) -> ModelMetrics;

    /// Class labels this backend is capable of emitting.
    fn supported_classes(&self) -> &[&str];

    /// Performs any first-call setup (loading weights, warming caches).
    /// A no-op for backends that don't need it.
    fn warm_up(&self) -> Result<(), DetectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    /// A scripted detector for use in frame-processor and orchestrator
    /// tests: returns a fixed, caller-supplied sequence of detections
    /// regardless of frame content.
    pub struct ScriptedDetector {
        pub responses: std::sync::Mutex<std::collections::VecDeque<Vec<RawDetection>>>,
    }

    impl ScriptedDetector {
        pub fn new(responses: Vec<Vec<RawDetection>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(
            &self,
            _frame: &Frame,
            _min_confidence: f64,
        ) -> Result<Vec<RawDetection>, DetectorError> {
            let mut queue = self.responses.lock().unwrap();
            Ok(queue.pop_front().unwrap_or_default())
        }

        fn metrics(&self) -> ModelMetrics {
            ModelMetrics {
                model_name: "scripted".into(),
                model_type: "test".into(),
                accuracy_score: 1.0,
                avg_inference_time_ms: 0.0,
                model_size_mb: 0.0,
                description: "test double".into(),
            }
        }

        fn supported_classes(&self) -> &[&str] {
            crate::constants::DEFAULT_TARGET_CLASSES
        }
    }

    #[test]
    fn scripted_detector_returns_queued_responses_in_order() {
        let frame = Frame::new(2, 2, vec![0u8; 12], SystemTime::now());
        let first = vec![RawDetection {
            class_label: "person".into(),
            class_id: 0,
            confidence: 0.8,
            x: 100.0,
            y: 100.0,
            w: 50.0,
            h: 100.0,
        }];
        let detector = ScriptedDetector::new(vec![first.clone(), vec![]]);
        assert_eq!(detector.detect(&frame, 0.5).unwrap(), first);
        assert_eq!(detector.detect(&frame, 0.5).unwrap(), vec![]);
        assert_eq!(detector.detect(&frame, 0.5).unwrap(), vec![]);
    }
}
