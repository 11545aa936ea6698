// SPDX-License-Identifier: GPL-3.0-only

//! YOLOv5 backend: fast, moderate-accuracy inference at two input sizes.
//!
//! Loading actual ONNX/Darknet weights and running inference is the
//! explicitly out-of-scope "detection model" collaborator. What's modeled
//! here is everything around that boundary: class list, input geometry,
//! confidence gate, and metrics reporting — with the actual forward pass
//! injected as a closure so the rest of the pipeline can be exercised
//! without a model file on disk.

use std::sync::Mutex;
use std::time::Instant;

use super::{Detector, ModelMetrics, RawDetection};
use crate::errors::DetectorError;
use crate::frame::Frame;

/// Which of the two shipped YOLOv5 variants this instance implements.
/// Larger input size trades throughput for accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoloSize {
    Small,
    Large,
}

impl YoloSize {
    fn input_side(self) -> u32 {
        match self {
            YoloSize::Small => 640,
            YoloSize::Large => 832,
        }
    }

    fn model_name(self) -> &'static str {
        match self {
            YoloSize::Small => "yolov5s",
            YoloSize::Large => "yolov5l",
        }
    }
}

type InferenceFn = dyn Fn(&Frame, u32) -> Result<Vec<RawDetection>, DetectorError> + Send + Sync;

/// A YOLOv5 backend. The `infer` closure stands in for the forward pass
/// (letterbox-resize to `input_side()`, run the network, decode boxes);
/// production wiring would supply one backed by an ONNX runtime.
pub struct YoloV5Model {
    size: YoloSize,
    classes: Vec<&'static str>,
    infer: Box<InferenceFn>,
    last_inference_ms: Mutex<f64>,
}

impl YoloV5Model {
    pub fn new(size: YoloSize, classes: Vec<&'static str>, infer: Box<InferenceFn>) -> Self {
        Self {
            size,
            classes,
            infer,
            last_inference_ms: Mutex::new(0.0),
        }
    }
}

impl Detector for YoloV5Model {
    fn detect(&self, frame: &Frame, min_confidence: f64) -> Result<Vec<RawDetection>, DetectorError> {
        let start = Instant::now();
        let raw = (self.infer)(frame, self.size.input_side())?;
        *self.last_inference_ms.lock().unwrap() = start.elapsed().as_secs_f64() * 1000.0;
        Ok(raw
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .collect())
    }

    fn metrics(&self) -> ModelMetrics {
        let avg_inference_time_ms = *self.last_inference_ms.lock().unwrap();
        let (accuracy_score, model_size_mb, description) = match self.size {
            YoloSize::Small => (
                0.56,
                14.0,
                "YOLOv5 Small: fast inference, good accuracy for real-time use".to_string(),
            ),
            YoloSize::Large => (
                0.67,
                46.0,
                "YOLOv5 Large: higher accuracy, slower inference".to_string(),
            ),
        };
        ModelMetrics {
            model_name: self.size.model_name().to_string(),
            model_type: "yolov5".to_string(),
            accuracy_score,
            avg_inference_time_ms,
            model_size_mb,
            description,
        }
    }

    fn supported_classes(&self) -> &[&str] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn make_model(size: YoloSize) -> YoloV5Model {
        YoloV5Model::new(
            size,
            crate::constants::DEFAULT_TARGET_CLASSES.to_vec(),
            Box::new(|_frame, _input_side| {
                Ok(vec![RawDetection {
                    class_label: "person".into(),
                    class_id: 0,
                    confidence: 0.9,
                    x: 0.0,
                    y: 0.0,
                    w: 10.0,
                    h: 10.0,
                }])
            }),
        )
    }

    #[test]
    fn filters_below_min_confidence() {
        let model = make_model(YoloSize::Small);
        let frame = Frame::new(2, 2, vec![0u8; 12], SystemTime::now());
        assert_eq!(model.detect(&frame, 0.5).unwrap().len(), 1);
        assert_eq!(model.detect(&frame, 0.95).unwrap().len(), 0);
    }

    #[test]
    fn small_and_large_report_distinct_model_names() {
        let small = make_model(YoloSize::Small);
        let large = make_model(YoloSize::Large);
        assert_eq!(small.metrics().model_name, "yolov5s");
        assert_eq!(large.metrics().model_name, "yolov5l");
        assert!(large.metrics().model_size_mb > small.metrics().model_size_mb);
    }
}
