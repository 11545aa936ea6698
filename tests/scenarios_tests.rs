// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the scenario-level properties described in §8:
//! an empty capture stream, a single new detection, a throttled repeat,
//! a multi-object sequence, and the night-mode dual-save path.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use sentrycam::detector::{Detector, ModelMetrics, RawDetection};
use sentrycam::errors::DetectorError;
use sentrycam::frame::Frame;
use sentrycam::frame_processor::{FrameProcessor, FrameProcessorConfig};
use sentrycam::tracker::Tracker;

/// Replays a fixed sequence of detections, one response per `detect` call.
struct PlaybackDetector {
    responses: Mutex<VecDeque<Vec<RawDetection>>>,
}

impl PlaybackDetector {
    fn new(responses: Vec<Vec<RawDetection>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }
}

impl Detector for PlaybackDetector {
    fn detect(&self, _frame: &Frame, _min_confidence: f64) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn metrics(&self) -> ModelMetrics {
        ModelMetrics {
            model_name: "playback".into(),
            model_type: "test".into(),
            accuracy_score: 1.0,
            avg_inference_time_ms: 0.0,
            model_size_mb: 0.0,
            description: "scenario test double".into(),
        }
    }

    fn supported_classes(&self) -> &[&str] {
        sentrycam::constants::DEFAULT_TARGET_CLASSES
    }
}

fn black_frame(width: u32, height: u32) -> Frame {
    Frame::new(width, height, vec![0u8; (width * height * 3) as usize], SystemTime::now())
}

fn person_at(x: f64, y: f64) -> RawDetection {
    RawDetection {
        class_label: "person".into(),
        class_id: 0,
        confidence: 0.8,
        x,
        y,
        w: 50.0,
        h: 100.0,
    }
}

fn car_at(x: f64, y: f64) -> RawDetection {
    RawDetection {
        class_label: "car".into(),
        class_id: 2,
        confidence: 0.9,
        x,
        y,
        w: 150.0,
        h: 80.0,
    }
}

fn build_processor(responses: Vec<Vec<RawDetection>>, output_dir: PathBuf) -> FrameProcessor {
    FrameProcessor::new(FrameProcessorConfig {
        worker_count: 1,
        max_queue_depth: 10,
        detector: Arc::new(PlaybackDetector::new(responses)),
        tracker: Arc::new(Tracker::new()),
        target_classes: sentrycam::constants::DEFAULT_TARGET_CLASSES
            .iter()
            .map(|s| s.to_string())
            .collect(),
        min_confidence: 0.5,
        enable_brightness_filter: false,
        output_dir,
        local_hour_override: Some(12), // pin daytime unless a scenario overrides it
        on_event: Box::new(|_, _, _| {}),
    })
}

/// Scenario B: one new person detection saves exactly one annotated photo.
#[test]
fn scenario_b_single_new_detection_saves_one_photo() {
    let dir = tempfile::tempdir().unwrap();
    let processor = build_processor(vec![vec![person_at(100.0, 100.0)]], dir.path().to_path_buf());

    let result = processor.process_sync(black_frame(640, 480));
    assert!(result.processed);
    assert_eq!(result.detections.len(), 1);
    assert_eq!(processor.total_images_saved(), 1);

    let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(saved.len(), 1);
    let name = saved[0].as_ref().unwrap().file_name().into_string().unwrap();
    assert!(name.ends_with("person detected.jpg"), "unexpected filename: {name}");
}

/// Scenario C: ten identical frames only save one photo (10s throttle).
#[test]
fn scenario_c_repeated_identical_frame_saves_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let responses = (0..10).map(|_| vec![person_at(100.0, 100.0)]).collect();
    let processor = build_processor(responses, dir.path().to_path_buf());

    let mut last = None;
    for _ in 0..10 {
        last = Some(processor.process_sync(black_frame(640, 480)));
    }
    assert_eq!(processor.total_images_saved(), 1);
    // After several identical frames the object should read as stationary.
    assert!(last.unwrap().detections[0].is_stationary);
}

/// Scenario D: a second person and then a car each trigger a new photo.
#[test]
fn scenario_d_new_instance_and_new_type_each_save_a_photo() {
    let dir = tempfile::tempdir().unwrap();
    let responses = vec![
        vec![person_at(100.0, 100.0)],
        vec![person_at(100.0, 100.0), person_at(400.0, 100.0)],
        vec![person_at(100.0, 100.0), person_at(400.0, 100.0), car_at(200.0, 300.0)],
    ];
    let processor = build_processor(responses, dir.path().to_path_buf());

    processor.process_sync(black_frame(640, 480));
    assert_eq!(processor.total_images_saved(), 1, "first frame: new person type");

    processor.process_sync(black_frame(640, 480));
    assert_eq!(processor.total_images_saved(), 2, "second frame: new person instance (1->2)");

    processor.process_sync(black_frame(640, 480));
    assert_eq!(processor.total_images_saved(), 3, "third frame: new car type");
}

/// Scenario F: a dark frame processes on a CLAHE-enhanced copy and saves
/// both the original-annotated and night-enhanced-annotated photos.
#[test]
fn scenario_f_dark_frame_saves_original_and_night_enhanced_photos() {
    let dir = tempfile::tempdir().unwrap();
    let processor = FrameProcessor::new(FrameProcessorConfig {
        worker_count: 1,
        max_queue_depth: 10,
        detector: Arc::new(PlaybackDetector::new(vec![vec![person_at(100.0, 100.0)]])),
        tracker: Arc::new(Tracker::new()),
        target_classes: sentrycam::constants::DEFAULT_TARGET_CLASSES
            .iter()
            .map(|s| s.to_string())
            .collect(),
        min_confidence: 0.5,
        enable_brightness_filter: false,
        output_dir: dir.path().to_path_buf(),
        local_hour_override: Some(22), // within the configured night-mode window
        on_event: Box::new(|_, _, _| {}),
    });

    // Mean luminance well below the night-mode threshold.
    let dark = Frame::new(640, 480, vec![30u8; 640 * 480 * 3], SystemTime::now());
    let result = processor.process_sync(dark);
    assert!(result.processed);
    assert_eq!(processor.total_images_saved(), 2);

    let saved: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(saved.iter().any(|n| n.ends_with("person detected.jpg")));
    assert!(saved.iter().any(|n| n.ends_with("person detected night-enhanced.jpg")));
}
