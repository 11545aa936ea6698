// SPDX-License-Identifier: GPL-3.0-only

//! Bounded work queue + worker pool that turns a captured [`Frame`] into
//! detections, tracked identities, and (sometimes) a saved photo (§4.2).
//!
//! A condition-variable-guarded queue feeds a fixed worker pool, with
//! `submit` collapsing to an inline call when there is exactly one worker
//! so tests don't need two code paths.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::detector::Detector;
use crate::frame::Frame;
use crate::night_mode;
use crate::photo_policy::{self, SavedPhotoState};
use crate::tracker::{Detection, Tracker};

/// Outcome of processing one frame (§4.2).
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub capture_time: SystemTime,
    pub processed: bool,
    pub detections: Vec<Detection>,
}

impl FrameResult {
    fn dropped(capture_time: SystemTime) -> Self {
        Self {
            capture_time,
            processed: false,
            detections: Vec::new(),
        }
    }
}

struct QueueEntry {
    frame: Frame,
    responder: oneshot::Sender<FrameResult>,
}

struct Shared {
    queue: Mutex<VecDeque<QueueEntry>>,
    not_empty: Condvar,
    max_queue_depth: usize,
    shutting_down: AtomicBool,
    detector: Arc<dyn Detector>,
    tracker: Arc<Tracker>,
    target_classes: Vec<String>,
    min_confidence: f64,
    enable_brightness_filter: bool,
    output_dir: PathBuf,
    local_hour_override: Option<u32>,
    photo_state: Mutex<SavedPhotoState>,
    font: rusttype::Font<'static>,
    images_saved: AtomicU64,
    brightness_filter_active: AtomicBool,
    on_event: Box<dyn Fn(&str, bool, bool) + Send + Sync>,
}

/// Owns the queue, worker threads, and the per-frame pipeline (§4.2, §5).
pub struct FrameProcessor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

/// Construction parameters, grouped so [`FrameProcessor::new`] doesn't take
/// an unreadable parameter list.
pub struct FrameProcessorConfig {
    pub worker_count: usize,
    pub max_queue_depth: usize,
    pub detector: Arc<dyn Detector>,
    pub tracker: Arc<Tracker>,
    pub target_classes: Vec<String>,
    pub min_confidence: f64,
    pub enable_brightness_filter: bool,
    pub output_dir: PathBuf,
    /// Test hook: pins the local hour used for the night-mode decision
    /// instead of reading the real wall clock.
    pub local_hour_override: Option<u32>,
    pub on_event: Box<dyn Fn(&str, bool, bool) + Send + Sync>,
}

impl FrameProcessor {
    pub fn new(cfg: FrameProcessorConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            max_queue_depth: cfg.max_queue_depth.max(1),
            shutting_down: AtomicBool::new(false),
            detector: cfg.detector,
            tracker: cfg.tracker,
            target_classes: cfg.target_classes,
            min_confidence: cfg.min_confidence,
            enable_brightness_filter: cfg.enable_brightness_filter,
            output_dir: cfg.output_dir,
            local_hour_override: cfg.local_hour_override,
            photo_state: Mutex::new(SavedPhotoState::default()),
            font: photo_policy::load_label_font(),
            images_saved: AtomicU64::new(0),
            brightness_filter_active: AtomicBool::new(false),
            on_event: cfg.on_event,
        });

        let worker_count = cfg.worker_count.clamp(1, 16);
        let mut workers = Vec::with_capacity(worker_count.saturating_sub(1));
        // With exactly one worker, `submit` runs the body inline (§4.2) and
        // no background thread is spawned at all.
        if worker_count > 1 {
            for _ in 0..worker_count {
                let shared = Arc::clone(&shared);
                workers.push(std::thread::spawn(move || worker_loop(shared)));
            }
        }

        Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Enqueues a frame for processing. With a single worker, the pipeline
    /// runs synchronously and the returned future is already resolved. With
    /// more than one worker, enqueues and returns immediately; if the queue
    /// is full, the new frame is dropped (`processed=false`) while the
    /// oldest queued frame is preserved (§4.2).
    pub fn submit(&self, frame: Frame) -> oneshot::Receiver<FrameResult> {
        let (tx, rx) = oneshot::channel();
        if self.worker_count == 1 {
            let result = process_internal(&self.shared, frame);
            let _ = tx.send(result);
            return rx;
        }

        let capture_time = frame.captured_at;
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.max_queue_depth {
            warn!("Frame queue full at depth {}, dropping incoming frame", queue.len());
            let _ = tx.send(FrameResult::dropped(capture_time));
            return rx;
        }
        queue.push_back(QueueEntry { frame, responder: tx });
        self.shared.not_empty.notify_one();
        rx
    }

    /// Runs the pipeline body inline regardless of worker count, used by
    /// tests that want synchronous, deterministic results and by the W=1
    /// equivalence check (§8, invariant 6).
    pub fn process_sync(&self, frame: Frame) -> FrameResult {
        process_internal(&self.shared, frame)
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn total_images_saved(&self) -> u64 {
        self.shared.images_saved.load(Ordering::SeqCst)
    }

    pub fn brightness_filter_active(&self) -> bool {
        self.shared.brightness_filter_active.load(Ordering::SeqCst)
    }

    /// Signals shutdown, wakes every worker, joins them, then resolves every
    /// still-queued future with `processed=false` (§4.2).
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        let mut queue = self.shared.queue.lock().unwrap();
        while let Some(entry) = queue.pop_front() {
            let _ = entry.responder.send(FrameResult::dropped(entry.frame.captured_at));
        }
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        if !self.shared.shutting_down.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(entry) = queue.pop_front() {
                    break Some(entry);
                }
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break None;
                }
                queue = shared.not_empty.wait(queue).unwrap();
            }
        };
        let Some(entry) = entry else { break };
        let result = process_internal(&shared, entry.frame);
        let _ = entry.responder.send(result);
    }
}

/// The per-frame pipeline body, identical whether invoked inline (W=1) or
/// from a worker thread (§4.2, points 1-9).
fn process_internal(shared: &Shared, frame: Frame) -> FrameResult {
    let capture_time = frame.captured_at;

    let local_hour = shared.local_hour_override.unwrap_or_else(night_mode::current_local_hour);
    let is_night = night_mode::is_night_mode(&frame, local_hour);

    let enhanced_frame = if is_night {
        Some(night_mode::enhance_clahe(&frame))
    } else {
        None
    };

    let mean_luminance = frame.mean_luminance();
    let (detection_frame, brightness_active) = if shared.enable_brightness_filter
        && mean_luminance > crate::constants::BRIGHTNESS_FILTER_LUMINANCE_THRESHOLD
    {
        let base = enhanced_frame.as_ref().unwrap_or(&frame);
        (attenuate_brightness(base), true)
    } else {
        (enhanced_frame.clone().unwrap_or_else(|| frame.clone()), false)
    };
    shared.brightness_filter_active.store(brightness_active, Ordering::SeqCst);

    let raw_detections = match shared.detector.detect(&detection_frame, shared.min_confidence) {
        Ok(detections) => detections,
        Err(e) => {
            warn!(error = %e, "Detector inference failed; dropping this frame");
            return FrameResult::dropped(capture_time);
        }
    };

    let filtered: Vec<Detection> = raw_detections
        .into_iter()
        .filter(|d| shared.target_classes.iter().any(|c| c == &d.class_label))
        .map(Detection::from)
        .collect();

    let now = std::time::Instant::now();
    let (enriched, exits) = shared.tracker.update_and_enrich(filtered, now);

    for exit in &exits {
        (shared.on_event)(&exit.class_label, false, true);
    }
    for det in &enriched {
        (shared.on_event)(&det.class_label, det.is_stationary, false);
        info!(
            class = %det.class_label,
            center_x = det.x + det.w / 2.0,
            center_y = det.y + det.h / 2.0,
            "Detection center"
        );
    }

    if !enriched.is_empty() {
        let any_new_tracker = shared.tracker.has_new_tracker_this_frame();
        let mut photo_state = shared.photo_state.lock().unwrap();
        if let Some(reason) = photo_policy::decide(&enriched, any_new_tracker, &photo_state, now) {
            save_photos(shared, &frame, enhanced_frame.as_ref(), &enriched, is_night, capture_time, reason);
            photo_state.record_save(&enriched, now);
        }
    }

    FrameResult {
        capture_time,
        processed: true,
        detections: enriched,
    }
}

#[allow(clippy::too_many_arguments)]
fn save_photos(
    shared: &Shared,
    original: &Frame,
    enhanced: Option<&Frame>,
    detections: &[Detection],
    is_night: bool,
    at: SystemTime,
    reason: crate::photo_policy::SaveReason,
) {
    let paths = photo_policy::filenames(&shared.output_dir, detections, at, is_night);
    let annotated_original = photo_policy::annotate(&original.to_rgb_image(), detections, &shared.font);

    if let Some(path) = paths.first() {
        if let Err(e) = annotated_original.save(path) {
            warn!(error = %e, path = %path.display(), "Failed to save detection photo");
        } else {
            info!(path = %path.display(), reason = ?reason, "Saved detection photo");
            shared.images_saved.fetch_add(1, Ordering::SeqCst);
        }
    }

    if let (Some(path), Some(enhanced)) = (paths.get(1), enhanced) {
        let annotated_enhanced = photo_policy::annotate(&enhanced.to_rgb_image(), detections, &shared.font);
        if let Err(e) = annotated_enhanced.save(path) {
            warn!(error = %e, path = %path.display(), "Failed to save night-enhanced photo");
        } else {
            shared.images_saved.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Multiplies every channel by a fixed attenuation factor to mitigate glass
/// reflections in very bright scenes (§4.2, point 3).
fn attenuate_brightness(frame: &Frame) -> Frame {
    let mut rgb = frame.to_rgb_image();
    for px in rgb.pixels_mut() {
        for channel in px.0.iter_mut() {
            *channel = (*channel as f64 * crate::constants::BRIGHTNESS_FILTER_ATTENUATION) as u8;
        }
    }
    Frame::from_rgb_image(&rgb, frame.captured_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ModelMetrics, RawDetection};
    use crate::errors::DetectorError;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct ScriptedDetector {
        responses: StdMutex<VecDeque<Vec<RawDetection>>>,
    }

    impl ScriptedDetector {
        fn new(responses: Vec<Vec<RawDetection>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().collect()),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _frame: &Frame, _min_confidence: f64) -> Result<Vec<RawDetection>, DetectorError> {
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
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

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::new(width, height, vec![0u8; (width * height * 3) as usize], SystemTime::now())
    }

    fn person_detection() -> RawDetection {
        RawDetection {
            class_label: "person".into(),
            class_id: 0,
            confidence: 0.8,
            x: 100.0,
            y: 100.0,
            w: 50.0,
            h: 100.0,
        }
    }

    fn build_processor(worker_count: usize, detector: Arc<dyn Detector>, dir: PathBuf) -> FrameProcessor {
        FrameProcessor::new(FrameProcessorConfig {
            worker_count,
            max_queue_depth: 10,
            detector,
            tracker: Arc::new(Tracker::new()),
            target_classes: crate::constants::DEFAULT_TARGET_CLASSES.iter().map(|s| s.to_string()).collect(),
            min_confidence: 0.5,
            enable_brightness_filter: false,
            output_dir: dir,
            local_hour_override: Some(12),
            on_event: Box::new(|_, _, _| {}),
        })
    }

    #[test]
    fn single_worker_submit_matches_process_sync() {
        let dir = tempdir().unwrap();
        let detector: Arc<dyn Detector> =
            Arc::new(ScriptedDetector::new(vec![vec![person_detection()], vec![person_detection()]]));
        let processor = build_processor(1, detector, dir.path().to_path_buf());

        let frame = black_frame(640, 480);
        let via_submit = processor.submit(frame.clone());
        let inline = via_submit.blocking_recv().unwrap();
        let via_sync = processor.process_sync(frame);
        assert_eq!(inline.processed, via_sync.processed);
    }

    #[test]
    fn one_person_frame_saves_exactly_one_photo() {
        let dir = tempdir().unwrap();
        let detector: Arc<dyn Detector> = Arc::new(ScriptedDetector::new(vec![vec![person_detection()]]));
        let processor = build_processor(1, detector, dir.path().to_path_buf());

        let result = processor.process_sync(black_frame(640, 480));
        assert!(result.processed);
        assert_eq!(result.detections.len(), 1);
        assert_eq!(processor.total_images_saved(), 1);

        let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn repeated_identical_frame_is_throttled() {
        let dir = tempdir().unwrap();
        let responses = (0..5).map(|_| vec![person_detection()]).collect();
        let detector: Arc<dyn Detector> = Arc::new(ScriptedDetector::new(responses));
        let processor = build_processor(1, detector, dir.path().to_path_buf());

        for _ in 0..5 {
            processor.process_sync(black_frame(640, 480));
        }
        // First frame is a new-type save; the rest are throttled within 10s.
        assert_eq!(processor.total_images_saved(), 1);
    }

    #[test]
    fn shutdown_drains_queue_and_joins_workers() {
        let dir = tempdir().unwrap();
        let detector: Arc<dyn Detector> = Arc::new(ScriptedDetector::new(vec![vec![]; 4]));
        let processor = build_processor(2, detector, dir.path().to_path_buf());

        let mut receivers = Vec::new();
        for _ in 0..4 {
            receivers.push(processor.submit(black_frame(16, 16)));
        }
        processor.shutdown();
        for rx in receivers {
            assert!(rx.blocking_recv().is_ok());
        }
    }

    #[test]
    fn full_queue_drops_newest_and_preserves_oldest() {
        let dir = tempdir().unwrap();
        // Two workers with an unfulfillable detector-stall is hard to script
        // deterministically without real scheduling; instead drive the
        // queue directly to exercise the full-queue branch of submit().
        let detector: Arc<dyn Detector> = Arc::new(ScriptedDetector::new(vec![vec![]; 1]));
        let processor = FrameProcessor::new(FrameProcessorConfig {
            worker_count: 2,
            max_queue_depth: 1,
            detector,
            tracker: Arc::new(Tracker::new()),
            target_classes: crate::constants::DEFAULT_TARGET_CLASSES.iter().map(|s| s.to_string()).collect(),
            min_confidence: 0.5,
            enable_brightness_filter: false,
            output_dir: dir.path().to_path_buf(),
            local_hour_override: Some(12),
            on_event: Box::new(|_, _, _| {}),
        });

        {
            let mut queue = processor.shared.queue.lock().unwrap();
            queue.push_back(QueueEntry {
                frame: black_frame(16, 16),
                responder: oneshot::channel().0,
            });
        }
        let dropped = processor.submit(black_frame(16, 16));
        let result = dropped.blocking_recv().unwrap();
        assert!(!result.processed);
        processor.shutdown();
    }
}
