// SPDX-License-Identifier: GPL-3.0-only

//! The main loop: owns every other component and drives one iteration at a
//! time per §4.7's binding order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot::error::TryRecvError;
use tracing::{error, info, warn};

use crate::camera::{CameraSource, Health};
use crate::config::Config;
use crate::constants::{
    BURST_MODE_SLEEP_FLOOR_MS, CAMERA_HEALTH_CHECK_INTERVAL_SECS, CAPTURE_FAILURE_SLEEP_MS,
    ORCHESTRATOR_IDLE_SLEEP_MS,
};
use crate::event_recorder::EventRecorder;
use crate::frame::Frame;
use crate::frame_processor::{FrameProcessor, FrameResult};
use crate::perf::PerformanceMonitor;
use crate::photo_policy;
use crate::storage;
use crate::stream_server::StreamServer;
use crate::tracker::Tracker;

type PendingResult = (tokio::sync::oneshot::Receiver<FrameResult>, Frame);

/// Owns every pipeline component and runs the per-iteration loop (§4.7, §9:
/// one-way ownership, no cyclic back-pointers).
pub struct Orchestrator {
    camera: Box<dyn CameraSource>,
    frame_processor: FrameProcessor,
    tracker: Arc<Tracker>,
    performance: PerformanceMonitor,
    event_recorder: Arc<EventRecorder>,
    stream_server: Option<StreamServer>,
    shutdown: Arc<AtomicBool>,
    config: Config,

    last_health_check: Instant,
    last_iteration: Instant,
    last_heartbeat: Instant,
    previous_present_labels: Vec<String>,
    burst_active: bool,
    start_time: Instant,
    cumulative_counts: BTreeMap<String, usize>,
    /// Futures for frames already submitted but not yet drained, oldest
    /// first. With worker_count > 1 a result may not be ready the instant
    /// its frame is submitted; the drain loop consumes ready results from
    /// the front and leaves the rest queued for a later iteration rather
    /// than blocking (§4.7 point 6, §5's FIFO-submission/out-of-order-
    /// completion guarantee).
    pending: VecDeque<PendingResult>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: Box<dyn CameraSource>,
        frame_processor: FrameProcessor,
        tracker: Arc<Tracker>,
        performance: PerformanceMonitor,
        event_recorder: Arc<EventRecorder>,
        stream_server: Option<StreamServer>,
        shutdown: Arc<AtomicBool>,
        config: Config,
    ) -> Self {
        let now = Instant::now();
        Self {
            camera,
            frame_processor,
            tracker,
            performance,
            event_recorder,
            stream_server,
            shutdown,
            config,
            last_health_check: now,
            last_iteration: now,
            last_heartbeat: now,
            previous_present_labels: Vec::new(),
            burst_active: false,
            start_time: now,
            cumulative_counts: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Runs iterations until the shutdown flag is set or the camera reports
    /// fatal health. Returns a rendered final summary either way (§7:
    /// fatal-runtime and signal-driven shutdown share the same drain path).
    pub fn run(&mut self) -> String {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested; draining in-flight work");
                break;
            }

            if self.last_health_check.elapsed() >= Duration::from_secs(CAMERA_HEALTH_CHECK_INTERVAL_SECS) {
                self.last_health_check = Instant::now();
                if self.camera.health_check() == Health::Unhealthy {
                    if let Err(e) = self.camera.reconnect() {
                        error!(error = %e, "Camera reconnect failed; shutting down");
                        self.shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                storage::check_and_cleanup(&self.config.output_dir);
            }

            let frame_interval = Duration::from_secs_f64(1.0 / self.config.max_fps.max(1) as f64);
            if self.last_iteration.elapsed() < frame_interval {
                std::thread::sleep(Duration::from_millis(ORCHESTRATOR_IDLE_SLEEP_MS));
                continue;
            }
            self.last_iteration = Instant::now();

            let frame = match self.camera.capture() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Frame capture failed");
                    std::thread::sleep(Duration::from_millis(CAPTURE_FAILURE_SLEEP_MS));
                    continue;
                }
            };

            self.performance.start_frame();
            let broadcast_frame = frame.clone();
            let receiver = self.frame_processor.submit(frame);
            self.pending.push_back((receiver, broadcast_frame));
            self.drain_ready();
            self.performance.end_frame();
            self.performance.check_performance_threshold();

            self.periodic_bookkeeping();
            self.update_burst_mode();

            let rate_limit_ms = if self.config.analysis_rate_limit > 0.0 {
                1000.0 / self.config.analysis_rate_limit
            } else {
                0.0
            };
            let elapsed_ms = self.last_iteration.elapsed().as_secs_f64() * 1000.0;
            let remaining_ms = (rate_limit_ms - elapsed_ms).max(0.0);
            let sleep_ms = if self.burst_active {
                BURST_MODE_SLEEP_FLOOR_MS
            } else {
                remaining_ms as u64
            };
            if sleep_ms > 0 {
                std::thread::sleep(Duration::from_millis(sleep_ms));
            }
        }

        self.frame_processor.shutdown();
        if let Some(server) = &self.stream_server {
            server.stop();
        }
        self.event_recorder.print_final()
    }

    /// Drains ready results from the front of the pending queue, stopping at
    /// the first not-yet-ready one (which is left in place for a later
    /// iteration). With `worker_count > 1` results can complete out of
    /// submission order; this is why the orchestrator never blocks waiting
    /// for a specific frame (§4.7 point 6, §5).
    fn drain_ready(&mut self) {
        while let Some((mut receiver, broadcast_frame)) = self.pending.pop_front() {
            match receiver.try_recv() {
                Ok(result) => self.handle_result(result, &broadcast_frame),
                Err(TryRecvError::Empty) => {
                    self.pending.push_front((receiver, broadcast_frame));
                    break;
                }
                Err(TryRecvError::Closed) => {
                    // Sender dropped without responding; nothing to consume.
                }
            }
        }
    }

    fn handle_result(&mut self, result: FrameResult, broadcast_frame: &Frame) {
        if !result.processed {
            return;
        }
        // Event recording happens inside the Frame Processor's worker (via
        // the `on_event` callback given at construction) since that's where
        // the tracker's exit events are generated; here we only maintain
        // the cumulative counts used by the stream overlay and broadcast.
        for det in &result.detections {
            *self.cumulative_counts.entry(det.class_label.clone()).or_insert(0) += 1;
        }
        if let Some(server) = &self.stream_server {
            self.broadcast(server, &result, broadcast_frame);
        }
    }

    fn broadcast(&self, server: &StreamServer, result: &FrameResult, frame: &Frame) {
        // The broadcast cell carries the actual captured frame, annotated
        // with the same rectangle/label renderer Photo Policy uses, plus a
        // statistics panel overlay (§4.5).
        let font = photo_policy::load_label_font();
        let annotated = photo_policy::annotate(&frame.to_rgb_image(), &result.detections, &font);

        let mut lines = vec![
            format!("FPS: {:.1}", self.performance.current_fps()),
            format!("Avg ms: {:.1}", self.performance.average_processing_time_ms()),
            format!("Uptime: {}", format_uptime(self.start_time.elapsed())),
            format!("Saved: {}", self.frame_processor.total_images_saved()),
        ];
        lines.extend(top_class_lines(&self.cumulative_counts, 10));
        let with_stats = photo_policy::overlay_stats(&annotated, &lines, &font);
        server.broadcast.write(&with_stats);
    }

    fn periodic_bookkeeping(&mut self) {
        if self.last_heartbeat.elapsed() >= Duration::from_secs(self.config.heartbeat_interval_minutes * 60) {
            self.last_heartbeat = Instant::now();
            info!(
                fps = self.performance.current_fps(),
                processed = self.performance.total_processed(),
                "Heartbeat"
            );
        }
        self.performance.maybe_log_report();
        self.event_recorder.check_and_emit(self.config.summary_interval_minutes);
    }

    fn update_burst_mode(&mut self) {
        if !self.config.enable_burst_mode {
            return;
        }
        let present = self.tracker.present_class_labels();
        let new_label_appeared = present.iter().any(|l| !self.previous_present_labels.contains(l));
        let has_new_object = self.tracker.has_new_object();

        if !self.burst_active && (new_label_appeared || has_new_object) {
            self.burst_active = true;
            info!("Burst mode activated");
        } else if self.burst_active
            && (!self.tracker.any_present() || self.tracker.all_present_are_stationary())
        {
            self.burst_active = false;
            info!("Burst mode deactivated");
        }

        self.previous_present_labels = present;
    }
}

fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Renders cumulative per-class counts, highest first, capped at `top_n`,
/// for the stream overlay's "top-10 classes" panel (§4.5).
fn top_class_lines(counts: &BTreeMap<String, usize>, top_n: usize) -> Vec<String> {
    let mut pairs: Vec<(&String, &usize)> = counts.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    pairs
        .into_iter()
        .take(top_n)
        .map(|(class, count)| format!("{class}: {count}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::ScriptedCamera;
    use crate::detector::RawDetection;
    use crate::frame::Frame;
    use crate::frame_processor::FrameProcessorConfig;
    use std::path::PathBuf;
    use std::time::SystemTime;

    struct AlwaysEmptyDetector;
    impl crate::detector::Detector for AlwaysEmptyDetector {
        fn detect(
            &self,
            _frame: &Frame,
            _min_confidence: f64,
        ) -> Result<Vec<RawDetection>, crate::errors::DetectorError> {
            Ok(vec![])
        }
        fn metrics(&self) -> crate::detector::ModelMetrics {
            crate::detector::ModelMetrics {
                model_name: "empty".into(),
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

    fn build(camera: ScriptedCamera) -> Orchestrator {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(Tracker::new());
        let event_recorder = Arc::new(EventRecorder::new());
        let er_for_events = Arc::clone(&event_recorder);
        let frame_processor = FrameProcessor::new(FrameProcessorConfig {
            worker_count: 1,
            max_queue_depth: 10,
            detector: Arc::new(AlwaysEmptyDetector),
            tracker: Arc::clone(&tracker),
            target_classes: crate::constants::DEFAULT_TARGET_CLASSES.iter().map(|s| s.to_string()).collect(),
            min_confidence: 0.5,
            enable_brightness_filter: false,
            output_dir: dir.path().to_path_buf(),
            local_hour_override: Some(12),
            on_event: Box::new(move |label, stationary, is_exit| {
                er_for_events.record(label, stationary, is_exit);
            }),
        });
        let mut config = Config::default();
        config.output_dir = dir.path().to_path_buf();
        config.max_fps = 1000; // disable the frame-interval throttle in tests
        Orchestrator::new(
            Box::new(camera),
            frame_processor,
            tracker,
            PerformanceMonitor::new(0.0),
            event_recorder,
            None,
            Arc::new(AtomicBool::new(false)),
            config,
        )
    }

    #[test]
    fn empty_capture_stream_shuts_down_cleanly_on_signal() {
        let camera = ScriptedCamera::empty();
        let mut orchestrator = build(camera);
        orchestrator.shutdown.store(true, Ordering::SeqCst);
        let summary = orchestrator.run();
        assert!(summary.contains("No objects"));
    }

    #[test]
    fn top_class_lines_sorts_descending_by_count() {
        let mut counts = BTreeMap::new();
        counts.insert("cat".to_string(), 2);
        counts.insert("person".to_string(), 5);
        let lines = top_class_lines(&counts, 10);
        assert_eq!(lines[0], "person: 5");
        assert_eq!(lines[1], "cat: 2");
    }

    #[test]
    fn uptime_formatting_has_no_panic_at_zero() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 5s");
    }

    #[test]
    #[allow(unused)]
    fn build_compiles_with_a_scripted_camera_feeding_one_frame() {
        let mut camera = ScriptedCamera::empty();
        camera.push_frame(Frame::new(4, 4, vec![0u8; 48], SystemTime::now()));
        let _orchestrator = build(camera);
        let _ = PathBuf::new();
    }
}
