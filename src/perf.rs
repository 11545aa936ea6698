// SPDX-License-Identifier: GPL-3.0-only

//! Rolling throughput/latency tracking for the main loop (§4.6).
//!
//! Frame timing is bracketed by `start_frame`/`end_frame`, FPS is derived
//! from wall-clock spacing between consecutive `end_frame` calls (not a
//! windowed average), and a counter-overflow guard resets the running
//! totals while preserving the rolling average processing time.

use std::sync::Mutex;
use std::time::Instant;

use tracing::{info, warn};

use crate::constants::{MAX_FRAME_COUNT, PERF_RESET_SEED_FRAMES, PERF_REPORT_INTERVAL_SECS, PERF_WARNING_INTERVAL_SECS};

struct Inner {
    frame_start: Option<Instant>,
    last_frame_end: Option<Instant>,
    total_processed: u64,
    total_captured: u64,
    total_processing_time_ms: f64,
    current_fps: f64,
    last_warning_at: Option<Instant>,
    last_report_at: Option<Instant>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            frame_start: None,
            last_frame_end: None,
            total_processed: 0,
            total_captured: 0,
            total_processing_time_ms: 0.0,
            current_fps: 0.0,
            last_warning_at: None,
            last_report_at: None,
        }
    }
}

/// Tracks frames captured/processed, rolling FPS, and average processing
/// time, with rate-limited warning/report emission (§4.6).
pub struct PerformanceMonitor {
    min_fps_threshold: f64,
    inner: Mutex<Inner>,
}

impl PerformanceMonitor {
    pub fn new(min_fps_threshold: f64) -> Self {
        Self {
            min_fps_threshold,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Marks the start of processing one frame; counts it as captured.
    pub fn start_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.frame_start = Some(Instant::now());
        inner.total_captured += 1;
    }

    /// Marks the end of processing one frame; updates FPS and the running
    /// average, and applies the overflow guard.
    pub fn end_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(start) = inner.frame_start.take() {
            let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
            inner.total_processing_time_ms += elapsed_ms;
            inner.total_processed += 1;
        }

        if let Some(last) = inner.last_frame_end {
            let gap = now.saturating_duration_since(last).as_secs_f64();
            if gap > 0.0 {
                inner.current_fps = 1.0 / gap;
            }
        }
        inner.last_frame_end = Some(now);

        if inner.total_processed >= MAX_FRAME_COUNT || inner.total_captured >= MAX_FRAME_COUNT {
            let avg = if inner.total_processed > 0 {
                inner.total_processing_time_ms / inner.total_processed as f64
            } else {
                0.0
            };
            info!(
                frames_processed = inner.total_processed,
                "Performance counters reset after reaching overflow sentinel"
            );
            inner.total_processed = PERF_RESET_SEED_FRAMES;
            inner.total_captured = PERF_RESET_SEED_FRAMES;
            inner.total_processing_time_ms = avg * PERF_RESET_SEED_FRAMES as f64;
        }
    }

    pub fn current_fps(&self) -> f64 {
        self.inner.lock().unwrap().current_fps
    }

    pub fn average_processing_time_ms(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.total_processed == 0 {
            0.0
        } else {
            inner.total_processing_time_ms / inner.total_processed as f64
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.inner.lock().unwrap().total_processed
    }

    pub fn total_captured(&self) -> u64 {
        self.inner.lock().unwrap().total_captured
    }

    /// Emits a warning if current FPS is below threshold, rate-limited to
    /// once per `PERF_WARNING_INTERVAL_SECS` (§4.6).
    pub fn check_performance_threshold(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_fps >= self.min_fps_threshold {
            return;
        }
        let now = Instant::now();
        let should_warn = match inner.last_warning_at {
            None => true,
            Some(last) => now.saturating_duration_since(last).as_secs() >= PERF_WARNING_INTERVAL_SECS,
        };
        if should_warn {
            warn!(
                fps = inner.current_fps,
                threshold = self.min_fps_threshold,
                "Processing rate below threshold"
            );
            inner.last_warning_at = Some(now);
        }
    }

    /// Emits a full report at info level, rate-limited to once per
    /// `PERF_REPORT_INTERVAL_SECS` (§4.6).
    pub fn maybe_log_report(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let should_report = match inner.last_report_at {
            None => true,
            Some(last) => now.saturating_duration_since(last).as_secs() >= PERF_REPORT_INTERVAL_SECS,
        };
        if should_report {
            let avg = if inner.total_processed == 0 {
                0.0
            } else {
                inner.total_processing_time_ms / inner.total_processed as f64
            };
            let ratio = if inner.total_captured > 0 {
                inner.total_processed as f64 / inner.total_captured as f64 * 100.0
            } else {
                0.0
            };
            info!(
                fps = inner.current_fps,
                avg_processing_time_ms = avg,
                processed = inner.total_processed,
                captured = inner.total_captured,
                processed_ratio_pct = ratio,
                "Performance report"
            );
            inner.last_report_at = Some(now);
        }
    }

    /// Resets all statistics (used by tests and long-lived restarts).
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = Inner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn reset_zeroes_fps_and_average() {
        let monitor = PerformanceMonitor::new(1.0);
        monitor.start_frame();
        sleep(Duration::from_millis(5));
        monitor.end_frame();
        assert!(monitor.average_processing_time_ms() > 0.0);
        monitor.reset();
        assert_eq!(monitor.average_processing_time_ms(), 0.0);
        assert_eq!(monitor.current_fps(), 0.0);
    }

    #[test]
    fn processing_one_frame_yields_nonzero_average() {
        let monitor = PerformanceMonitor::new(1.0);
        monitor.start_frame();
        sleep(Duration::from_millis(2));
        monitor.end_frame();
        assert!(monitor.average_processing_time_ms() > 0.0);
        monitor.start_frame();
        sleep(Duration::from_millis(2));
        monitor.end_frame();
        assert!(monitor.current_fps() > 0.0);
    }

    #[test]
    fn overflow_guard_preserves_average_roughly() {
        let monitor = PerformanceMonitor::new(1.0);
        {
            let mut inner = monitor.inner.lock().unwrap();
            inner.total_processed = crate::constants::MAX_FRAME_COUNT;
            inner.total_captured = crate::constants::MAX_FRAME_COUNT;
            inner.total_processing_time_ms = 50.0 * crate::constants::MAX_FRAME_COUNT as f64;
        }
        monitor.start_frame();
        monitor.end_frame();
        assert_eq!(monitor.total_processed(), crate::constants::PERF_RESET_SEED_FRAMES);
        assert!((monitor.average_processing_time_ms() - 50.0).abs() < 5.0);
    }
}
