// SPDX-License-Identifier: GPL-3.0-only

//! Tunable constants shared across the pipeline.
//!
//! Where a prior implementation fixed a concrete number for a behavior
//! described only qualitatively, that value is cited in a comment.

/// Object classes the pipeline acts on by default. Operators may extend
/// this set via `--classes-path` (see [`crate::config::Config::extra_classes`]).
pub const DEFAULT_TARGET_CLASSES: &[&str] = &[
    "person", "car", "truck", "bus", "motorcycle", "bicycle", "cat", "dog",
];

/// Maximum number of recent centers retained per tracked object (§3).
pub const POSITION_HISTORY_LEN: usize = 10;

/// Euclidean distance, in pixels, within which a new detection may match
/// an existing tracked object of the same class (§4.3).
pub const MATCH_RADIUS_PX: f64 = 100.0;

/// Frames a tracked object may go unmatched before it is purged (§4.3).
pub const TRACK_RETENTION_FRAMES: u32 = 30;

/// Average consecutive displacement, in pixels, at or below which an
/// object is judged stationary (§4.3, glossary).
pub const STATIONARY_DISPLACEMENT_PX: f64 = 10.0;

/// Minimum position-history samples before stationarity is evaluated (§4.3).
pub const STATIONARY_MIN_SAMPLES: usize = 3;

/// Minimum wall-clock interval between saved photos absent a change event (§4.4).
pub const PHOTO_THROTTLE_SECS: u64 = 10;

/// Default bounded queue depth for the frame processor (§4.2).
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 10;

/// Consecutive capture failures before the camera is considered unhealthy (§4.1).
pub const MAX_CONSECUTIVE_CAMERA_FAILURES: u32 = 5;

/// Camera health is polled at this cadence by the orchestrator (§4.1, §4.7).
pub const CAMERA_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Force a capture if none has been issued in this long, to deter USB suspend (§4.1).
pub const CAMERA_KEEPALIVE_SECS: u64 = 30;

/// Performance warning is rate-limited to at most once per this interval (§4.6).
pub const PERF_WARNING_INTERVAL_SECS: u64 = 60;

/// Full performance report cadence (§4.6).
pub const PERF_REPORT_INTERVAL_SECS: u64 = 300;

/// Sentinel at which the performance monitor's counters are reset to avoid
/// overflow, preserving the rolling average (§4.6). The reset is seeded
/// with synthetic frame/sum counters rather than zeroed — see DESIGN.md for
/// the open-question resolution.
pub const MAX_FRAME_COUNT: u64 = 1_000_000_000;

/// Number of synthetic frames seeded into the counters on overflow reset.
pub const PERF_RESET_SEED_FRAMES: u64 = 100;

/// JPEG quality used by the stream server (§4.5).
pub const STREAM_JPEG_QUALITY: u8 = 80;

/// Per-client send-loop cadence target (≈10 fps egress) (§4.5).
pub const STREAM_CLIENT_INTERVAL_MS: u64 = 100;

/// Poll interval while waiting for the first broadcast frame (§4.5).
pub const STREAM_NO_FRAME_POLL_MS: u64 = 100;

/// Default stream server port (§6).
pub const DEFAULT_STREAMING_PORT: u16 = 8080;

/// CLAHE-equivalent clip limit used on the lightness channel in night mode (§4.2).
pub const NIGHT_MODE_CLIP_LIMIT: f32 = 2.0;

/// CLAHE-equivalent tile grid size (8x8) used in night mode (§4.2).
pub const NIGHT_MODE_TILE_SIZE: u32 = 8;

/// Night mode is forced by local wall-clock hour falling in [20, 24) ∪ [0, 6) (§4.2).
pub const NIGHT_MODE_START_HOUR: u32 = 20;
pub const NIGHT_MODE_END_HOUR: u32 = 6;

/// Night mode is also triggered by mean grayscale luminance below this value (§4.2).
pub const NIGHT_MODE_LUMINANCE_THRESHOLD: f64 = 50.0;

/// Default orchestrator iteration sleep floor when not rate-limited (§4.7).
pub const ORCHESTRATOR_IDLE_SLEEP_MS: u64 = 10;

/// Sleep after a failed capture before retrying (§4.7).
pub const CAPTURE_FAILURE_SLEEP_MS: u64 = 100;

/// Sleep floor while burst mode is active — maximum responsiveness (§4.7).
pub const BURST_MODE_SLEEP_FLOOR_MS: u64 = 1;

/// Default heartbeat log cadence, in minutes (§4.7, §6).
pub const DEFAULT_HEARTBEAT_INTERVAL_MINUTES: u64 = 10;

/// Default periodic event summary cadence, in minutes (§4.7, §4.8).
pub const DEFAULT_SUMMARY_INTERVAL_MINUTES: u64 = 60;

/// Default stationary timeout after which the photo policy may suppress
/// further "still present" saves, in seconds (§6 CLI surface).
pub const DEFAULT_STATIONARY_TIMEOUT_SECS: u64 = 120;

/// Mean luminance above which the optional high-brightness filter attenuates
/// a frame before detection, mitigating glass reflections (§4.2, point 3).
/// Not numerically specified by the design; chosen so it only engages on
/// scenes close to blown-out white — see DESIGN.md Open Questions.
pub const BRIGHTNESS_FILTER_LUMINANCE_THRESHOLD: f64 = 200.0;

/// Multiplicative attenuation applied to every channel when the
/// high-brightness filter engages (§4.2, point 3).
pub const BRIGHTNESS_FILTER_ATTENUATION: f64 = 0.7;

/// Disk cleanup kicks in below this many free bytes (§6), or above 95% used.
pub const DISK_CRITICAL_FREE_BYTES: u64 = 100 * 1024 * 1024;
pub const DISK_CRITICAL_USED_FRACTION: f64 = 0.95;

/// Fraction of oldest `.jpg` files removed by a disk cleanup pass (§6).
pub const DISK_CLEANUP_FRACTION: f64 = 0.20;

/// BGR color triplets (blue, green, red byte order, matching the source's
/// OpenCV convention) used to annotate detections by class (§4.4).
pub fn class_color_bgr(class_label: &str) -> [u8; 3] {
    match class_label {
        "person" => [0, 255, 0],
        "cat" => [0, 0, 255],
        "dog" => [255, 0, 0],
        "car" | "truck" | "bus" => [0, 255, 255],
        "motorcycle" | "bicycle" => [255, 0, 255],
        "bird" => [255, 255, 0],
        "bear" => [0, 128, 128],
        "chair" => [128, 0, 128],
        "book" => [255, 128, 0],
        _ => [255, 255, 255],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_classes_cover_the_core_set() {
        assert_eq!(DEFAULT_TARGET_CLASSES.len(), 8);
        assert!(DEFAULT_TARGET_CLASSES.contains(&"person"));
        assert!(DEFAULT_TARGET_CLASSES.contains(&"dog"));
    }

    #[test]
    fn color_table_covers_named_classes() {
        assert_eq!(class_color_bgr("person"), [0, 255, 0]);
        assert_eq!(class_color_bgr("car"), [0, 255, 255]);
        assert_eq!(class_color_bgr("truck"), class_color_bgr("bus"));
        assert_eq!(class_color_bgr("unknown-thing"), [255, 255, 255]);
    }
}
