// SPDX-License-Identifier: GPL-3.0-only

//! Command-line surface (§6, External Interfaces): every tunable flag,
//! plus the `--list-cameras` utility subcommand (still exposed as a thin
//! wrapper since it costs nothing beyond enumerating devices), expressed
//! as a `clap` derive struct.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, ModelType};

/// Real-time object detection from a local webcam. Detects people,
/// vehicles, and small animals, tracks them across frames, saves annotated
/// stills, and can broadcast a live MJPEG view of what it sees.
#[derive(Parser, Debug)]
#[command(name = "sentrycam")]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Continuously-operating visual surveillance pipeline")]
pub struct Cli {
    /// List available camera devices and exit.
    #[arg(long)]
    pub list_cameras: bool,

    /// Maximum frames per second to process (1-60).
    #[arg(long, default_value_t = 5)]
    pub max_fps: u32,

    /// Minimum confidence threshold for a detection to be kept (0.0-1.0).
    #[arg(long, default_value_t = 0.5)]
    pub min_confidence: f64,

    /// FPS threshold below which a performance warning is logged.
    #[arg(long = "min-fps-warning", default_value_t = 1)]
    pub min_fps_warning_threshold: u32,

    /// Log file path.
    #[arg(long, default_value = "object_detection.log")]
    pub log_file: PathBuf,

    /// Heartbeat log interval in minutes.
    #[arg(long, default_value_t = 10)]
    pub heartbeat_interval: u64,

    /// Detection summary interval in minutes.
    #[arg(long, default_value_t = 60)]
    pub summary_interval_minutes: u64,

    /// Camera device ID.
    #[arg(long, default_value_t = 0)]
    pub camera_id: usize,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 1280)]
    pub frame_width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 720)]
    pub frame_height: u32,

    /// Path to the detection model weights.
    #[arg(long, default_value = "models/yolov5s.onnx")]
    pub model_path: PathBuf,

    /// Which detection backend to load.
    #[arg(long, value_enum, default_value = "yolov5s")]
    pub model_type: CliModelType,

    /// Path to a JSON file overlaying these flags.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Path to a newline-separated file of extra target classes.
    #[arg(long)]
    pub classes_path: Option<PathBuf>,

    /// Number of frame-processing worker threads (1-16).
    #[arg(long, default_value_t = 1)]
    pub processing_threads: usize,

    /// Enable GPU acceleration if the backend supports it.
    #[arg(long)]
    pub enable_gpu: bool,

    /// Maximum frames allowed to sit in the processing queue before new
    /// frames are dropped.
    #[arg(long, default_value_t = 10)]
    pub max_frame_queue_size: usize,

    /// Show a local preview window (non-goal on headless deployments;
    /// accepted and otherwise ignored).
    #[arg(long)]
    pub show_preview: bool,

    /// Enable the MJPEG stream server.
    #[arg(long)]
    pub enable_streaming: bool,

    /// Port the stream server listens on.
    #[arg(long, default_value_t = 8080)]
    pub streaming_port: u16,

    /// Maximum images analyzed per second.
    #[arg(long, default_value_t = 1.0)]
    pub analysis_rate_limit: f64,

    /// Attenuate very bright frames before detection (glass reflections).
    #[arg(long)]
    pub enable_brightness_filter: bool,

    /// Seconds a tracked object must hold position before it's stationary.
    #[arg(long, default_value_t = 120)]
    pub stationary_timeout_seconds: u64,

    /// React faster while new or moving objects are present.
    #[arg(long)]
    pub enable_burst_mode: bool,

    /// Directory detection photos are written to.
    #[arg(long, default_value = "detections")]
    pub output_dir: PathBuf,
}

/// Mirrors [`ModelType`] for `clap`'s `value_enum`, since deriving
/// `ValueEnum` directly on the `serde`-tagged config type would tie the
/// wire format to the CLI's spelling.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliModelType {
    #[value(name = "yolov5s")]
    YoloV5Small,
    #[value(name = "yolov5l")]
    YoloV5Large,
    #[value(name = "efficientdet-d3")]
    EfficientDetD3,
}

impl From<CliModelType> for ModelType {
    fn from(value: CliModelType) -> Self {
        match value {
            CliModelType::YoloV5Small => ModelType::YoloV5Small,
            CliModelType::YoloV5Large => ModelType::YoloV5Large,
            CliModelType::EfficientDetD3 => ModelType::EfficientDetD3,
        }
    }
}

impl Cli {
    /// Validates ranges beyond what `clap` itself can express.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_fps == 0 || self.max_fps > 60 {
            return Err(format!("Invalid max_fps: {} (must be 1-60)", self.max_fps));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!(
                "Invalid min_confidence: {} (must be 0.0-1.0)",
                self.min_confidence
            ));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(format!(
                "Invalid frame dimensions: {}x{}",
                self.frame_width, self.frame_height
            ));
        }
        if self.processing_threads == 0 || self.processing_threads > 16 {
            return Err(format!(
                "Invalid processing_threads: {} (must be 1-16)",
                self.processing_threads
            ));
        }
        Ok(())
    }

    /// Builds a [`Config`] from the parsed flags.
    pub fn into_config(self) -> Config {
        Config {
            max_fps: self.max_fps,
            min_confidence: self.min_confidence,
            min_fps_warning_threshold: self.min_fps_warning_threshold,
            log_file: self.log_file,
            heartbeat_interval_minutes: self.heartbeat_interval,
            summary_interval_minutes: self.summary_interval_minutes,
            camera_id: self.camera_id,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            model_path: self.model_path,
            config_path: self.config_path,
            classes_path: self.classes_path,
            extra_classes: Vec::new(),
            model_type: self.model_type.into(),
            output_dir: self.output_dir,
            enable_gpu: self.enable_gpu,
            processing_threads: self.processing_threads,
            max_frame_queue_size: self.max_frame_queue_size,
            analysis_rate_limit: self.analysis_rate_limit,
            show_preview: self.show_preview,
            enable_streaming: self.enable_streaming,
            streaming_port: self.streaming_port,
            enable_brightness_filter: self.enable_brightness_filter,
            stationary_timeout_seconds: self.stationary_timeout_seconds,
            enable_burst_mode: self.enable_burst_mode,
        }
    }
}

/// Enumerates V4L2 video-capture devices and prints them, for the
/// `--list-cameras` utility subcommand.
pub fn list_cameras() {
    let devices: Vec<_> = v4l::context::enum_devices()
        .into_iter()
        .filter(|dev| {
            v4l::Device::with_path(dev.path())
                .and_then(|d| d.query_caps())
                .map(|caps| caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE))
                .unwrap_or(false)
        })
        .collect();

    if devices.is_empty() {
        println!("No camera devices found");
        return;
    }
    for dev in devices {
        println!(
            "{}: {}",
            dev.index(),
            dev.name().unwrap_or_else(|| "unknown".to_string())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_max_fps_above_sixty() {
        let mut cli = Cli::parse_from(["sentrycam"]);
        cli.max_fps = 61;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_confidence_outside_unit_interval() {
        let mut cli = Cli::parse_from(["sentrycam"]);
        cli.min_confidence = 1.5;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_zero_processing_threads() {
        let mut cli = Cli::parse_from(["sentrycam"]);
        cli.processing_threads = 0;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn defaults_parse_and_validate() {
        let cli = Cli::parse_from(["sentrycam"]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.max_fps, 5);
        assert_eq!(cli.streaming_port, 8080);
    }

    #[test]
    fn into_config_carries_flags_through() {
        let mut cli = Cli::parse_from(["sentrycam", "--enable-streaming", "--camera-id", "2"]);
        cli.max_fps = 5;
        let config = cli.into_config();
        assert!(config.enable_streaming);
        assert_eq!(config.camera_id, 2);
    }
}
