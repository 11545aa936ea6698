// SPDX-License-Identifier: GPL-3.0-only

//! Runtime configuration. Populated from parsed CLI flags (see
//! [`crate::cli`]) and optionally overlaid with a JSON file at
//! `--config-path` — a simple `serde_json::from_str` merge, since config
//! file loading is an external, not-redesigned collaborator (§1 non-goals).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MINUTES, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_STATIONARY_TIMEOUT_SECS,
    DEFAULT_STREAMING_PORT, DEFAULT_SUMMARY_INTERVAL_MINUTES,
};

/// The two backend families actually wired up (§9 design notes: no
/// speculative YOLOv8 placeholders).
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, Eq, PartialEq)]
pub enum ModelType {
    #[default]
    #[serde(rename = "yolov5s")]
    YoloV5Small,
    #[serde(rename = "yolov5l")]
    YoloV5Large,
    #[serde(rename = "efficientdet-d3")]
    EfficientDetD3,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Maximum frames analyzed per second before rate limiting kicks in.
    pub max_fps: u32,
    /// Detections below this confidence are discarded.
    pub min_confidence: f64,
    /// Performance monitor warns when FPS drops below this.
    pub min_fps_warning_threshold: u32,

    /// Append-only log file path.
    pub log_file: PathBuf,
    pub heartbeat_interval_minutes: u64,
    pub summary_interval_minutes: u64,

    pub camera_id: usize,
    pub frame_width: u32,
    pub frame_height: u32,

    pub model_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub classes_path: Option<PathBuf>,
    /// Extra target classes loaded from `classes_path` at startup, appended
    /// to [`crate::constants::DEFAULT_TARGET_CLASSES`].
    pub extra_classes: Vec<String>,
    pub model_type: ModelType,
    pub output_dir: PathBuf,

    pub enable_gpu: bool,
    pub processing_threads: usize,
    pub max_frame_queue_size: usize,
    /// Maximum images analyzed per second (§4.7 rate limiter).
    pub analysis_rate_limit: f64,

    pub show_preview: bool,

    pub enable_streaming: bool,
    pub streaming_port: u16,

    pub enable_brightness_filter: bool,
    pub stationary_timeout_seconds: u64,

    pub enable_burst_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_fps: 5,
            min_confidence: 0.5,
            min_fps_warning_threshold: 1,

            log_file: PathBuf::from("object_detection.log"),
            heartbeat_interval_minutes: DEFAULT_HEARTBEAT_INTERVAL_MINUTES,
            summary_interval_minutes: DEFAULT_SUMMARY_INTERVAL_MINUTES,

            camera_id: 0,
            frame_width: 1280,
            frame_height: 720,

            model_path: PathBuf::from("models/yolov5s.onnx"),
            config_path: None,
            classes_path: None,
            extra_classes: Vec::new(),
            model_type: ModelType::default(),
            output_dir: PathBuf::from("detections"),

            enable_gpu: false,
            processing_threads: 1,
            max_frame_queue_size: DEFAULT_MAX_QUEUE_DEPTH,
            analysis_rate_limit: 1.0,

            show_preview: false,

            enable_streaming: false,
            streaming_port: DEFAULT_STREAMING_PORT,

            enable_brightness_filter: false,
            stationary_timeout_seconds: DEFAULT_STATIONARY_TIMEOUT_SECS,

            enable_burst_mode: false,
        }
    }
}

impl Config {
    /// Overlays fields present in a JSON config file on top of the current
    /// values. Unknown/missing fields are left untouched — this is a flat
    /// merge, not a layered config system (§0 ambient stack).
    pub fn merge_from_json_file(&mut self, path: &std::path::Path) -> Result<(), crate::errors::AppError> {
        let text = std::fs::read_to_string(path)?;
        let partial: PartialConfig = serde_json::from_str(&text)
            .map_err(|e| crate::errors::AppError::Config(e.to_string()))?;
        partial.apply(self);
        Ok(())
    }

    /// Loads one class label per line from `classes_path`, if set, into
    /// `extra_classes`. Blank lines are skipped. A missing file is a
    /// configuration error since the operator asked for it explicitly.
    pub fn load_extra_classes(&mut self) -> Result<(), crate::errors::AppError> {
        let Some(path) = self.classes_path.clone() else {
            return Ok(());
        };
        let text = std::fs::read_to_string(&path)?;
        self.extra_classes = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(())
    }

    /// The full set of classes the Frame Processor filters detections to:
    /// the fixed default set plus any operator-provided additions (§4.2,
    /// point 5).
    pub fn target_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = crate::constants::DEFAULT_TARGET_CLASSES
            .iter()
            .map(|s| s.to_string())
            .collect();
        for extra in &self.extra_classes {
            if !classes.contains(extra) {
                classes.push(extra.clone());
            }
        }
        classes
    }
}

/// Every field optional, so a config file only needs to mention what it
/// overrides.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    max_fps: Option<u32>,
    min_confidence: Option<f64>,
    min_fps_warning_threshold: Option<u32>,
    log_file: Option<PathBuf>,
    heartbeat_interval_minutes: Option<u64>,
    summary_interval_minutes: Option<u64>,
    camera_id: Option<usize>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    model_path: Option<PathBuf>,
    classes_path: Option<PathBuf>,
    model_type: Option<ModelType>,
    output_dir: Option<PathBuf>,
    enable_gpu: Option<bool>,
    processing_threads: Option<usize>,
    max_frame_queue_size: Option<usize>,
    analysis_rate_limit: Option<f64>,
    show_preview: Option<bool>,
    enable_streaming: Option<bool>,
    streaming_port: Option<u16>,
    enable_brightness_filter: Option<bool>,
    stationary_timeout_seconds: Option<u64>,
    enable_burst_mode: Option<bool>,
}

impl PartialConfig {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.max_fps {
            config.max_fps = v;
        }
        if let Some(v) = self.min_confidence {
            config.min_confidence = v;
        }
        if let Some(v) = self.min_fps_warning_threshold {
            config.min_fps_warning_threshold = v;
        }
        if let Some(v) = self.log_file {
            config.log_file = v;
        }
        if let Some(v) = self.heartbeat_interval_minutes {
            config.heartbeat_interval_minutes = v;
        }
        if let Some(v) = self.summary_interval_minutes {
            config.summary_interval_minutes = v;
        }
        if let Some(v) = self.camera_id {
            config.camera_id = v;
        }
        if let Some(v) = self.frame_width {
            config.frame_width = v;
        }
        if let Some(v) = self.frame_height {
            config.frame_height = v;
        }
        if let Some(v) = self.model_path {
            config.model_path = v;
        }
        if let Some(v) = self.classes_path {
            config.classes_path = Some(v);
        }
        if let Some(v) = self.model_type {
            config.model_type = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.enable_gpu {
            config.enable_gpu = v;
        }
        if let Some(v) = self.processing_threads {
            config.processing_threads = v;
        }
        if let Some(v) = self.max_frame_queue_size {
            config.max_frame_queue_size = v;
        }
        if let Some(v) = self.analysis_rate_limit {
            config.analysis_rate_limit = v;
        }
        if let Some(v) = self.show_preview {
            config.show_preview = v;
        }
        if let Some(v) = self.enable_streaming {
            config.enable_streaming = v;
        }
        if let Some(v) = self.streaming_port {
            config.streaming_port = v;
        }
        if let Some(v) = self.enable_brightness_filter {
            config.enable_brightness_filter = v;
        }
        if let Some(v) = self.stationary_timeout_seconds {
            config.stationary_timeout_seconds = v;
        }
        if let Some(v) = self.enable_burst_mode {
            config.enable_burst_mode = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_config_manager() {
        let config = Config::default();
        assert_eq!(config.max_fps, 5);
        assert_eq!(config.min_confidence, 0.5);
        assert_eq!(config.camera_id, 0);
        assert_eq!(config.frame_width, 1280);
        assert_eq!(config.frame_height, 720);
        assert_eq!(config.stationary_timeout_seconds, 120);
        assert_eq!(config.streaming_port, 8080);
    }

    #[test]
    fn target_classes_appends_extras_without_duplicating_defaults() {
        let mut config = Config::default();
        config.extra_classes = vec!["bird".to_string(), "person".to_string()];
        let classes = config.target_classes();
        assert_eq!(classes.iter().filter(|c| *c == "person").count(), 1);
        assert!(classes.contains(&"bird".to_string()));
    }

    #[test]
    fn merge_overrides_only_present_fields() {
        let mut config = Config::default();
        let json = r#"{"max_fps": 10, "enable_streaming": true}"#;
        let partial: PartialConfig = serde_json::from_str(json).unwrap();
        partial.apply(&mut config);
        assert_eq!(config.max_fps, 10);
        assert!(config.enable_streaming);
        assert_eq!(config.frame_width, 1280);
    }
}
