// SPDX-License-Identifier: GPL-3.0-only

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use sentrycam::camera::{CameraSource, V4l2Camera};
use sentrycam::config::ModelType;
use sentrycam::detector::{Detector, EfficientDetModel, YoloSize, YoloV5Model};
use sentrycam::errors::DetectorError;
use sentrycam::event_recorder::EventRecorder;
use sentrycam::frame::Frame;
use sentrycam::frame_processor::{FrameProcessor, FrameProcessorConfig};
use sentrycam::perf::PerformanceMonitor;
use sentrycam::stream_server::StreamServer;
use sentrycam::tracker::Tracker;
use sentrycam::{cli, logging, storage, Orchestrator};

/// A stand-in forward pass: every real backend here is an injected closure
/// (the model itself is out of scope). Returns no detections, so the
/// surrounding pipeline runs end-to-end without a model file on disk.
fn no_op_inference(_frame: &Frame, _input_side: u32) -> Result<Vec<sentrycam::detector::RawDetection>, DetectorError> {
    Ok(Vec::new())
}

fn build_detector(model_type: ModelType, classes: Vec<&'static str>, enable_gpu: bool) -> Arc<dyn Detector> {
    match model_type {
        ModelType::YoloV5Small => Arc::new(YoloV5Model::new(YoloSize::Small, classes, Box::new(no_op_inference))),
        ModelType::YoloV5Large => Arc::new(YoloV5Model::new(YoloSize::Large, classes, Box::new(no_op_inference))),
        ModelType::EfficientDetD3 => Arc::new(EfficientDetModel::new(
            classes,
            enable_gpu,
            Box::new(|frame, input_side, _enable_gpu| no_op_inference(frame, input_side)),
        )),
    }
}

fn main() {
    let args = cli::Cli::parse();

    if args.list_cameras {
        cli::list_cameras();
        return;
    }

    if let Err(e) = args.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let mut config = args.into_config();
    if let Some(path) = config.config_path.clone() {
        if let Err(e) = config.merge_from_json_file(&path) {
            eprintln!("Failed to load config file {}: {e}", path.display());
            std::process::exit(1);
        }
    }
    if let Err(e) = config.load_extra_classes() {
        eprintln!("Failed to load classes file: {e}");
        std::process::exit(1);
    }

    logging::init(&config.log_file);

    if let Err(e) = storage::ensure_output_dir(&config.output_dir) {
        tracing::error!(error = %e, "Failed to create output directory");
        std::process::exit(1);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(error = %e, "Failed to install signal handler");
        }
    }

    let mut camera = V4l2Camera::new(config.camera_id, config.frame_width, config.frame_height);
    if let Err(e) = camera.initialize() {
        tracing::error!(error = %e, "Camera initialization failed");
        std::process::exit(1);
    }

    let classes: Vec<&'static str> = sentrycam::constants::DEFAULT_TARGET_CLASSES.to_vec();
    let detector = build_detector(config.model_type, classes, config.enable_gpu);
    if let Err(e) = detector.warm_up() {
        tracing::error!(error = %e, "Detector warm-up failed");
        std::process::exit(1);
    }

    let tracker = Arc::new(Tracker::new());
    let event_recorder = Arc::new(EventRecorder::new());

    let frame_processor = {
        let event_recorder = Arc::clone(&event_recorder);
        FrameProcessor::new(FrameProcessorConfig {
            worker_count: config.processing_threads,
            max_queue_depth: config.max_frame_queue_size,
            detector,
            tracker: Arc::clone(&tracker),
            target_classes: config.target_classes(),
            min_confidence: config.min_confidence,
            enable_brightness_filter: config.enable_brightness_filter,
            output_dir: config.output_dir.clone(),
            local_hour_override: None,
            on_event: Box::new(move |label, stationary, is_exit| {
                event_recorder.record(label, stationary, is_exit);
            }),
        })
    };

    let stream_server = if config.enable_streaming {
        let server = StreamServer::new(config.streaming_port);
        if let Err(e) = server.initialize() {
            tracing::error!(error = %e, "Stream server failed to bind");
            std::process::exit(1);
        }
        if let Err(e) = server.start() {
            tracing::error!(error = %e, "Stream server failed to start");
            std::process::exit(1);
        }
        Some(server)
    } else {
        None
    };

    let performance = PerformanceMonitor::new(config.min_fps_warning_threshold as f64);

    let mut orchestrator = Orchestrator::new(
        Box::new(camera),
        frame_processor,
        tracker,
        performance,
        event_recorder,
        stream_server,
        shutdown,
        config,
    );

    let summary = orchestrator.run();
    println!("{summary}");
}
