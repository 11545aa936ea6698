// SPDX-License-Identifier: GPL-3.0-only
#![allow(dead_code)]

//! Error types for the surveillance pipeline

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Camera-related errors
    Camera(CameraError),
    /// Detector capability errors
    Detector(DetectorError),
    /// Stream server errors
    Stream(StreamError),
    /// Photo capture errors
    Photo(PhotoError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Camera-specific errors
#[derive(Debug, Clone)]
pub enum CameraError {
    /// No camera devices found
    NoCameraFound,
    /// Camera initialization failed
    InitializationFailed(String),
    /// Camera disconnected during operation
    Disconnected,
    /// Invalid camera format
    InvalidFormat(String),
    /// Backend error (e.g., V4L2 ioctl failure)
    BackendError(String),
    /// Camera is busy or in use
    Busy,
    /// A single capture/read call failed (transient, §7)
    ReadFailed(String),
}

/// Detector capability errors. A per-inference failure is recoverable: the
/// worker that hits one marks its FrameResult as unprocessed and continues
/// (see §7 of the pipeline design).
#[derive(Debug, Clone)]
pub enum DetectorError {
    /// Model weights or metadata failed to load
    ModelLoadFailed(String),
    /// A single inference call failed
    InferenceFailed(String),
    /// Requested model variant is not one of the implemented backends
    Unsupported(String),
}

/// Stream server errors. Fatal only at initialize/start; a failure on one
/// connected client is isolated and does not propagate here.
#[derive(Debug, Clone)]
pub enum StreamError {
    /// Failed to bind the listening socket
    BindFailed(String),
    /// start() called while already running
    AlreadyRunning,
}

/// Photo capture errors
#[derive(Debug, Clone)]
pub enum PhotoError {
    /// No frame available for capture
    NoFrameAvailable,
    /// Capture failed
    CaptureFailed(String),
    /// Encoding failed
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Detector(e) => write!(f, "Detector error: {}", e),
            AppError::Stream(e) => write!(f, "Stream server error: {}", e),
            AppError::Photo(e) => write!(f, "Photo error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            CameraError::BackendError(msg) => write!(f, "Backend error: {}", msg),
            CameraError::Busy => write!(f, "Camera is busy"),
            CameraError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
        }
    }
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorError::ModelLoadFailed(msg) => write!(f, "Model load failed: {}", msg),
            DetectorError::InferenceFailed(msg) => write!(f, "Inference failed: {}", msg),
            DetectorError::Unsupported(msg) => write!(f, "Unsupported model: {}", msg),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            StreamError::AlreadyRunning => write!(f, "Stream server is already running"),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::NoFrameAvailable => write!(f, "No frame available for capture"),
            PhotoError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for DetectorError {}
impl std::error::Error for StreamError {}
impl std::error::Error for PhotoError {}

// Conversions from sub-errors to AppError
impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<DetectorError> for AppError {
    fn from(err: DetectorError) -> Self {
        AppError::Detector(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        AppError::Photo(err)
    }
}

// Conversion from String for backward compatibility
impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

// Conversions for I/O errors
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::BindFailed(err.to_string())
    }
}
