// SPDX-License-Identifier: GPL-3.0-only

//! Camera source abstraction (§4.1): opens a device, negotiates a mode,
//! yields sequential frames, and tracks its own liveness.

pub mod mock;
pub mod v4l2;

pub use mock::ScriptedCamera;
pub use v4l2::V4l2Camera;

use std::time::Instant;

use crate::constants::MAX_CONSECUTIVE_CAMERA_FAILURES;
use crate::errors::CameraError;
use crate::frame::Frame;

/// Healthy/unhealthy as reported by [`CameraSource::health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// Capability interface for a camera device (§4.1, §9: the source's
/// PipeWire/libcamera polymorphism collapses to one trait with two
/// implementations — a real V4L2 device and a scripted test source).
pub trait CameraSource: Send {
    fn initialize(&mut self) -> Result<(), CameraError>;
    fn capture(&mut self) -> Result<Frame, CameraError>;
    fn health_check(&self) -> Health;
    fn reconnect(&mut self) -> Result<(), CameraError>;
    fn release(&mut self);
    fn keep_alive(&mut self);
}

/// Shared consecutive-failure bookkeeping used by every [`CameraSource`]
/// implementation, so the 5-failures-then-unhealthy and
/// 30s-since-last-capture-then-keep-alive rules (§4.1) live in one place.
pub struct FailureTracker {
    consecutive_failures: u32,
    last_capture_at: Option<Instant>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_capture_at: None,
        }
    }
}

impl FailureTracker {
    pub fn record_success(&mut self, at: Instant) {
        self.consecutive_failures = 0;
        self.last_capture_at = Some(at);
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn health(&self) -> Health {
        if self.consecutive_failures >= MAX_CONSECUTIVE_CAMERA_FAILURES {
            Health::Unhealthy
        } else {
            Health::Healthy
        }
    }

    pub fn should_keep_alive(&self, now: Instant) -> bool {
        match self.last_capture_at {
            None => false,
            Some(last) => {
                now.saturating_duration_since(last).as_secs()
                    >= crate::constants::CAMERA_KEEPALIVE_SECS
            }
        }
    }
}
