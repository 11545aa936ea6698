// SPDX-License-Identifier: GPL-3.0-only

//! An in-memory, scripted [`CameraSource`] used by tests and by
//! `--preview-source`-style offline scenarios. Plays back a fixed sequence
//! of frames (or none at all, for the empty-stream scenario) instead of
//! opening a real device.

use std::collections::VecDeque;
use std::time::Instant;

use super::{CameraSource, FailureTracker, Health};
use crate::errors::CameraError;
use crate::frame::Frame;

pub struct ScriptedCamera {
    queue: VecDeque<Frame>,
    initialized: bool,
    tracker: FailureTracker,
}

impl ScriptedCamera {
    /// An empty script: every `capture()` call fails, exercising scenario A
    /// (empty capture stream — no crash, heartbeat keeps ticking).
    pub fn empty() -> Self {
        Self {
            queue: VecDeque::new(),
            initialized: false,
            tracker: FailureTracker::default(),
        }
    }

    pub fn with_frames(frames: Vec<Frame>) -> Self {
        Self {
            queue: frames.into_iter().collect(),
            initialized: false,
            tracker: FailureTracker::default(),
        }
    }

    /// Adds more frames to the end of the playback queue, e.g. so a test
    /// can feed the same frame repeatedly (scenario C).
    pub fn push_frame(&mut self, frame: Frame) {
        self.queue.push_back(frame);
    }
}

impl CameraSource for ScriptedCamera {
    fn initialize(&mut self) -> Result<(), CameraError> {
        self.initialized = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        match self.queue.pop_front() {
            Some(frame) => {
                self.tracker.record_success(Instant::now());
                Ok(frame)
            }
            None => {
                self.tracker.record_failure();
                Err(CameraError::ReadFailed("no scripted frames remaining".into()))
            }
        }
    }

    fn health_check(&self) -> Health {
        self.tracker.health()
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        self.tracker.reset();
        Ok(())
    }

    fn release(&mut self) {
        self.initialized = false;
    }

    fn keep_alive(&mut self) {
        if self.tracker.should_keep_alive(Instant::now()) {
            let _ = self.capture();
        }
    }
}
