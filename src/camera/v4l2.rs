// SPDX-License-Identifier: GPL-3.0-only

//! Real V4L2 camera capture, built on the `v4l` crate.
//!
//! Negotiates a target resolution and prefers a compressed transport format
//! (Motion-JPEG) when the device advertises it, to minimize USB bandwidth
//! and latency (§4.1). Frames come back as either MJPEG (decoded with the
//! `image` crate) or raw YUYV (converted in `yuyv_to_rgb`), depending on
//! what the negotiated format turned out to be.
//!
//! The mmap `Stream` borrows the `Device` it was built from, but a
//! `CameraSource` needs to hold both across repeated `capture()` calls on
//! `&mut self`. `ouroboros` ties the two lifetimes together safely instead
//! of reaching for a raw-pointer workaround.

use std::time::{Instant, SystemTime};

use ouroboros::self_referencing;
use tracing::warn;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use super::{CameraSource, FailureTracker, Health};
use crate::errors::CameraError;
use crate::frame::Frame;

const MMAP_BUFFER_COUNT: u32 = 4;

#[self_referencing]
struct DeviceStream {
    device: Device,
    #[borrows(mut device)]
    #[covariant]
    stream: Stream<'this>,
}

pub struct V4l2Camera {
    device_index: usize,
    target_width: u32,
    target_height: u32,
    device_stream: Option<DeviceStream>,
    tracker: FailureTracker,
}

impl V4l2Camera {
    pub fn new(device_index: usize, target_width: u32, target_height: u32) -> Self {
        Self {
            device_index,
            target_width,
            target_height,
            device_stream: None,
            tracker: FailureTracker::default(),
        }
    }

    fn open_and_negotiate(&mut self) -> Result<(), CameraError> {
        let mut device = Device::new(self.device_index)
            .map_err(|e| CameraError::InitializationFailed(e.to_string()))?;

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::InitializationFailed(e.to_string()))?;
        fmt.width = self.target_width;
        fmt.height = self.target_height;
        fmt.fourcc = FourCC::new(b"MJPG");

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::InitializationFailed(e.to_string()))?;

        if negotiated.width != self.target_width || negotiated.height != self.target_height {
            warn!(
                requested_width = self.target_width,
                requested_height = self.target_height,
                actual_width = negotiated.width,
                actual_height = negotiated.height,
                "Camera chose a different resolution than requested"
            );
            self.target_width = negotiated.width;
            self.target_height = negotiated.height;
        }
        if &negotiated.fourcc.repr != b"MJPG" {
            warn!(
                fourcc = ?negotiated.fourcc,
                "Camera did not accept MJPEG transport; falling back to device default"
            );
        }

        // Minimize buffering depth to cut capture latency (§4.1).
        let device_stream = DeviceStreamTryBuilder {
            device,
            stream_builder: |device: &mut Device| {
                Stream::with_buffers(device, Type::VideoCapture, MMAP_BUFFER_COUNT)
                    .map_err(|e| CameraError::InitializationFailed(e.to_string()))
            },
        }
        .try_build()?;

        self.device_stream = Some(device_stream);
        Ok(())
    }

    fn decode_buffer(data: &[u8], fallback_width: u32, fallback_height: u32) -> Result<Frame, CameraError> {
        let now = SystemTime::now();
        if let Ok(img) = image::load_from_memory(data) {
            return Ok(Frame::from_rgb_image(&img.to_rgb8(), now));
        }
        // Not a container format image::load_from_memory understands —
        // assume raw YUYV 4:2:2 at the negotiated dimensions.
        let rgb = yuyv_to_rgb(data, fallback_width, fallback_height)?;
        Ok(Frame::new(fallback_width, fallback_height, rgb, now))
    }
}

/// Converts a packed YUYV 4:2:2 buffer to interleaved RGB, BT.601 coefficients.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    let expected = (width as usize) * (height as usize) * 2;
    if data.len() < expected {
        return Err(CameraError::ReadFailed(format!(
            "short YUYV buffer: got {} bytes, expected {expected}",
            data.len()
        )));
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as i32, chunk[1] as i32, chunk[2] as i32, chunk[3] as i32);
        for y in [y0, y1] {
            let c = y - 16;
            let d = u - 128;
            let e = v - 128;
            let r = (298 * c + 409 * e + 128) >> 8;
            let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
            let b = (298 * c + 516 * d + 128) >> 8;
            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}

impl CameraSource for V4l2Camera {
    fn initialize(&mut self) -> Result<(), CameraError> {
        self.open_and_negotiate()
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let (width, height) = (self.target_width, self.target_height);
        let device_stream = self
            .device_stream
            .as_mut()
            .ok_or(CameraError::InitializationFailed("camera not initialized".into()))?;

        let result = device_stream
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| CameraError::ReadFailed(e.to_string()))
            .and_then(|buf| Self::decode_buffer(&buf, width, height));

        match &result {
            Ok(_) => self.tracker.record_success(Instant::now()),
            Err(_) => self.tracker.record_failure(),
        }
        result
    }

    fn health_check(&self) -> Health {
        self.tracker.health()
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        self.release();
        self.open_and_negotiate()?;
        self.tracker.reset();
        Ok(())
    }

    fn release(&mut self) {
        self.device_stream = None;
    }

    fn keep_alive(&mut self) {
        if self.tracker.should_keep_alive(Instant::now()) {
            let _ = self.capture();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_conversion_produces_expected_pixel_count() {
        // Two 4-byte YUYV macropixels -> 4 RGB pixels, width=4 height=1.
        let data = [128u8; 16];
        let rgb = yuyv_to_rgb(&data, 4, 1).unwrap();
        assert_eq!(rgb.len(), 4 * 3);
    }

    #[test]
    fn yuyv_conversion_rejects_short_buffers() {
        let data = [0u8; 4];
        assert!(yuyv_to_rgb(&data, 4, 4).is_err());
    }
}
