//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, FrameError};
use image::RgbImage;
use rollcall_core::FrameSource;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Longest wait for a single frame before the capture counts as stalled.
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// Motion JPEG, one JPEG image per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

/// V4L2 camera device handle, held exclusively for a recognition session.
///
/// The capture stream starts on the first frame. Dropping the camera stops
/// streaming and closes the device.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers may answer with MJPG or GREY instead.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc} (need YUYV, GREY, or MJPG)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            %fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture one frame as RGB, starting the stream if needed.
    ///
    /// Fails with [`CameraError::Timeout`] when the device delivers nothing
    /// for [`FRAME_TIMEOUT`].
    pub fn capture_frame(&mut self) -> Result<RgbImage, CameraError> {
        if self.stream.is_none() {
            self.stream = Some(self.start_stream()?);
        }
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("stream not started".into()))?;

        let (buf, meta) = stream.next().map_err(dequeue_error)?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        Ok(to_rgb(format, payload, width, height)?)
    }

    /// Capture and discard `count` frames while exposure settles.
    pub fn discard_frames(&mut self, count: usize) -> Result<(), CameraError> {
        if count > 0 {
            tracing::debug!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            self.capture_frame()?;
        }
        Ok(())
    }

    fn start_stream(&self) -> Result<MmapStream<'static>, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
                |e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")),
            )?;
        stream.set_timeout(FRAME_TIMEOUT);
        Ok(stream)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // Stop streaming before the device handle goes away.
        self.stream.take();
        tracing::info!(device = %self.device_path, "camera released");
    }
}

impl FrameSource for Camera {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
        self.capture_frame()
    }
}

fn dequeue_error(e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::TimedOut {
        CameraError::Timeout(FRAME_TIMEOUT)
    } else {
        CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
    }
}

fn to_rgb(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height),
        PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf, width, height),
    }
}
