//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

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
    #[error("frame conversion failed: {0}")]
    Frame(#[from] frame::FrameError),
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
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpg,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// Anything that can hand the frame loop one RGB frame at a time.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Width and height of the frames this source produces.
    fn dimensions(&self) -> (u32, u32);
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(code) if code == EBUSY => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let (width, height, fourcc) = negotiate(&device)?;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver offered {fourcc}; need YUYV, MJPG, or GREY"
            ))
        })?;
        tracing::info!(width, height, %fourcc, ?pixel_format, "negotiated format");

        Ok(Self {
            device,
            width,
            height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming, discarding `warmup_frames` while exposure settles.
    ///
    /// The returned stream keeps one mmap buffer ring for its whole life,
    /// so per-frame capture does not renegotiate buffers.
    pub fn into_stream(self, warmup_frames: usize) -> Result<CaptureStream, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let mut capture = CaptureStream {
            camera: self,
            stream,
        };

        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                capture.next_frame()?;
            }
        }

        Ok(capture)
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let rgb = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height)?,
        };
        Ok(rgb)
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

/// Ask for 640x480 YUYV and report what the driver settled on.
///
/// Webcams that only stream compressed frames at this size answer MJPG.
fn negotiate(device: &Device) -> Result<(u32, u32, FourCC), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = REQUESTED_WIDTH;
    wanted.height = REQUESTED_HEIGHT;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
    Ok((got.width, got.height, got.fourcc))
}

/// A streaming camera: owns the device and its mmap buffer ring.
pub struct CaptureStream {
    stream: MmapStream<'static>,
    camera: Camera,
}

impl FrameSource for CaptureStream {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        // MJPG payloads are shorter than the buffer; trust bytesused when set.
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let sequence = meta.sequence;
        let rgb = self.camera.buf_to_rgb(&buf[..used])?;

        Ok(Frame::from_rgb(rgb, self.camera.width, self.camera.height, sequence)?)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.camera.width, self.camera.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/video-does-not-exist"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
