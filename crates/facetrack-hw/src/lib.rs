//! facetrack-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and conversion of the negotiated
//! pixel format into packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureStream, DeviceInfo, FrameSource};
pub use frame::Frame;
