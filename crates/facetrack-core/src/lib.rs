//! facetrack-core: face analysis and overlay drawing.
//!
//! Uses SCRFD for face detection (boxes and five-point landmarks) and FER+
//! for expression classification, both running via ONNX Runtime, plus the
//! raster routines that draw their results over a frame.

pub mod analyzer;
pub mod detector;
pub mod expression;
mod imaging;
pub mod overlay;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::FaceDetector;
pub use expression::ExpressionClassifier;
pub use overlay::OverlayError;
pub use types::{
    BoundingBox, DetectionRequest, DetectionSnapshot, Expression, Expressions, FaceDetection,
    Landmarks, OverlayOptions,
};

/// Where the ONNX models are installed when nothing else is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facetrack/models")
}
