//! Combines detection and expression classification behind one call,
//! shaped by a [`DetectionRequest`].

use crate::detector::{DetectorError, FaceDetector};
use crate::expression::{ClassifierError, ExpressionClassifier};
use crate::imaging;
use crate::types::{BoundingBox, DetectionRequest, Expressions, FaceDetection};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Face analysis over one packed RGB frame.
///
/// Implementations populate `landmarks` exactly when the request wants
/// landmarks and `expressions` exactly when it wants expressions.
pub trait FaceAnalyzer: Send {
    fn analyze(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        request: DetectionRequest,
    ) -> Result<Vec<FaceDetection>, AnalyzerError>;
}

/// SCRFD detection plus FER+ expressions, both through ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    classifier: ExpressionClassifier,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: FaceDetector, classifier: ExpressionClassifier) -> Self {
        Self { detector, classifier }
    }

    /// Load both models, failing on the first one that is missing.
    pub fn load(detector_path: &str, classifier_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_path)?;
        let classifier = ExpressionClassifier::load(classifier_path)?;
        Ok(Self::new(detector, classifier))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        request: DetectionRequest,
    ) -> Result<Vec<FaceDetection>, AnalyzerError> {
        let mut faces = self.detector.detect(rgb, width, height)?;

        if request.wants_expressions() && !faces.is_empty() {
            let gray = imaging::rgb_to_luma(rgb);
            let classifier = &mut self.classifier;
            faces = attach_expressions(faces, |bbox| classifier.classify(&gray, width, height, bbox))?;
        }

        Ok(shape_to_request(faces, request))
    }
}

/// Classify every face, dropping the ones whose crop has no pixels in the frame.
fn attach_expressions(
    faces: Vec<FaceDetection>,
    mut classify: impl FnMut(&BoundingBox) -> Result<Expressions, ClassifierError>,
) -> Result<Vec<FaceDetection>, ClassifierError> {
    let mut kept = Vec::with_capacity(faces.len());
    for mut face in faces {
        match classify(&face.bbox) {
            Ok(expressions) => {
                face.expressions = Some(expressions);
                kept.push(face);
            }
            Err(ClassifierError::EmptyCrop) => {
                tracing::debug!(bbox = ?face.bbox, "face crop is empty; dropped");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(kept)
}

/// Drop whatever the request did not ask for.
pub fn shape_to_request(mut faces: Vec<FaceDetection>, request: DetectionRequest) -> Vec<FaceDetection> {
    for face in &mut faces {
        if !request.wants_landmarks() {
            face.landmarks = None;
        }
        if !request.wants_expressions() {
            face.expressions = None;
        }
    }
    faces
}
