//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Crops a square around each detected face from the frame's luma plane and
//! feeds a 64×64 raw-intensity tensor to the `emotion-ferplus-8` model.

use crate::imaging;
use crate::types::{BoundingBox, Expressions};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: usize = 64;
/// Extra margin around the detector box; FER+ was trained on loose crops.
const FERPLUS_CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}; download emotion-ferplus-8.onnx from the ONNX model zoo")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FER+-based expression classifier.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Classify the expression of one face, given the frame's luma plane.
    ///
    /// Callers convert the frame once and reuse the plane for every face.
    pub fn classify(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Expressions, ClassifierError> {
        let input = Self::preprocess(gray, width as usize, height as usize, face)
            .ok_or(ClassifierError::EmptyCrop)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("logits: {e}")))?;

        Expressions::from_logits(logits).ok_or_else(|| {
            ClassifierError::InferenceFailed(format!("expected 8 logits, got {}", logits.len()))
        })
    }

    /// Square crop around the face, resized to 64×64, as a 1×1×64×64 tensor
    /// of raw 0–255 intensities.
    fn preprocess(gray: &[u8], width: usize, height: usize, face: &BoundingBox) -> Option<Array4<f32>> {
        let side = face.width.max(face.height) * (1.0 + 2.0 * FERPLUS_CROP_MARGIN);
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;

        let (crop, cw, ch) = imaging::crop_gray(
            gray,
            width,
            height,
            (cx - side / 2.0).round() as i64,
            (cy - side / 2.0).round() as i64,
            side.round() as i64,
            side.round() as i64,
        )?;

        let size = FERPLUS_INPUT_SIZE;
        let resized = imaging::resize_bilinear(&crop, 1, cw, ch, size, size);
        Array4::from_shape_vec((1, 1, size, size), resized.into_iter().map(f32::from).collect()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let gray = vec![128u8; 200 * 100];
        let tensor = ExpressionClassifier::preprocess(&gray, 200, 100, &bbox(50.0, 20.0, 40.0, 50.0)).unwrap();
        assert_eq!(tensor.shape(), &[1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_keeps_raw_intensity() {
        let gray = vec![200u8; 100 * 100];
        let tensor = ExpressionClassifier::preprocess(&gray, 100, 100, &bbox(10.0, 10.0, 30.0, 30.0)).unwrap();
        assert!(tensor.iter().all(|&v| (v - 200.0).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_face_outside_frame() {
        let gray = vec![0u8; 50 * 50];
        assert!(ExpressionClassifier::preprocess(&gray, 50, 50, &bbox(500.0, 500.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn test_preprocess_face_partially_outside_frame() {
        let gray = vec![10u8; 50 * 50];
        let tensor = ExpressionClassifier::preprocess(&gray, 50, 50, &bbox(-10.0, -10.0, 30.0, 30.0));
        assert!(tensor.is_some());
    }
}
