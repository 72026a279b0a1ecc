//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! stride levels into boxes plus five-point landmarks, and applies NMS.

use crate::imaging;
use crate::types::{BoundingBox, FaceDetection, Landmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// How a frame was fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    /// Size of the scaled frame inside the input square.
    inner: (usize, usize),
}

impl Letterbox {
    fn fit(width: usize, height: usize, side: usize) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let inner_w = ((width as f32 * scale).round() as usize).clamp(1, side);
        let inner_h = ((height as f32 * scale).round() as usize).clamp(1, side);
        Self {
            scale,
            pad_x: (side - inner_w) as f32 / 2.0,
            pad_y: (side - inner_h) as f32 / 2.0,
            inner: (inner_w, inner_h),
        }
    }

    /// Model-input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Positions of one stride's score, box and keypoint tensors in the model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideTensors {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// One stride's raw outputs, flattened.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Tensor positions for strides 8, 16 and 32, in that order.
    layout: [StrideTensors; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?names,
            "loaded SCRFD model"
        );

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD with landmarks has 9 outputs, this model has {}",
                names.len()
            )));
        }

        let layout = output_layout(&names);
        tracing::debug!(?layout, "SCRFD output layout");

        Ok(Self { session, layout })
    }

    /// Detect faces in a packed RGB frame, sorted by confidence.
    ///
    /// Every returned face carries its five landmarks; expressions are left
    /// for the classifier.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, DetectorError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() != expected || width == 0 || height == 0 {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: rgb.len(),
                width,
                height,
            });
        }

        let letterbox = Letterbox::fit(width as usize, height as usize, SCRFD_INPUT_SIZE);
        let input = letterbox_tensor(rgb, width as usize, height as usize, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let extract = |index: usize, what: &'static str, stride: usize| {
            outputs[index]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (&stride, tensors) in SCRFD_STRIDES.iter().zip(&self.layout) {
            let level = StrideOutputs {
                stride,
                scores: extract(tensors.score, "scores", stride)?,
                bboxes: extract(tensors.bbox, "bboxes", stride)?,
                kps: extract(tensors.kps, "kps", stride)?,
            };
            candidates.extend(decode_stride(
                &level,
                SCRFD_INPUT_SIZE,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Scale `rgb` into the letterbox and normalize it into an NCHW tensor.
fn letterbox_tensor(rgb: &[u8], width: usize, height: usize, letterbox: &Letterbox) -> Array4<f32> {
    let (inner_w, inner_h) = letterbox.inner;
    let resized = imaging::resize_bilinear(rgb, 3, width, height, inner_w, inner_h);
    let (left, top) = (letterbox.pad_x.floor() as usize, letterbox.pad_y.floor() as usize);

    // Border pixels stay 0.0, the normalized value of SCRFD_MEAN.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (i, px) in resized.chunks_exact(3).enumerate() {
        let (x, y) = (i % inner_w + left, i / inner_w + top);
        for (c, &v) in px.iter().enumerate() {
            tensor[[0, c, y, x]] = (v as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Map output names to stride tensors.
///
/// Exports that name their outputs (`score_8`, `bbox_16`, `kps_32`, ...) are
/// matched by name. Anything else is taken as the usual positional order:
/// three score tensors, then three box tensors, then three keypoint tensors.
fn output_layout(names: &[String]) -> [StrideTensors; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| {
        Some(StrideTensors {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(8), by_name(16), by_name(32)) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional layout");
            [0, 1, 2].map(|i| StrideTensors {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Turn one stride level's anchors above `threshold` into face candidates.
fn decode_stride(
    level: &StrideOutputs<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceDetection> {
    let cells_per_row = input_size / level.stride;
    let anchors = cells_per_row * cells_per_row * SCRFD_ANCHORS_PER_CELL;
    let step = level.stride as f32;

    (0..anchors.min(level.scores.len()))
        .filter(|&anchor| level.scores[anchor] > threshold)
        .filter_map(|anchor| {
            // Distances to the box edges, in stride units: left, top, right, bottom.
            let dist = level.bboxes.get(anchor * 4..anchor * 4 + 4)?;
            let offsets = level.kps.get(anchor * 10..anchor * 10 + 10);

            let cell = anchor / SCRFD_ANCHORS_PER_CELL;
            let cx = ((cell % cells_per_row) * level.stride) as f32;
            let cy = ((cell / cells_per_row) * level.stride) as f32;

            let (x1, y1) = letterbox.unmap(cx - dist[0] * step, cy - dist[1] * step);
            let (x2, y2) = letterbox.unmap(cx + dist[2] * step, cy + dist[3] * step);
            let landmarks: Option<Landmarks> = offsets.map(|o| {
                std::array::from_fn(|p| letterbox.unmap(cx + o[2 * p] * step, cy + o[2 * p + 1] * step))
            });

            Some(FaceDetection {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: level.scores[anchor],
                },
                landmarks,
                expressions: None,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; survivors come out by descending confidence.
fn nms(mut candidates: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    candidates.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut kept: Vec<FaceDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: f32, y: f32, side: f32, confidence: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox { x, y, width: side, height: side, confidence },
            landmarks: None,
            expressions: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_pair() {
        let kept = nms(
            vec![
                candidate(5.0, 5.0, 100.0, 0.8),
                candidate(0.0, 0.0, 100.0, 0.9),
                candidate(200.0, 200.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|f| f.bbox.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_wide_frame_pads_vertically() {
        let lb = Letterbox::fit(640, 480, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.inner, (640, 480));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 80.0));
        assert_eq!(lb.unmap(100.0, 80.0), (100.0, 0.0));
    }

    #[test]
    fn test_letterbox_tensor_border_is_zero() {
        let rgb = vec![255u8; 4 * 2 * 3];
        let lb = Letterbox::fit(4, 2, SCRFD_INPUT_SIZE);
        let tensor = letterbox_tensor(&rgb, 4, 2, &lb);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let centre = tensor[[0, 1, SCRFD_INPUT_SIZE / 2, SCRFD_INPUT_SIZE / 2]];
        assert!((centre - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // Stride 32 over a 64-pixel input: 2x2 cells, 2 anchors each.
        let mut scores = vec![0.0f32; 8];
        scores[3] = 0.9; // second anchor of cell (32, 0)
        let mut bboxes = vec![0.0f32; 8 * 4];
        bboxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        let kps = vec![0.0f32; 8 * 10];
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 8.0, inner: (64, 48) };

        let faces = decode_stride(&level, 64, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        let b = faces[0].bbox;
        // Left (32 - 16) / 2, right (32 + 16) / 2, top (0 - 8) / 2, bottom (32 - 8) / 2.
        assert!((b.x - 8.0).abs() < 1e-5);
        assert!((b.width - 16.0).abs() < 1e-5);
        assert!((b.y + 4.0).abs() < 1e-5);
        assert!((b.height - 16.0).abs() < 1e-5);
        // Zero keypoint offsets put every landmark on the anchor.
        assert_eq!(faces[0].landmarks.unwrap()[2], (16.0, -4.0));
    }

    #[test]
    fn test_decode_stride_skips_truncated_boxes() {
        let scores = vec![0.9f32; 8];
        let bboxes = vec![0.0f32; 4];
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &[] };
        let letterbox = Letterbox::fit(64, 64, 64);

        let faces = decode_stride(&level, 64, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_output_layout_by_name() {
        let shuffled = names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]);
        assert_eq!(
            output_layout(&shuffled)[1],
            StrideTensors { score: 5, bbox: 3, kps: 4 }
        );
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let numeric: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        assert_eq!(
            output_layout(&numeric),
            [
                StrideTensors { score: 0, bbox: 3, kps: 6 },
                StrideTensors { score: 1, bbox: 4, kps: 7 },
                StrideTensors { score: 2, bbox: 5, kps: 8 },
            ]
        );
    }
}
