use serde::{Deserialize, Serialize};

/// Axis-aligned face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; 0 when either box is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap_w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let overlap_h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        let intersection = overlap_w.max(0.0) * overlap_h.max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Expression labels produced by the FER+ classifier, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happiness,
    Surprise,
    Sadness,
    Anger,
    Disgust,
    Fear,
    Contempt,
}

impl Expression {
    pub const ALL: [Expression; 8] = [
        Expression::Neutral,
        Expression::Happiness,
        Expression::Surprise,
        Expression::Sadness,
        Expression::Anger,
        Expression::Disgust,
        Expression::Fear,
        Expression::Contempt,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happiness => "happiness",
            Expression::Surprise => "surprise",
            Expression::Sadness => "sadness",
            Expression::Anger => "anger",
            Expression::Disgust => "disgust",
            Expression::Fear => "fear",
            Expression::Contempt => "contempt",
        }
    }
}

/// Probability per expression label. Always sums to 1 when built from logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expressions {
    probabilities: [f32; 8],
}

impl Expressions {
    /// Build from raw classifier logits via a numerically stable softmax.
    ///
    /// Returns `None` unless exactly one logit per label is given.
    pub fn from_logits(logits: &[f32]) -> Option<Self> {
        if logits.len() != Expression::ALL.len() {
            return None;
        }
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();

        let mut probabilities = [0.0f32; 8];
        for (p, e) in probabilities.iter_mut().zip(exps) {
            *p = e / sum;
        }
        Some(Self { probabilities })
    }

    /// Label with the highest probability.
    pub fn dominant(&self) -> (Expression, f32) {
        self.iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((Expression::Neutral, 0.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL
            .iter()
            .zip(self.probabilities.iter())
            .map(|(&e, &p)| (e, p))
    }
}

/// One detected face, annotated according to the request that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Option<Landmarks>,
    pub expressions: Option<Expressions>,
}

impl FaceDetection {
    /// Map coordinates from a `from` sized frame onto a `to` sized surface.
    ///
    /// Each axis is scaled independently, so aspect changes stretch the
    /// overlay the same way the frame itself is stretched.
    pub fn rescaled(&self, from: (u32, u32), to: (u32, u32)) -> FaceDetection {
        if from == to || from.0 == 0 || from.1 == 0 {
            return self.clone();
        }
        let sx = to.0 as f32 / from.0 as f32;
        let sy = to.1 as f32 / from.1 as f32;

        FaceDetection {
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
                confidence: self.bbox.confidence,
            },
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * sx, y * sy))),
            expressions: self.expressions.clone(),
        }
    }
}

/// Which optional outputs a detection call asks for.
///
/// The two overlay toggles map onto exactly one of these four shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionRequest {
    Faces,
    FacesWithLandmarks,
    FacesWithExpressions,
    FacesWithLandmarksAndExpressions,
}

impl DetectionRequest {
    pub fn from_toggles(landmarks: bool, expressions: bool) -> Self {
        match (landmarks, expressions) {
            (false, false) => DetectionRequest::Faces,
            (true, false) => DetectionRequest::FacesWithLandmarks,
            (false, true) => DetectionRequest::FacesWithExpressions,
            (true, true) => DetectionRequest::FacesWithLandmarksAndExpressions,
        }
    }

    pub fn wants_landmarks(self) -> bool {
        matches!(
            self,
            DetectionRequest::FacesWithLandmarks | DetectionRequest::FacesWithLandmarksAndExpressions
        )
    }

    pub fn wants_expressions(self) -> bool {
        matches!(
            self,
            DetectionRequest::FacesWithExpressions
                | DetectionRequest::FacesWithLandmarksAndExpressions
        )
    }
}

/// Overlay toggles as read once at the start of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayOptions {
    pub landmarks: bool,
    pub expressions: bool,
}

impl OverlayOptions {
    pub fn request(self) -> DetectionRequest {
        DetectionRequest::from_toggles(self.landmarks, self.expressions)
    }
}

/// The most recent detection result, with what it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub request: DetectionRequest,
    /// Width and height of the frame the detections were computed on.
    pub source_size: (u32, u32),
    /// Sequence number of that frame.
    pub sequence: u32,
    pub faces: Vec<FaceDetection>,
}

impl DetectionSnapshot {
    /// The state before any detection has completed: nothing to draw.
    pub fn empty() -> Self {
        Self {
            request: DetectionRequest::Faces,
            source_size: (0, 0),
            sequence: 0,
            faces: Vec::new(),
        }
    }

    /// Faces mapped into a surface of the given size.
    pub fn faces_for_surface(&self, surface: (u32, u32)) -> Vec<FaceDetection> {
        self.faces
            .iter()
            .map(|f| f.rescaled(self.source_size, surface))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox { x, y, width: w, height: h, confidence: 0.9 },
            landmarks: Some([(10.0, 20.0); 5]),
            expressions: None,
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 10.0, 10.0)), 0.0);
        // 5x10 overlap over a 150 union.
        assert!((a.iou(&bbox(5.0, 0.0, 10.0, 10.0)) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(bbox(0.0, 0.0, 0.0, 0.0).iou(&bbox(0.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_four_distinct_request_shapes() {
        let shapes: std::collections::HashSet<_> = [(false, false), (true, false), (false, true), (true, true)]
            .into_iter()
            .map(|(l, e)| DetectionRequest::from_toggles(l, e))
            .collect();
        assert_eq!(shapes.len(), 4);
    }

    #[test]
    fn test_request_flags_roundtrip_toggles() {
        for landmarks in [false, true] {
            for expressions in [false, true] {
                let req = DetectionRequest::from_toggles(landmarks, expressions);
                assert_eq!(req.wants_landmarks(), landmarks);
                assert_eq!(req.wants_expressions(), expressions);
            }
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let e = Expressions::from_logits(&[1.0, 3.0, 0.5, -1.0, 0.0, 0.0, 0.2, -2.0]).unwrap();
        let total: f32 = e.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(e.dominant().0, Expression::Happiness);
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let e = Expressions::from_logits(&[1000.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let (expression, p) = e.dominant();
        assert_eq!(expression, Expression::Neutral);
        assert!((p - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_logits_wrong_length() {
        assert!(Expressions::from_logits(&[0.0; 7]).is_none());
    }

    #[test]
    fn test_rescale_per_axis() {
        let f = face(64.0, 48.0, 128.0, 96.0).rescaled((640, 480), (480, 340));
        assert!((f.bbox.x - 48.0).abs() < 1e-4);
        assert!((f.bbox.width - 96.0).abs() < 1e-4);
        assert!((f.bbox.y - 34.0).abs() < 1e-4);
        assert!((f.bbox.height - 68.0).abs() < 1e-4);
        let lm = f.landmarks.unwrap()[0];
        assert!((lm.0 - 7.5).abs() < 1e-4);
        assert!((lm.1 - 14.1666).abs() < 1e-3);
    }

    #[test]
    fn test_rescale_identity_and_empty_source() {
        let f = face(1.0, 2.0, 3.0, 4.0);
        assert_eq!(f.rescaled((100, 100), (100, 100)), f);
        assert_eq!(f.rescaled((0, 0), (100, 100)), f);
    }
}
