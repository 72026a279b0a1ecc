use facetrack_core::{AnalyzerError, DetectionRequest, DetectionSnapshot, FaceAnalyzer};
use facetrack_hw::Frame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    /// Analyze a live frame and publish the result as the latest snapshot.
    Track {
        frame: Frame,
        request: DetectionRequest,
    },
    /// Analyze one frame and reply directly, leaving the published snapshot alone.
    AnalyzeOnce {
        frame: Frame,
        request: DetectionRequest,
        reply: oneshot::Sender<Result<DetectionSnapshot, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    snapshots: watch::Receiver<Arc<DetectionSnapshot>>,
}

impl EngineHandle {
    /// Hand a live frame to the engine without waiting.
    ///
    /// Returns `false` when the engine is still busy with an earlier frame;
    /// the frame is then dropped rather than queued.
    pub fn submit(&self, frame: Frame, request: DetectionRequest) -> bool {
        match self.tx.try_send(EngineRequest::Track { frame, request }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("engine thread gone; frame not analyzed");
                false
            }
        }
    }

    /// Analyze a single frame and wait for the result.
    pub async fn analyze(
        &self,
        frame: Frame,
        request: DetectionRequest,
    ) -> Result<DetectionSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::AnalyzeOnce {
                frame,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// The most recently published detection result.
    pub fn latest(&self) -> Arc<DetectionSnapshot> {
        self.snapshots.borrow().clone()
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer is moved onto the thread; ONNX sessions need `&mut` access
/// and inference is blocking, so it never runs on the async runtime.
pub fn spawn_engine<A>(mut analyzer: A) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + 'static,
{
    // Capacity 1: at most one live frame waits while another is analyzed.
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(DetectionSnapshot::empty()));

    std::thread::Builder::new()
        .name("facetrack-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Track { frame, request } => {
                        match run_analysis(&mut analyzer, &frame, request) {
                            // No faces: keep showing the last boxes until a face is found again.
                            Ok(snapshot) if snapshot.faces.is_empty() => {
                                tracing::trace!(seq = frame.sequence, "no faces; holding previous result");
                            }
                            Ok(snapshot) => {
                                snapshot_tx.send_replace(Arc::new(snapshot));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, seq = frame.sequence, "detection failed; keeping previous result");
                            }
                        }
                    }
                    EngineRequest::AnalyzeOnce {
                        frame,
                        request,
                        reply,
                    } => {
                        let _ = reply.send(run_analysis(&mut analyzer, &frame, request));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        snapshots: snapshot_rx,
    })
}

fn run_analysis<A: FaceAnalyzer>(
    analyzer: &mut A,
    frame: &Frame,
    request: DetectionRequest,
) -> Result<DetectionSnapshot, EngineError> {
    let started = std::time::Instant::now();
    let faces = analyzer.analyze(&frame.data, frame.width, frame.height, request)?;
    tracing::trace!(
        seq = frame.sequence,
        faces = faces.len(),
        ?request,
        elapsed_ms = started.elapsed().as_millis() as u64,
        frame_age_ms = frame.timestamp.elapsed().as_millis() as u64,
        "frame analyzed"
    );
    Ok(DetectionSnapshot {
        request,
        source_size: (frame.width, frame.height),
        sequence: frame.sequence,
        faces,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facetrack_core::analyzer::shape_to_request;
    use facetrack_core::{BoundingBox, Expressions, FaceDetection};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Finds one face in every frame, shaped to the request, unless `blank` is set.
    #[derive(Default, Clone)]
    pub(crate) struct ScriptedAnalyzer {
        pub(crate) seen: Arc<Mutex<Vec<DetectionRequest>>>,
        pub(crate) fail: bool,
        pub(crate) blank: Arc<AtomicBool>,
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn analyze(
            &mut self,
            _rgb: &[u8],
            width: u32,
            height: u32,
            request: DetectionRequest,
        ) -> Result<Vec<FaceDetection>, AnalyzerError> {
            self.seen.lock().unwrap().push(request);
            if self.fail {
                return Err(AnalyzerError::Detector(
                    facetrack_core::detector::DetectorError::InferenceFailed("scripted".into()),
                ));
            }
            if self.blank.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            let face = FaceDetection {
                bbox: BoundingBox {
                    x: width as f32 / 4.0,
                    y: height as f32 / 4.0,
                    width: width as f32 / 2.0,
                    height: height as f32 / 2.0,
                    confidence: 0.9,
                },
                landmarks: Some([(width as f32 / 2.0, height as f32 / 2.0); 5]),
                expressions: Expressions::from_logits(&[0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            };
            Ok(shape_to_request(vec![face], request))
        }
    }

    pub(crate) fn frame(sequence: u32) -> Frame {
        Frame::from_rgb(vec![90; 64 * 48 * 3], 64, 48, sequence).unwrap()
    }

    /// Block until the published snapshot satisfies `pred`.
    pub(crate) fn wait_for(engine: &EngineHandle, pred: impl Fn(&DetectionSnapshot) -> bool) -> Arc<DetectionSnapshot> {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = engine.latest();
            if pred(&snapshot) {
                return snapshot;
            }
            assert!(std::time::Instant::now() < deadline, "engine never published the expected snapshot");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_starts_with_empty_snapshot() {
        let engine = spawn_engine(ScriptedAnalyzer::default()).unwrap();
        let snapshot = engine.latest();
        assert!(snapshot.faces.is_empty());
        assert_eq!(snapshot.source_size, (0, 0));
    }

    #[test]
    fn test_submit_publishes_snapshot() {
        let engine = spawn_engine(ScriptedAnalyzer::default()).unwrap();
        assert!(engine.submit(frame(7), DetectionRequest::FacesWithLandmarks));

        let snapshot = wait_for(&engine, |s| s.sequence == 7);
        assert_eq!(snapshot.request, DetectionRequest::FacesWithLandmarks);
        assert_eq!(snapshot.source_size, (64, 48));
        assert_eq!(snapshot.faces.len(), 1);
        assert!(snapshot.faces[0].landmarks.is_some());
        assert!(snapshot.faces[0].expressions.is_none());
    }

    #[test]
    fn test_failure_keeps_previous_snapshot() {
        let analyzer = ScriptedAnalyzer { fail: true, ..Default::default() };
        let seen = analyzer.seen.clone();
        let engine = spawn_engine(analyzer).unwrap();
        assert!(engine.submit(frame(3), DetectionRequest::Faces));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.latest().sequence, 0);
    }

    #[test]
    fn test_empty_result_keeps_previous_faces() {
        let analyzer = ScriptedAnalyzer::default();
        let (seen, blank) = (analyzer.seen.clone(), analyzer.blank.clone());
        let engine = spawn_engine(analyzer).unwrap();

        assert!(engine.submit(frame(1), DetectionRequest::Faces));
        wait_for(&engine, |s| s.sequence == 1);

        blank.store(true, Ordering::SeqCst);
        assert!(engine.submit(frame(2), DetectionRequest::Faces));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 2 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));

        let held = engine.latest();
        assert_eq!(held.sequence, 1);
        assert_eq!(held.faces.len(), 1);

        blank.store(false, Ordering::SeqCst);
        assert!(engine.submit(frame(3), DetectionRequest::Faces));
        assert_eq!(wait_for(&engine, |s| s.sequence == 3).faces.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_once_replies_without_publishing() {
        let engine = spawn_engine(ScriptedAnalyzer::default()).unwrap();
        let snapshot = engine
            .analyze(frame(11), DetectionRequest::FacesWithLandmarksAndExpressions)
            .await
            .unwrap();
        assert_eq!(snapshot.sequence, 11);
        assert!(snapshot.faces[0].expressions.is_some());
        assert_eq!(engine.latest().sequence, 0);
    }

    #[tokio::test]
    async fn test_analyze_once_propagates_failure() {
        let engine = spawn_engine(ScriptedAnalyzer { fail: true, ..Default::default() }).unwrap();
        let result = engine.analyze(frame(1), DetectionRequest::Faces).await;
        assert!(matches!(result, Err(EngineError::Analyzer(_))));
    }
}
