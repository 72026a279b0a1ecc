//! The capture → render → detect loop that drives the live view.
//!
//! Each tick reads the toggles once, draws the newest camera frame with
//! whatever detection result is currently held, feeds the recorder, and
//! hands the frame to the engine without waiting for it. The overlay
//! therefore trails the image by one detection cycle.

use crate::engine::EngineHandle;
use crate::recorder::Recorder;
use crate::surface::Surface;
use facetrack_core::{DetectionRequest, OverlayError, OverlayOptions};
use facetrack_hw::{CameraError, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The two overlay switches, written by the console and read by the loop.
#[derive(Debug, Default)]
pub struct OverlayToggles {
    landmarks: AtomicBool,
    expressions: AtomicBool,
}

impl OverlayToggles {
    pub fn new(initial: OverlayOptions) -> Self {
        let toggles = Self::default();
        toggles.set(initial);
        toggles
    }

    /// Both switches as of now. The loop calls this once per tick.
    pub fn snapshot(&self) -> OverlayOptions {
        OverlayOptions {
            landmarks: self.landmarks.load(Ordering::Relaxed),
            expressions: self.expressions.load(Ordering::Relaxed),
        }
    }

    pub fn set(&self, options: OverlayOptions) {
        self.set_landmarks(options.landmarks);
        self.set_expressions(options.expressions);
    }

    pub fn set_landmarks(&self, on: bool) {
        self.landmarks.store(on, Ordering::Relaxed);
    }

    pub fn set_expressions(&self, on: bool) {
        self.expressions.store(on, Ordering::Relaxed);
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub sequence: u32,
    /// Toggle state read at the start of the tick; drives both the overlay
    /// and the detection request.
    pub options: OverlayOptions,
    pub request: DetectionRequest,
    /// Whether the engine accepted the frame (it drops frames while busy).
    pub submitted: bool,
    /// Whether the frame went into an active recording.
    pub recorded: bool,
    /// Overlay outcome. Errors here are shape mismatches and are not fatal.
    pub overlay: Result<(), OverlayError>,
}

pub struct FrameLoop<S> {
    source: S,
    engine: EngineHandle,
    surface: Arc<Mutex<Surface>>,
    toggles: Arc<OverlayToggles>,
    recorder: Arc<Mutex<Recorder>>,
}

impl<S: FrameSource> FrameLoop<S> {
    pub fn new(
        source: S,
        engine: EngineHandle,
        surface: Arc<Mutex<Surface>>,
        toggles: Arc<OverlayToggles>,
        recorder: Arc<Mutex<Recorder>>,
    ) -> Self {
        Self {
            source,
            engine,
            surface,
            toggles,
            recorder,
        }
    }

    /// Run one capture/render/detect cycle.
    pub fn tick(&mut self) -> Result<FrameReport, CameraError> {
        let options = self.toggles.snapshot();
        let request = options.request();

        let frame = self.source.next_frame()?;
        let sequence = frame.sequence;
        let held = self.engine.latest();

        let (overlay, recorded) = {
            let mut surface = lock(&self.surface);
            surface.draw_frame(&frame);
            let overlay = surface.draw_overlay(&held, options);
            if let Err(e) = &overlay {
                // Held result predates a toggle change; next cycle catches up.
                tracing::debug!(seq = sequence, error = %e, "overlay skipped");
            }

            let recorded = match lock(&self.recorder).push_frame(surface.image()) {
                Ok(recorded) => recorded,
                Err(e) => {
                    tracing::warn!(seq = sequence, error = %e, "failed to record frame");
                    false
                }
            };
            (overlay, recorded)
        };

        let submitted = self.engine.submit(frame, request);

        Ok(FrameReport {
            sequence,
            options,
            request,
            submitted,
            recorded,
            overlay,
        })
    }

    /// Tick at `interval` until `stop` is raised or capture fails.
    ///
    /// Returns the number of frames drawn.
    pub fn run(mut self, interval: Duration, stop: &AtomicBool) -> Result<u64, CameraError> {
        let mut frames = 0u64;
        let mut submitted = 0u64;
        let mut recorded = 0u64;
        let mut overlay_skips = 0u64;
        let mut next_tick = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let report = self.tick()?;
            tracing::trace!(
                seq = report.sequence,
                request = ?report.request,
                landmarks = report.options.landmarks,
                expressions = report.options.expressions,
                submitted = report.submitted,
                "tick"
            );
            frames += 1;
            submitted += u64::from(report.submitted);
            recorded += u64::from(report.recorded);
            overlay_skips += u64::from(report.overlay.is_err());

            next_tick += interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Running behind: start the next tick now instead of bursting.
                next_tick = now;
            }
        }

        tracing::info!(frames, submitted, recorded, overlay_skips, "frame loop stopped");
        Ok(frames)
    }
}

/// The running frame thread and the size of the frames it captures.
pub struct FrameLoopHandle {
    thread: JoinHandle<Result<u64, CameraError>>,
    source_size: (u32, u32),
}

impl FrameLoopHandle {
    /// Width and height reported by the opened source.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// True once the loop has returned, after a stop request or a capture error.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> std::thread::Result<Result<u64, CameraError>> {
        self.thread.join()
    }
}

/// Open the source on a new thread and run the loop there.
///
/// Waits until the source is open so that camera errors surface here
/// instead of inside the thread.
pub fn spawn_frame_loop<S, F>(
    open_source: F,
    engine: EngineHandle,
    surface: Arc<Mutex<Surface>>,
    toggles: Arc<OverlayToggles>,
    recorder: Arc<Mutex<Recorder>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<FrameLoopHandle, CameraError>
where
    S: FrameSource,
    F: FnOnce() -> Result<S, CameraError> + Send + 'static,
{
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name("facetrack-frames".into())
        .spawn(move || {
            let source = match open_source() {
                Ok(source) => {
                    let _ = ready_tx.send(Ok(source.dimensions()));
                    source
                }
                Err(e) => {
                    let message = e.to_string();
                    let _ = ready_tx.send(Err(e));
                    return Err(CameraError::CaptureFailed(message));
                }
            };
            let (width, height) = source.dimensions();
            let surface_size = lock(&surface).size();
            tracing::info!(width, height, ?surface_size, ?interval, "frame loop started");
            FrameLoop::new(source, engine, surface, toggles, recorder).run(interval, &stop)
        })
        .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn frame thread: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(source_size)) => Ok(FrameLoopHandle { thread, source_size }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CameraError::CaptureFailed("frame thread exited during startup".into())),
    }
}

/// Lock a mutex shared with the frame thread, recovering from poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
