//! Recording of the composited surface into a single playable asset.
//!
//! A session turns every surface frame it is fed into one encoded chunk.
//! Stopping concatenates the buffered chunks into a [`RecordingAsset`] and
//! empties the buffer.

use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// MIME type of a Motion-JPEG stream: back-to-back baseline JPEG images.
pub const MJPEG_MIME: &str = "video/x-motion-jpeg";

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("a recording session is already active")]
    AlreadyRecording,
    #[error("no recording session is active")]
    NotRecording,
    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Turns one surface image into one chunk of the output stream.
pub trait ChunkEncoder: Send {
    fn mime(&self) -> &'static str;
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<u8>, RecorderError>;
}

/// Encodes each frame as a standalone JPEG; their concatenation is MJPEG.
pub struct MjpegEncoder {
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl ChunkEncoder for MjpegEncoder {
    fn mime(&self) -> &'static str {
        MJPEG_MIME
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<u8>, RecorderError> {
        let mut chunk = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut chunk, self.quality)
            .encode_image(image)?;
        Ok(chunk)
    }
}

/// Transient handle to an in-memory asset, shown to the user in place of the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AssetRef(Uuid);

impl AssetRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for AssetRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset:{}", self.0)
    }
}

/// Where a previewed asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOrigin {
    Session,
    Storage,
}

/// One finished recording, ready for preview, download, or persistence.
#[derive(Debug, Clone)]
pub struct RecordingAsset {
    pub reference: AssetRef,
    pub mime: String,
    bytes: Arc<[u8]>,
    /// Frames encoded into the asset; unknown for assets read back from storage.
    pub frame_count: Option<usize>,
    pub origin: AssetOrigin,
}

impl RecordingAsset {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>, frame_count: Option<usize>, origin: AssetOrigin) -> Self {
        Self {
            reference: AssetRef::new(),
            mime: mime.into(),
            bytes: bytes.into(),
            frame_count,
            origin,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            MJPEG_MIME => "mjpeg",
            _ => "bin",
        }
    }
}

struct RecordingSession {
    encoder: Box<dyn ChunkEncoder>,
    chunks: Vec<Vec<u8>>,
    started_at: Instant,
}

/// Owns at most one recording session.
pub struct Recorder {
    session: Option<RecordingSession>,
    jpeg_quality: u8,
}

impl Recorder {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            session: None,
            jpeg_quality,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Chunks buffered so far in the active session.
    pub fn buffered_chunks(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.chunks.len())
    }

    /// Start a session with the default MJPEG encoder.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        let encoder = MjpegEncoder::new(self.jpeg_quality);
        self.start_with(Box::new(encoder))
    }

    pub fn start_with(&mut self, encoder: Box<dyn ChunkEncoder>) -> Result<(), RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        tracing::info!(mime = encoder.mime(), "recording started");
        self.session = Some(RecordingSession {
            encoder,
            chunks: Vec::new(),
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Encode one surface frame into the active session.
    ///
    /// Returns `false` without doing anything when no session is active.
    pub fn push_frame(&mut self, image: &RgbImage) -> Result<bool, RecorderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        let chunk = session.encoder.encode(image)?;
        session.chunks.push(chunk);
        Ok(true)
    }

    /// Finish the session: concatenate the chunks into one asset and clear the buffer.
    ///
    /// A session that saw no frames still yields an (empty) asset.
    pub fn stop(&mut self) -> Result<RecordingAsset, RecorderError> {
        let session = self.session.take().ok_or(RecorderError::NotRecording)?;
        let frame_count = session.chunks.len();
        let bytes = session.chunks.concat();

        let asset = RecordingAsset::new(session.encoder.mime(), bytes, Some(frame_count), AssetOrigin::Session);
        tracing::info!(
            reference = %asset.reference,
            frames = frame_count,
            bytes = asset.len(),
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "recording stopped"
        );
        Ok(asset)
    }

    /// Drop any active session without producing an asset.
    pub fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(chunks = session.chunks.len(), "recording discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(shade: u8) -> RgbImage {
        RgbImage::from_pixel(16, 12, image::Rgb([shade, shade, shade]))
    }

    #[test]
    fn test_start_then_stop_without_frames_yields_asset() {
        let mut recorder = Recorder::new(80);
        recorder.start().unwrap();
        let asset = recorder.stop().unwrap();
        assert!(asset.is_empty());
        assert_eq!(asset.frame_count, Some(0));
        assert_eq!(asset.mime, MJPEG_MIME);
        assert_eq!(asset.origin, AssetOrigin::Session);
        assert!(asset.reference.to_string().starts_with("asset:"));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut recorder = Recorder::new(80);
        recorder.start().unwrap();
        assert!(recorder.push_frame(&image(10)).unwrap());
        assert!(recorder.push_frame(&image(200)).unwrap());
        assert_eq!(recorder.buffered_chunks(), 2);

        let asset = recorder.stop().unwrap();
        assert_eq!(asset.frame_count, Some(2));
        // Each chunk is a complete JPEG: SOI at the start, EOI at the end.
        let bytes = asset.bytes();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
        let soi = bytes.windows(3).filter(|w| **w == [0xFF, 0xD8, 0xFF]).count();
        assert_eq!(soi, 2);
    }

    #[test]
    fn test_buffer_cleared_after_stop() {
        let mut recorder = Recorder::new(80);
        recorder.start().unwrap();
        recorder.push_frame(&image(50)).unwrap();
        recorder.stop().unwrap();

        recorder.start().unwrap();
        assert_eq!(recorder.buffered_chunks(), 0);
        assert_eq!(recorder.stop().unwrap().frame_count, Some(0));
    }

    #[test]
    fn test_single_session_guard() {
        let mut recorder = Recorder::new(80);
        assert!(matches!(recorder.stop(), Err(RecorderError::NotRecording)));
        recorder.start().unwrap();
        assert!(matches!(recorder.start(), Err(RecorderError::AlreadyRecording)));
    }

    #[test]
    fn test_push_while_idle_is_ignored() {
        let mut recorder = Recorder::new(80);
        assert!(!recorder.push_frame(&image(0)).unwrap());
    }

    #[test]
    fn test_discard_drops_session() {
        let mut recorder = Recorder::new(80);
        recorder.start().unwrap();
        recorder.push_frame(&image(0)).unwrap();
        recorder.discard();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.buffered_chunks(), 0);
    }

    #[test]
    fn test_each_asset_gets_fresh_reference() {
        let a = RecordingAsset::new(MJPEG_MIME, vec![], None, AssetOrigin::Session);
        let b = RecordingAsset::new(MJPEG_MIME, vec![], None, AssetOrigin::Session);
        assert_ne!(a.reference, b.reference);
        assert_eq!(a.extension(), "mjpeg");
    }
}
