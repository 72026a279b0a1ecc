//! Process-wide user state: toggles, the recorder, the preview slot, and the store.

use crate::config::Config;
use crate::frame_loop::{lock, OverlayToggles};
use crate::recorder::{AssetOrigin, Recorder, RecorderError, RecordingAsset};
use crate::store::{RecordingStore, StoreError};
use crate::surface::Surface;
use chrono::{DateTime, Utc};
use facetrack_core::OverlayOptions;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no recording to preview; record or restore one first")]
    NoPreview,
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write snapshot: {0}")]
    Snapshot(#[from] image::ImageError),
    #[error("failed to open player: {0}")]
    Player(#[source] std::io::Error),
}

/// Description of the preview slot, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewStatus {
    pub reference: String,
    pub mime: String,
    pub bytes: usize,
    pub frame_count: Option<usize>,
    pub origin: AssetOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudioStatus {
    pub landmarks: bool,
    pub expressions: bool,
    pub recording: bool,
    pub buffered_frames: usize,
    pub preview: Option<PreviewStatus>,
}

pub struct Studio {
    store: RecordingStore,
    recorder: Arc<Mutex<Recorder>>,
    toggles: Arc<OverlayToggles>,
    surface: Arc<Mutex<Surface>>,
    initial: OverlayOptions,
    download_name: String,
    preview: Option<RecordingAsset>,
}

impl Studio {
    /// Open the configured store and restore whatever it holds.
    pub fn open(config: &Config) -> Result<Self, StudioError> {
        let store = RecordingStore::open(&config.db_path)?;
        let (width, height) = config.surface_size();
        Self::with_store(
            store,
            Surface::new(width, height),
            Recorder::new(config.jpeg_quality),
            OverlayOptions {
                landmarks: config.landmarks,
                expressions: config.expressions,
            },
            config.download_name.clone(),
        )
    }

    pub fn with_store(
        store: RecordingStore,
        surface: Surface,
        recorder: Recorder,
        initial: OverlayOptions,
        download_name: String,
    ) -> Result<Self, StudioError> {
        let mut studio = Self {
            store,
            recorder: Arc::new(Mutex::new(recorder)),
            toggles: Arc::new(OverlayToggles::new(initial)),
            surface: Arc::new(Mutex::new(surface)),
            initial,
            download_name,
            preview: None,
        };
        studio.reload()?;
        Ok(studio)
    }

    pub fn toggles(&self) -> Arc<OverlayToggles> {
        self.toggles.clone()
    }

    pub fn recorder(&self) -> Arc<Mutex<Recorder>> {
        self.recorder.clone()
    }

    pub fn surface(&self) -> Arc<Mutex<Surface>> {
        self.surface.clone()
    }

    /// Set the landmark toggle, or flip it when `on` is `None`. Returns the new state.
    pub fn set_landmarks(&self, on: Option<bool>) -> bool {
        let on = on.unwrap_or(!self.toggles.snapshot().landmarks);
        self.toggles.set_landmarks(on);
        tracing::info!(on, "landmarks toggled");
        on
    }

    /// Set the expression toggle, or flip it when `on` is `None`. Returns the new state.
    pub fn set_expressions(&self, on: Option<bool>) -> bool {
        let on = on.unwrap_or(!self.toggles.snapshot().expressions);
        self.toggles.set_expressions(on);
        tracing::info!(on, "expressions toggled");
        on
    }

    pub fn start_recording(&self) -> Result<(), StudioError> {
        lock(&self.recorder).start()?;
        Ok(())
    }

    /// Stop the session and put the finished asset in the preview slot.
    pub fn stop_recording(&mut self) -> Result<&RecordingAsset, StudioError> {
        let asset = lock(&self.recorder).stop()?;
        Ok(self.preview.insert(asset))
    }

    pub fn preview(&self) -> Option<&RecordingAsset> {
        self.preview.as_ref()
    }

    fn require_preview(&self) -> Result<&RecordingAsset, StudioError> {
        self.preview.as_ref().ok_or(StudioError::NoPreview)
    }

    /// Write the preview to `path`, or to the default download name.
    pub fn download(&self, path: Option<&Path>) -> Result<PathBuf, StudioError> {
        let asset = self.require_preview()?;
        let path = path.map_or_else(|| PathBuf::from(&self.download_name), Path::to_path_buf);
        write_asset(asset, &path)?;
        tracing::info!(reference = %asset.reference, path = %path.display(), "recording downloaded");
        Ok(path)
    }

    /// Persist the preview into the single storage slot.
    pub fn save(&self) -> Result<DateTime<Utc>, StudioError> {
        let asset = self.require_preview()?;
        Ok(self.store.save(asset)?)
    }

    /// Remove the persisted recording, then reload.
    ///
    /// Returns whether anything was stored.
    pub fn clear(&mut self) -> Result<bool, StudioError> {
        let removed = self.store.clear()?;
        self.reload()?;
        Ok(removed)
    }

    /// Rebuild all user state from storage, as on a fresh start.
    ///
    /// Any active session is dropped, toggles return to their initial
    /// values, and the preview shows the persisted recording if there is one.
    pub fn reload(&mut self) -> Result<(), StudioError> {
        lock(&self.recorder).discard();
        self.toggles.set(self.initial);

        self.preview = match self.store.load() {
            Ok(Some(stored)) => {
                tracing::info!(
                    reference = %stored.asset.reference,
                    bytes = stored.asset.len(),
                    saved_at = %stored.saved_at,
                    "restored saved recording"
                );
                Some(stored.asset)
            }
            Ok(None) => None,
            Err(StoreError::Sqlite(e)) => return Err(StoreError::Sqlite(e).into()),
            Err(e) => {
                tracing::warn!(error = %e, "saved recording unreadable; not restored");
                None
            }
        };
        Ok(())
    }

    /// Write the preview to a temporary file, named by its reference.
    pub fn export_preview_to_temp(&self) -> Result<PathBuf, StudioError> {
        let asset = self.require_preview()?;
        let path = std::env::temp_dir().join(format!(
            "facetrack-{}.{}",
            asset.reference.id(),
            asset.extension()
        ));
        write_asset(asset, &path)?;
        Ok(path)
    }

    /// Open the preview in the system's default player.
    pub fn play(&self) -> Result<PathBuf, StudioError> {
        let path = self.export_preview_to_temp()?;
        open::that(&path).map_err(StudioError::Player)?;
        Ok(path)
    }

    /// Save the current surface as an image.
    pub fn snapshot(&self, path: &Path) -> Result<(), StudioError> {
        lock(&self.surface).save(path)?;
        Ok(())
    }

    pub fn status(&self) -> StudioStatus {
        let options = self.toggles.snapshot();
        let recorder = lock(&self.recorder);
        StudioStatus {
            landmarks: options.landmarks,
            expressions: options.expressions,
            recording: recorder.is_recording(),
            buffered_frames: recorder.buffered_chunks(),
            preview: self.preview.as_ref().map(|asset| PreviewStatus {
                reference: asset.reference.to_string(),
                mime: asset.mime.clone(),
                bytes: asset.len(),
                frame_count: asset.frame_count,
                origin: asset.origin,
            }),
        }
    }
}

fn write_asset(asset: &RecordingAsset, path: &Path) -> Result<(), StudioError> {
    std::fs::write(path, asset.bytes()).map_err(|source| StudioError::Write {
        path: path.to_path_buf(),
        source,
    })
}
