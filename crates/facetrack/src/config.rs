use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Application configuration.
///
/// Layered as defaults, then an optional TOML file, then `FACETRACK_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frames discarded after the stream starts while exposure settles.
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name inside `model_dir`.
    pub detector_model: String,
    /// FER+ model file name inside `model_dir`.
    pub expression_model: String,
    /// SQLite database holding the persisted recording.
    pub db_path: PathBuf,
    pub surface_width: u32,
    pub surface_height: u32,
    /// Target frame loop rate in frames per second.
    pub frame_rate: u32,
    /// JPEG quality (1–100) of recorded frames.
    pub jpeg_quality: u8,
    /// File name used by `download` when no path is given.
    pub download_name: String,
    /// Initial state of the landmark toggle.
    pub landmarks: bool,
    /// Initial state of the expression toggle.
    pub expressions: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facetrack");

        Self {
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            model_dir: facetrack_core::default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            expression_model: "emotion-ferplus-8.onnx".to_string(),
            db_path: data_dir.join("recordings.db"),
            surface_width: 480,
            surface_height: 340,
            frame_rate: 30,
            jpeg_quality: 80,
            download_name: "face-tracked-video.mjpeg".to_string(),
            landmarks: false,
            expressions: false,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACETRACK_*` overrides. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACETRACK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACETRACK_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACETRACK_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        parse_into(&lookup, "FACETRACK_WARMUP_FRAMES", &mut self.warmup_frames);
        parse_into(&lookup, "FACETRACK_FRAME_RATE", &mut self.frame_rate);
        parse_into(&lookup, "FACETRACK_JPEG_QUALITY", &mut self.jpeg_quality);
        if let Some(v) = lookup("FACETRACK_LANDMARKS") {
            self.landmarks = v != "0";
        }
        if let Some(v) = lookup("FACETRACK_EXPRESSIONS") {
            self.expressions = v != "0";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface size {}x{} must be non-zero",
                self.surface_width, self.surface_height
            )));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid("frame_rate must be at least 1".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality {} outside 1..=100",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the FER+ expression model.
    pub fn expression_model_path(&self) -> String {
        self.model_dir
            .join(&self.expression_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface_width, self.surface_height)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("camera_device = \"/dev/video4\"\nframe_rate = 15\n").unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.frame_rate, 15);
        assert_eq!(config.surface_size(), (480, 340));
        assert_eq!(config.download_name, "face-tracked-video.mjpeg");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACETRACK_CAMERA_DEVICE", "/dev/video9"),
            ("FACETRACK_FRAME_RATE", "12"),
            ("FACETRACK_JPEG_QUALITY", "not-a-number"),
            ("FACETRACK_LANDMARKS", "1"),
            ("FACETRACK_EXPRESSIONS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            expressions: true,
            ..Config::default()
        };
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.camera_device, "/dev/video9");
        assert_eq!(config.frame_rate, 12);
        assert_eq!(config.jpeg_quality, 80);
        assert!(config.landmarks);
        assert!(!config.expressions);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = Config {
            frame_rate: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facetrack.toml");
        std::fs::write(&path, "surface_width = 640\nsurface_height = 480\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.surface_size(), (640, 480));
    }

    #[test]
    fn test_load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "frame_rate = \"fast\"").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            ..Config::default()
        };
        assert_eq!(config.detector_model_path(), "/models/det_10g.onnx");
        assert_eq!(config.expression_model_path(), "/models/emotion-ferplus-8.onnx");
    }
}
