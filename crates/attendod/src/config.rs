use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest window `chrono::TimeDelta::seconds` accepts.
const MAX_WINDOW_SECS: u64 = (i64::MAX / 1_000) as u64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ATTENDO_CONFIG`,
/// then `ATTENDO_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Known-face embedding table written by `attendo encode`.
    pub embeddings_path: PathBuf,
    /// SQLite employee database.
    pub db_path: PathBuf,
    /// Where per-identity face captures are written.
    pub capture_dir: PathBuf,
    /// Maximum Euclidean distance accepted as the same person.
    pub match_tolerance: f64,
    /// Window during which the same identity is not re-processed.
    pub cooldown_secs: u64,
    /// Minimum gap between two attendance marks for one employee.
    pub attendance_interval_secs: u64,
    /// Period of the frame-processing loop.
    pub process_interval_ms: u64,
    /// Pause between captured frames.
    pub capture_interval_ms: u64,
    /// Upper bound on any single store call; 0 disables the limit.
    pub store_timeout_secs: u64,
    /// Edge length of the face image attached to detection events.
    pub face_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: PathBuf::from("models"),
            embeddings_path: PathBuf::from("data/encodings.json"),
            db_path: PathBuf::from("data/attendance.db"),
            capture_dir: PathBuf::from("data/Capture_Images"),
            match_tolerance: attendo_core::DEFAULT_TOLERANCE,
            cooldown_secs: 3,
            attendance_interval_secs: 30,
            process_interval_ms: 100,
            capture_interval_ms: 30,
            store_timeout_secs: 10,
            face_size: 216,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ATTENDO_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `ATTENDO_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ATTENDO_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ATTENDO_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDO_EMBEDDINGS_PATH") {
            self.embeddings_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDO_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDO_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(v);
        }
        override_parsed(&lookup, "ATTENDO_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&lookup, "ATTENDO_CAMERA_HEIGHT", &mut self.camera_height);
        override_parsed(&lookup, "ATTENDO_MATCH_TOLERANCE", &mut self.match_tolerance);
        override_parsed(&lookup, "ATTENDO_COOLDOWN_SECS", &mut self.cooldown_secs);
        override_parsed(&lookup, "ATTENDO_ATTENDANCE_INTERVAL_SECS", &mut self.attendance_interval_secs);
        override_parsed(&lookup, "ATTENDO_PROCESS_INTERVAL_MS", &mut self.process_interval_ms);
        override_parsed(&lookup, "ATTENDO_CAPTURE_INTERVAL_MS", &mut self.capture_interval_ms);
        override_parsed(&lookup, "ATTENDO_STORE_TIMEOUT_SECS", &mut self.store_timeout_secs);
        override_parsed(&lookup, "ATTENDO_FACE_SIZE", &mut self.face_size);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_tolerance.is_nan() || self.match_tolerance <= 0.0 {
            return Err(ConfigError::Invalid("match_tolerance must be greater than zero".into()));
        }
        if self.process_interval_ms == 0 {
            return Err(ConfigError::Invalid("process_interval_ms must be greater than zero".into()));
        }
        if self.face_size == 0 {
            return Err(ConfigError::Invalid("face_size must be greater than zero".into()));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(ConfigError::Invalid("camera resolution must be non-zero".into()));
        }
        for (name, secs) in [
            ("cooldown_secs", self.cooldown_secs),
            ("attendance_interval_secs", self.attendance_interval_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_WINDOW_SECS}"
                )));
            }
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(attendo_core::SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(attendo_core::ARCFACE_MODEL_FILE)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(value) = lookup(key).and_then(|v| v.parse().ok()) {
        *target = value;
    }
}
