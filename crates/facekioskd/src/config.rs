use facekiosk_client::{UnknownEndpoint, UploadEndpoint};
use facekiosk_core::{env_or, CaptureConfig, ConfigError};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
    #[error(transparent)]
    Endpoint(#[from] UnknownEndpoint),
    #[error("FACEKIOSK_LANDMARK_CMD (or landmark_command) must be set")]
    MissingLandmarkCommand,
    #[error("FACEKIOSK_API_URL (or api_url) must be set")]
    MissingApiUrl,
}

/// Daemon configuration: optional TOML file, then `FACEKIOSK_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Backend base URL; endpoints are resolved relative to it.
    pub api_url: String,
    /// Command line that starts the landmark sidecar.
    pub landmark_command: String,
    /// Detection tick period in milliseconds.
    pub tick_ms: u64,
    /// JPEG quality for captured stills (1-100).
    pub jpeg_quality: u8,
    /// Trigger backend training after each successful upload.
    pub trigger_training: bool,
    /// Backend route for finished sets (`compare` or `single`).
    pub upload_endpoint: UploadEndpoint,
    /// Logo stamped over gallery photos served to visitors.
    pub watermark_logo: Option<PathBuf>,
    /// Number of frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    pub capture: CaptureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            api_url: String::new(),
            landmark_command: String::new(),
            tick_ms: 100,
            jpeg_quality: 90,
            trigger_training: true,
            upload_endpoint: UploadEndpoint::default(),
            watermark_logo: None,
            warmup_frames: 4,
            capture: CaptureConfig::default(),
        }
    }
}

impl Config {
    /// Load from `FACEKIOSK_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, LoadError> {
        let mut config = match std::env::var("FACEKIOSK_CONFIG") {
            Ok(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loaded config file");
                Self::from_toml(&text)?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACEKIOSK_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers keep the current value; unknown enum names are
    /// rejected.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), LoadError> {
        if let Some(v) = lookup("FACEKIOSK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEKIOSK_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("FACEKIOSK_LANDMARK_CMD") {
            self.landmark_command = v;
        }
        self.tick_ms = env_or(&lookup, "FACEKIOSK_TICK_MS", self.tick_ms);
        self.jpeg_quality = env_or(&lookup, "FACEKIOSK_JPEG_QUALITY", self.jpeg_quality);
        if let Some(v) = lookup("FACEKIOSK_TRIGGER_TRAINING") {
            self.trigger_training = v.trim() != "0";
        }
        self.warmup_frames = env_or(&lookup, "FACEKIOSK_WARMUP_FRAMES", self.warmup_frames);
        if let Some(v) = lookup("FACEKIOSK_UPLOAD_ENDPOINT") {
            self.upload_endpoint = v.parse()?;
        }
        if let Some(v) = lookup("FACEKIOSK_WATERMARK_LOGO") {
            self.watermark_logo = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }

        self.capture.apply_env(&lookup)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.api_url.trim().is_empty() {
            return Err(LoadError::MissingApiUrl);
        }
        if self.landmark_command.trim().is_empty() {
            return Err(LoadError::MissingLandmarkCommand);
        }
        self.capture.validate()?;
        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms.max(1))
    }
}
