//! Engine settings, shared between the service and whoever tunes it.

use crate::detector::DetectionParams;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables read by the recognition service at the start of every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum recognition confidence (0–100) counted as attendance.
    pub recognition_threshold: f32,
    pub liveness_enabled: bool,
    pub mask_detection_enabled: bool,
    pub detection: DetectionParams,
    /// Run the detector every Nth frame.
    pub frame_skip_interval: u32,
    pub recognition_cache_ttl_ms: u64,
    pub mask_cache_ttl_ms: u64,
    /// Minimum confidence gain before a repeated `StudentDetected` event.
    pub event_confidence_margin: f32,
    /// Per-face recognition logging.
    pub logging_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recognition_threshold: 70.0,
            liveness_enabled: true,
            mask_detection_enabled: true,
            detection: DetectionParams::default(),
            frame_skip_interval: 2,
            recognition_cache_ttl_ms: 2000,
            mask_cache_ttl_ms: 3000,
            event_confidence_margin: 1.0,
            logging_enabled: true,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=100.0).contains(&self.recognition_threshold) {
            return Err(SettingsError::Invalid {
                field: "recognition_threshold",
                reason: format!("{} is outside 0..=100", self.recognition_threshold),
            });
        }
        if self.detection.scale_factor <= 1.0 {
            return Err(SettingsError::Invalid {
                field: "detection.scale_factor",
                reason: format!("{} must be greater than 1", self.detection.scale_factor),
            });
        }
        if self.event_confidence_margin < 0.0 {
            return Err(SettingsError::Invalid {
                field: "event_confidence_margin",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn recognition_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.recognition_cache_ttl_ms)
    }

    pub fn mask_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.mask_cache_ttl_ms)
    }
}

/// Settings handle shared across threads; updates apply on the next frame.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    /// Copy of the current settings.
    pub fn current(&self) -> Settings {
        self.0.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut *self.0.write());
    }

    pub fn replace(&self, settings: Settings) {
        *self.0.write() = settings;
    }
}
