use rollcall_core::{Settings, SettingsError};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// OpenCV Haar cascade XML for frontal faces.
    pub cascade_path: PathBuf,
    /// Roster manifest (TOML).
    pub roster_path: PathBuf,
    /// Optional engine settings file (TOML).
    pub settings_path: Option<PathBuf>,
    /// Consecutive failed reads before the capture loop gives up.
    pub max_read_failures: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Where to write the last annotated frame on shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            cascade_path: env_path("ROLLCALL_CASCADE_PATH")
                .unwrap_or_else(|| data_dir.join("haarcascade_frontalface_default.xml")),
            roster_path: env_path("ROLLCALL_ROSTER").unwrap_or_else(|| data_dir.join("roster.toml")),
            settings_path: env_path("ROLLCALL_SETTINGS"),
            max_read_failures: env_u32("ROLLCALL_MAX_READ_FAILURES", 100),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            snapshot_path: env_path("ROLLCALL_SNAPSHOT_PATH"),
        }
    }

    /// Engine settings: the settings file if configured, then env overrides.
    pub fn load_settings(&self) -> Result<Settings, SettingsError> {
        let mut settings = match &self.settings_path {
            Some(path) => Settings::from_toml_file(path)?,
            None => Settings::default(),
        };
        apply_env_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    settings.recognition_threshold =
        env_f32("ROLLCALL_RECOGNITION_THRESHOLD", settings.recognition_threshold);
    settings.liveness_enabled = env_bool("ROLLCALL_LIVENESS", settings.liveness_enabled);
    settings.mask_detection_enabled =
        env_bool("ROLLCALL_MASK_DETECTION", settings.mask_detection_enabled);
    settings.frame_skip_interval = env_u32("ROLLCALL_FRAME_SKIP", settings.frame_skip_interval);
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
