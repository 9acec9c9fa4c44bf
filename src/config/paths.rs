//! Application directories and well-known file locations.

use std::path::PathBuf;

const APP_NAME: &str = "voicechat";

/// Resolved filesystem locations for config and model files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    /// Resolve under the platform config directory
    /// (`~/.config/voicechat` on Linux), falling back to the current
    /// directory when the platform dir cannot be determined.
    pub fn resolve() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_dir: base.join(APP_NAME),
        }
    }

    /// From an explicit base directory (tests).
    pub fn with_base(base: PathBuf) -> Self {
        Self { config_dir: base }
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    /// The TOML settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    /// Directory holding downloaded Whisper GGML models.
    pub fn models_dir(&self) -> PathBuf {
        self.config_dir.join("models")
    }
}
