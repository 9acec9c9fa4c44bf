//! Application settings, persisted as TOML.
//!
//! Missing file or unknown fields fall back to defaults; a malformed file
//! is an error the caller decides how to handle.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::paths::AppPaths;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Remote conversation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the backend, no trailing slash required.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts when fetching reply audio (transient failures only).
    pub fetch_retry_attempts: u32,
    /// Initial backoff between fetch attempts; doubles each retry.
    pub fetch_retry_backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            fetch_retry_attempts: 3,
            fetch_retry_backoff_ms: 250,
        }
    }
}

/// Local advisory speech-to-text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Model name; resolved as `<models_dir>/<model>.bin`.
    pub model: String,
    /// Forced transcription language.
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "ggml-tiny.en".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Audio capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target sample rate for captured audio.
    pub sample_rate: u32,
    /// Bound of the chunk channel between capture and the session loop.
    pub chunk_channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_channel_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub stt: SttConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load from the standard settings file; defaults if the file does not
    /// exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&AppPaths::resolve().settings_file())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::debug!("no settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        Ok(config)
    }

    /// Persist to the standard settings file, creating parent directories.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&AppPaths::resolve().settings_file())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, text)
            .with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
