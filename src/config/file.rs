//! TOML configuration file loading
//!
//! Supports `~/.config/study-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct StudyVoiceConfigFile {
    /// Identity the daily greeting is tracked under
    #[serde(default)]
    pub user_id: Option<String>,

    /// Study-assistant API
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Voice session tuning
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Backend API configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// API base URL (e.g. `http://localhost:8000/api`)
    pub base_url: Option<String>,

    /// Bearer token for the signed-in student
    pub token: Option<String>,
}

/// Voice session configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Recognition language (ISO-639-1)
    pub language: Option<String>,

    /// Seconds to wait for a recognized utterance
    pub capture_timeout_secs: Option<u64>,

    /// Seconds to wait for a backend reply
    pub reply_timeout_secs: Option<u64>,

    /// Longest single utterance to record
    pub max_utterance_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `StudyVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> StudyVoiceConfigFile {
    config_file_path().map_or_else(StudyVoiceConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> StudyVoiceConfigFile {
    if !path.exists() {
        return StudyVoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                StudyVoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            StudyVoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/study-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("study-voice").join("config.toml"))
}
