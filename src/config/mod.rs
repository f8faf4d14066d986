//! Configuration management for the voice tutor

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;

/// Default study-assistant API root
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Default bound on capture and network waits
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default cap on a single recorded utterance
const DEFAULT_MAX_UTTERANCE_SECS: u64 = 15;

/// Voice tutor configuration
#[derive(Debug)]
pub struct Config {
    /// Identity the daily greeting gate is keyed by
    pub user_id: String,

    /// Path to data directory (greeting ledger database)
    pub data_dir: PathBuf,

    /// Study-assistant API
    pub backend: BackendConfig,

    /// Voice session configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Study-assistant API configuration
#[derive(Debug)]
pub struct BackendConfig {
    /// API base URL
    pub base_url: String,

    /// Bearer token of the signed-in student
    pub token: Option<SecretString>,
}

/// Voice session configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model for Whisper (e.g. "whisper-1")
    pub stt_model: String,

    /// Recognition language
    pub language: String,

    /// Bound on one capture attempt
    pub capture_timeout: Duration,

    /// Bound on one backend request
    pub reply_timeout: Duration,

    /// Longest single utterance to record
    pub max_utterance: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            language: "en".to_string(),
            capture_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            reply_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_utterance: Duration::from_secs(DEFAULT_MAX_UTTERANCE_SECS),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper)
    pub openai: Option<SecretString>,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();

        let backend = BackendConfig {
            base_url: std::env::var("STUDY_API_URL")
                .ok()
                .or(fc.backend.base_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token: std::env::var("STUDY_API_TOKEN")
                .ok()
                .or(fc.backend.token)
                .map(SecretString::from),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_model: std::env::var("STUDY_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            language: fc.voice.language.unwrap_or(defaults.language),
            capture_timeout: secs_or(
                env_u64("STUDY_CAPTURE_TIMEOUT").or(fc.voice.capture_timeout_secs),
                defaults.capture_timeout,
            ),
            reply_timeout: secs_or(
                env_u64("STUDY_REPLY_TIMEOUT").or(fc.voice.reply_timeout_secs),
                defaults.reply_timeout,
            ),
            max_utterance: secs_or(fc.voice.max_utterance_secs, defaults.max_utterance),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.api_keys.openai)
                .map(SecretString::from),
        };

        let user_id = std::env::var("STUDY_USER_ID")
            .ok()
            .or(fc.user_id)
            .unwrap_or_else(|| "local".to_string());

        // ~/.local/share/study-voice on Linux
        let data_dir = std::env::var("STUDY_DATA_DIR").map_or_else(
            |_| {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from(".study-voice"),
                    |d| d.data_dir().join("study-voice"),
                )
            },
            PathBuf::from,
        );
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            user_id,
            data_dir,
            backend,
            voice,
            api_keys,
        })
    }

    /// Path of the greeting ledger database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("study-voice.db")
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Zero is treated as unset
fn secs_or(secs: Option<u64>, default: Duration) -> Duration {
    secs.filter(|s| *s > 0)
        .map_or(default, Duration::from_secs)
}
