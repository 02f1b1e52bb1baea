//! TOML configuration file loading
//!
//! Supports `~/.config/skylark/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on
//! top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SkylarkConfigFile {
    /// Session language tag (e.g. "en-US", "vi-VN")
    #[serde(default)]
    pub language: Option<String>,

    /// Speaker profile passed to the dialogue service
    #[serde(default)]
    pub profile: ProfileFileConfig,

    /// Dialogue policy service
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Chunked-audio transcription
    #[serde(default)]
    pub transcription: TranscriptionFileConfig,

    /// Streaming recognition
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// Turn-taking timing and thresholds
    #[serde(default)]
    pub tuning: TuningFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Speaker profile fields
#[derive(Debug, Default, Deserialize)]
pub struct ProfileFileConfig {
    pub name: Option<String>,
    pub age: Option<u8>,
    /// Conversation mode hint (e.g. "chat", "study")
    pub mode: Option<String>,
    /// Session objective, free-form
    pub objective: Option<String>,
}

/// Dialogue policy service configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// Base URL of the dialogue service
    pub base_url: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// TTS model (e.g. "gpt-4o-mini-tts")
    pub model: Option<String>,

    /// Voice for English replies
    pub voice_en: Option<String>,

    /// Voice for Vietnamese replies
    pub voice_vi: Option<String>,

    /// Speed multiplier
    pub speed: Option<f64>,

    /// Synthesis API base URL
    pub base_url: Option<String>,

    /// Character budget per spoken chunk
    pub chunk_chars: Option<usize>,
}

/// Transcription configuration (endpointing capture path)
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionFileConfig {
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Transcription API base URL
    pub base_url: Option<String>,
}

/// Streaming recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeFileConfig {
    /// Websocket URL of the live recognition service. Unset means
    /// streaming recognition is unavailable on this install.
    pub url: Option<String>,

    /// Recognition model
    pub model: Option<String>,

    /// Skip streaming recognition even when configured
    pub force_endpointing: Option<bool>,
}

/// Turn-taking timing and threshold overrides
#[derive(Debug, Default, Deserialize)]
pub struct TuningFileConfig {
    pub silence_hold_ms: Option<u64>,
    pub max_utterance_ms: Option<u64>,
    pub min_talk_ms: Option<u64>,
    pub chunk_ms: Option<u64>,
    pub lookback_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub silence_probe_ms: Option<u64>,
    pub streaming_watchdog_ms: Option<u64>,
    pub calibration_ms: Option<u64>,
    pub threshold_multiplier: Option<f32>,
    pub min_voice_threshold: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file, from `override_path` if given, else the
/// standard path.
///
/// Returns `SkylarkConfigFile::default()` if the file doesn't exist or
/// can't be parsed. A missing file is only worth a warning when the
/// user pointed at it explicitly.
pub fn load_config_file(override_path: Option<&Path>) -> SkylarkConfigFile {
    let explicit = override_path.is_some();
    let Some(path) = override_path.map(Path::to_path_buf).or_else(config_file_path) else {
        return SkylarkConfigFile::default();
    };

    if !path.exists() {
        if explicit {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }
        return SkylarkConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                SkylarkConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SkylarkConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/skylark/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("skylark").join("config.toml"))
}
