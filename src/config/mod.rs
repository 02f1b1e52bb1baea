//! Configuration management for the voice controller
//!
//! Precedence is env var, then `~/.config/skylark/config.toml`, then
//! built-in defaults. CLI flags override on top of the loaded config
//! (see `main.rs`).

pub mod file;

use std::path::Path;

use crate::language::Language;
use crate::session::SpeakerProfile;
use crate::{Error, Result};

/// Assembled runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Who the session is talking to
    pub profile: SpeakerProfile,

    /// Language the session starts in
    pub language: Language,

    /// Dialogue policy service
    pub dialogue: DialogueConfig,

    /// Speech synthesis
    pub speech: SpeechConfig,

    /// Chunked-audio transcription
    pub transcription: TranscriptionConfig,

    /// Streaming recognition
    pub realtime: RealtimeConfig,

    /// Turn-taking timing and thresholds
    pub tuning: TurnTuning,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Dialogue policy service configuration
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Base URL, e.g. `http://localhost:8000`
    pub base_url: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// TTS model identifier
    pub model: String,

    /// Voice for English replies
    pub voice_en: String,

    /// Voice for Vietnamese replies
    pub voice_vi: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f64,

    /// Synthesis API base URL
    pub base_url: String,

    /// Character budget per spoken chunk
    pub chunk_chars: usize,
}

impl SpeechConfig {
    /// The configured voice for a language.
    #[must_use]
    pub fn voice_for(&self, language: Language) -> &str {
        match language {
            Language::EnUs => &self.voice_en,
            Language::ViVn => &self.voice_vi,
        }
    }
}

/// Transcription configuration (endpointing capture path)
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// STT model identifier
    pub model: String,

    /// Transcription API base URL
    pub base_url: String,
}

/// Streaming recognition configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket URL override. `None` falls back to the default
    /// service URL when a key is configured.
    pub url: Option<String>,

    /// Recognition model
    pub model: String,

    /// Skip streaming recognition even when configured
    pub force_endpointing: bool,
}

impl RealtimeConfig {
    /// Resolved websocket URL.
    #[must_use]
    pub fn effective_url(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or("wss://api.deepgram.com/v1/listen")
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (synthesis and transcription)
    pub openai: Option<String>,

    /// `Deepgram` API key (streaming recognition)
    pub deepgram: Option<String>,
}

/// Turn-taking timing and thresholds. All of these vary by room,
/// device, and taste, so everything is overridable.
#[derive(Debug, Clone, Copy)]
pub struct TurnTuning {
    /// Silence that ends an utterance
    pub silence_hold_ms: u64,

    /// Hard cap on a single utterance
    pub max_utterance_ms: u64,

    /// Shorter speech than this is discarded as a transient
    pub min_talk_ms: u64,

    /// Analysis frame size
    pub chunk_ms: u64,

    /// Pre-speech audio kept ahead of the detected onset
    pub lookback_ms: u64,

    /// Capture stays suppressed this long after playback ends
    pub cooldown_ms: u64,

    /// Quiet time in LISTENING before the no-reply probe fires
    pub silence_probe_ms: u64,

    /// Streaming session restart after this long without activity
    pub streaming_watchdog_ms: u64,

    /// Ambient noise sampling window at session start
    pub calibration_ms: u64,

    /// Voice threshold as a multiple of the noise floor
    pub threshold_multiplier: f32,

    /// Lower bound on the voice threshold
    pub min_voice_threshold: f32,
}

impl Default for TurnTuning {
    fn default() -> Self {
        Self {
            silence_hold_ms: 800,
            max_utterance_ms: 10_000,
            min_talk_ms: 300,
            chunk_ms: 16,
            lookback_ms: 400,
            cooldown_ms: 700,
            silence_probe_ms: 7_000,
            streaming_watchdog_ms: 20_000,
            calibration_ms: 600,
            threshold_multiplier: 2.5,
            min_voice_threshold: 0.01,
        }
    }
}

impl TurnTuning {
    /// Samples per analysis frame at the given rate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn chunk_samples(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.chunk_ms / 1000) as usize
    }

    /// Rejects combinations the endpointing loop cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_ms == 0 {
            return Err(Error::Config("tuning.chunk_ms must be nonzero".to_string()));
        }
        if self.silence_hold_ms < self.chunk_ms {
            return Err(Error::Config(
                "tuning.silence_hold_ms must be at least one chunk".to_string(),
            ));
        }
        if self.max_utterance_ms <= self.min_talk_ms {
            return Err(Error::Config(
                "tuning.max_utterance_ms must exceed tuning.min_talk_ms".to_string(),
            ));
        }
        if self.threshold_multiplier < 1.0 {
            return Err(Error::Config(
                "tuning.threshold_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration with env > TOML > default precedence.
    /// `config_path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if the resulting tuning values are unusable.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path);

        let language = std::env::var("SKYLARK_LANGUAGE")
            .ok()
            .or(fc.language)
            .and_then(|tag| {
                let parsed = Language::from_tag(&tag);
                if parsed.is_none() {
                    tracing::warn!(tag, "unknown language tag, using default");
                }
                parsed
            })
            .unwrap_or_default();

        let profile = SpeakerProfile {
            name: fc.profile.name,
            age: fc.profile.age,
            mode: fc.profile.mode,
            objective: fc.profile.objective,
        };

        let dialogue = DialogueConfig {
            base_url: std::env::var("SKYLARK_DIALOGUE_URL")
                .ok()
                .or(fc.dialogue.base_url)
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
        };

        let speech = SpeechConfig {
            model: std::env::var("SKYLARK_TTS_MODEL")
                .ok()
                .or(fc.speech.model)
                .unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            voice_en: std::env::var("SKYLARK_VOICE_EN")
                .ok()
                .or(fc.speech.voice_en)
                .unwrap_or_else(|| "alloy".to_string()),
            voice_vi: std::env::var("SKYLARK_VOICE_VI")
                .ok()
                .or(fc.speech.voice_vi)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: fc.speech.speed.unwrap_or(1.0),
            base_url: fc
                .speech
                .base_url
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            chunk_chars: fc.speech.chunk_chars.unwrap_or(220),
        };

        let transcription = TranscriptionConfig {
            model: std::env::var("SKYLARK_STT_MODEL")
                .ok()
                .or(fc.transcription.model)
                .unwrap_or_else(|| "gpt-4o-mini-transcribe".to_string()),
            base_url: fc
                .transcription
                .base_url
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        };

        let realtime = RealtimeConfig {
            url: std::env::var("SKYLARK_REALTIME_URL").ok().or(fc.realtime.url),
            model: fc.realtime.model.unwrap_or_else(|| "nova-2".to_string()),
            force_endpointing: std::env::var("SKYLARK_FORCE_ENDPOINTING")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.realtime.force_endpointing)
                .unwrap_or(false),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
            deepgram: std::env::var("DEEPGRAM_API_KEY")
                .ok()
                .or(fc.api_keys.deepgram),
        };

        let defaults = TurnTuning::default();
        let tuning = TurnTuning {
            silence_hold_ms: fc
                .tuning
                .silence_hold_ms
                .unwrap_or(defaults.silence_hold_ms),
            max_utterance_ms: fc
                .tuning
                .max_utterance_ms
                .unwrap_or(defaults.max_utterance_ms),
            min_talk_ms: fc.tuning.min_talk_ms.unwrap_or(defaults.min_talk_ms),
            chunk_ms: fc.tuning.chunk_ms.unwrap_or(defaults.chunk_ms),
            lookback_ms: fc.tuning.lookback_ms.unwrap_or(defaults.lookback_ms),
            cooldown_ms: fc.tuning.cooldown_ms.unwrap_or(defaults.cooldown_ms),
            silence_probe_ms: fc
                .tuning
                .silence_probe_ms
                .unwrap_or(defaults.silence_probe_ms),
            streaming_watchdog_ms: fc
                .tuning
                .streaming_watchdog_ms
                .unwrap_or(defaults.streaming_watchdog_ms),
            calibration_ms: fc.tuning.calibration_ms.unwrap_or(defaults.calibration_ms),
            threshold_multiplier: fc
                .tuning
                .threshold_multiplier
                .unwrap_or(defaults.threshold_multiplier),
            min_voice_threshold: fc
                .tuning
                .min_voice_threshold
                .unwrap_or(defaults.min_voice_threshold),
        };
        tuning.validate()?;

        Ok(Self {
            profile,
            language,
            dialogue,
            speech,
            transcription,
            realtime,
            tuning,
            api_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_is_valid() {
        assert!(TurnTuning::default().validate().is_ok());
    }

    #[test]
    fn degenerate_tuning_is_rejected() {
        let mut tuning = TurnTuning::default();
        tuning.chunk_ms = 0;
        assert!(tuning.validate().is_err());

        let mut tuning = TurnTuning::default();
        tuning.max_utterance_ms = tuning.min_talk_ms;
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn chunk_samples_match_rate() {
        let tuning = TurnTuning::default();
        assert_eq!(tuning.chunk_samples(16_000), 256);
        assert_eq!(tuning.chunk_samples(48_000), 768);
    }

    #[test]
    fn voice_follows_language() {
        let speech = SpeechConfig {
            model: "gpt-4o-mini-tts".to_string(),
            voice_en: "alloy".to_string(),
            voice_vi: "coral".to_string(),
            speed: 1.0,
            base_url: "https://api.openai.com".to_string(),
            chunk_chars: 220,
        };
        assert_eq!(speech.voice_for(Language::EnUs), "alloy");
        assert_eq!(speech.voice_for(Language::ViVn), "coral");
    }
}
