//! Speech synthesis: primary HTTP service plus the local fallback.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::SpeechConfig;
use crate::language::Language;
use crate::{Error, Result};

use super::{SynthesisService, SynthesizedAudio};

/// Synthesizes speech through an OpenAI-style `/v1/audio/speech`
/// endpoint, selecting the voice by language.
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    config: SpeechConfig,
}

impl SpeechSynthesizer {
    /// # Errors
    ///
    /// Returns error if the API key is missing.
    pub fn new(api_key: String, config: SpeechConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for synthesis".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        })
    }
}

#[async_trait]
impl SynthesisService for SpeechSynthesizer {
    fn name(&self) -> &str {
        "openai-tts"
    }

    async fn synthesize(&self, chunk: &str, language: Language) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let request = SpeechRequest {
            model: &self.config.model,
            input: chunk,
            voice: self.config.voice_for(language),
            speed: self.config.speed,
        };

        let url = format!(
            "{}/v1/audio/speech",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "synthesis error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        Ok(SynthesizedAudio::Mp3(audio.to_vec()))
    }
}

/// Local synthesis through the espeak-ng CLI, used per chunk when the
/// primary service fails. Output is WAV on stdout.
pub struct EspeakFallback {
    binary: PathBuf,
}

impl EspeakFallback {
    /// Locates espeak-ng on PATH. Returns `None` when not installed;
    /// the playback sequencer then skips failed chunks instead.
    #[must_use]
    pub fn locate() -> Option<Self> {
        match which::which("espeak-ng") {
            Ok(binary) => {
                tracing::debug!(path = %binary.display(), "espeak-ng fallback available");
                Some(Self { binary })
            }
            Err(_) => {
                tracing::debug!("espeak-ng not found, no local synthesis fallback");
                None
            }
        }
    }
}

#[async_trait]
impl SynthesisService for EspeakFallback {
    fn name(&self) -> &str {
        "espeak-ng"
    }

    async fn synthesize(&self, chunk: &str, language: Language) -> Result<SynthesizedAudio> {
        let output = tokio::process::Command::new(&self.binary)
            .args(["--stdout", "-v", language.espeak_voice(), chunk])
            .output()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to run espeak-ng: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!("espeak-ng failed: {stderr}")));
        }

        tracing::debug!(
            bytes = output.stdout.len(),
            voice = language.espeak_voice(),
            "espeak-ng synthesis complete"
        );
        Ok(SynthesizedAudio::Wav(output.stdout))
    }
}
