//! Whole-utterance transcription for the endpointing capture path.

use async_trait::async_trait;

use crate::language::Language;
use crate::{Error, Result};

use super::TranscriptionService;

/// Response from the transcription API.
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Uploads finalized utterance audio to an OpenAI-style
/// `/v1/audio/transcriptions` endpoint.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl WhisperTranscriber {
    /// # Errors
    ///
    /// Returns error if the API key is missing.
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl TranscriptionService for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, wav: &[u8], language: Language) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcribe(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", language.short_code());

        let url = format!(
            "{}/v1/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Transcribe(format!(
                "transcription error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
