//! Playback sequencing for synthesized replies.
//!
//! Reply text is split into sentence-packed chunks, synthesized and
//! played strictly one at a time. Synthesis failures fall back to the
//! local engine per chunk; a cancelled token halts the in-flight chunk
//! and discards the rest of the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioPlayback;
use crate::language::Language;
use crate::services::{SynthesisService, SynthesizedAudio};
use crate::{Error, Result};

/// Renders synthesized audio. Production playback goes through cpal;
/// tests plug in a silent sink.
#[async_trait(?Send)]
pub trait AudioSink {
    /// Plays one chunk to completion, or stops early when the token
    /// is cancelled.
    async fn play(&self, audio: SynthesizedAudio, cancel: &CancellationToken) -> Result<()>;
}

/// The default output path through the cpal output device.
pub struct CpalSink {
    playback: AudioPlayback,
}

impl CpalSink {
    /// # Errors
    ///
    /// Returns error if no output device is available.
    pub fn new() -> Result<Self> {
        Ok(Self {
            playback: AudioPlayback::new()?,
        })
    }
}

#[async_trait(?Send)]
impl AudioSink for CpalSink {
    async fn play(&self, audio: SynthesizedAudio, cancel: &CancellationToken) -> Result<()> {
        match audio {
            SynthesizedAudio::Mp3(bytes) => self.playback.play_mp3(&bytes, cancel).await,
            SynthesizedAudio::Wav(bytes) => self.playback.play_wav(&bytes, cancel).await,
        }
    }
}

/// Sequences reply text into audible speech, one chunk at a time.
pub struct Speaker {
    synthesis: Arc<dyn SynthesisService>,
    fallback: Option<Arc<dyn SynthesisService>>,
    sink: Box<dyn AudioSink>,
    chunk_chars: usize,
}

impl Speaker {
    #[must_use]
    pub fn new(
        synthesis: Arc<dyn SynthesisService>,
        fallback: Option<Arc<dyn SynthesisService>>,
        sink: Box<dyn AudioSink>,
        chunk_chars: usize,
    ) -> Self {
        Self {
            synthesis,
            fallback,
            sink,
            chunk_chars,
        }
    }

    /// Speaks the whole reply. Chunk n+1 is not synthesized until
    /// chunk n has finished playing or definitively failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] when the token cancels mid-reply.
    /// Synthesis and playback failures skip the chunk instead.
    #[allow(clippy::future_not_send)]
    pub async fn speak(
        &self,
        text: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let chunks = chunk_text(text, self.chunk_chars);
        if chunks.is_empty() {
            return Ok(());
        }

        tracing::debug!(chunks = chunks.len(), language = %language, "speaking reply");

        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(Error::Stopped);
            }
            self.speak_chunk(chunk, language, cancel).await?;
        }

        Ok(())
    }

    async fn speak_chunk(
        &self,
        chunk: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let primary = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Stopped),
            result = self.synthesis.synthesize(chunk, language) => result,
        };

        let audio = match primary {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    service = self.synthesis.name(),
                    error = %e,
                    "synthesis failed, trying local fallback"
                );
                let Some(fallback) = self.fallback.as_ref() else {
                    tracing::warn!("no local synthesis fallback, skipping chunk");
                    return Ok(());
                };
                let fallen = tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Stopped),
                    result = fallback.synthesize(chunk, language) => result,
                };
                match fallen {
                    Ok(audio) => audio,
                    Err(e) => {
                        tracing::warn!(
                            service = fallback.name(),
                            error = %e,
                            "fallback synthesis failed, skipping chunk"
                        );
                        return Ok(());
                    }
                }
            }
        };

        match self.sink.play(audio, cancel).await {
            Ok(()) => Ok(()),
            Err(Error::Stopped) => Err(Error::Stopped),
            Err(e) => {
                tracing::warn!(error = %e, "chunk playback failed, continuing");
                Ok(())
            }
        }
    }
}

/// Splits reply text into chunks for synthesis: sentences packed
/// greedily up to `max_chars` characters, oversized sentences split
/// hard at the budget. Counts Unicode scalars, not bytes.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0_usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(hard_split(&sentence, max_chars));
            continue;
        }

        if current_len == 0 {
            current = sentence;
            current_len = sentence_len;
        } else if current_len + 1 + sentence_len <= max_chars {
            current.push(' ');
            current.push_str(&sentence);
            current_len += 1 + sentence_len;
        } else {
            chunks.push(std::mem::replace(&mut current, sentence));
            current_len = sentence_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Splits after `.`, `!`, or `?` when followed by whitespace or the
/// end of text, keeping the punctuation with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = match chars.peek() {
                None => true,
                Some(next) => next.is_whitespace(),
            };
            if at_boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect::<String>().trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}
