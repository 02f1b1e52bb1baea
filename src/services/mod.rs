//! External collaborators: dialogue policy, speech synthesis, and
//! speech transcription, behind traits so the turn controller can run
//! against in-memory doubles in tests.

mod dialogue;
mod synthesis;
mod transcribe;

pub use dialogue::DialogueClient;
pub use synthesis::{EspeakFallback, SpeechSynthesizer};
pub use transcribe::WhisperTranscriber;

use async_trait::async_trait;
use cpal::traits::HostTrait;

use crate::Result;
use crate::config::ApiKeys;
use crate::language::Language;
use crate::session::{ConversationHistory, SpeakerProfile};

/// Outcome of a dialogue request.
#[derive(Debug, Clone, Default)]
pub struct DialogueReply {
    /// What to speak. Empty means "say nothing this turn".
    pub text: String,
    /// Which model produced the reply, for logs.
    pub model: Option<String>,
}

/// The dialogue policy service. Receives the full history every turn;
/// owns what the assistant actually says.
#[async_trait]
pub trait DialogueService: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// One dialogue turn. `include_seed` asks for an opening line with
    /// no user text; `no_reply` marks a silence probe the service may
    /// answer with empty text.
    async fn request(
        &self,
        profile: &SpeakerProfile,
        history: &ConversationHistory,
        user_text: &str,
        include_seed: bool,
        no_reply: bool,
        language: Language,
    ) -> Result<DialogueReply>;
}

/// Encoded synthesis output with its container, so playback knows how
/// to decode it.
#[derive(Debug, Clone)]
pub enum SynthesizedAudio {
    Mp3(Vec<u8>),
    Wav(Vec<u8>),
}

/// Speech synthesis: one text chunk in, encoded audio out.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn synthesize(&self, chunk: &str, language: Language) -> Result<SynthesizedAudio>;
}

/// Speech transcription for the endpointing capture path.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Transcribes WAV audio. Empty text is a valid result for
    /// non-speech audio.
    async fn transcribe(&self, wav: &[u8], language: Language) -> Result<String>;
}

/// What the current platform and configuration support, probed once at
/// session start.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// A default input device exists.
    pub microphone: bool,
    /// A streaming recognition service is configured.
    pub streaming_recognition: bool,
}

impl Capabilities {
    /// Probe the audio host and configured keys.
    #[must_use]
    pub fn detect(api_keys: &ApiKeys) -> Self {
        let microphone = cpal::default_host().default_input_device().is_some();
        let streaming_recognition = api_keys.deepgram.is_some();

        tracing::debug!(microphone, streaming_recognition, "capabilities detected");

        Self {
            microphone,
            streaming_recognition,
        }
    }
}
