//! Playback sequencer tests: fallback engagement, failure skipping,
//! and cancellation, all against in-process doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skylark_voice::services::{SynthesisService, SynthesizedAudio};
use skylark_voice::speaker::AudioSink;
use skylark_voice::{Error, Language, Result, Speaker};

/// Synthesizer that renders every chunk and counts the calls.
struct CountingSynthesis {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SynthesisService for CountingSynthesis {
    fn name(&self) -> &str {
        "counting"
    }

    async fn synthesize(&self, _chunk: &str, _language: Language) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesizedAudio::Wav(vec![0; 4]))
    }
}

/// Synthesizer that always fails, standing in for a dead service.
struct FailingSynthesis;

#[async_trait]
impl SynthesisService for FailingSynthesis {
    fn name(&self) -> &str {
        "failing"
    }

    async fn synthesize(&self, _chunk: &str, _language: Language) -> Result<SynthesizedAudio> {
        Err(Error::Synthesis("service unavailable".to_string()))
    }
}

/// Fallback double that records the chunks it was asked to rescue.
struct RecordingFallback {
    chunks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SynthesisService for RecordingFallback {
    fn name(&self) -> &str {
        "recording-fallback"
    }

    async fn synthesize(&self, chunk: &str, _language: Language) -> Result<SynthesizedAudio> {
        self.chunks.lock().unwrap().push(chunk.to_string());
        Ok(SynthesizedAudio::Wav(vec![0; 4]))
    }
}

/// Sink that counts completed plays.
struct CountingSink {
    plays: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl AudioSink for CountingSink {
    async fn play(&self, _audio: SynthesizedAudio, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Stopped);
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that cancels the session token after its first play, the way
/// a stop request lands mid-reply.
struct CancellingSink {
    cancel: CancellationToken,
    plays: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl AudioSink for CancellingSink {
    async fn play(&self, _audio: SynthesizedAudio, _cancel: &CancellationToken) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(())
    }
}

/// Two sentences that will not fit one 25-character chunk together.
const TWO_CHUNK_REPLY: &str = "First sentence here. Second sentence here.";

#[tokio::test]
async fn test_fallback_rescues_every_failed_chunk() {
    let rescued = Arc::new(Mutex::new(Vec::new()));
    let plays = Arc::new(AtomicUsize::new(0));
    let speaker = Speaker::new(
        Arc::new(FailingSynthesis),
        Some(Arc::new(RecordingFallback {
            chunks: Arc::clone(&rescued),
        })),
        Box::new(CountingSink {
            plays: Arc::clone(&plays),
        }),
        25,
    );

    let outcome = speaker
        .speak(TWO_CHUNK_REPLY, Language::EnUs, &CancellationToken::new())
        .await;

    assert!(outcome.is_ok());
    assert_eq!(
        *rescued.lock().unwrap(),
        vec![
            "First sentence here.".to_string(),
            "Second sentence here.".to_string(),
        ]
    );
    assert_eq!(plays.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_chunks_are_skipped_without_a_fallback() {
    let plays = Arc::new(AtomicUsize::new(0));
    let speaker = Speaker::new(
        Arc::new(FailingSynthesis),
        None,
        Box::new(CountingSink {
            plays: Arc::clone(&plays),
        }),
        25,
    );

    let outcome = speaker
        .speak(TWO_CHUNK_REPLY, Language::EnUs, &CancellationToken::new())
        .await;

    // The reply is lost but the session survives to listen again.
    assert!(outcome.is_ok());
    assert_eq!(plays.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_discards_the_rest_of_the_reply() {
    let calls = Arc::new(AtomicUsize::new(0));
    let plays = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let speaker = Speaker::new(
        Arc::new(CountingSynthesis {
            calls: Arc::clone(&calls),
        }),
        None,
        Box::new(CancellingSink {
            cancel: cancel.clone(),
            plays: Arc::clone(&plays),
        }),
        25,
    );

    let outcome = speaker.speak(TWO_CHUNK_REPLY, Language::EnUs, &cancel).await;

    assert!(matches!(outcome, Err(Error::Stopped)));
    assert_eq!(plays.load(Ordering::SeqCst), 1);
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "the second chunk must never reach synthesis"
    );
}

#[tokio::test]
async fn test_already_cancelled_token_stops_before_any_audio() {
    let calls = Arc::new(AtomicUsize::new(0));
    let plays = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let speaker = Speaker::new(
        Arc::new(CountingSynthesis {
            calls: Arc::clone(&calls),
        }),
        None,
        Box::new(CountingSink {
            plays: Arc::clone(&plays),
        }),
        25,
    );

    let outcome = speaker.speak(TWO_CHUNK_REPLY, Language::EnUs, &cancel).await;

    assert!(matches!(outcome, Err(Error::Stopped)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(plays.load(Ordering::SeqCst), 0);
}
