//! Shared doubles for controller integration tests: scripted
//! collaborators that run without audio hardware or network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skylark_voice::capture::{Capture, CaptureEvent, CaptureStrategy};
use skylark_voice::config::TurnTuning;
use skylark_voice::services::{
    DialogueReply, DialogueService, SynthesisService, SynthesizedAudio,
};
use skylark_voice::session::{ConversationHistory, SpeakerProfile};
use skylark_voice::speaker::AudioSink;
use skylark_voice::{
    Error, Language, Phase, Result, SessionEvent, Speaker, TurnController,
};

/// A scripted dialogue reply.
pub fn reply(text: &str) -> Result<DialogueReply> {
    Ok(DialogueReply {
        text: text.to_string(),
        model: Some("scripted".to_string()),
    })
}

/// One recorded dialogue request, as the controller issued it.
pub struct RecordedRequest {
    pub user_text: String,
    pub include_seed: bool,
    pub no_reply: bool,
    pub history_len: usize,
    pub language: Language,
}

/// Dialogue double that answers from a script and records every
/// request. Once the script runs out it answers with empty text,
/// which the controller treats as "say nothing".
pub struct ScriptedDialogue {
    replies: Mutex<VecDeque<Result<DialogueReply>>>,
    calls: Mutex<Vec<RecordedRequest>>,
    hang_when_exhausted: bool,
}

impl ScriptedDialogue {
    pub fn new(replies: Vec<Result<DialogueReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            hang_when_exhausted: false,
        }
    }

    /// Like [`Self::new`], but once the script runs out, requests
    /// never resolve. For exercising cancellation of in-flight calls.
    pub fn hanging(replies: Vec<Result<DialogueReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            hang_when_exhausted: true,
        }
    }

    /// Drains and returns every request recorded so far.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl DialogueService for ScriptedDialogue {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn request(
        &self,
        _profile: &SpeakerProfile,
        history: &ConversationHistory,
        user_text: &str,
        include_seed: bool,
        no_reply: bool,
        language: Language,
    ) -> Result<DialogueReply> {
        self.calls.lock().unwrap().push(RecordedRequest {
            user_text: user_text.to_string(),
            include_seed,
            no_reply,
            history_len: history.len(),
            language,
        });
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(scripted) => scripted,
            None if self.hang_when_exhausted => std::future::pending().await,
            None => Ok(DialogueReply::default()),
        }
    }
}

/// Capture double: no devices, just a shared liveness flag the sink
/// checks for overlap, plus counters for lifecycle assertions.
pub struct ScriptedCapture {
    pub live: Arc<AtomicBool>,
    pub starts: Arc<Mutex<Vec<Language>>>,
    pub stops: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(false)),
            starts: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for ScriptedCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Capture for ScriptedCapture {
    async fn start(&mut self, language: Language) -> Result<CaptureStrategy> {
        self.starts.lock().unwrap().push(language);
        self.live.store(true, Ordering::SeqCst);
        Ok(CaptureStrategy::Endpointing)
    }

    fn pause(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn resume(&mut self) -> Result<()> {
        self.live.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthesis double that records every chunk it is asked to render.
pub struct ScriptedSynthesis {
    pub chunks: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSynthesis {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for ScriptedSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisService for ScriptedSynthesis {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, chunk: &str, _language: Language) -> Result<SynthesizedAudio> {
        self.chunks.lock().unwrap().push(chunk.to_string());
        Ok(SynthesizedAudio::Wav(vec![0; 4]))
    }
}

/// Sink double that flags any play that overlaps live capture. The
/// flag, not a panic, so the joined test can assert at the end.
pub struct RecordingSink {
    capture_live: Arc<AtomicBool>,
    pub plays: Arc<AtomicUsize>,
    pub overlap: Arc<AtomicBool>,
}

#[async_trait(?Send)]
impl AudioSink for RecordingSink {
    async fn play(&self, _audio: SynthesizedAudio, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Stopped);
        }
        if self.capture_live.load(Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A controller wired to scripted collaborators, with handles to
/// everything the tests assert on.
pub struct Harness {
    pub controller: TurnController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    pub dialogue: Arc<ScriptedDialogue>,
    pub capture_live: Arc<AtomicBool>,
    pub capture_starts: Arc<Mutex<Vec<Language>>>,
    pub capture_stops: Arc<AtomicUsize>,
    pub spoken: Arc<Mutex<Vec<String>>>,
    pub plays: Arc<AtomicUsize>,
    pub overlap: Arc<AtomicBool>,
}

pub fn harness(replies: Vec<Result<DialogueReply>>) -> Harness {
    harness_with(ScriptedDialogue::new(replies))
}

pub fn harness_with(dialogue: ScriptedDialogue) -> Harness {
    let dialogue = Arc::new(dialogue);

    let capture = ScriptedCapture::new();
    let capture_live = Arc::clone(&capture.live);
    let capture_starts = Arc::clone(&capture.starts);
    let capture_stops = Arc::clone(&capture.stops);

    let synthesis = ScriptedSynthesis::new();
    let spoken = Arc::clone(&synthesis.chunks);

    let plays = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let sink = RecordingSink {
        capture_live: Arc::clone(&capture_live),
        plays: Arc::clone(&plays),
        overlap: Arc::clone(&overlap),
    };

    let speaker = Speaker::new(Arc::new(synthesis), None, Box::new(sink), 220);

    let (capture_tx, capture_rx) = mpsc::unbounded_channel();
    let (controller, events) = TurnController::new(
        SpeakerProfile::default(),
        TurnTuning::default(),
        Language::EnUs,
        Arc::clone(&dialogue) as Arc<dyn DialogueService>,
        speaker,
        Box::new(capture),
        capture_rx,
    );

    Harness {
        controller,
        events,
        capture_tx,
        dialogue,
        capture_live,
        capture_starts,
        capture_stops,
        spoken,
        plays,
        overlap,
    }
}

/// Consumes session events until the given phase is announced.
pub async fn wait_for_phase(events: &mut mpsc::UnboundedReceiver<SessionEvent>, phase: Phase) {
    while let Some(event) = events.recv().await {
        if event == SessionEvent::StatusChange(phase) {
            return;
        }
    }
    panic!("event channel closed while waiting for phase {phase:?}");
}

/// Consumes session events until a system utterance is announced.
pub async fn wait_for_system_utterance(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> String {
    while let Some(event) = events.recv().await {
        if let SessionEvent::SystemUtterance(text) = event {
            return text;
        }
    }
    panic!("event channel closed while waiting for a system utterance");
}

/// Consumes session events until a user utterance is accepted.
pub async fn wait_for_user_utterance(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> String {
    while let Some(event) = events.recv().await {
        if let SessionEvent::UserUtterance(text) = event {
            return text;
        }
    }
    panic!("event channel closed while waiting for a user utterance");
}
