//! Skylark - hands-free voice turn-taking controller
//!
//! The hard problem here is not dialogue content (an external policy
//! service owns that) but turn-taking: a duplex audio state machine
//! that must never hear its own synthesized voice, degrades across
//! two very different capture strategies, and re-synchronizes after
//! transient failures without user intervention.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Capture                         │
//! │  streaming recognizer  │  RMS endpointing + STT     │
//! └──────────────┬──────────────────────────────────────┘
//!                │ final utterances, activity
//! ┌──────────────▼──────────────────────────────────────┐
//! │                 Turn Controller                     │
//! │  echo filter │ language hysteresis │ phase machine  │
//! └──────────────┬──────────────────────────────────────┘
//!                │ replies (external dialogue service)
//! ┌──────────────▼──────────────────────────────────────┐
//! │               Playback Sequencer                    │
//! │  sentence chunking │ fallback synthesis │ cooldown  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Playback suppresses capture; the controller alone lifts the
//! suppression, and only after the post-speech cooldown has elapsed.

pub mod audio;
pub mod capture;
pub mod config;
pub mod controller;
pub mod echo;
pub mod error;
pub mod language;
pub mod services;
pub mod session;
pub mod speaker;

pub use capture::{Capture, CaptureEvent, CaptureManager, CaptureStrategy};
pub use config::Config;
pub use controller::TurnController;
pub use error::{Error, Result};
pub use language::Language;
pub use services::{
    Capabilities, DialogueClient, DialogueReply, DialogueService, EspeakFallback,
    SpeechSynthesizer, SynthesisService, SynthesizedAudio, TranscriptionService,
    WhisperTranscriber,
};
pub use session::{
    ConversationHistory, Phase, SessionEvent, SessionState, SpeakerProfile, Utterance,
};
pub use speaker::{AudioSink, CpalSink, Speaker};
