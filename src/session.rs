//! Session data model: utterances, history, phases, and the events
//! surfaced to the embedding UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Who produced an utterance. Serialized with the sender labels the
/// dialogue service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The human on the microphone.
    #[serde(rename = "user")]
    User,
    /// The synthesized voice.
    #[serde(rename = "assistant")]
    System,
}

/// One line of conversation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    /// A user utterance stamped now.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// A system utterance stamped now.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::System,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation log, the canonical context sent to the
/// dialogue service on every turn. Owned by the turn controller.
#[derive(Debug, Default, Clone)]
pub struct ConversationHistory {
    entries: Vec<Utterance>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends in chronological order. Entries are never mutated or
    /// removed afterwards.
    pub fn push(&mut self, utterance: Utterance) {
        self.entries.push(utterance);
    }

    #[must_use]
    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Session reset only. Never called mid-session.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Where the session currently is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Constructed but not started.
    #[default]
    Idle,
    /// Issuing the seed dialogue request and speaking the opening line.
    Starting,
    /// Microphone live, waiting for a final utterance.
    Listening,
    /// Awaiting the dialogue service for the current turn.
    Thinking,
    /// Rendering synthesized speech (cooldown included).
    Speaking,
    /// Torn down. Terminal.
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Mutable session state. Exactly one per session, owned and mutated
/// only by the turn controller; everything else reads it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: Phase,
    pub active_language: Language,
    /// What the system last said, for echo comparison.
    pub last_system_utterance: Option<String>,
    /// True from playback completion until the cooldown elapses.
    pub cooldown_active: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self {
            phase: Phase::Idle,
            active_language: language,
            last_system_utterance: None,
            cooldown_active: false,
        }
    }
}

/// Events surfaced to the embedding layer (UI, logs). The channel is
/// unbounded so emitting never blocks turn-taking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user utterance was accepted into history.
    UserUtterance(String),
    /// The system is about to speak this text.
    SystemUtterance(String),
    /// The session moved to a new phase.
    StatusChange(Phase),
}

/// Who the session is talking to. Collected by the embedding
/// application, passed through to the dialogue service with every
/// request so replies stay age- and goal-appropriate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub name: Option<String>,
    pub age: Option<u8>,
    /// Conversation mode hint, e.g. "chat" or "study".
    pub mode: Option<String>,
    /// What the speaker wants out of the session, free-form.
    pub objective: Option<String>,
}
