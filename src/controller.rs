//! Turn controller: the session state machine.
//!
//! One task owns the whole session. Capture events, timers, and the
//! cancel token all feed a single select loop, so every phase
//! transition happens in one place and every timer re-entry checks
//! the current phase before acting. Capture is suppressed the whole
//! time the session thinks or speaks; the controller alone decides
//! when listening resumes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::{Capture, CaptureEvent};
use crate::config::TurnTuning;
use crate::echo;
use crate::language::{self, Language};
use crate::services::{DialogueReply, DialogueService};
use crate::session::{
    ConversationHistory, Phase, SessionEvent, SessionState, SpeakerProfile, Utterance,
};
use crate::speaker::Speaker;
use crate::{Error, Result};

/// Orchestrates one voice session: greeting, listening, thinking,
/// speaking, cooldown, and teardown.
pub struct TurnController {
    profile: SpeakerProfile,
    tuning: TurnTuning,
    state: SessionState,
    history: ConversationHistory,
    dialogue: Arc<dyn DialogueService>,
    speaker: Speaker,
    capture: Box<dyn Capture>,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    /// Armed while listening; fires the no-reply probe.
    probe_deadline: Option<Instant>,
    /// Armed when playback finishes; ends the post-speech cooldown.
    cooldown_deadline: Option<Instant>,
}

#[allow(clippy::future_not_send)]
impl TurnController {
    /// Wires up a controller around its collaborators. Nothing runs
    /// until [`Self::run`]. The returned receiver carries the events
    /// an embedding UI renders from.
    #[must_use]
    pub fn new(
        profile: SpeakerProfile,
        tuning: TurnTuning,
        language: Language,
        dialogue: Arc<dyn DialogueService>,
        speaker: Speaker,
        capture: Box<dyn Capture>,
        capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            profile,
            tuning,
            state: SessionState::new(language),
            history: ConversationHistory::new(),
            dialogue,
            speaker,
            capture,
            capture_events,
            events,
            cancel: CancellationToken::new(),
            probe_deadline: None,
            cooldown_deadline: None,
        };
        (controller, events_rx)
    }

    /// Token that ends the session when cancelled. Hand it to a
    /// Ctrl-C handler or an embedding layer's stop button.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn language(&self) -> Language {
        self.state.active_language
    }

    /// Runs the session to completion: greet, then loop until the
    /// token cancels or something fatal happens. Always tears down
    /// before returning; a stop requested mid-session is `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session when it was not a
    /// requested stop, e.g. [`Error::PermissionDenied`] for a missing
    /// microphone.
    pub async fn run(&mut self) -> Result<()> {
        if self.state.phase == Phase::Stopped {
            return Ok(());
        }
        let outcome = self.session().await;
        self.stop().await;
        match outcome {
            Ok(()) | Err(Error::Stopped) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "session ended on error");
                Err(e)
            }
        }
    }

    /// Stops the session and tears down capture. Idempotent and safe
    /// to call from any state.
    pub async fn stop(&mut self) {
        if self.state.phase == Phase::Stopped {
            return;
        }
        tracing::info!("stopping session");
        self.cancel.cancel();
        self.probe_deadline = None;
        self.cooldown_deadline = None;
        self.state.cooldown_active = false;
        self.capture.stop().await;
        self.set_phase(Phase::Stopped);
    }

    async fn session(&mut self) -> Result<()> {
        self.start_session().await?;
        self.event_loop().await
    }

    /// Brings capture up, runs the seed dialogue request, and speaks
    /// the opening line. Capture stays suppressed until the opening
    /// line has finished.
    async fn start_session(&mut self) -> Result<()> {
        self.set_phase(Phase::Starting);
        let language = self.state.active_language;
        let strategy = self.capture.start(language).await?;
        self.capture.pause();
        tracing::info!(strategy = %strategy, language = %language, "session started");

        match self.dialogue_request("", true, false).await {
            Ok(reply) if reply.text.trim().is_empty() => self.enter_listening(),
            Ok(reply) => {
                self.history.push(Utterance::system(reply.text.clone()));
                self.speak_reply(reply.text).await
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "seed request failed, using canned opening");
                self.speak_reply(opening_line(language, self.profile.age).to_string())
                    .await
            }
        }
    }

    /// The session's one event loop. Branch order matters: a stop
    /// request beats everything, and a buffered capture event beats a
    /// timer that became due at the same instant, so an utterance
    /// arriving just before the silence probe fires cancels it.
    async fn event_loop(&mut self) -> Result<()> {
        loop {
            if self.state.phase == Phase::Stopped {
                return Ok(());
            }
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Err(Error::Stopped),

                event = self.capture_events.recv() => {
                    let Some(event) = event else {
                        return Err(Error::Capture(
                            "capture event channel closed".to_string(),
                        ));
                    };
                    self.on_capture_event(event).await?;
                }

                () = maybe_sleep(self.cooldown_deadline) => {
                    self.on_cooldown_elapsed()?;
                }

                () = maybe_sleep(self.probe_deadline) => {
                    self.on_silence_probe().await?;
                }
            }
        }
    }

    async fn on_capture_event(&mut self, event: CaptureEvent) -> Result<()> {
        self.probe_deadline = None;
        match event {
            CaptureEvent::Activity => {
                if self.state.phase == Phase::Listening {
                    self.arm_probe();
                }
                Ok(())
            }
            CaptureEvent::Final(text) => self.on_final_utterance(&text).await,
            CaptureEvent::Fatal(e) => {
                tracing::error!(error = %e, "capture failed");
                Err(e)
            }
        }
    }

    /// Filters a finalized transcript and, if it survives, runs the
    /// dialogue turn. Transcripts arriving outside the listening
    /// phase are stale by definition and dropped.
    async fn on_final_utterance(&mut self, text: &str) -> Result<()> {
        if self.state.phase != Phase::Listening {
            tracing::debug!(phase = %self.state.phase, "dropping transcript outside listening");
            return Ok(());
        }
        let text = text.trim();
        if text.is_empty() {
            self.arm_probe();
            return Ok(());
        }
        if let Some(last) = self.state.last_system_utterance.as_deref()
            && echo::is_echo(text, last)
        {
            tracing::debug!(candidate = text, "suppressed echo of own speech");
            self.arm_probe();
            return Ok(());
        }
        let detected = language::classify(text, self.state.active_language);
        if detected != self.state.active_language {
            // The utterance that triggers a switch is treated as a
            // language signal only; the recognizer restarts with the
            // new tag and the next utterance opens the dialogue turn.
            tracing::info!(from = %self.state.active_language, to = %detected, "language switch");
            self.state.active_language = detected;
            self.capture.start(detected).await?;
            self.arm_probe();
            return Ok(());
        }
        self.user_turn(text.to_string()).await
    }

    /// One full dialogue turn for an accepted user utterance.
    async fn user_turn(&mut self, text: String) -> Result<()> {
        self.capture.pause();
        self.set_phase(Phase::Thinking);
        self.history.push(Utterance::user(text.clone()));
        let _ = self.events.send(SessionEvent::UserUtterance(text.clone()));

        match self.dialogue_request(&text, false, false).await {
            Ok(reply) if reply.text.trim().is_empty() => {
                tracing::debug!("dialogue chose to say nothing");
                self.enter_listening()
            }
            Ok(reply) => {
                self.history.push(Utterance::system(reply.text.clone()));
                self.speak_reply(reply.text).await
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "dialogue request failed");
                self.speak_reply(failure_line(self.state.active_language).to_string())
                    .await
            }
        }
    }

    /// Fires after prolonged silence while listening: asks the
    /// dialogue service whether it wants to proactively continue.
    /// Either way the session ends up listening again.
    async fn on_silence_probe(&mut self) -> Result<()> {
        self.probe_deadline = None;
        if self.state.phase != Phase::Listening {
            return Ok(());
        }
        tracing::debug!("silence probe");
        self.capture.pause();
        self.set_phase(Phase::Thinking);

        match self.dialogue_request("", false, true).await {
            Ok(reply) if !reply.text.trim().is_empty() => {
                self.history.push(Utterance::system(reply.text.clone()));
                self.speak_reply(reply.text).await
            }
            Ok(_) => {
                tracing::debug!("dialogue declined the probe");
                self.enter_listening()
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "silence probe failed");
                self.enter_listening()
            }
        }
    }

    /// Speaks a reply through the sequencer, then arms the cooldown.
    /// The listening phase resumes only when the cooldown elapses.
    async fn speak_reply(&mut self, text: String) -> Result<()> {
        self.state.last_system_utterance = Some(text.clone());
        let _ = self.events.send(SessionEvent::SystemUtterance(text.clone()));
        self.set_phase(Phase::Speaking);

        self.speaker
            .speak(&text, self.state.active_language, &self.cancel)
            .await?;

        self.state.cooldown_active = true;
        self.cooldown_deadline =
            Some(Instant::now() + Duration::from_millis(self.tuning.cooldown_ms));
        Ok(())
    }

    fn on_cooldown_elapsed(&mut self) -> Result<()> {
        self.cooldown_deadline = None;
        if self.state.phase == Phase::Speaking && self.state.cooldown_active {
            self.state.cooldown_active = false;
            self.enter_listening()?;
        }
        Ok(())
    }

    fn enter_listening(&mut self) -> Result<()> {
        self.state.cooldown_active = false;
        self.capture.resume()?;
        self.set_phase(Phase::Listening);
        self.arm_probe();
        Ok(())
    }

    fn arm_probe(&mut self) {
        self.probe_deadline =
            Some(Instant::now() + Duration::from_millis(self.tuning.silence_probe_ms));
    }

    /// Dialogue call raced against the cancel token, so a stale
    /// response can never mutate history after a stop.
    async fn dialogue_request(
        &self,
        user_text: &str,
        include_seed: bool,
        no_reply: bool,
    ) -> Result<DialogueReply> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Stopped),
            result = self.dialogue.request(
                &self.profile,
                &self.history,
                user_text,
                include_seed,
                no_reply,
                self.state.active_language,
            ) => result,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase == phase {
            return;
        }
        tracing::debug!(from = %self.state.phase, to = %phase, "phase change");
        self.state.phase = phase;
        if phase != Phase::Listening {
            self.probe_deadline = None;
        }
        let _ = self.events.send(SessionEvent::StatusChange(phase));
    }
}

/// Sleeps until the deadline; an unarmed deadline never resolves, so
/// the owning select branch simply never fires.
async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spoken when the seed dialogue request fails, so the session still
/// opens with a voice rather than dead air.
const fn opening_line(language: Language, age: Option<u8>) -> &'static str {
    match (language, age) {
        (Language::EnUs, Some(0..=12)) => {
            "Hi there! I'm so happy to see you. What's your name?"
        }
        (Language::EnUs, Some(13..=17)) => "Hey! Good to see you. What should I call you?",
        (Language::EnUs, _) => "Hello! It's good to hear from you. What's your name?",
        (Language::ViVn, Some(0..=12)) => {
            "Chào em! Mình rất vui được gặp em. Em tên là gì?"
        }
        (Language::ViVn, Some(13..=17)) => "Chào bạn! Rất vui được gặp bạn. Bạn tên gì?",
        (Language::ViVn, _) => "Xin chào! Rất vui được nói chuyện với bạn. Bạn tên là gì?",
    }
}

/// One friendly line for a failed dialogue turn; the session returns
/// to listening so the user can just try again.
const fn failure_line(language: Language) -> &'static str {
    match language {
        Language::EnUs => "Sorry, I had trouble thinking just now. Could you say that again?",
        Language::ViVn => "Xin lỗi, mình gặp chút trục trặc. Bạn nói lại được không?",
    }
}
