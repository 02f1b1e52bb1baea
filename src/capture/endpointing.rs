//! Chunked-audio capture with RMS endpointing.
//!
//! Used when streaming recognition is unavailable. Two phases: a short
//! ambient calibration that sets the session thresholds, then a frame
//! loop that detects utterance boundaries and submits finalized audio
//! to the transcription service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::audio::{self, BufferHandle, PREFERRED_SAMPLE_RATE, samples_to_wav};
use crate::config::TurnTuning;
use crate::language::Language;
use crate::services::TranscriptionService;

use super::CaptureEvent;

/// Session thresholds derived from ambient noise. Set once per
/// session and reused across capture restarts.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub noise_floor: f32,
    pub voice_threshold: f32,
}

impl Calibration {
    /// Derives thresholds from per-frame RMS levels observed during
    /// the calibration window. The threshold never drops below the
    /// configured minimum, so a silent room still needs audible speech
    /// to trip it.
    #[must_use]
    pub fn from_ambient(frame_levels: &[f32], tuning: &TurnTuning) -> Self {
        let noise_floor = frame_levels.iter().copied().fold(0.0_f32, f32::max);
        let voice_threshold =
            (noise_floor * tuning.threshold_multiplier).max(tuning.min_voice_threshold);
        Self {
            noise_floor,
            voice_threshold,
        }
    }
}

/// Decision from one analysis frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No state change worth acting on.
    Quiet,
    /// Voice activity began a new utterance.
    VoiceStarted,
    /// The utterance ended. `submit` is false for sub-minimum blips.
    Finalized { talk_ms: u64, submit: bool },
}

/// Frame-by-frame endpointing state machine. Pure; the capture task
/// feeds it RMS values and acts on the outcomes.
#[derive(Debug)]
pub struct EndpointTracker {
    tuning: TurnTuning,
    calibration: Calibration,
    speech_active: bool,
    talk_ms: u64,
    silence_ms: u64,
}

impl EndpointTracker {
    #[must_use]
    pub const fn new(tuning: TurnTuning, calibration: Calibration) -> Self {
        Self {
            tuning,
            calibration,
            speech_active: false,
            talk_ms: 0,
            silence_ms: 0,
        }
    }

    #[must_use]
    pub const fn speech_active(&self) -> bool {
        self.speech_active
    }

    /// Advances by one frame of `chunk_ms` worth of audio.
    pub fn on_frame(&mut self, frame_rms: f32) -> FrameOutcome {
        let chunk = self.tuning.chunk_ms;
        if frame_rms > self.calibration.voice_threshold {
            let starting = !self.speech_active;
            self.speech_active = true;
            self.talk_ms += chunk;
            self.silence_ms = 0;
            if self.talk_ms >= self.tuning.max_utterance_ms {
                return self.finalize();
            }
            if starting {
                return FrameOutcome::VoiceStarted;
            }
            FrameOutcome::Quiet
        } else if self.speech_active {
            self.silence_ms += chunk;
            if self.silence_ms >= self.tuning.silence_hold_ms {
                return self.finalize();
            }
            FrameOutcome::Quiet
        } else {
            FrameOutcome::Quiet
        }
    }

    /// Back to the idle state, dropping any in-progress utterance.
    pub fn reset(&mut self) {
        self.speech_active = false;
        self.talk_ms = 0;
        self.silence_ms = 0;
    }

    fn finalize(&mut self) -> FrameOutcome {
        let talk_ms = self.talk_ms;
        let submit = talk_ms >= self.tuning.min_talk_ms;
        self.reset();
        FrameOutcome::Finalized { talk_ms, submit }
    }
}

/// Samples ambient level for the calibration window and derives the
/// session thresholds. Runs once, after device acquisition and before
/// endpointing begins.
pub async fn calibrate(
    handle: &BufferHandle,
    sample_rate: u32,
    tuning: &TurnTuning,
) -> Calibration {
    handle.clear();
    tokio::time::sleep(Duration::from_millis(tuning.calibration_ms)).await;
    let samples = handle.take();

    let chunk = tuning.chunk_samples(sample_rate);
    let levels: Vec<f32> = samples
        .chunks(chunk)
        .filter(|frame| frame.len() == chunk)
        .map(audio::rms)
        .collect();

    let calibration = Calibration::from_ambient(&levels, tuning);
    tracing::info!(
        frames = levels.len(),
        noise_floor = calibration.noise_floor,
        voice_threshold = calibration.voice_threshold,
        "ambient calibration complete"
    );
    calibration
}

/// The endpointing capture task. Owns the pending utterance audio;
/// everything it hears flows out as [`CaptureEvent`]s.
pub(crate) struct EndpointingTask {
    pub handle: BufferHandle,
    pub sample_rate: u32,
    pub tuning: TurnTuning,
    pub calibration: Calibration,
    pub language: Language,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub events: mpsc::UnboundedSender<CaptureEvent>,
    pub live: watch::Receiver<bool>,
    pub cancel: CancellationToken,
}

impl EndpointingTask {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) async fn run(mut self) {
        let chunk_samples = self.tuning.chunk_samples(self.sample_rate);
        let lookback_samples =
            (u64::from(self.sample_rate) * self.tuning.lookback_ms / 1000) as usize;
        let frames_per_activity = (1000 / self.tuning.chunk_ms).max(1);

        let mut tracker = EndpointTracker::new(self.tuning, self.calibration);
        // In-progress utterance audio, including the pre-speech
        // lookback window. `analyzed` marks how much has been framed.
        let mut pending: Vec<f32> = Vec::new();
        let mut analyzed = 0_usize;
        let mut frames_since_activity = 0_u64;

        let mut ticker = tokio::time::interval(Duration::from_millis(self.tuning.chunk_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(
            sample_rate = self.sample_rate,
            chunk_samples,
            language = %self.language,
            "endpointing capture running"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                changed = self.live.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*self.live.borrow() {
                        // Suppressed: abandon the in-progress utterance.
                        pending.clear();
                        analyzed = 0;
                        frames_since_activity = 0;
                        tracker.reset();
                        self.handle.clear();
                    }
                }
                _ = ticker.tick() => {
                    if !*self.live.borrow() {
                        self.handle.clear();
                        continue;
                    }

                    pending.extend(self.handle.take());

                    while pending.len() - analyzed >= chunk_samples {
                        let frame_rms = audio::rms(&pending[analyzed..analyzed + chunk_samples]);
                        analyzed += chunk_samples;

                        match tracker.on_frame(frame_rms) {
                            FrameOutcome::VoiceStarted => {
                                frames_since_activity = 0;
                                let _ = self.events.send(CaptureEvent::Activity);
                            }
                            FrameOutcome::Quiet => {
                                if tracker.speech_active() {
                                    frames_since_activity += 1;
                                    if frames_since_activity >= frames_per_activity {
                                        frames_since_activity = 0;
                                        let _ = self.events.send(CaptureEvent::Activity);
                                    }
                                }
                            }
                            FrameOutcome::Finalized { talk_ms, submit } => {
                                frames_since_activity = 0;
                                if submit {
                                    let utterance: Vec<f32> = pending.drain(..analyzed).collect();
                                    analyzed = 0;
                                    self.submit(utterance, talk_ms).await;
                                } else {
                                    tracing::debug!(talk_ms, "discarded sub-minimum speech blip");
                                }
                            }
                        }
                    }

                    // Idle: keep only the lookback window so the next
                    // utterance starts with a little pre-speech audio.
                    if !tracker.speech_active() && pending.len() > lookback_samples {
                        let excess = (pending.len() - lookback_samples).min(analyzed);
                        pending.drain(..excess);
                        analyzed -= excess;
                    }
                }
            }
        }

        tracing::debug!("endpointing capture stopped");
    }

    /// Encodes and transcribes one finalized utterance. Transcription
    /// failures are logged and dropped; the loop keeps listening.
    async fn submit(&self, utterance: Vec<f32>, talk_ms: u64) {
        let encoded = if self.sample_rate == PREFERRED_SAMPLE_RATE {
            samples_to_wav(&utterance, PREFERRED_SAMPLE_RATE)
        } else {
            audio::resample(&utterance, self.sample_rate, PREFERRED_SAMPLE_RATE)
                .and_then(|resampled| samples_to_wav(&resampled, PREFERRED_SAMPLE_RATE))
        };

        let wav = match encoded {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance audio");
                return;
            }
        };

        tracing::debug!(talk_ms, wav_bytes = wav.len(), "submitting utterance audio");

        tokio::select! {
            () = self.cancel.cancelled() => {}
            result = self.transcriber.transcribe(&wav, self.language) => match result {
                Ok(text) => {
                    if text.trim().is_empty() {
                        tracing::debug!("empty transcript for finalized utterance");
                    }
                    let _ = self.events.send(CaptureEvent::Final(text));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed, dropping utterance");
                }
            }
        }
    }
}
