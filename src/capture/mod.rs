//! Capture strategy management.
//!
//! Exactly one capture adapter runs at a time: streaming recognition
//! when a recognition key is configured and reachable, chunked-audio
//! endpointing otherwise. Both feed finalized utterances and activity
//! signals upward on one channel; the turn controller alone decides
//! when capture is suppressed.

mod endpointing;
mod streaming;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioCapture;
use crate::config::{RealtimeConfig, TurnTuning};
use crate::language::Language;
use crate::services::TranscriptionService;
use crate::{Error, Result};

pub use endpointing::{Calibration, EndpointTracker, FrameOutcome, calibrate};

/// Events flowing up from the active capture adapter.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A finalized utterance transcript.
    Final(String),
    /// Voice or interim-result activity; cancels the silence watchdog.
    Activity,
    /// The capture path failed in a way the adapter cannot recover
    /// from on its own.
    Fatal(Error),
}

/// Which acquisition method is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// Continuous websocket recognition with interim results.
    Streaming,
    /// Chunked audio with RMS endpointing and batch transcription.
    Endpointing,
}

impl fmt::Display for CaptureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Endpointing => write!(f, "endpointing"),
        }
    }
}

/// Capture operations the turn controller drives. Implemented by
/// [`CaptureManager`]; controller tests substitute scripted sources.
#[async_trait(?Send)]
pub trait Capture {
    /// Starts (or restarts, e.g. on a language switch) capture.
    async fn start(&mut self, language: Language) -> Result<CaptureStrategy>;

    /// Suppresses capture while the system thinks or speaks.
    fn pause(&mut self);

    /// Lifts suppression.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be restarted.
    fn resume(&mut self) -> Result<()>;

    /// Tears down capture. Idempotent, safe from any state.
    async fn stop(&mut self);
}

struct ActiveAdapter {
    strategy: CaptureStrategy,
    language: Language,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

/// Owns the input device and the active capture adapter task.
///
/// `start`, `pause`, `resume`, and `stop` are driven only by the turn
/// controller; adapters never resume themselves.
pub struct CaptureManager {
    tuning: TurnTuning,
    realtime: RealtimeConfig,
    deepgram_key: Option<String>,
    transcriber: Arc<dyn TranscriptionService>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    capture: Option<AudioCapture>,
    calibration: Option<Calibration>,
    live: watch::Sender<bool>,
    task: Option<ActiveAdapter>,
}

impl CaptureManager {
    /// Does not touch the input device; acquisition happens on
    /// [`Self::start`].
    #[must_use]
    pub fn new(
        tuning: TurnTuning,
        realtime: RealtimeConfig,
        deepgram_key: Option<String>,
        transcriber: Arc<dyn TranscriptionService>,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        let (live, _) = watch::channel(false);
        Self {
            tuning,
            realtime,
            deepgram_key,
            transcriber,
            events,
            capture: None,
            calibration: None,
            live,
            task: None,
        }
    }

    /// The strategy currently running, if any.
    #[must_use]
    pub fn active_strategy(&self) -> Option<CaptureStrategy> {
        self.task.as_ref().map(|adapter| adapter.strategy)
    }

    /// The language the active adapter was started with.
    #[must_use]
    pub fn active_language(&self) -> Option<Language> {
        self.task.as_ref().map(|adapter| adapter.language)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Session calibration, once the endpointing path has run it.
    #[must_use]
    pub const fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    const fn select_strategy(&self) -> CaptureStrategy {
        if self.realtime.force_endpointing || self.deepgram_key.is_none() {
            CaptureStrategy::Endpointing
        } else {
            CaptureStrategy::Streaming
        }
    }

    /// Cancels the adapter task and waits for it to drain, so no
    /// duplicate listener can briefly coexist with a replacement.
    async fn teardown(&mut self) {
        if let Some(adapter) = self.task.take() {
            adapter.cancel.cancel();
            let _ = adapter.join.await;
            tracing::debug!(strategy = %adapter.strategy, "capture adapter stopped");
        }
        let _ = self.live.send(false);
    }
}

#[async_trait(?Send)]
impl Capture for CaptureManager {
    /// Starts capture for the given language, tearing down any
    /// previously active adapter first. Ambient calibration runs once
    /// per session and is reused on restarts.
    async fn start(&mut self, language: Language) -> Result<CaptureStrategy> {
        self.teardown().await;

        let (handle, sample_rate) = {
            if self.capture.is_none() {
                self.capture = Some(AudioCapture::new()?);
            }
            let Some(capture) = self.capture.as_mut() else {
                return Err(Error::Capture("no input device available".to_string()));
            };
            capture.start()?;
            (capture.handle(), capture.sample_rate())
        };

        let mut strategy = self.select_strategy();
        if strategy == CaptureStrategy::Streaming
            && let Some(key) = self.deepgram_key.as_deref()
            && let Err(e) = streaming::probe(&self.realtime, key, language, sample_rate).await
        {
            tracing::warn!(
                error = %e,
                "streaming recognition unavailable, falling back to endpointing"
            );
            strategy = CaptureStrategy::Endpointing;
        }

        let _ = self.live.send(true);
        let cancel = CancellationToken::new();

        let join = match strategy {
            CaptureStrategy::Streaming => {
                let api_key = self.deepgram_key.clone().unwrap_or_default();
                tokio::spawn(
                    streaming::StreamingTask {
                        handle,
                        sample_rate,
                        config: self.realtime.clone(),
                        api_key,
                        language,
                        watchdog_ms: self.tuning.streaming_watchdog_ms,
                        events: self.events.clone(),
                        live: self.live.subscribe(),
                        cancel: cancel.clone(),
                    }
                    .run(),
                )
            }
            CaptureStrategy::Endpointing => {
                let calibration = match self.calibration {
                    Some(calibration) => calibration,
                    None => {
                        let calibration = calibrate(&handle, sample_rate, &self.tuning).await;
                        self.calibration = Some(calibration);
                        calibration
                    }
                };
                tokio::spawn(
                    endpointing::EndpointingTask {
                        handle,
                        sample_rate,
                        tuning: self.tuning,
                        calibration,
                        language,
                        transcriber: Arc::clone(&self.transcriber),
                        events: self.events.clone(),
                        live: self.live.subscribe(),
                        cancel: cancel.clone(),
                    }
                    .run(),
                )
            }
        };

        self.task = Some(ActiveAdapter {
            strategy,
            language,
            cancel,
            join,
        });

        tracing::info!(strategy = %strategy, language = %language, "capture started");
        Ok(strategy)
    }

    /// Suppresses capture: the input stream stops and the adapter
    /// drops any in-progress utterance. Idempotent.
    fn pause(&mut self) {
        let _ = self.live.send(false);
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        tracing::debug!("capture suppressed");
    }

    /// Lifts suppression. No-op when no adapter is active.
    fn resume(&mut self) -> Result<()> {
        if self.task.is_none() {
            return Ok(());
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.start()?;
        }
        let _ = self.live.send(true);
        tracing::debug!("capture resumed");
        Ok(())
    }

    /// Tears down the active adapter and releases the input device.
    /// Idempotent and safe to call from any state.
    async fn stop(&mut self) {
        self.teardown().await;
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if let Some(adapter) = self.task.take() {
            adapter.cancel.cancel();
        }
    }
}
