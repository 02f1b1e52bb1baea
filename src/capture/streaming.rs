//! Continuous streaming recognition over a websocket.
//!
//! Preferred capture strategy when a recognition key is configured.
//! Mic PCM goes out as binary frames; interim and final transcripts
//! come back as JSON. The session auto-restarts on stalls and
//! transient errors, with a short backoff, unless capture is
//! suppressed or the session has been stopped.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use crate::audio::BufferHandle;
use crate::config::RealtimeConfig;
use crate::language::Language;
use crate::{Error, Result};

use super::CaptureEvent;

/// Delay before reconnecting after a no-speech restart.
const NO_SPEECH_DELAY_MS: u64 = 150;

/// Cadence for shipping buffered mic audio to the service.
const FEED_INTERVAL_MS: u64 = 50;

/// Graceful end-of-stream message for the recognition service.
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Result message from the live transcription socket.
#[derive(Debug, Deserialize)]
struct LiveMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<LiveChannel>,
}

#[derive(Debug, Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Debug, Deserialize)]
struct LiveAlternative {
    #[serde(default)]
    transcript: String,
}

/// How one websocket session ended, deciding the restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Service closed or restart after real speech; reconnect now.
    Natural,
    /// Watchdog fired without any speech; reconnect after a short delay.
    NoSpeech,
    /// Socket or send error; reconnect with backoff.
    Errored,
    /// Session stopped, do not reconnect.
    Stopped,
}

/// The streaming recognition task. Reconnects until cancelled.
pub(crate) struct StreamingTask {
    pub handle: BufferHandle,
    pub sample_rate: u32,
    pub config: RealtimeConfig,
    pub api_key: String,
    pub language: Language,
    pub watchdog_ms: u64,
    pub events: mpsc::UnboundedSender<CaptureEvent>,
    pub live: watch::Receiver<bool>,
    pub cancel: CancellationToken,
}

impl StreamingTask {
    pub(crate) async fn run(mut self) {
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Suppressed: no session may run until the controller
            // resumes capture.
            if !*self.live.borrow() {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    changed = self.live.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            let request = match client_request(
                &self.config,
                &self.api_key,
                self.language,
                self.sample_rate,
            ) {
                Ok(request) => request,
                Err(e) => {
                    let _ = self.events.send(CaptureEvent::Fatal(e));
                    return;
                }
            };

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = tokio_tungstenite::connect_async(request) => result,
            };

            let ws_stream = match connected {
                Ok((stream, _)) => stream,
                Err(e) => {
                    if is_auth_rejection(&e) {
                        let _ = self.events.send(CaptureEvent::Fatal(Error::PermissionDenied(
                            format!("recognition service rejected the API key: {e}"),
                        )));
                        return;
                    }
                    consecutive_failures += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = consecutive_failures,
                        "failed to connect streaming recognition"
                    );
                    if !self.pause_before_restart(restart_delay_ms(consecutive_failures)).await {
                        break;
                    }
                    continue;
                }
            };

            tracing::info!(language = %self.language, "streaming recognition connected");
            self.handle.clear();

            match self.drive(ws_stream, &mut consecutive_failures).await {
                SessionEnd::Stopped => break,
                SessionEnd::Natural => {}
                SessionEnd::NoSpeech => {
                    if !self.pause_before_restart(NO_SPEECH_DELAY_MS).await {
                        break;
                    }
                }
                SessionEnd::Errored => {
                    consecutive_failures += 1;
                    if !self.pause_before_restart(restart_delay_ms(consecutive_failures)).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!("streaming recognition stopped");
    }

    /// Runs one connected session until it ends.
    async fn drive(&mut self, ws_stream: WsStream, consecutive_failures: &mut u32) -> SessionEnd {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let watchdog = Duration::from_millis(self.watchdog_ms);
        let mut last_activity = Instant::now();
        let mut saw_speech = false;

        let mut feed = tokio::time::interval(Duration::from_millis(FEED_INTERVAL_MS));
        feed.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if !*self.live.borrow() {
                // Controller suppressed capture mid-session. Close the
                // socket now; the outer loop reconnects on resume.
                let _ = ws_write.send(WsMessage::Text(CLOSE_STREAM.to_string())).await;
                let _ = ws_write.close().await;
                return SessionEnd::Natural;
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = ws_write.send(WsMessage::Text(CLOSE_STREAM.to_string())).await;
                    let _ = ws_write.close().await;
                    return SessionEnd::Stopped;
                }
                changed = self.live.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Stopped;
                    }
                    // Re-checked at the top of the loop.
                }
                _ = feed.tick() => {
                    let samples = self.handle.take();
                    if !samples.is_empty()
                        && let Err(e) = ws_write.send(WsMessage::Binary(pcm_bytes(&samples))).await
                    {
                        tracing::warn!(error = %e, "failed to send audio frame");
                        return SessionEnd::Errored;
                    }
                    if last_activity.elapsed() >= watchdog {
                        tracing::warn!(
                            watchdog_ms = self.watchdog_ms,
                            "streaming session stalled, restarting"
                        );
                        let _ = ws_write.send(WsMessage::Text(CLOSE_STREAM.to_string())).await;
                        let _ = ws_write.close().await;
                        return if saw_speech { SessionEnd::Natural } else { SessionEnd::NoSpeech };
                    }
                }
                msg = ws_read.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<LiveMessage>(&text) {
                            Ok(message) => {
                                if self.on_message(&message, &mut last_activity, &mut saw_speech) {
                                    *consecutive_failures = 0;
                                }
                            }
                            Err(_) => {
                                tracing::debug!(raw = %text, "non-result recognition message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::debug!("recognition service closed the session");
                        return SessionEnd::Natural;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "streaming socket error");
                        return SessionEnd::Errored;
                    }
                    None => {
                        tracing::debug!("streaming socket ended");
                        return SessionEnd::Natural;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Handles one parsed result message. Returns true when the
    /// message proves the session is healthy.
    fn on_message(
        &self,
        message: &LiveMessage,
        last_activity: &mut Instant,
        saw_speech: &mut bool,
    ) -> bool {
        match message.kind.as_str() {
            "Results" => {
                let transcript = message
                    .channel
                    .as_ref()
                    .and_then(|channel| channel.alternatives.first())
                    .map(|alternative| alternative.transcript.trim())
                    .unwrap_or_default();

                if !transcript.is_empty() {
                    *last_activity = Instant::now();
                    *saw_speech = true;
                    if message.is_final {
                        tracing::debug!(transcript, "final streaming transcript");
                        let _ = self.events.send(CaptureEvent::Final(transcript.to_string()));
                    } else {
                        let _ = self.events.send(CaptureEvent::Activity);
                    }
                }
                true
            }
            "SpeechStarted" => {
                *last_activity = Instant::now();
                *saw_speech = true;
                let _ = self.events.send(CaptureEvent::Activity);
                true
            }
            other => {
                tracing::debug!(kind = other, "unhandled recognition message");
                false
            }
        }
    }

    /// Sleeps out a restart delay. Returns false when cancelled.
    async fn pause_before_restart(&self, delay_ms: u64) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

/// One-shot handshake check, used by the strategy manager so auth and
/// reachability problems demote the session to endpointing capture
/// instead of surfacing mid-conversation.
pub(crate) async fn probe(
    config: &RealtimeConfig,
    api_key: &str,
    language: Language,
    sample_rate: u32,
) -> Result<()> {
    let request = client_request(config, api_key, language, sample_rate)?;
    match tokio_tungstenite::connect_async(request).await {
        Ok((mut stream, _)) => {
            let _ = stream.close(None).await;
            Ok(())
        }
        Err(e) if is_auth_rejection(&e) => Err(Error::PermissionDenied(format!(
            "recognition service rejected the API key: {e}"
        ))),
        Err(e) => Err(Error::Streaming(e.to_string())),
    }
}

/// Builds the websocket handshake request with query parameters and
/// the authorization header.
fn client_request(
    config: &RealtimeConfig,
    api_key: &str,
    language: Language,
    sample_rate: u32,
) -> Result<Request> {
    let url = format!(
        "{}?language={}&model={}&encoding=linear16&sample_rate={}&interim_results=true&vad_events=true",
        config.effective_url(),
        language.tag(),
        config.model,
        sample_rate,
    );

    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid streaming recognition URL: {e}")))?;

    let token = HeaderValue::from_str(&format!("Token {api_key}"))
        .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, token);

    Ok(request)
}

/// True when the handshake failed because the key was rejected.
/// Distinguishes the fatal permission case from transient failures.
fn is_auth_rejection(error: &tungstenite::Error) -> bool {
    if let tungstenite::Error::Http(response) = error {
        let status = response.status();
        return status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
    }
    false
}

/// Backoff before reconnecting after an error, per consecutive failure.
const fn restart_delay_ms(consecutive_failures: u32) -> u64 {
    match consecutive_failures {
        0 | 1 => 100,
        2 => 200,
        _ => 400,
    }
}

/// Packs f32 samples into 16-bit little-endian PCM.
#[allow(clippy::cast_possible_truncation)]
fn pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
