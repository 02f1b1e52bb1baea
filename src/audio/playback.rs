//! Synthesized speech playback.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Plays audio on the default output device. One chunk at a time; the
/// playback sequencer enforces ordering above this.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Opens the default output device at 24kHz, mono preferred,
    /// stereo as fallback.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or it cannot be
    /// configured.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Plays mono f32 samples at [`PLAYBACK_SAMPLE_RATE`] to
    /// completion, checking the cancellation token while the device
    /// drains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] if cancelled mid-chunk, or an audio
    /// error if the output stream fails.
    #[allow(clippy::future_not_send)]
    pub async fn play(&self, samples: Vec<f32>, cancel: &CancellationToken) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        let config = self.config.clone();
        let channels = config.channels as usize;

        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(Mutex::new(0_usize));
        let finished = Arc::new(Mutex::new(false));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut pos) = position_cb.lock() else {
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples_cb.len() {
                            let s = samples_cb[*pos];
                            *pos += 1;
                            s
                        } else {
                            if let Ok(mut done) = finished_cb.lock() {
                                *done = true;
                            }
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let started = std::time::Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        loop {
            if finished.lock().map(|done| *done).unwrap_or(true) {
                break;
            }
            if cancel.is_cancelled() {
                drop(stream);
                tracing::debug!("playback cancelled");
                return Err(Error::Stopped);
            }
            if started.elapsed() > timeout {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Let the device drain its internal buffer.
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }

    /// Decode and play MP3 bytes.
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails.
    #[allow(clippy::future_not_send)]
    pub async fn play_mp3(&self, mp3_data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play(samples, cancel).await
    }

    /// Decode and play WAV bytes.
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails.
    #[allow(clippy::future_not_send)]
    pub async fn play_wav(&self, wav_data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let samples = decode_wav(wav_data)?;
        self.play(samples, cancel).await
    }
}

/// Decode MP3 bytes to mono f32 samples at [`PLAYBACK_SAMPLE_RATE`],
/// resampling when the stream uses another rate.
///
/// # Errors
///
/// Returns error if a frame fails to decode.
#[allow(clippy::cast_sign_loss)]
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut source_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                source_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if source_rate == PLAYBACK_SAMPLE_RATE {
        Ok(samples)
    } else {
        super::resample(&samples, source_rate, PLAYBACK_SAMPLE_RATE)
    }
}

/// Decode WAV bytes to mono f32 samples at [`PLAYBACK_SAMPLE_RATE`].
/// The local synthesis fallback emits WAV at its own rate, so this
/// downmixes and resamples as needed.
///
/// # Errors
///
/// Returns error if the WAV data is malformed.
pub fn decode_wav(wav_data: &[u8]) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
    };

    let mono: Vec<f32> = if spec.channels == 2 {
        raw.chunks(2)
            .map(|chunk| f32::midpoint(chunk[0], chunk.get(1).copied().unwrap_or(chunk[0])))
            .collect()
    } else {
        raw
    };

    if spec.sample_rate == PLAYBACK_SAMPLE_RATE {
        Ok(mono)
    } else {
        super::resample(&mono, spec.sample_rate, PLAYBACK_SAMPLE_RATE)
    }
}
