//! Microphone capture.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Preferred capture rate (16kHz, what speech services expect).
pub const PREFERRED_SAMPLE_RATE: u32 = 16_000;

/// Cloneable handle to the shared capture buffer. The cpal stream is
/// not `Send`, so it stays with [`AudioCapture`] on the session task
/// while worker tasks drain samples through one of these.
#[derive(Clone)]
pub struct BufferHandle {
    buffer: Arc<Mutex<Vec<f32>>>,
}

impl Default for BufferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferHandle {
    /// A handle backed by a fresh empty buffer, detached from any
    /// device. Useful for feeding synthetic audio.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends samples, the same way the capture callback does.
    pub fn extend(&self, samples: &[f32]) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.extend_from_slice(samples);
        }
    }

    /// Takes all samples captured since the last call.
    #[must_use]
    pub fn take(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Discards everything captured so far.
    pub fn clear(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Captures audio from the default input device into a shared buffer
/// of mono f32 samples at [`Self::sample_rate`].
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Opens the default input device, preferring mono 16kHz. Devices
    /// without that config run at their native config and are downmixed
    /// to mono in the capture callback.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or it cannot be
    /// configured.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PREFERRED_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PREFERRED_SAMPLE_RATE)
            });

        let config = match preferred {
            Some(supported) => supported
                .with_sample_rate(SampleRate(PREFERRED_SAMPLE_RATE))
                .config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio. No-op if already capturing.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started.
    #[allow(clippy::cast_precision_loss)]
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let channels = self.config.channels as usize;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            buf.extend(
                                data.chunks(channels)
                                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                            );
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing. Drops the input stream so the microphone is
    /// released at the device level, not just ignored.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Handle for draining captured audio from another task.
    #[must_use]
    pub fn handle(&self) -> BufferHandle {
        BufferHandle {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Check if currently capturing.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// The rate samples land in the buffer at.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Convert f32 samples to WAV bytes for transcription APIs.
///
/// # Errors
///
/// Returns error if WAV encoding fails.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_handle_take_drains() {
        let handle = BufferHandle::new();
        handle.extend(&[0.1, 0.2, 0.3]);
        assert_eq!(handle.len(), 3);
        assert_eq!(handle.take(), vec![0.1, 0.2, 0.3]);
        assert!(handle.is_empty());
        assert!(handle.take().is_empty());
    }

    #[test]
    fn buffer_handle_clear_discards() {
        let handle = BufferHandle::new();
        handle.extend(&[0.5; 64]);
        handle.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn cloned_handles_share_one_buffer() {
        let handle = BufferHandle::new();
        let other = handle.clone();
        handle.extend(&[0.25; 8]);
        assert_eq!(other.len(), 8);
        assert_eq!(other.take().len(), 8);
        assert!(handle.is_empty());
    }

    #[test]
    fn wav_encoding_produces_riff_header() {
        let samples = vec![0.0_f32; 160];
        let wav = samples_to_wav(&samples, 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus two bytes per sample.
        assert_eq!(wav.len(), 44 + 160 * 2);
    }
}
